use crate::block::BlockId;

/// One committed cell change, bit-packed for the pending-broadcast queue.
///
/// Layout: bits 16..64 hold the linear cell index, bits 0..16 the new
/// logical block id. A 48-bit index covers the maximum level volume
/// (16384^3 < 2^43) with room to spare.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PackedChange(u64);

impl PackedChange {
    pub fn new(index: u32, block: BlockId) -> Self {
        Self((u64::from(index) << 16) | u64::from(block.0))
    }

    pub fn index(self) -> u32 {
        (self.0 >> 16) as u32
    }

    pub fn block(self) -> BlockId {
        BlockId(self.0 as u16)
    }

    pub fn to_bits(self) -> u64 {
        self.0
    }

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::PackedChange;
    use crate::block::BlockId;

    #[test]
    fn pack_and_unpack_preserve_both_fields() {
        for (index, id) in [(0u32, 0u16), (1, 1), (4095, 65535), (u32::MAX, 7)] {
            let packed = PackedChange::new(index, BlockId(id));
            assert_eq!(packed.index(), index);
            assert_eq!(packed.block(), BlockId(id));
            assert_eq!(PackedChange::from_bits(packed.to_bits()), packed);
        }
    }

    #[test]
    fn block_id_never_bleeds_into_the_index_bits() {
        let packed = PackedChange::new(0, BlockId(u16::MAX));
        assert_eq!(packed.index(), 0);
    }
}
