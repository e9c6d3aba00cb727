use std::collections::HashMap;

use glam::IVec3;

use crate::block::{encode_raw, needs_extended, BlockId, RAW_SENTINEL};
use crate::coords::Dims;

/// Dense cell storage for one level: one raw byte per cell plus a sparse
/// side table for logical ids the raw byte cannot represent.
///
/// Not internally synchronized. The owning level serializes mutation.
#[derive(Clone, Debug)]
pub struct WorldGrid {
    dims: Dims,
    raw: Vec<u8>,
    extended: HashMap<u32, u16>,
}

impl WorldGrid {
    pub fn new(dims: Dims) -> Self {
        let volume = usize::try_from(dims.volume()).expect("level volume exceeds usize");
        Self {
            dims,
            raw: vec![encode_raw(BlockId::AIR); volume],
            extended: HashMap::new(),
        }
    }

    /// Rebuild a grid from persisted parts. Extended entries pointing at
    /// cells that do not hold the sentinel are dropped rather than trusted.
    pub fn from_parts(dims: Dims, raw: Vec<u8>, extended: Vec<(u32, u16)>) -> Result<Self, String> {
        let volume = usize::try_from(dims.volume()).expect("level volume exceeds usize");
        if raw.len() != volume {
            return Err(format!(
                "raw cell array has {} bytes; dims {dims:?} require {volume}",
                raw.len()
            ));
        }

        let mut table = HashMap::new();
        for (index, id) in extended {
            if (index as usize) < volume && raw[index as usize] == RAW_SENTINEL {
                table.insert(index, id);
            }
        }

        Ok(Self {
            dims,
            raw,
            extended: table,
        })
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// Decode the logical id at a linear index. Out-of-range indices are a
    /// programmer error; callers bounds-check through [`Dims::index_of`].
    pub fn get(&self, index: u32) -> BlockId {
        let raw = self.raw[index as usize];
        if raw == RAW_SENTINEL {
            BlockId(self.extended.get(&index).copied().unwrap_or(0))
        } else {
            BlockId(u16::from(raw))
        }
    }

    pub fn get_pos(&self, pos: IVec3) -> Option<BlockId> {
        self.dims.index_of(pos).map(|index| self.get(index))
    }

    /// Write a logical id, returning the previous one. Keeps the side
    /// table consistent: an entry exists exactly while the cell holds the
    /// sentinel.
    pub fn set(&mut self, index: u32, block: BlockId) -> BlockId {
        let previous = self.get(index);
        self.raw[index as usize] = encode_raw(block);
        if needs_extended(block) {
            self.extended.insert(index, block.0);
        } else {
            self.extended.remove(&index);
        }
        previous
    }

    pub fn raw_cells(&self) -> &[u8] {
        &self.raw
    }

    pub fn extended_entries(&self) -> Vec<(u32, u16)> {
        let mut entries: Vec<(u32, u16)> = self.extended.iter().map(|(&k, &v)| (k, v)).collect();
        entries.sort_unstable_by_key(|&(index, _)| index);
        entries
    }

    pub fn extended_len(&self) -> usize {
        self.extended.len()
    }
}
