use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

#[repr(transparent)]
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Pod,
    Zeroable,
)]
pub struct BlockId(pub u16);

impl BlockId {
    pub const AIR: Self = Self(0);
    pub const STONE: Self = Self(1);
    pub const TURF: Self = Self(2);
    pub const SOIL: Self = Self(3);
    pub const RUBBLE: Self = Self(4);
    pub const PLANKS: Self = Self(5);
    pub const SAPLING: Self = Self(6);
    pub const ADAMANT: Self = Self(7);
    pub const WATER_FLOWING: Self = Self(8);
    pub const WATER_SOURCE: Self = Self(9);
    pub const LAVA_FLOWING: Self = Self(10);
    pub const LAVA_SOURCE: Self = Self(11);
    pub const SAND: Self = Self(12);
    pub const GRAVEL: Self = Self(13);
    pub const GOLD_VEIN: Self = Self(14);
    pub const IRON_VEIN: Self = Self(15);
    pub const COAL_VEIN: Self = Self(16);
    pub const TIMBER: Self = Self(17);
    pub const LEAVES: Self = Self(18);
    pub const SPONGE: Self = Self(19);
    pub const GLASS: Self = Self(20);
    pub const SLAB: Self = Self(44);
    pub const BRICK: Self = Self(45);
    pub const BLASTING_KEG: Self = Self(46);
    pub const MOSSY_RUBBLE: Self = Self(48);
    pub const OBSIDIAN: Self = Self(49);
    pub const DOOR_CLOSED: Self = Self(50);
    pub const DOOR_OPEN: Self = Self(51);
    pub const MIST: Self = Self(52);
}

/// Logical ids below this value round-trip as a single raw cell byte.
/// Ids at or above it store [`RAW_SENTINEL`] in the cell and the real id
/// in the grid's extended side table.
pub const EXTENDED_START: u16 = 255;

/// Raw cell marker meaning "consult the extended side table".
pub const RAW_SENTINEL: u8 = 0xFF;

pub fn needs_extended(block: BlockId) -> bool {
    block.0 >= EXTENDED_START
}

/// Encode a logical id into its raw cell byte. The caller maintains the
/// side table when this returns [`RAW_SENTINEL`].
pub fn encode_raw(block: BlockId) -> u8 {
    if needs_extended(block) {
        RAW_SENTINEL
    } else {
        block.0 as u8
    }
}

pub fn is_water(block: BlockId) -> bool {
    block == BlockId::WATER_SOURCE || block == BlockId::WATER_FLOWING
}

pub fn is_lava(block: BlockId) -> bool {
    block == BlockId::LAVA_SOURCE || block == BlockId::LAVA_FLOWING
}

pub fn is_liquid(block: BlockId) -> bool {
    is_water(block) || is_lava(block)
}

/// Blocks that fall straight down through air and liquids.
pub fn is_powder(block: BlockId) -> bool {
    block == BlockId::SAND || block == BlockId::GRAVEL
}

pub fn is_door(block: BlockId) -> bool {
    block == BlockId::DOOR_CLOSED || block == BlockId::DOOR_OPEN
}

/// Liquids may displace these when flowing.
pub fn liquid_can_displace(block: BlockId) -> bool {
    block == BlockId::AIR || block == BlockId::MIST
}

/// Blocks only operators may place or delete regardless of rank tables.
pub fn is_restricted(block: BlockId) -> bool {
    matches!(
        block,
        BlockId::ADAMANT | BlockId::LAVA_SOURCE | BlockId::WATER_SOURCE | BlockId::BLASTING_KEG
    )
}
