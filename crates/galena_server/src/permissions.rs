use std::fmt;

use glam::IVec3;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use galena_shared::block::{is_restricted, BlockId};

use crate::config::{BlockRankSpec, ZoneSpec};

/// Rank ladder. Ordering is the permission relation: a rank may do
/// anything a lower rank may.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    #[default]
    Guest,
    Builder,
    Operator,
    Owner,
}

/// Per-block minimum ranks for placing and deleting. Owned by rank
/// configuration; the engine only queries it.
#[derive(Debug, Clone)]
pub struct BlockPerms {
    place: FxHashMap<BlockId, Rank>,
    delete: FxHashMap<BlockId, Rank>,
    default_place: Rank,
    default_delete: Rank,
}

impl Default for BlockPerms {
    fn default() -> Self {
        Self {
            place: FxHashMap::default(),
            delete: FxHashMap::default(),
            default_place: Rank::Guest,
            default_delete: Rank::Guest,
        }
    }
}

impl BlockPerms {
    /// Build the tables from config overrides.
    pub fn from_specs(specs: &[BlockRankSpec]) -> Self {
        let mut perms = Self::default();
        for spec in specs {
            let block = BlockId(spec.id);
            if let Some(rank) = spec.place {
                perms.set_place_rank(block, rank);
            }
            if let Some(rank) = spec.delete {
                perms.set_delete_rank(block, rank);
            }
        }
        perms
    }

    pub fn set_place_rank(&mut self, block: BlockId, rank: Rank) {
        self.place.insert(block, rank);
    }

    pub fn set_delete_rank(&mut self, block: BlockId, rank: Rank) {
        self.delete.insert(block, rank);
    }

    pub fn place_rank(&self, block: BlockId) -> Rank {
        match self.place.get(&block) {
            Some(&rank) => rank,
            None if is_restricted(block) => Rank::Operator,
            None => self.default_place,
        }
    }

    pub fn delete_rank(&self, block: BlockId) -> Rank {
        match self.delete.get(&block) {
            Some(&rank) => rank,
            None if is_restricted(block) => Rank::Operator,
            None => self.default_delete,
        }
    }

    pub fn may_place(&self, rank: Rank, block: BlockId) -> bool {
        rank >= self.place_rank(block)
    }

    pub fn may_delete(&self, rank: Rank, block: BlockId) -> bool {
        rank >= self.delete_rank(block)
    }
}

/// Axis-aligned protected region. Edits inside require at least the
/// zone's rank; outside all zones the block tables alone decide.
#[derive(Debug, Clone)]
pub struct Zone {
    pub name: String,
    pub min: IVec3,
    pub max: IVec3,
    pub required: Rank,
}

impl Zone {
    pub fn from_spec(spec: &ZoneSpec) -> Self {
        let a = IVec3::from_array(spec.min);
        let b = IVec3::from_array(spec.max);
        Self {
            name: spec.name.clone(),
            min: a.min(b),
            max: a.max(b),
            required: spec.required,
        }
    }

    pub fn contains(&self, pos: IVec3) -> bool {
        pos.cmpge(self.min).all() && pos.cmple(self.max).all()
    }
}

/// Find the first zone denying `rank` at `pos`, if any.
pub fn denying_zone<'a>(zones: &'a [Zone], pos: IVec3, rank: Rank) -> Option<&'a Zone> {
    zones
        .iter()
        .find(|zone| zone.contains(pos) && rank < zone.required)
}

/// Why a single-cell edit was refused. Policy, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    OutOfBounds,
    PlaceRank(BlockId),
    DeleteRank(BlockId),
    Zone(String),
    DrawLimit { estimate: u64, limit: u64 },
    LevelClosed,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds => write!(f, "position is outside the level"),
            Self::PlaceRank(block) => {
                write!(f, "your rank may not place block {}", block.0)
            }
            Self::DeleteRank(block) => {
                write!(f, "your rank may not delete block {}", block.0)
            }
            Self::Zone(name) => write!(f, "zone '{name}' does not allow you to build here"),
            Self::DrawLimit { estimate, limit } => write!(
                f,
                "operation would affect about {estimate} blocks; your limit is {limit}"
            ),
            Self::LevelClosed => write!(f, "the level is unloading"),
        }
    }
}
