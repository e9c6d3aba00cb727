use std::sync::Arc;

use glam::IVec3;

use galena_shared::block::BlockId;

use crate::permissions::DenyReason;

/// Outbound notifications for the session/broadcast layer. Fired through
/// a `galena_core` event channel; the engine never blocks on consumers.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Exactly one per accepted mutation.
    BlockCommitted {
        level: Arc<str>,
        index: u32,
        old: BlockId,
        new: BlockId,
    },
    /// A draw operation changed enough cells that observers should pull a
    /// fresh level snapshot instead of replaying deltas.
    ReloadThresholdExceeded { level: Arc<str> },
    /// Policy rejection the actor should hear about (rate limited at the
    /// source).
    EditDenied {
        level: Arc<str>,
        player: String,
        pos: IVec3,
        reason: DenyReason,
    },
    DrawCompleted {
        level: Arc<str>,
        player: String,
        changed: u64,
    },
}
