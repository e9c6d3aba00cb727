use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::drawops::{DrawQueue, UndoTransaction};
use crate::level::Actor;
use crate::permissions::Rank;

/// Oldest undo transactions fall off beyond this depth.
const UNDO_DEPTH: usize = 32;

/// Minimum gap between denial notifications for one player. Draw
/// operations sweeping a protected zone would otherwise emit one per cell.
const DENY_NOTIFY_INTERVAL: Duration = Duration::from_secs(2);

/// Session-independent player state the engine cares about: identity,
/// rank, the per-player draw queue and the undo history.
pub struct Player {
    id: u32,
    name: String,
    rank: Rank,
    draw_limit: u64,
    draw_queue: DrawQueue,
    undo: Mutex<Vec<UndoTransaction>>,
    last_deny_notify: Mutex<Option<Instant>>,
}

impl Player {
    pub fn new(id: u32, name: impl Into<String>, rank: Rank, draw_limit: u64) -> Self {
        Self {
            id,
            name: name.into(),
            rank,
            draw_limit,
            draw_queue: DrawQueue::default(),
            undo: Mutex::new(Vec::new()),
            last_deny_notify: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn draw_limit(&self) -> u64 {
        self.draw_limit
    }

    pub fn actor(&self) -> Actor<'_> {
        Actor {
            name: &self.name,
            rank: self.rank,
        }
    }

    pub fn draw_queue(&self) -> &DrawQueue {
        &self.draw_queue
    }

    fn undo_guard(&self) -> MutexGuard<'_, Vec<UndoTransaction>> {
        self.undo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push_undo(&self, tx: UndoTransaction) {
        let mut undo = self.undo_guard();
        if undo.len() == UNDO_DEPTH {
            undo.remove(0);
        }
        undo.push(tx);
    }

    pub(crate) fn pop_undo(&self) -> Option<UndoTransaction> {
        self.undo_guard().pop()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_guard().len()
    }

    /// Whether a denial should be surfaced to this player right now.
    /// Passing the check consumes the slot.
    pub fn should_notify(&self) -> bool {
        let mut last = self
            .last_deny_notify
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < DENY_NOTIFY_INTERVAL => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use galena_shared::block::BlockId;

    use super::{Player, UNDO_DEPTH};
    use crate::drawops::UndoTransaction;
    use crate::permissions::Rank;

    fn tx(index: u32) -> UndoTransaction {
        let mut tx = UndoTransaction::default();
        tx.record(index, BlockId::STONE);
        tx
    }

    #[test]
    fn undo_stack_is_bounded_and_lifo() {
        let player = Player::new(1, "kit", Rank::Builder, 1000);
        for n in 0..(UNDO_DEPTH as u32 + 4) {
            player.push_undo(tx(n));
        }
        assert_eq!(player.undo_depth(), UNDO_DEPTH);

        let newest = player.pop_undo().expect("stack not empty");
        assert_eq!(newest.cells()[0].0, UNDO_DEPTH as u32 + 3);
    }

    #[test]
    fn denial_notifications_are_rate_limited() {
        let player = Player::new(2, "ash", Rank::Guest, 1000);
        assert!(player.should_notify());
        assert!(!player.should_notify());
    }
}
