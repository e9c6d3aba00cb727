use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use glam::IVec3;
use tracing::debug;

use galena_persist::changelog::ChangeFlags;
use galena_shared::block::BlockId;

use crate::draw::{Brush, Shape};
use crate::events::ServerEvent;
use crate::level::Level;
use crate::permissions::DenyReason;
use crate::player::Player;

/// A queued bulk edit: a shape, a brush to decide each cell, and the
/// provenance flags its change log records carry.
pub struct DrawOperation {
    pub shape: Box<dyn Shape>,
    pub brush: Box<dyn Brush>,
    pub undoable: bool,
    pub flags: ChangeFlags,
}

impl DrawOperation {
    pub fn new(shape: Box<dyn Shape>, brush: Box<dyn Brush>) -> Self {
        Self {
            shape,
            brush,
            undoable: true,
            flags: ChangeFlags::DRAWN,
        }
    }
}

/// Previous values captured by one undoable operation, in commit order.
#[derive(Default)]
pub struct UndoTransaction {
    cells: Vec<(u32, BlockId)>,
}

impl UndoTransaction {
    pub fn record(&mut self, index: u32, old: BlockId) {
        self.cells.push((index, old));
    }

    pub fn cells(&self) -> &[(u32, BlockId)] {
        &self.cells
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

struct QueueState {
    ops: VecDeque<DrawOperation>,
    draining: bool,
}

/// Per-player operation queue with a cooperative drainer: whichever
/// thread submits into an idle queue drains it, including operations
/// submitted while it works. One player's operations never interleave.
pub struct DrawQueue {
    state: Mutex<QueueState>,
}

impl Default for DrawQueue {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState {
                ops: VecDeque::new(),
                draining: false,
            }),
        }
    }
}

impl DrawQueue {
    fn state_guard(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn queued(&self) -> usize {
        self.state_guard().ops.len()
    }
}

/// Enqueue an operation and drain the queue if nobody else is. Returns
/// once this player's queue is empty or another thread owns the drain.
pub fn submit(level: &Arc<Level>, player: &Arc<Player>, op: DrawOperation) {
    {
        let mut state = player.draw_queue().state_guard();
        state.ops.push_back(op);
        if state.draining {
            return;
        }
        state.draining = true;
    }

    loop {
        let op = {
            let mut state = player.draw_queue().state_guard();
            match state.ops.pop_front() {
                Some(op) => op,
                None => {
                    state.draining = false;
                    return;
                }
            }
        };
        execute_draw(level, player, op);
    }
}

fn execute_draw(level: &Arc<Level>, player: &Arc<Player>, op: DrawOperation) {
    let DrawOperation {
        shape,
        mut brush,
        undoable,
        flags,
    } = op;

    let estimate = shape.estimate();
    if estimate > player.draw_limit() {
        let pos = shape.coords().next().unwrap_or(IVec3::ZERO);
        level.events().send_lossy(ServerEvent::EditDenied {
            level: level.shared_name(),
            player: player.name().to_string(),
            pos,
            reason: DenyReason::DrawLimit {
                estimate,
                limit: player.draw_limit(),
            },
        });
        return;
    }

    let mut tx = UndoTransaction::default();
    let mut changed: u64 = 0;

    for pos in shape.coords() {
        match level.commit_with(player.actor(), pos, flags, |current| {
            brush.next_block(pos, current)
        }) {
            Ok(Some(committed)) => {
                changed += 1;
                if undoable {
                    tx.record(committed.index, committed.old);
                }
            }
            Ok(None) => {}
            // Shapes may overhang the level; those cells just do not exist.
            Err(DenyReason::OutOfBounds) => {}
            Err(DenyReason::LevelClosed) => break,
            Err(reason) => {
                if player.should_notify() {
                    level.events().send_lossy(ServerEvent::EditDenied {
                        level: level.shared_name(),
                        player: player.name().to_string(),
                        pos,
                        reason,
                    });
                }
            }
        }
    }

    if changed > level.reload_threshold() {
        // The deltas are superseded; observers resend the whole level.
        level.clear_pending();
        level
            .events()
            .send_lossy(ServerEvent::ReloadThresholdExceeded {
                level: level.shared_name(),
            });
    }

    if undoable && !tx.is_empty() {
        player.push_undo(tx);
    }

    debug!(
        "Draw by '{}' on '{}' changed {changed} of ~{estimate} cells",
        player.name(),
        level.name()
    );
    level.events().send_lossy(ServerEvent::DrawCompleted {
        level: level.shared_name(),
        player: player.name().to_string(),
        changed,
    });
}

/// Revert the player's most recent undoable operation. Restores run
/// newest-cell-first without policy checks and are themselves logged with
/// the RESTORED flag. Returns the number of cells written back.
pub fn undo_last(level: &Level, player: &Player) -> u64 {
    let Some(tx) = player.pop_undo() else {
        return 0;
    };

    let mut restored = 0u64;
    for &(index, old) in tx.cells().iter().rev() {
        level.commit_unchecked(index, old, ChangeFlags::RESTORED);
        restored += 1;
    }
    debug!(
        "Undid last draw by '{}' on '{}': {restored} cells restored",
        player.name(),
        level.name()
    );
    restored
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use glam::IVec3;

    use galena_core::events::{channel, EventReceiver};
    use galena_core::jobs::JobSystem;
    use galena_persist::changelog::ChangeFlags;
    use galena_shared::block::BlockId;

    use super::{submit, undo_last, DrawOperation};
    use crate::blockdb::HistoryFilter;
    use crate::config::LevelSpec;
    use crate::draw::{Cuboid, SolidBrush};
    use crate::events::ServerEvent;
    use crate::level::{Level, LevelContext};
    use crate::permissions::{BlockPerms, DenyReason, Rank};
    use crate::physics::RuleTable;
    use crate::player::Player;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "galena_drawops_{tag}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn level_in(
        dir: &PathBuf,
        reload_threshold: u64,
    ) -> (Arc<Level>, EventReceiver<ServerEvent>) {
        let (tx, rx) = channel();
        let ctx = LevelContext {
            data_dir: dir.clone(),
            flush_threshold: 100_000,
            flush_wait: Duration::from_millis(50),
            reload_threshold,
            max_volume: 512 * 512 * 512,
            perms: BlockPerms::default(),
            jobs: Arc::new(JobSystem::new(Some(2)).expect("build pool")),
            events: tx,
        };
        let spec = LevelSpec {
            name: "draw".to_string(),
            width: 32,
            height: 32,
            length: 32,
            physics: false,
            zones: Vec::new(),
        };
        let level = Level::load(&spec, Arc::new(RuleTable::default()), &ctx).expect("load level");
        (level, rx)
    }

    fn cuboid_fill(a: IVec3, b: IVec3, block: BlockId) -> DrawOperation {
        DrawOperation::new(Box::new(Cuboid::new(a, b)), Box::new(SolidBrush { block }))
    }

    #[test]
    fn solid_cuboid_draw_commits_every_cell_once() {
        let dir = temp_dir("cuboid");
        let (level, rx) = level_in(&dir, 100_000);
        let player = Arc::new(Player::new(1, "kit", Rank::Builder, 32_768));

        submit(
            &level,
            &player,
            cuboid_fill(IVec3::new(0, 20, 0), IVec3::new(9, 29, 9), BlockId::STONE),
        );

        assert_eq!(level.changelog().cached_len(), 1000);
        assert_eq!(level.pending_len(), 1000);
        assert_eq!(level.grid_guard().get_pos(IVec3::new(9, 29, 9)), Some(BlockId::STONE));

        let completed = rx
            .try_iter()
            .filter_map(|event| match event {
                ServerEvent::DrawCompleted { changed, .. } => Some(changed),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(completed, vec![1000]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn over_limit_operation_is_refused_before_any_mutation() {
        let dir = temp_dir("limit");
        let (level, rx) = level_in(&dir, 100_000);
        let player = Arc::new(Player::new(2, "ash", Rank::Builder, 100));

        submit(
            &level,
            &player,
            cuboid_fill(IVec3::new(0, 16, 0), IVec3::new(9, 25, 9), BlockId::STONE),
        );

        assert_eq!(level.changelog().cached_len(), 0);
        assert_eq!(level.pending_len(), 0);
        match rx.try_recv().expect("denial event") {
            ServerEvent::EditDenied {
                reason: DenyReason::DrawLimit { estimate, limit },
                ..
            } => {
                assert_eq!(estimate, 1000);
                assert_eq!(limit, 100);
            }
            other => panic!("unexpected event {other:?}"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn per_cell_denials_are_silent_except_one_notification() {
        let dir = temp_dir("denials");
        let (level, rx) = level_in(&dir, 100_000);
        let player = Arc::new(Player::new(3, "sam", Rank::Guest, 32_768));

        // ADAMANT requires operator; every cell is refused.
        submit(
            &level,
            &player,
            cuboid_fill(IVec3::new(0, 20, 0), IVec3::new(4, 24, 4), BlockId::ADAMANT),
        );

        assert_eq!(level.changelog().cached_len(), 0);
        let denials = rx
            .try_iter()
            .filter(|event| matches!(event, ServerEvent::EditDenied { .. }))
            .count();
        assert_eq!(denials, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn undo_restores_previous_blocks_with_the_restored_flag() {
        let dir = temp_dir("undo");
        let (level, _rx) = level_in(&dir, 100_000);
        let player = Arc::new(Player::new(4, "kit", Rank::Builder, 32_768));

        let region = (IVec3::new(2, 20, 2), IVec3::new(4, 22, 4));
        submit(&level, &player, cuboid_fill(region.0, region.1, BlockId::BRICK));
        assert_eq!(player.undo_depth(), 1);

        let restored = undo_last(&level, &player);
        assert_eq!(restored, 27);
        assert_eq!(player.undo_depth(), 0);
        assert_eq!(level.grid_guard().get_pos(region.0), Some(BlockId::AIR));

        let restores = level
            .changelog()
            .query(&HistoryFilter::All)
            .expect("query")
            .iter()
            .filter(|entry| entry.flags.contains(ChangeFlags::RESTORED))
            .count();
        assert_eq!(restores, 27);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reload_threshold_swaps_deltas_for_a_reload_hint() {
        let dir = temp_dir("reload");
        let (level, rx) = level_in(&dir, 50);
        let player = Arc::new(Player::new(5, "ash", Rank::Builder, 32_768));

        submit(
            &level,
            &player,
            cuboid_fill(IVec3::new(0, 20, 0), IVec3::new(4, 24, 4), BlockId::STONE),
        );

        assert_eq!(level.pending_len(), 0);
        assert!(rx
            .try_iter()
            .any(|event| matches!(event, ServerEvent::ReloadThresholdExceeded { .. })));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn concurrent_submits_never_interleave_one_players_operations() {
        let dir = temp_dir("serial");
        let (level, _rx) = level_in(&dir, 100_000);
        let player = Arc::new(Player::new(6, "kit", Rank::Builder, 32_768));

        let region = (IVec3::new(0, 16, 0), IVec3::new(7, 23, 7));
        let mut handles = Vec::new();
        for block in [BlockId::STONE, BlockId::BRICK, BlockId::GLASS, BlockId::SAND] {
            let level = level.clone();
            let player = player.clone();
            handles.push(std::thread::spawn(move || {
                submit(&level, &player, cuboid_fill(region.0, region.1, block));
            }));
        }
        for handle in handles {
            handle.join().expect("submit thread");
        }

        // Operations ran in some order, but whole; the region is uniform.
        assert_eq!(player.draw_queue().queued(), 0);
        let grid = level.grid_guard();
        let last = grid.get_pos(region.0).expect("in bounds");
        let all_equal = (0..8).all(|y| {
            (0..8).all(|z| {
                (0..8).all(|x| {
                    grid.get_pos(IVec3::new(x, 16 + y, z)) == Some(last)
                })
            })
        });
        assert!(all_equal, "draw operations interleaved");
        drop(grid);
        std::fs::remove_dir_all(&dir).ok();
    }
}
