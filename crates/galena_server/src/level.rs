use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use glam::IVec3;
use tracing::{info, warn};

use galena_core::events::EventSender;
use galena_core::jobs::JobSystem;
use galena_persist::changelog::{ChangeEntry, ChangeFlags};
use galena_persist::snapshot::{read_snapshot, write_snapshot};
use galena_shared::block::BlockId;
use galena_shared::coords::{Dims, NEIGHBOR_DIRECTIONS};
use galena_shared::grid::WorldGrid;
use galena_shared::packed::PackedChange;

use crate::blockdb::{replay, ChangeLog, FlushResult};
use crate::config::LevelSpec;
use crate::events::ServerEvent;
use crate::permissions::{denying_zone, BlockPerms, DenyReason, Rank, Zone};
use crate::physics::{PhysicsArgs, PhysicsState, RuleTable};

/// Who is asking for a mutation.
#[derive(Debug, Clone, Copy)]
pub struct Actor<'a> {
    pub name: &'a str,
    pub rank: Rank,
}

/// One accepted mutation, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Committed {
    pub index: u32,
    pub old: BlockId,
    pub new: BlockId,
}

/// Engine-wide wiring a level needs beyond its own spec.
#[derive(Clone)]
pub struct LevelContext {
    pub data_dir: PathBuf,
    pub flush_threshold: usize,
    pub flush_wait: Duration,
    pub reload_threshold: u64,
    pub max_volume: u64,
    pub perms: BlockPerms,
    pub jobs: Arc<JobSystem>,
    pub events: EventSender<ServerEvent>,
}

/// One loaded level: the grid, its change log, its pending broadcast
/// queue and its physics schedule. All mutation funnels through
/// [`Level::commit_with`], which holds the grid lock across the whole
/// read-check-write-log sequence.
pub struct Level {
    name: Arc<str>,
    grid: Mutex<WorldGrid>,
    changelog: Arc<ChangeLog>,
    physics: PhysicsState,
    pending: Mutex<VecDeque<PackedChange>>,
    perms: BlockPerms,
    zones: Vec<Zone>,
    reload_threshold: u64,
    jobs: Arc<JobSystem>,
    events: EventSender<ServerEvent>,
    epoch: Instant,
    disposed: AtomicBool,
    snapshot_path: PathBuf,
}

impl Level {
    /// Load a level from its snapshot and change log, or generate a fresh
    /// one when neither exists yet. The snapshot records how many log
    /// records it already accounts for; only the tail is replayed.
    pub fn load(
        spec: &LevelSpec,
        rules: Arc<RuleTable>,
        ctx: &LevelContext,
    ) -> io::Result<Arc<Self>> {
        let dims = Dims::new(spec.width, spec.height, spec.length)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        if dims.volume() > ctx.max_volume {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "level '{}' has {} cells; the configured maximum is {}",
                    spec.name,
                    dims.volume(),
                    ctx.max_volume
                ),
            ));
        }

        let snapshot_path = ctx.data_dir.join(format!("{}.glvl", spec.name));
        let log_path = ctx.data_dir.join(format!("{}.gldb", spec.name));
        let changelog = Arc::new(ChangeLog::open(
            &log_path,
            ctx.flush_threshold,
            ctx.flush_wait,
        )?);

        let (mut grid, replay_from) = match read_snapshot(&snapshot_path)? {
            Some((grid, log_records)) => {
                if grid.dims() != dims {
                    warn!(
                        "Level '{}' snapshot dims {:?} differ from configured {:?}; keeping the snapshot",
                        spec.name,
                        grid.dims(),
                        dims
                    );
                }
                (grid, log_records)
            }
            None => (generate_flat(dims), 0),
        };

        let tail = changelog.replay_tail(replay_from)?;
        if !tail.is_empty() {
            info!(
                "Replaying {} change log records into level '{}'",
                tail.len(),
                spec.name
            );
            replay(&tail, &mut grid);
        }

        let volume = usize::try_from(grid.dims().volume()).expect("level volume exceeds usize");
        let level = Arc::new(Self {
            name: Arc::from(spec.name.as_str()),
            physics: PhysicsState::new(volume, rules, spec.physics),
            grid: Mutex::new(grid),
            changelog,
            pending: Mutex::new(VecDeque::new()),
            perms: ctx.perms.clone(),
            zones: spec.zones.iter().map(Zone::from_spec).collect(),
            reload_threshold: ctx.reload_threshold,
            jobs: ctx.jobs.clone(),
            events: ctx.events.clone(),
            epoch: Instant::now(),
            disposed: AtomicBool::new(false),
            snapshot_path,
        });
        info!("Loaded level '{}' ({:?})", level.name, level.dims());
        Ok(level)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shared_name(&self) -> Arc<str> {
        self.name.clone()
    }

    pub fn dims(&self) -> Dims {
        self.grid_guard().dims()
    }

    pub fn physics(&self) -> &PhysicsState {
        &self.physics
    }

    pub fn changelog(&self) -> &ChangeLog {
        &self.changelog
    }

    pub fn events(&self) -> &EventSender<ServerEvent> {
        &self.events
    }

    pub fn reload_threshold(&self) -> u64 {
        self.reload_threshold
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn grid_guard(&self) -> MutexGuard<'_, WorldGrid> {
        self.grid.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_guard(&self) -> MutexGuard<'_, VecDeque<PackedChange>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whole seconds since this level was loaded; the timestamp stored in
    /// change log records.
    pub fn timestamp(&self) -> u32 {
        u32::try_from(self.epoch.elapsed().as_secs()).unwrap_or(u32::MAX)
    }

    /// Commit a single-cell mutation chosen by `choose`, which sees the
    /// current block under the grid lock. Returns `Ok(None)` when the
    /// chooser declines or picks the value already present; neither is a
    /// denial. Permission checks cover both sides of the mutation: delete
    /// rights on the outgoing block, place rights on the incoming one.
    pub fn commit_with(
        &self,
        actor: Actor<'_>,
        pos: IVec3,
        flags: ChangeFlags,
        choose: impl FnOnce(BlockId) -> Option<BlockId>,
    ) -> Result<Option<Committed>, DenyReason> {
        if self.is_disposed() {
            return Err(DenyReason::LevelClosed);
        }

        let mut grid = self.grid_guard();
        let Some(index) = grid.dims().index_of(pos) else {
            return Err(DenyReason::OutOfBounds);
        };

        let old = grid.get(index);
        let Some(new) = choose(old) else {
            return Ok(None);
        };
        if new == old {
            return Ok(None);
        }

        if let Some(zone) = denying_zone(&self.zones, pos, actor.rank) {
            return Err(DenyReason::Zone(zone.name.clone()));
        }
        // Overwriting a cell deletes whatever is there, so both checks
        // apply: delete rights on the old block, place rights on the new.
        if old != BlockId::AIR && !self.perms.may_delete(actor.rank, old) {
            return Err(DenyReason::DeleteRank(old));
        }
        if new != BlockId::AIR && !self.perms.may_place(actor.rank, new) {
            return Err(DenyReason::PlaceRank(new));
        }

        grid.set(index, new);
        self.record_commit(index, pos, old, new, flags, &grid);
        drop(grid);

        self.events.send_lossy(ServerEvent::BlockCommitted {
            level: self.name.clone(),
            index,
            old,
            new,
        });
        Ok(Some(Committed { index, old, new }))
    }

    /// Plain single-cell commit; the common case for direct player edits.
    pub fn commit(
        &self,
        actor: Actor<'_>,
        pos: IVec3,
        block: BlockId,
        flags: ChangeFlags,
    ) -> Result<Option<Committed>, DenyReason> {
        self.commit_with(actor, pos, flags, |_| Some(block))
    }

    /// Physics writes bypass rank and zone policy but go through the same
    /// log-and-broadcast pipeline as every other mutation.
    pub fn commit_physics(&self, index: u32, block: BlockId) {
        self.commit_unchecked(index, block, ChangeFlags::PHYSICS);
    }

    /// Policy-free commit used by physics and by undo restores. Still
    /// logged, queued and neighbor-woken like any other mutation.
    pub fn commit_unchecked(&self, index: u32, block: BlockId, flags: ChangeFlags) {
        if self.is_disposed() {
            return;
        }

        let mut grid = self.grid_guard();
        if u64::from(index) >= grid.dims().volume() {
            return;
        }
        let old = grid.get(index);
        if old == block {
            return;
        }

        let pos = grid.dims().pos_of(index);
        grid.set(index, block);
        self.record_commit(index, pos, old, block, flags, &grid);
        drop(grid);

        self.events.send_lossy(ServerEvent::BlockCommitted {
            level: self.name.clone(),
            index,
            old,
            new: block,
        });
    }

    /// Log, broadcast-queue and physics-wake bookkeeping shared by all
    /// commit paths. Runs with the grid lock held so the log order matches
    /// the mutation order.
    fn record_commit(
        &self,
        index: u32,
        pos: IVec3,
        old: BlockId,
        new: BlockId,
        flags: ChangeFlags,
        grid: &WorldGrid,
    ) {
        let crossed = self.changelog.append(ChangeEntry {
            index,
            old,
            new,
            flags,
            timestamp: self.timestamp(),
        });
        if crossed {
            self.spawn_background_flush();
        }

        self.pending_guard().push_back(PackedChange::new(index, new));

        // Wake the changed cell and its six neighbors; cells without a
        // registered rule are filtered out at tick time.
        self.physics.schedule_check(index, PhysicsArgs::default());
        for dir in NEIGHBOR_DIRECTIONS {
            if let Some(neighbor) = grid.dims().index_of(pos + dir) {
                self.physics.schedule_check(neighbor, PhysicsArgs::default());
            }
        }
    }

    /// Hand the cache to the job pool if nobody else already has. The
    /// claim guarantees at most one queued background flush per level.
    fn spawn_background_flush(&self) {
        if !self.changelog.claim_flush() {
            return;
        }

        let changelog = self.changelog.clone();
        let name = self.name.clone();
        self.jobs.spawn(move || {
            match changelog.flush() {
                Ok(FlushResult::Flushed(_)) | Ok(FlushResult::Skipped) => {}
                Err(err) => warn!("Background flush for level '{name}' failed: {err}"),
            }
            changelog.release_flush_claim();
        });
    }

    /// Drain up to `max` queued broadcast changes in commit order.
    pub fn take_pending(&self, max: usize) -> Vec<PackedChange> {
        let mut pending = self.pending_guard();
        let count = pending.len().min(max);
        pending.drain(..count).collect()
    }

    /// Drop the queue wholesale; used when no observer is connected or a
    /// reload supersedes the deltas.
    pub fn clear_pending(&self) {
        self.pending_guard().clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending_guard().len()
    }

    /// Flush the change log and write a snapshot that accounts for every
    /// flushed record. Commits are blocked for the duration, so snapshot
    /// and record count cannot drift apart.
    pub fn save(&self) -> io::Result<()> {
        let grid = self.grid_guard();
        self.changelog.flush_blocking()?;
        let records = self.changelog.disk_records()?;
        write_snapshot(&self.snapshot_path, &grid, records)?;
        info!(
            "Saved level '{}' ({} log records accounted for)",
            self.name, records
        );
        Ok(())
    }

    /// Mark the level closed, persist it and drop transient state. Late
    /// commits observe the disposed flag and are refused.
    pub fn unload(&self) -> io::Result<()> {
        self.disposed.store(true, Ordering::Release);
        self.physics.set_enabled(false);
        let result = self.save();
        self.clear_pending();
        info!("Unloaded level '{}'", self.name);
        result
    }
}

/// Terrain for a brand-new level: soil up to the midline, turf on top,
/// air above. Enough to build on without a generator stage.
fn generate_flat(dims: Dims) -> WorldGrid {
    let mut grid = WorldGrid::new(dims);
    let surface = dims.height / 2;
    for y in 0..surface {
        let block = if y + 1 == surface {
            BlockId::TURF
        } else {
            BlockId::SOIL
        };
        for z in 0..dims.length {
            for x in 0..dims.width {
                let pos = IVec3::new(x as i32, y as i32, z as i32);
                if let Some(index) = dims.index_of(pos) {
                    grid.set(index, block);
                }
            }
        }
    }
    grid
}
