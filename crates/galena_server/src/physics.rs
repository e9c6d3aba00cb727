use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bitvec::vec::BitVec;
use glam::IVec3;
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use galena_shared::block::BlockId;
use galena_shared::grid::WorldGrid;

use crate::level::Level;

/// Sleep granularity inside the physics loop; bounds how long a join can
/// lag behind the stop signal.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Auxiliary data carried by a scheduled re-evaluation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PhysicsArgs {
    /// Ticks to wait before the handler runs.
    pub delay: u16,
    /// Chance in 255ths that the cell dissipates when evaluated.
    pub dissipate_chance: u8,
    /// Block to revert to once the delay elapses (AIR means unset).
    pub revert_to: BlockId,
}

#[derive(Copy, Clone, Debug)]
pub struct PendingCheck {
    pub index: u32,
    pub args: PhysicsArgs,
}

#[derive(Copy, Clone, Debug)]
pub struct PendingUpdate {
    pub index: u32,
    pub block: BlockId,
}

/// The cell a handler is being asked about.
#[derive(Copy, Clone, Debug)]
pub struct Cell {
    pub index: u32,
    pub pos: IVec3,
    pub block: BlockId,
    pub args: PhysicsArgs,
}

/// Read-only view of the grid plus the schedule buffers for one tick.
pub struct TickContext<'a> {
    grid: &'a WorldGrid,
    rng: fastrand::Rng,
    updates: Vec<PendingUpdate>,
    checks: Vec<PendingCheck>,
}

impl<'a> TickContext<'a> {
    pub(crate) fn new(grid: &'a WorldGrid) -> Self {
        Self {
            grid,
            rng: fastrand::Rng::new(),
            updates: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub fn block_at(&self, pos: IVec3) -> Option<BlockId> {
        self.grid.get_pos(pos)
    }

    pub fn schedule_update(&mut self, pos: IVec3, block: BlockId) {
        if let Some(index) = self.grid.dims().index_of(pos) {
            self.updates.push(PendingUpdate { index, block });
        }
    }

    pub fn schedule_check(&mut self, pos: IVec3, args: PhysicsArgs) {
        if let Some(index) = self.grid.dims().index_of(pos) {
            self.checks.push(PendingCheck { index, args });
        }
    }

    /// Roll a chance expressed in 255ths.
    pub fn roll(&mut self, chance: u8) -> bool {
        chance > 0 && self.rng.u8(..) < chance
    }

    pub(crate) fn scheduled_updates(&self) -> &[PendingUpdate] {
        &self.updates
    }

    pub(crate) fn scheduled_checks(&self) -> &[PendingCheck] {
        &self.checks
    }
}

/// One behavior for a block family. Implementations read neighbors and
/// schedule updates/re-checks; they never mutate the grid directly.
pub trait PhysicsRule: Send + Sync {
    fn evaluate(&self, cell: Cell, ctx: &mut TickContext<'_>);
}

/// Block id -> handler lookup, injected per level so tests can substitute
/// rule sets.
#[derive(Default)]
pub struct RuleTable {
    rules: FxHashMap<BlockId, Arc<dyn PhysicsRule>>,
}

impl RuleTable {
    pub fn register(&mut self, block: BlockId, rule: Arc<dyn PhysicsRule>) {
        self.rules.insert(block, rule);
    }

    pub fn get(&self, block: BlockId) -> Option<&Arc<dyn PhysicsRule>> {
        self.rules.get(&block)
    }

    pub fn has_rule(&self, block: BlockId) -> bool {
        self.rules.contains_key(&block)
    }
}

struct PhysLists {
    checks: VecDeque<PendingCheck>,
    /// One bit per cell: whether that index is already in `checks`.
    present: BitVec,
    updates: Vec<PendingUpdate>,
    /// Destination index -> slot in `updates`; later schedules overwrite.
    update_slots: FxHashMap<u32, usize>,
}

/// Per-level pending physics work. Scheduling is presence-deduplicated;
/// the tick loop drains it.
pub struct PhysicsState {
    lists: Mutex<PhysLists>,
    rules: Arc<RuleTable>,
    enabled: AtomicBool,
}

impl PhysicsState {
    pub fn new(volume: usize, rules: Arc<RuleTable>, enabled: bool) -> Self {
        Self {
            lists: Mutex::new(PhysLists {
                checks: VecDeque::new(),
                present: BitVec::repeat(false, volume),
                updates: Vec::new(),
                update_slots: FxHashMap::default(),
            }),
            rules,
            enabled: AtomicBool::new(enabled),
        }
    }

    fn lists_guard(&self) -> MutexGuard<'_, PhysLists> {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn rules(&self) -> &Arc<RuleTable> {
        &self.rules
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Queue a cell for re-evaluation. A cell already queued stays where
    /// it is; scheduling is idempotent per tick.
    pub fn schedule_check(&self, index: u32, args: PhysicsArgs) {
        let mut lists = self.lists_guard();
        let slot = index as usize;
        if slot >= lists.present.len() || lists.present[slot] {
            return;
        }
        lists.present.set(slot, true);
        lists.checks.push_back(PendingCheck { index, args });
    }

    /// Queue a block write for the apply phase. Within one tick the last
    /// schedule for a destination wins.
    pub fn schedule_update(&self, index: u32, block: BlockId) {
        let mut lists = self.lists_guard();
        if let Some(&slot) = lists.update_slots.get(&index) {
            lists.updates[slot].block = block;
        } else {
            let slot = lists.updates.len();
            lists.updates.push(PendingUpdate { index, block });
            lists.update_slots.insert(index, slot);
        }
    }

    pub fn pending_checks(&self) -> usize {
        self.lists_guard().checks.len()
    }

    pub fn pending_updates(&self) -> usize {
        self.lists_guard().updates.len()
    }

    /// Pop every check due this tick. Delayed entries stay queued with
    /// their countdown decremented. Entries scheduled while the tick runs
    /// land behind the snapshot and wait for the next tick.
    fn take_due_checks(&self) -> Vec<PendingCheck> {
        let mut lists = self.lists_guard();
        let mut due = Vec::new();
        for _ in 0..lists.checks.len() {
            let Some(mut check) = lists.checks.pop_front() else {
                break;
            };
            if check.args.delay > 0 {
                check.args.delay -= 1;
                lists.checks.push_back(check);
            } else {
                let slot = check.index as usize;
                lists.present.set(slot, false);
                due.push(check);
            }
        }
        due
    }

    fn take_updates(&self) -> Vec<PendingUpdate> {
        let mut lists = self.lists_guard();
        lists.update_slots.clear();
        std::mem::take(&mut lists.updates)
    }
}

/// One simulation tick for one level: evaluate due cells, then apply the
/// collected updates through the level's commit path.
pub fn run_tick(level: &Level) {
    let physics = level.physics();
    if !physics.enabled() {
        return;
    }

    let due = physics.take_due_checks();
    let mut scheduled_updates = Vec::new();
    let mut scheduled_checks = Vec::new();

    if !due.is_empty() {
        let grid = level.grid_guard();
        let mut ctx = TickContext::new(&grid);
        for check in due {
            let block = ctx.grid.get(check.index);
            let Some(rule) = physics.rules().get(block) else {
                continue;
            };
            let cell = Cell {
                index: check.index,
                pos: ctx.grid.dims().pos_of(check.index),
                block,
                args: check.args,
            };

            // A faulting handler is isolated to its cell: its partial
            // schedules are dropped and the tick carries on.
            let (updates_before, checks_before) = (ctx.updates.len(), ctx.checks.len());
            let outcome = catch_unwind(AssertUnwindSafe(|| rule.evaluate(cell, &mut ctx)));
            if outcome.is_err() {
                ctx.updates.truncate(updates_before);
                ctx.checks.truncate(checks_before);
                warn!(
                    "Physics handler for block {} panicked at cell {} in '{}'; skipping",
                    block.0,
                    check.index,
                    level.name()
                );
            }
        }
        scheduled_updates = std::mem::take(&mut ctx.updates);
        scheduled_checks = std::mem::take(&mut ctx.checks);
    }

    for update in scheduled_updates {
        physics.schedule_update(update.index, update.block);
    }
    for check in scheduled_checks {
        physics.schedule_check(check.index, check.args);
    }

    for update in physics.take_updates() {
        level.commit_physics(update.index, update.block);
    }
}

/// Handle for a level's dedicated physics loop.
pub struct PhysicsThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub fn spawn(level: Arc<Level>, interval: Duration) -> PhysicsThread {
    let stop = Arc::new(AtomicBool::new(false));
    let loop_stop = stop.clone();
    let name = format!("physics-{}", level.name());
    let handle = std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            info!("Physics loop started for '{}'", level.name());
            while !loop_stop.load(Ordering::SeqCst) {
                let started = Instant::now();
                run_tick(&level);

                let mut remaining = interval.saturating_sub(started.elapsed());
                while !remaining.is_zero() && !loop_stop.load(Ordering::SeqCst) {
                    let slice = remaining.min(SLEEP_SLICE);
                    std::thread::sleep(slice);
                    remaining = remaining.saturating_sub(slice);
                }
            }
            info!("Physics loop stopped for '{}'", level.name());
        })
        .expect("failed to spawn physics thread");

    PhysicsThread {
        stop,
        handle: Some(handle),
    }
}

impl PhysicsThread {
    /// Signal the loop and join it. The loop sleeps in bounded slices, so
    /// this returns promptly.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Physics thread terminated with a panic");
            }
        }
    }
}

impl Drop for PhysicsThread {
    fn drop(&mut self) {
        self.stop();
    }
}
