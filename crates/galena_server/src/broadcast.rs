use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{info, trace, warn};

use galena_shared::packed::PackedChange;

use crate::level::Level;

const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Where drained change batches go. Implemented by the session layer;
/// the engine only needs to know whether anyone is watching a level.
pub trait ChangeSink: Send + Sync {
    fn observer_count(&self, level: &str) -> usize;
    fn send_batch(&self, level: &str, batch: &[PackedChange]);
}

/// Sink for a headless engine: nobody observes, batches are discarded.
pub struct NullSink;

impl ChangeSink for NullSink {
    fn observer_count(&self, _level: &str) -> usize {
        0
    }

    fn send_batch(&self, _level: &str, _batch: &[PackedChange]) {}
}

pub type LevelMap = Arc<RwLock<HashMap<String, Arc<Level>>>>;

/// One broadcast pass over every loaded level. Levels without observers
/// get their queue cleared instead of shipped; levels with more pending
/// changes than the batch cap keep the remainder for the next pass.
pub fn run_broadcast_tick(
    levels: &HashMap<String, Arc<Level>>,
    sink: &dyn ChangeSink,
    batch_size: usize,
) {
    for (name, level) in levels {
        if level.is_disposed() {
            continue;
        }

        if sink.observer_count(name) == 0 {
            level.clear_pending();
            continue;
        }

        let batch = level.take_pending(batch_size);
        if !batch.is_empty() {
            trace!("Broadcasting {} changes for level '{name}'", batch.len());
            sink.send_batch(name, &batch);
        }
    }
}

/// Shared broadcast loop covering all levels. Same thread discipline as
/// the physics loop: bounded sleep slices, prompt join on stop.
pub struct BroadcastScheduler {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub fn spawn(
    levels: LevelMap,
    sink: Arc<dyn ChangeSink>,
    interval: Duration,
    batch_size: usize,
) -> BroadcastScheduler {
    let stop = Arc::new(AtomicBool::new(false));
    let loop_stop = stop.clone();
    let handle = std::thread::Builder::new()
        .name("broadcast".to_string())
        .spawn(move || {
            info!("Broadcast loop started");
            while !loop_stop.load(Ordering::SeqCst) {
                let started = Instant::now();
                {
                    let levels = levels.read().unwrap_or_else(PoisonError::into_inner);
                    run_broadcast_tick(&levels, sink.as_ref(), batch_size);
                }

                let mut remaining = interval.saturating_sub(started.elapsed());
                while !remaining.is_zero() && !loop_stop.load(Ordering::SeqCst) {
                    let slice = remaining.min(SLEEP_SLICE);
                    std::thread::sleep(slice);
                    remaining = remaining.saturating_sub(slice);
                }
            }
            info!("Broadcast loop stopped");
        })
        .expect("failed to spawn broadcast thread");

    BroadcastScheduler {
        stop,
        handle: Some(handle),
    }
}

impl BroadcastScheduler {
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Broadcast thread terminated with a panic");
            }
        }
    }
}

impl Drop for BroadcastScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
