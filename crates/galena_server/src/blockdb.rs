use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use galena_persist::changelog::{ChangeEntry, ChangeLogFile};
use galena_shared::grid::WorldGrid;

/// Outcome of one flush attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum FlushResult {
    Flushed(usize),
    /// The flush lock was busy past the bounded wait; entries stay cached
    /// and the next trigger retries.
    Skipped,
}

/// Query shapes for undo, audit and rollback consumers.
#[derive(Debug, Clone)]
pub enum HistoryFilter {
    All,
    Cell(u32),
    TimeRange { from: u32, to: u32 },
}

impl HistoryFilter {
    fn matches(&self, entry: &ChangeEntry) -> bool {
        match self {
            Self::All => true,
            Self::Cell(index) => entry.index == *index,
            Self::TimeRange { from, to } => entry.timestamp >= *from && entry.timestamp <= *to,
        }
    }
}

/// Per-level change log: an append-only disk file fronted by an in-memory
/// cache. Appends never touch the disk; flushes drain the cache to the
/// file in insertion order under an exclusive lock that readers share.
pub struct ChangeLog {
    file: ChangeLogFile,
    cache: Mutex<Vec<ChangeEntry>>,
    flush_lock: RwLock<()>,
    flush_wait: Duration,
    flush_threshold: usize,
    flush_claimed: AtomicBool,
}

impl ChangeLog {
    pub fn open(
        path: impl AsRef<Path>,
        flush_threshold: usize,
        flush_wait: Duration,
    ) -> io::Result<Self> {
        Ok(Self {
            file: ChangeLogFile::open(path)?,
            cache: Mutex::new(Vec::new()),
            flush_lock: RwLock::new(()),
            flush_wait,
            flush_threshold: flush_threshold.max(1),
            flush_claimed: AtomicBool::new(false),
        })
    }

    fn cache_guard(&self) -> MutexGuard<'_, Vec<ChangeEntry>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// O(1); returns true when the cache has crossed the flush threshold
    /// and the caller should arrange a background flush.
    pub fn append(&self, entry: ChangeEntry) -> bool {
        let mut cache = self.cache_guard();
        cache.push(entry);
        cache.len() >= self.flush_threshold
    }

    /// Claim the single outstanding background-flush slot. The claimant
    /// must call [`Self::release_flush_claim`] when its flush finishes.
    pub fn claim_flush(&self) -> bool {
        self.flush_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release_flush_claim(&self) {
        self.flush_claimed.store(false, Ordering::Release);
    }

    /// Flush with the configured bounded wait for the exclusive lock.
    pub fn flush(&self) -> io::Result<FlushResult> {
        self.flush_with_deadline(Some(self.flush_wait))
    }

    /// Flush waiting as long as it takes; used on save and unload where
    /// losing the race is not an option.
    pub fn flush_blocking(&self) -> io::Result<usize> {
        match self.flush_with_deadline(None)? {
            FlushResult::Flushed(count) => Ok(count),
            FlushResult::Skipped => unreachable!("unbounded flush cannot be skipped"),
        }
    }

    fn flush_with_deadline(&self, wait: Option<Duration>) -> io::Result<FlushResult> {
        let _guard = match wait {
            None => self
                .flush_lock
                .write()
                .unwrap_or_else(PoisonError::into_inner),
            Some(wait) => {
                let deadline = Instant::now() + wait;
                loop {
                    match self.flush_lock.try_write() {
                        Ok(guard) => break guard,
                        Err(TryLockError::Poisoned(poisoned)) => break poisoned.into_inner(),
                        Err(TryLockError::WouldBlock) => {
                            if Instant::now() >= deadline {
                                warn!(
                                    "Change log flush skipped: lock busy past {:?}; will retry",
                                    wait
                                );
                                return Ok(FlushResult::Skipped);
                            }
                            std::thread::sleep(Duration::from_millis(1));
                        }
                    }
                }
            }
        };

        // Entries appended after this point stay cached for the next flush.
        let taken = std::mem::take(&mut *self.cache_guard());
        if taken.is_empty() {
            return Ok(FlushResult::Flushed(0));
        }

        match self.file.append(&taken) {
            Ok(()) => {
                debug!("Flushed {} change log entries", taken.len());
                Ok(FlushResult::Flushed(taken.len()))
            }
            Err(err) => {
                // Put the entries back, in order, ahead of anything newer.
                warn!("Change log flush failed, retaining {} entries: {err}", taken.len());
                let mut cache = self.cache_guard();
                let newer = std::mem::replace(&mut *cache, taken);
                cache.extend(newer);
                Err(err)
            }
        }
    }

    /// Consistent ordered view over flushed records plus the cache.
    /// Blocks while a flush holds the exclusive lock.
    pub fn query(&self, filter: &HistoryFilter) -> io::Result<Vec<ChangeEntry>> {
        let _read = self
            .flush_lock
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.file.read_all()?;
        entries.extend(self.cache_guard().iter().copied());
        entries.retain(|entry| filter.matches(entry));
        Ok(entries)
    }

    /// Flushed records starting at `skip`, in commit order. Used when a
    /// snapshot already accounts for the first `skip` records.
    pub fn replay_tail(&self, skip: u64) -> io::Result<Vec<ChangeEntry>> {
        let _read = self
            .flush_lock
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.file.read_from(skip)
    }

    pub fn cached_len(&self) -> usize {
        self.cache_guard().len()
    }

    pub fn disk_records(&self) -> io::Result<u64> {
        self.file.record_count()
    }
}

/// Re-apply entries to a grid in commit order. The log is the source of
/// truth: replaying every entry over an empty grid rebuilds the final
/// state exactly.
pub fn replay(entries: &[ChangeEntry], grid: &mut WorldGrid) {
    let volume = grid.dims().volume();
    for entry in entries {
        if u64::from(entry.index) < volume {
            grid.set(entry.index, entry.new);
        } else {
            warn!(
                "Skipping change log entry for out-of-range cell {}",
                entry.index
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use galena_persist::changelog::{ChangeEntry, ChangeFlags};
    use galena_shared::block::BlockId;
    use galena_shared::coords::Dims;
    use galena_shared::grid::WorldGrid;

    use super::{replay, ChangeLog, FlushResult, HistoryFilter};

    fn temp_log(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "galena_blockdb_{tag}_{}_{}.gldb",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock after epoch")
                .as_nanos()
        ))
    }

    fn entry(index: u32, new: u16, timestamp: u32) -> ChangeEntry {
        ChangeEntry {
            index,
            old: BlockId::AIR,
            new: BlockId(new),
            flags: ChangeFlags::PLAYER,
            timestamp,
        }
    }

    #[test]
    fn append_is_cached_until_flush() {
        let path = temp_log("cached");
        let log = ChangeLog::open(&path, 1000, Duration::from_millis(50)).expect("open");
        log.append(entry(1, 2, 0));
        log.append(entry(2, 3, 1));
        assert_eq!(log.cached_len(), 2);
        assert_eq!(log.disk_records().expect("count"), 0);

        assert_eq!(log.flush().expect("flush"), FlushResult::Flushed(2));
        assert_eq!(log.cached_len(), 0);
        assert_eq!(log.disk_records().expect("count"), 2);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn append_signals_threshold_crossing() {
        let path = temp_log("threshold");
        let log = ChangeLog::open(&path, 3, Duration::from_millis(50)).expect("open");
        assert!(!log.append(entry(0, 1, 0)));
        assert!(!log.append(entry(1, 1, 0)));
        assert!(log.append(entry(2, 1, 0)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn flush_claim_is_exclusive_until_released() {
        let path = temp_log("claim");
        let log = ChangeLog::open(&path, 3, Duration::from_millis(50)).expect("open");
        assert!(log.claim_flush());
        assert!(!log.claim_flush());
        log.release_flush_claim();
        assert!(log.claim_flush());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn concurrent_appends_and_flushes_lose_nothing_and_duplicate_nothing() {
        let path = temp_log("concurrent");
        let log = Arc::new(ChangeLog::open(&path, 10_000, Duration::from_millis(200)).expect("open"));

        let writer = {
            let log = log.clone();
            std::thread::spawn(move || {
                for n in 0..500u32 {
                    log.append(entry(n, 1, n));
                }
            })
        };
        for _ in 0..20 {
            log.flush().expect("flush");
            std::thread::sleep(Duration::from_millis(1));
        }
        writer.join().expect("writer thread");
        log.flush_blocking().expect("final flush");

        let entries = log.query(&HistoryFilter::All).expect("query");
        assert_eq!(entries.len(), 500);
        let mut seen: Vec<u32> = entries.iter().map(|entry| entry.index).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 500);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn query_merges_disk_and_cache_and_filters() {
        let path = temp_log("query");
        let log = ChangeLog::open(&path, 1000, Duration::from_millis(50)).expect("open");
        log.append(entry(5, 1, 10));
        log.flush_blocking().expect("flush");
        log.append(entry(5, 2, 20));
        log.append(entry(9, 3, 30));

        let cell = log.query(&HistoryFilter::Cell(5)).expect("query cell");
        assert_eq!(cell.len(), 2);
        assert_eq!(cell[0].new, BlockId(1));
        assert_eq!(cell[1].new, BlockId(2));

        let range = log
            .query(&HistoryFilter::TimeRange { from: 15, to: 25 })
            .expect("query range");
        assert_eq!(range.len(), 1);
        assert_eq!(range[0].index, 5);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn replaying_the_log_rebuilds_the_grid() {
        let dims = Dims::new(4, 4, 4).expect("valid dims");
        let mut source = WorldGrid::new(dims);
        let mut entries = Vec::new();
        for (index, id) in [(0u32, 1u16), (7, 300), (7, 2), (63, 9)] {
            let old = source.set(index, BlockId(id));
            entries.push(ChangeEntry {
                index,
                old,
                new: BlockId(id),
                flags: ChangeFlags::PLAYER,
                timestamp: 0,
            });
        }

        let mut rebuilt = WorldGrid::new(dims);
        replay(&entries, &mut rebuilt);
        for index in 0..64u32 {
            assert_eq!(rebuilt.get(index), source.get(index));
        }
    }
}
