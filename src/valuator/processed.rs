//! Short-lived memory of listings the valuator already looked at.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

const ENTRY_TTL: Duration = Duration::from_secs(60 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// TTL set of listing ids that were already evaluated.
///
/// An entry expires after an hour; expired entries are dropped in bulk at
/// most once per sweep interval, piggybacked on inserts. Nothing is persisted
/// across restarts, so a cold start re-evaluates the live market once.
pub struct ProcessedCache {
    entries: DashMap<String, Instant>,
    ttl: Duration,
    sweep_interval: Duration,
    last_sweep: Mutex<Instant>,
}

impl Default for ProcessedCache {
    fn default() -> Self {
        Self::with_ttl(ENTRY_TTL, SWEEP_INTERVAL)
    }
}

impl ProcessedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            sweep_interval,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Whether the listing was evaluated within the TTL window.
    pub fn contains(&self, id: i64) -> bool {
        match self.entries.get(&id.to_string()) {
            Some(seen) => seen.elapsed() < self.ttl,
            None => false,
        }
    }

    /// Mark a listing as evaluated.
    pub fn insert(&self, id: i64) {
        self.entries.insert(id.to_string(), Instant::now());
        self.maybe_sweep();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn maybe_sweep(&self) {
        {
            let Ok(mut last) = self.last_sweep.lock() else {
                return;
            };
            if last.elapsed() < self.sweep_interval {
                return;
            }
            *last = Instant::now();
        }
        let ttl = self.ttl;
        self.entries.retain(|_, seen| seen.elapsed() < ttl);
    }
}
