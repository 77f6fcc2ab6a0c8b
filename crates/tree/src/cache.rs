use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use waterfall_core::error::{Result, WaterfallError};
use waterfall_core::model::SpanInfo;

use crate::projector::Projection;

/// Cache identity of one trace view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub datasource: String,
    pub trace_id: String,
}

impl QueryKey {
    pub fn new(datasource: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            datasource: datasource.into(),
            trace_id: trace_id.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub version: u64,
    pub spans: Arc<Vec<SpanInfo>>,
}

impl Snapshot {
    pub fn projection(&self) -> Projection<'_> {
        Projection::new(&self.spans)
    }
}

#[derive(Debug)]
struct CacheEntry {
    version: u64,
    spans: Arc<Vec<SpanInfo>>,
    updated_at: Instant,
}

impl CacheEntry {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: self.version,
            spans: Arc::clone(&self.spans),
        }
    }
}

/// Shared store of span lists keyed by query. Writers go through
/// [`SpanCache::update`] or [`SpanCache::compare_and_swap`]; every write
/// bumps the entry version and notifies subscribers.
#[derive(Clone)]
pub struct SpanCache {
    entries: Arc<Mutex<HashMap<QueryKey, CacheEntry>>>,
    changes: broadcast::Sender<QueryKey>,
}

impl Default for SpanCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanCache {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            changes,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, CacheEntry>> {
        self.entries.lock().expect("span cache mutex poisoned")
    }

    pub fn get(&self, key: &QueryKey) -> Option<Snapshot> {
        self.entries().get(key).map(CacheEntry::snapshot)
    }

    pub fn is_fresh(&self, key: &QueryKey, stale_time: Duration) -> bool {
        self.entries()
            .get(key)
            .is_some_and(|e| e.updated_at.elapsed() < stale_time)
    }

    pub fn set(&self, key: QueryKey, spans: Vec<SpanInfo>) -> Snapshot {
        let snapshot = {
            let mut entries = self.entries();
            let version = entries.get(&key).map_or(1, |e| e.version + 1);
            let entry = CacheEntry {
                version,
                spans: Arc::new(spans),
                updated_at: Instant::now(),
            };
            let snapshot = entry.snapshot();
            entries.insert(key.clone(), entry);
            snapshot
        };
        let _ = self.changes.send(key);
        snapshot
    }

    /// Reads the latest list, computes the next one and writes it, all under
    /// one lock. A missing entry is presented as an empty list.
    pub fn update<F>(&self, key: &QueryKey, f: F) -> Result<Snapshot>
    where
        F: FnOnce(&[SpanInfo]) -> Result<Vec<SpanInfo>>,
    {
        let snapshot = {
            let mut entries = self.entries();
            let (version, next) = match entries.get(key) {
                Some(entry) => (entry.version + 1, f(entry.spans.as_slice())?),
                None => (1, f(&[] as &[SpanInfo])?),
            };
            let entry = CacheEntry {
                version,
                spans: Arc::new(next),
                updated_at: Instant::now(),
            };
            let snapshot = entry.snapshot();
            entries.insert(key.clone(), entry);
            snapshot
        };
        let _ = self.changes.send(key.clone());
        Ok(snapshot)
    }

    /// Writes `next` only if nobody wrote since `expected_version` was read.
    pub fn compare_and_swap(
        &self,
        key: &QueryKey,
        expected_version: u64,
        next: Vec<SpanInfo>,
    ) -> Result<Snapshot> {
        let snapshot = {
            let mut entries = self.entries();
            let current = entries.get(key).map_or(0, |e| e.version);
            if current != expected_version {
                return Err(WaterfallError::StaleReconciliation(format!(
                    "{} (expected version {expected_version}, found {current})",
                    key.trace_id
                )));
            }
            let entry = CacheEntry {
                version: current + 1,
                spans: Arc::new(next),
                updated_at: Instant::now(),
            };
            let snapshot = entry.snapshot();
            entries.insert(key.clone(), entry);
            snapshot
        };
        let _ = self.changes.send(key.clone());
        Ok(snapshot)
    }

    pub fn invalidate(&self, key: &QueryKey) {
        let removed = self.entries().remove(key).is_some();
        if removed {
            let _ = self.changes.send(key.clone());
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueryKey> {
        self.changes.subscribe()
    }
}
