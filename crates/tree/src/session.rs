use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use futures::future::try_join_all;
use serde_json::Value;
use waterfall_core::error::{Result, WaterfallError};
use waterfall_core::model::{ChildStatus, SpanInfo, flatten_attributes};
use waterfall_core::time::TraceWindow;

use crate::backend::TraceBackend;
use crate::builder::{ChildDiscovery, LevelMap, level_batch, resolve_child_status};
use crate::cache::{QueryKey, Snapshot, SpanCache};
use crate::reconciler::{
    collapse, expand, locate, mark_loading, merge_reload, revert_loading, splice_children,
};

const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5);

/// One trace view: fetches spans on demand and publishes every change of
/// the span list through the shared cache.
pub struct TraceSession<B> {
    backend: B,
    cache: SpanCache,
    key: QueryKey,
    window: TraceWindow,
    stale_time: Duration,
    levels: Mutex<LevelMap>,
}

impl<B: TraceBackend> TraceSession<B> {
    pub fn new(backend: B, cache: SpanCache, key: QueryKey, window: TraceWindow) -> Self {
        Self {
            backend,
            cache,
            key,
            window,
            stale_time: DEFAULT_STALE_TIME,
            levels: Mutex::new(LevelMap::new()),
        }
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn window(&self) -> TraceWindow {
        self.window
    }

    pub fn cache(&self) -> &SpanCache {
        &self.cache
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn levels(&self) -> MutexGuard<'_, LevelMap> {
        self.levels.lock().expect("level map mutex poisoned")
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.cache.get(&self.key)
    }

    /// Number of visible rows in the current list.
    pub fn row_count(&self) -> usize {
        self.snapshot()
            .map_or(0, |snapshot| snapshot.projection().row_count())
    }

    /// Roots plus their first round of children. Served from the cache while
    /// the entry is fresh; a stale entry is revalidated and the result merged
    /// into it, so loaded subtrees and expansion state survive.
    pub async fn load(&self) -> Result<Snapshot> {
        if self.cache.is_fresh(&self.key, self.stale_time)
            && let Some(snapshot) = self.cache.get(&self.key)
        {
            return Ok(snapshot);
        }

        let trace_id = self.key.trace_id.as_str();
        let response = self.backend.root_spans(trace_id, self.window).await?;
        let roots = {
            let mut levels = self.levels();
            level_batch(&mut levels, trace_id, &response)?
        };
        let roots = resolve_child_status(&self.backend, roots, ChildDiscovery::Deferred).await?;
        tracing::debug!(trace_id, roots = roots.len(), "root spans leveled");

        let batches = try_join_all(roots.iter().map(|root| self.fetch_children(root))).await?;
        let root_ids: Vec<String> = roots.iter().map(|r| r.span_id.clone()).collect();
        let mut list = roots;
        for (root_id, batch) in root_ids.iter().zip(batches) {
            list = splice_children(&list, root_id, batch)?;
        }

        tracing::debug!(trace_id, spans = list.len(), "trace loaded");
        self.cache
            .update(&self.key, |current| merge_reload(current, &list))
    }

    /// Drops the cached list, with everything loaded into it, and loads the
    /// trace again.
    pub async fn refresh(&self) -> Result<Snapshot> {
        self.cache.invalidate(&self.key);
        self.load().await
    }

    /// Fetches the direct children of `span_id` and splices them into the
    /// latest list. Nodes that are not `RemoteChildren` are left alone.
    pub async fn load_more(&self, span_id: &str) -> Result<Snapshot> {
        let current = self.current()?;
        let idx = locate(&current.spans, None, span_id)?;
        if !current.spans[idx].child_status.can_load() {
            return Ok(current);
        }

        let marked = self
            .cache
            .update(&self.key, |list| mark_loading(list, span_id))?;
        let idx = locate(&marked.spans, Some(idx), span_id)?;
        let parent = marked.spans[idx].clone();

        match self.fetch_children(&parent).await {
            Ok(batch) => {
                tracing::debug!(span_id, children = batch.len(), "children fetched");
                self.cache
                    .update(&self.key, |latest| splice_children(latest, span_id, batch))
            }
            Err(err) => {
                tracing::warn!(span_id, error = %err, "loading children failed");
                if let Err(revert_err) = self
                    .cache
                    .update(&self.key, |latest| revert_loading(latest, span_id))
                {
                    tracing::warn!(span_id, error = %revert_err, "reverting failed load");
                }
                Err(err)
            }
        }
    }

    pub fn collapse(&self, span_id: &str) -> Result<Snapshot> {
        self.cache
            .update(&self.key, |list| collapse(list, span_id))
    }

    /// Shows hidden children again, loading them when none were fetched yet.
    pub async fn expand(&self, span_id: &str) -> Result<Snapshot> {
        let current = self.current()?;
        let idx = locate(&current.spans, None, span_id)?;
        match current.spans[idx].child_status {
            ChildStatus::RemoteChildren => self.load_more(span_id).await,
            ChildStatus::HideChildren => {
                let expanded = self.cache.update(&self.key, |list| expand(list, span_id))?;
                let idx = locate(&expanded.spans, Some(idx), span_id)?;
                if expanded.spans[idx].child_status == ChildStatus::RemoteChildren {
                    self.load_more(span_id).await
                } else {
                    Ok(expanded)
                }
            }
            _ => Ok(current),
        }
    }

    /// Every attribute of one span, flattened to dotted keys.
    pub async fn details(&self, span_id: &str) -> Result<BTreeMap<String, Value>> {
        let window = self
            .snapshot()
            .and_then(|snapshot| {
                snapshot
                    .spans
                    .iter()
                    .find(|s| s.span_id == span_id)
                    .map(|s| TraceWindow::for_span(s.start_time_unix_nano, s.end_time_unix_nano))
            })
            .unwrap_or(self.window);
        let attributes = self
            .backend
            .span_attributes(&self.key.trace_id, span_id, window)
            .await?;
        Ok(flatten_attributes(&attributes))
    }

    fn current(&self) -> Result<Snapshot> {
        self.snapshot().ok_or_else(|| {
            WaterfallError::InvalidArgument(format!("trace {} is not loaded", self.key.trace_id))
        })
    }

    async fn fetch_children(&self, parent: &SpanInfo) -> Result<Vec<SpanInfo>> {
        let trace_id = self.key.trace_id.as_str();
        let window = TraceWindow::for_span(parent.start_time_unix_nano, parent.end_time_unix_nano);
        let response = self
            .backend
            .child_spans(trace_id, &parent.span_id, window)
            .await?;
        if response.find_trace(trace_id).is_none() {
            return Ok(Vec::new());
        }

        let batch = {
            let mut levels = self.levels();
            level_batch(&mut levels, trace_id, &response)?
        };
        resolve_child_status(&self.backend, batch, ChildDiscovery::Detect).await
    }
}
