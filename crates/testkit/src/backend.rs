use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use waterfall_core::error::{Result, WaterfallError};
use waterfall_core::ids::normalize_hex;
use waterfall_core::model::KeyValue;
use waterfall_core::query::SearchResponse;
use waterfall_core::time::TraceWindow;
use waterfall_tree::TraceBackend;

use crate::fixtures::FixtureTrace;

/// In-memory backend over one fixture trace.
///
/// Counts every call, can fail child fetches for chosen spans, and can hold
/// a child fetch until the test releases its gate.
#[derive(Clone)]
pub struct MockBackend {
    inner: Arc<Inner>,
}

struct Inner {
    trace: FixtureTrace,
    report_child_count: bool,
    root_calls: AtomicUsize,
    probe_calls: AtomicUsize,
    attribute_calls: AtomicUsize,
    child_calls: Mutex<Vec<(String, TraceWindow)>>,
    failing: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl MockBackend {
    pub fn new(trace: FixtureTrace) -> Self {
        Self::build(trace, false)
    }

    /// Backend that selects `childCount` on every span, so no probes are
    /// needed.
    pub fn with_child_count(trace: FixtureTrace) -> Self {
        Self::build(trace, true)
    }

    fn build(trace: FixtureTrace, report_child_count: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                trace,
                report_child_count,
                root_calls: AtomicUsize::new(0),
                probe_calls: AtomicUsize::new(0),
                attribute_calls: AtomicUsize::new(0),
                child_calls: Mutex::new(Vec::new()),
                failing: Mutex::new(HashSet::new()),
                gates: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn fail_children_of(&self, span_id: &str) {
        self.inner.failing.lock().unwrap().insert(span_id.to_string());
    }

    pub fn clear_failures(&self) {
        self.inner.failing.lock().unwrap().clear();
    }

    /// Holds the next child fetch of `span_id` until the returned handle is
    /// notified.
    pub fn gate(&self, span_id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.inner
            .gates
            .lock()
            .unwrap()
            .insert(span_id.to_string(), Arc::clone(&gate));
        gate
    }

    pub fn root_calls(&self) -> usize {
        self.inner.root_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.inner.probe_calls.load(Ordering::SeqCst)
    }

    pub fn attribute_calls(&self) -> usize {
        self.inner.attribute_calls.load(Ordering::SeqCst)
    }

    pub fn child_calls(&self) -> Vec<String> {
        self.inner
            .child_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn child_calls_for(&self, span_id: &str) -> usize {
        self.child_calls().iter().filter(|id| *id == span_id).count()
    }

    /// Window used by the most recent child fetch of `span_id`.
    pub fn child_window(&self, span_id: &str) -> Option<TraceWindow> {
        self.inner
            .child_calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| id == span_id)
            .map(|(_, window)| *window)
    }

    fn is_trace(&self, trace_id: &str) -> bool {
        normalize_hex(trace_id) == normalize_hex(&self.inner.trace.trace_id)
    }
}

impl TraceBackend for MockBackend {
    async fn root_spans(&self, trace_id: &str, _window: TraceWindow) -> Result<SearchResponse> {
        self.inner.root_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_trace(trace_id) {
            return Ok(SearchResponse::default());
        }
        let trace = &self.inner.trace;
        Ok(trace.response(trace.roots(), self.inner.report_child_count))
    }

    async fn child_spans(
        &self,
        trace_id: &str,
        parent_span_id: &str,
        window: TraceWindow,
    ) -> Result<SearchResponse> {
        self.inner
            .child_calls
            .lock()
            .unwrap()
            .push((parent_span_id.to_string(), window));

        let gate = self.inner.gates.lock().unwrap().remove(parent_span_id);
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.inner.failing.lock().unwrap().contains(parent_span_id) {
            return Err(WaterfallError::Backend(format!(
                "injected failure for children of {parent_span_id}"
            )));
        }
        if !self.is_trace(trace_id) {
            return Ok(SearchResponse::default());
        }
        let trace = &self.inner.trace;
        Ok(trace.response(
            trace.children_of(parent_span_id),
            self.inner.report_child_count,
        ))
    }

    async fn has_children(&self, trace_id: &str, span_id: &str, _window: TraceWindow) -> Result<bool> {
        self.inner.probe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.is_trace(trace_id) && self.inner.trace.child_count(span_id) > 0)
    }

    async fn span_attributes(
        &self,
        trace_id: &str,
        span_id: &str,
        _window: TraceWindow,
    ) -> Result<Vec<KeyValue>> {
        self.inner.attribute_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_trace(trace_id) {
            return Err(WaterfallError::TraceNotFound(trace_id.to_string()));
        }
        Ok(self
            .inner
            .trace
            .find(span_id)
            .map(|s| s.attributes.clone())
            .unwrap_or_default())
    }
}
