use std::future::Future;

use waterfall_core::Result;
use waterfall_core::model::KeyValue;
use waterfall_core::query::SearchResponse;
use waterfall_core::time::TraceWindow;

/// The search operations the span tree needs from a trace backend.
pub trait TraceBackend {
    /// Spans without a parent (`nestedSetParent = -1`).
    fn root_spans(
        &self,
        trace_id: &str,
        window: TraceWindow,
    ) -> impl Future<Output = Result<SearchResponse>> + Send;

    /// Every direct child of `parent_span_id`.
    fn child_spans(
        &self,
        trace_id: &str,
        parent_span_id: &str,
        window: TraceWindow,
    ) -> impl Future<Output = Result<SearchResponse>> + Send;

    /// Cheap existence probe used when no child count was reported.
    fn has_children(
        &self,
        trace_id: &str,
        span_id: &str,
        window: TraceWindow,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn span_attributes(
        &self,
        trace_id: &str,
        span_id: &str,
        window: TraceWindow,
    ) -> impl Future<Output = Result<Vec<KeyValue>>> + Send;
}
