use std::collections::HashMap;

use futures::future::try_join_all;
use waterfall_core::error::{Result, WaterfallError};
use waterfall_core::model::{ChildStatus, Span, SpanInfo};
use waterfall_core::query::{SearchResponse, TraceSummary};
use waterfall_core::time::TraceWindow;

use crate::backend::TraceBackend;

/// Level of every span leveled so far, keyed by span id.
#[derive(Debug, Clone, Default)]
pub struct LevelMap(HashMap<String, u32>);

impl LevelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, span_id: &str) -> Option<u32> {
        self.0.get(span_id).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Records a level unless the span already has one.
    fn assign(&mut self, span_id: &str, level: u32) -> u32 {
        *self.0.entry(span_id.to_string()).or_insert(level)
    }
}

/// How child status is decided for freshly leveled spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildDiscovery {
    /// Children are fetched right away; the splice settles the status.
    Deferred,
    /// Use the reported child count, falling back to an existence probe.
    Detect,
}

pub fn extract_trace<'a>(response: &'a SearchResponse, trace_id: &str) -> Result<&'a TraceSummary> {
    response
        .find_trace(trace_id)
        .ok_or_else(|| WaterfallError::TraceNotFound(trace_id.to_string()))
}

/// Start time ascending, longer span first on ties.
pub fn sort_spans(spans: &mut [&Span]) {
    spans.sort_by(|a, b| {
        a.start_time_unix_nano
            .cmp(&b.start_time_unix_nano)
            .then(b.duration_nanos.cmp(&a.duration_nanos))
    });
}

/// Sorts one trace's batch and assigns levels. Parents must already be in
/// `levels` (or earlier in the sorted batch).
pub fn level_batch(
    levels: &mut LevelMap,
    trace_id: &str,
    response: &SearchResponse,
) -> Result<Vec<SpanInfo>> {
    let trace = extract_trace(response, trace_id)?;
    let mut spans: Vec<&Span> = trace.spans().collect();
    sort_spans(&mut spans);

    let mut out = Vec::with_capacity(spans.len());
    for span in spans {
        if span.span_id.is_empty() {
            continue;
        }

        let parent_span_id = span.parent_span_id().map(str::to_string);
        let level = match &parent_span_id {
            None => levels.assign(&span.span_id, 0),
            Some(parent) => {
                let parent_level =
                    levels
                        .get(parent)
                        .ok_or_else(|| WaterfallError::MissingParentLevel {
                            span_id: span.span_id.clone(),
                            parent_span_id: parent.clone(),
                        })?;
                levels.assign(&span.span_id, parent_level + 1)
            }
        };

        out.push(SpanInfo {
            span_id: span.span_id.clone(),
            parent_span_id,
            trace_id: trace_id.to_string(),
            level,
            start_time_unix_nano: span.start_time_unix_nano,
            end_time_unix_nano: span.end_time_unix_nano(),
            name: span.name.clone().unwrap_or_default(),
            child_status: ChildStatus::RemoteChildren,
            child_count: span.child_count(),
        });
    }
    Ok(out)
}

/// Settles `child_status` for leveled spans, probing the backend for spans
/// that carry no child count.
pub async fn resolve_child_status<B: TraceBackend>(
    backend: &B,
    spans: Vec<SpanInfo>,
    discovery: ChildDiscovery,
) -> Result<Vec<SpanInfo>> {
    if discovery == ChildDiscovery::Deferred {
        return Ok(spans);
    }

    try_join_all(spans.into_iter().map(|mut span| async move {
        let has_children = match span.child_count {
            Some(count) => count > 0,
            None => {
                let window =
                    TraceWindow::for_span(span.start_time_unix_nano, span.end_time_unix_nano);
                backend
                    .has_children(&span.trace_id, &span.span_id, window)
                    .await?
            }
        };
        span.child_status = if has_children {
            ChildStatus::RemoteChildren
        } else {
            ChildStatus::NoChildren
        };
        Ok::<_, WaterfallError>(span)
    }))
    .await
}

#[cfg(test)]
mod tests {
    use waterfall_core::model::{AnyValue, KeyValue};
    use waterfall_core::query::SpanSet;

    use super::*;

    const TRACE: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

    fn span(id: &str, parent: Option<&str>, start: u64, dur: u64) -> Span {
        let mut attributes = Vec::new();
        if let Some(p) = parent {
            attributes.push(KeyValue::new("span:parentID", AnyValue::from(p)));
        }
        Span {
            span_id: id.to_string(),
            name: Some(format!("op-{id}")),
            start_time_unix_nano: start,
            duration_nanos: dur,
            attributes,
        }
    }

    fn response(spans: Vec<Span>) -> SearchResponse {
        SearchResponse {
            traces: vec![TraceSummary {
                trace_id: TRACE.to_string(),
                span_sets: vec![SpanSet { spans, matched: 0 }],
                ..TraceSummary::default()
            }],
        }
    }

    #[test]
    fn orders_by_start_then_longest_first() {
        let resp = response(vec![
            span("A", None, 0, 100),
            span("B", Some("A"), 10, 20),
            span("C", Some("A"), 10, 50),
        ]);
        let mut levels = LevelMap::new();
        let out = level_batch(&mut levels, TRACE, &resp).unwrap();
        let ids: Vec<_> = out.iter().map(|s| s.span_id.as_str()).collect();
        let lvls: Vec<_> = out.iter().map(|s| s.level).collect();
        assert_eq!(ids, vec!["A", "C", "B"]);
        assert_eq!(lvls, vec![0, 1, 1]);
        assert_eq!(out[1].end_time_unix_nano, 60);
        assert_eq!(out[1].parent_span_id.as_deref(), Some("A"));
    }

    #[test]
    fn missing_parent_level_is_an_error() {
        let resp = response(vec![span("B", Some("A"), 10, 20)]);
        let mut levels = LevelMap::new();
        let err = level_batch(&mut levels, TRACE, &resp).unwrap_err();
        assert!(matches!(
            err,
            WaterfallError::MissingParentLevel { ref span_id, ref parent_span_id }
                if span_id == "B" && parent_span_id == "A"
        ));
    }

    #[test]
    fn children_level_off_previously_seen_parents() {
        let mut levels = LevelMap::new();
        level_batch(&mut levels, TRACE, &response(vec![span("A", None, 0, 100)])).unwrap();
        level_batch(&mut levels, TRACE, &response(vec![span("B", Some("A"), 5, 10)])).unwrap();
        let out =
            level_batch(&mut levels, TRACE, &response(vec![span("C", Some("B"), 6, 1)])).unwrap();
        assert_eq!(out[0].level, 2);
        assert_eq!(levels.len(), 3);
    }

    #[test]
    fn levels_are_never_recomputed() {
        let mut levels = LevelMap::new();
        level_batch(&mut levels, TRACE, &response(vec![span("A", None, 0, 100)])).unwrap();
        level_batch(&mut levels, TRACE, &response(vec![span("B", Some("A"), 5, 10)])).unwrap();
        // B shows up again without its parent attribute.
        let out = level_batch(&mut levels, TRACE, &response(vec![span("B", None, 5, 10)])).unwrap();
        assert_eq!(out[0].level, 1);
    }

    #[test]
    fn skips_spans_without_id() {
        let resp = response(vec![span("", None, 0, 1), span("A", None, 0, 2)]);
        let out = level_batch(&mut LevelMap::new(), TRACE, &resp).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "op-A");
    }

    #[test]
    fn unknown_trace_is_not_found() {
        let resp = response(vec![span("A", None, 0, 1)]);
        let err = level_batch(&mut LevelMap::new(), "ffff", &resp).unwrap_err();
        assert!(matches!(err, WaterfallError::TraceNotFound(id) if id == "ffff"));
    }

    #[test]
    fn reported_child_count_is_kept() {
        let mut s = span("A", None, 0, 1);
        s.attributes
            .push(KeyValue::new("childCount", AnyValue::Int(4)));
        let out = level_batch(&mut LevelMap::new(), TRACE, &response(vec![s])).unwrap();
        assert_eq!(out[0].child_count, Some(4));
    }
}
