use serde::{Deserialize, Serialize};

use crate::ids::normalize_hex;
use crate::model::span::{Span, nanos};
use crate::time::TraceWindow;

/// Spans-per-spanset limit used when listing every child of a span.
pub const ALL_SPANS_PER_SPAN_SET: u32 = u32::MAX;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchParams {
    pub query: String,
    pub window: TraceWindow,
    pub spans_per_span_set: Option<u32>,
    pub limit: Option<usize>,
}

impl SearchParams {
    pub fn new(query: impl Into<String>, window: TraceWindow) -> Self {
        Self {
            query: query.into(),
            window,
            spans_per_span_set: None,
            limit: None,
        }
    }

    pub fn spans_per_span_set(mut self, spss: u32) -> Self {
        self.spans_per_span_set = Some(spss);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SearchResponse {
    #[serde(default)]
    pub traces: Vec<TraceSummary>,
}

impl SearchResponse {
    pub fn find_trace(&self, trace_id: &str) -> Option<&TraceSummary> {
        let wanted = normalize_hex(trace_id);
        self.traces
            .iter()
            .find(|t| normalize_hex(&t.trace_id) == wanted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TraceSummary {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_trace_name: Option<String>,
    #[serde(
        default,
        with = "nanos::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time_unix_nano: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub span_sets: Vec<SpanSet>,
    /// Older backends only report a single span set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_set: Option<SpanSet>,
}

impl TraceSummary {
    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        let sets: Vec<&SpanSet> = if self.span_sets.is_empty() {
            self.span_set.iter().collect()
        } else {
            self.span_sets.iter().collect()
        };
        sets.into_iter().flat_map(|s| s.spans.iter())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SpanSet {
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(default)]
    pub matched: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SearchTagsResponse {
    #[serde(default)]
    pub scopes: Vec<TagScope>,
}

impl SearchTagsResponse {
    pub fn span_tags(self) -> Vec<String> {
        self.scopes
            .into_iter()
            .find(|s| s.name == "span")
            .map(|s| s.tags)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TagScope {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}
