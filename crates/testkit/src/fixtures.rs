use chrono::{TimeZone, Utc};
use waterfall_core::model::{AnyValue, KeyValue, Span};
use waterfall_core::query::{SearchResponse, SpanSet, TraceSummary};

pub const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

pub const ROOT: &str = "00f067aa0ba902b7";
pub const AUTH: &str = "1a2b3c4d5e6f7081";
pub const DB: &str = "2b3c4d5e6f708192";
pub const POOL: &str = "3c4d5e6f708192a3";
pub const SELECT: &str = "4d5e6f708192a3b4";
pub const CACHE: &str = "5e6f708192a3b4c5";
pub const REDIS: &str = "708192a3b4c5d6e7";
pub const WORKER: &str = "6f708192a3b4c5d6";

#[derive(Debug, Clone)]
pub struct FixtureSpan {
    pub span_id: String,
    pub parent: Option<String>,
    pub name: String,
    pub start_time_unix_nano: u64,
    pub duration_nanos: u64,
    pub attributes: Vec<KeyValue>,
}

impl FixtureSpan {
    /// The span as a search result, carrying the parent id and optionally
    /// the child count the way the search API selects them.
    pub fn to_search_span(&self, child_count: Option<u64>) -> Span {
        let mut attributes = Vec::new();
        if let Some(parent) = &self.parent {
            attributes.push(KeyValue::new("span:parentID", AnyValue::from(parent.as_str())));
        }
        if let Some(count) = child_count {
            attributes.push(KeyValue::new("childCount", AnyValue::Int(count as i64)));
        }
        Span {
            span_id: self.span_id.clone(),
            name: Some(self.name.clone()),
            start_time_unix_nano: self.start_time_unix_nano,
            duration_nanos: self.duration_nanos,
            attributes,
        }
    }

    pub fn end_time_unix_nano(&self) -> u64 {
        self.start_time_unix_nano + self.duration_nanos
    }
}

#[derive(Debug, Clone)]
pub struct FixtureTrace {
    pub trace_id: String,
    pub service: String,
    pub spans: Vec<FixtureSpan>,
}

impl FixtureTrace {
    pub fn find(&self, span_id: &str) -> Option<&FixtureSpan> {
        self.spans.iter().find(|s| s.span_id == span_id)
    }

    pub fn roots(&self) -> Vec<&FixtureSpan> {
        self.spans.iter().filter(|s| s.parent.is_none()).collect()
    }

    pub fn children_of(&self, parent: &str) -> Vec<&FixtureSpan> {
        self.spans
            .iter()
            .filter(|s| s.parent.as_deref() == Some(parent))
            .collect()
    }

    pub fn child_count(&self, span_id: &str) -> u64 {
        self.children_of(span_id).len() as u64
    }

    pub fn start_time_unix_nano(&self) -> u64 {
        self.spans
            .iter()
            .map(|s| s.start_time_unix_nano)
            .min()
            .unwrap_or_default()
    }

    /// Search response holding `spans`, or no trace at all when nothing
    /// matched.
    pub fn response<'a>(
        &self,
        spans: impl IntoIterator<Item = &'a FixtureSpan>,
        with_child_count: bool,
    ) -> SearchResponse {
        let spans: Vec<Span> = spans
            .into_iter()
            .map(|s| {
                let count = with_child_count.then(|| self.child_count(&s.span_id));
                s.to_search_span(count)
            })
            .collect();
        if spans.is_empty() {
            return SearchResponse::default();
        }
        SearchResponse {
            traces: vec![TraceSummary {
                trace_id: self.trace_id.clone(),
                span_sets: vec![SpanSet {
                    matched: spans.len() as u64,
                    spans,
                }],
                ..self.summary()
            }],
        }
    }

    /// The trace as a search listing entry, without span sets.
    pub fn summary(&self) -> TraceSummary {
        let root = self.roots().into_iter().next();
        TraceSummary {
            trace_id: self.trace_id.clone(),
            root_service_name: Some(self.service.clone()),
            root_trace_name: root.map(|r| r.name.clone()),
            start_time_unix_nano: Some(self.start_time_unix_nano()),
            duration_ms: root.map(|r| r.duration_nanos / 1_000_000),
            ..TraceSummary::default()
        }
    }
}

fn fixture_span(
    span_id: &str,
    parent: Option<&str>,
    name: &str,
    offset_ms: u64,
    duration_ms: u64,
    attributes: Vec<KeyValue>,
) -> FixtureSpan {
    let base = Utc
        .with_ymd_and_hms(2026, 2, 1, 0, 0, 0)
        .unwrap()
        .timestamp_nanos_opt()
        .unwrap() as u64;
    FixtureSpan {
        span_id: span_id.to_string(),
        parent: parent.map(str::to_string),
        name: name.to_string(),
        start_time_unix_nano: base + offset_ms * 1_000_000,
        duration_nanos: duration_ms * 1_000_000,
        attributes,
    }
}

/// An order request fanning out to auth, a database query with two nested
/// calls and a cache write, plus a second root for a background worker.
pub fn sample_trace() -> FixtureTrace {
    let spans = vec![
        fixture_span(
            ROOT,
            None,
            "GET /v1/orders",
            0,
            1800,
            vec![
                KeyValue::new("http.method", AnyValue::from("GET")),
                KeyValue::new("http.status_code", AnyValue::Int(500)),
            ],
        ),
        fixture_span(
            AUTH,
            Some(ROOT),
            "auth.check",
            10,
            100,
            vec![KeyValue::new("auth.user", AnyValue::from("u-42"))],
        ),
        fixture_span(
            DB,
            Some(ROOT),
            "db.query orders",
            200,
            900,
            vec![KeyValue::new("db.system", AnyValue::from("postgresql"))],
        ),
        fixture_span(POOL, Some(DB), "pool.acquire", 210, 20, Vec::new()),
        fixture_span(
            SELECT,
            Some(DB),
            "postgres SELECT",
            240,
            800,
            vec![
                KeyValue::new("db.statement", AnyValue::from("SELECT * FROM orders")),
                KeyValue::new(
                    "db.rows",
                    AnyValue::KvList(vec![KeyValue::new("count", AnyValue::Int(12))]),
                ),
            ],
        ),
        fixture_span(
            CACHE,
            Some(ROOT),
            "cache.set redis",
            1200,
            300,
            vec![KeyValue::new("peer", AnyValue::from("redis:6379"))],
        ),
        fixture_span(REDIS, Some(CACHE), "redis SET", 1210, 50, Vec::new()),
        fixture_span(WORKER, None, "orders.reindex", 2500, 3000, Vec::new()),
    ];

    FixtureTrace {
        trace_id: TRACE_ID.to_string(),
        service: "api".to_string(),
        spans,
    }
}
