use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock, Mutex};

use axum::extract::{OriginalUri, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use regex::Regex;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use waterfall_core::ids::normalize_hex;
use waterfall_core::query::SearchResponse;

use crate::fixtures::FixtureTrace;

pub const DATASOURCE_UID: &str = "mock-tempo";

static TRACE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"trace:id\s*=\s*"([0-9a-fA-F]+)""#).unwrap());
static PARENT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"span:parentID\s*=\s*"([0-9a-fA-F]+)""#).unwrap());
static SPAN_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"span:id\s*=\s*"([0-9a-fA-F]+)""#).unwrap());
static SELECTED_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"span\.([A-Za-z0-9_.]+)").unwrap());

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub params: HashMap<String, String>,
}

struct MockTempoState {
    trace: FixtureTrace,
    requests: Mutex<Vec<RecordedRequest>>,
    failing: Mutex<HashSet<String>>,
}

impl MockTempoState {
    fn record(&self, path: &str, params: &HashMap<String, String>) {
        self.requests.lock().unwrap().push(RecordedRequest {
            path: path.to_string(),
            params: params.clone(),
        });
    }
}

/// HTTP server answering the search and tag endpoints for one fixture
/// trace. The same routes are served under the Grafana datasource proxy
/// prefix for [`DATASOURCE_UID`].
pub struct MockTempo {
    addr: SocketAddr,
    state: Arc<MockTempoState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockTempo {
    pub async fn start(trace: FixtureTrace) -> Self {
        let state = Arc::new(MockTempoState {
            trace,
            requests: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        });

        let api = Router::new()
            .route("/api/search", get(handle_search))
            .route("/api/v2/search/tags", get(handle_search_tags));
        let app = Router::new()
            .merge(api.clone())
            .nest(&format!("/api/datasources/proxy/uid/{DATASOURCE_UID}"), api)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock tempo");
        let addr = listener.local_addr().expect("failed to read local address");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Answers child searches for `span_id` with a server error.
    pub fn fail_children_of(&self, span_id: &str) {
        self.state
            .failing
            .lock()
            .unwrap()
            .insert(normalize_hex(span_id));
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for MockTempo {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn capture<'a>(re: &Regex, query: &'a str) -> Option<&'a str> {
    re.captures(query)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

async fn handle_search(
    State(state): State<Arc<MockTempoState>>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.record(uri.path(), &params);

    let query = params.get("q").map(String::as_str).unwrap_or_default();
    let start: i64 = params.get("start").and_then(|v| v.parse().ok()).unwrap_or(0);
    let end: i64 = params.get("end").and_then(|v| v.parse().ok()).unwrap_or(0);
    if end <= start {
        return bad_request("invalid start and end parameter: end must be after start");
    }

    let trace = &state.trace;
    let Some(trace_id) = capture(&TRACE_ID, query) else {
        // Free-form listing query.
        let limit = params
            .get("limit")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(20);
        let traces = std::iter::once(trace.summary()).take(limit).collect();
        return Json(SearchResponse { traces }).into_response();
    };
    if normalize_hex(trace_id) != normalize_hex(&trace.trace_id) {
        return Json(SearchResponse::default()).into_response();
    }
    let with_child_count = query.contains("childCount");

    if query.contains("nestedSetParent = -1") {
        return Json(trace.response(trace.roots(), with_child_count)).into_response();
    }

    if let Some(parent) = capture(&PARENT_ID, query) {
        let children = trace.children_of(parent);
        if query.contains("count() > 0") {
            // Aggregate matches come back as the trace alone, without spans.
            let traces = if children.is_empty() {
                Vec::new()
            } else {
                vec![trace.summary()]
            };
            return Json(SearchResponse { traces }).into_response();
        }
        if state.failing.lock().unwrap().contains(&normalize_hex(parent)) {
            return (StatusCode::INTERNAL_SERVER_ERROR, "injected failure").into_response();
        }
        let spss = params
            .get("spss")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(3);
        return Json(trace.response(children.into_iter().take(spss), with_child_count))
            .into_response();
    }

    if let Some(span_id) = capture(&SPAN_ID, query) {
        let Some(span) = trace.find(span_id) else {
            return Json(SearchResponse::default()).into_response();
        };
        let selected: HashSet<&str> = query
            .split_once("| select")
            .map(|(_, select)| {
                SELECTED_TAG
                    .captures_iter(select)
                    .filter_map(|c| c.get(1).map(|m| m.as_str()))
                    .collect()
            })
            .unwrap_or_default();
        let mut search_span = span.to_search_span(None);
        search_span.attributes = span
            .attributes
            .iter()
            .filter(|kv| selected.contains(kv.key.as_str()))
            .cloned()
            .collect();
        let mut response = trace.response([span], false);
        if let Some(summary) = response.traces.first_mut() {
            summary.span_sets[0].spans = vec![search_span];
        }
        return Json(response).into_response();
    }

    bad_request("unsupported query")
}

async fn handle_search_tags(
    State(state): State<Arc<MockTempoState>>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.record(uri.path(), &params);

    let query = params.get("q").map(String::as_str).unwrap_or_default();
    let trace = &state.trace;
    let spans: Vec<_> = match capture(&SPAN_ID, query) {
        Some(span_id) => trace.find(span_id).into_iter().collect(),
        None => trace.spans.iter().collect(),
    };
    let mut tags: Vec<&str> = spans
        .iter()
        .flat_map(|s| s.attributes.iter().map(|kv| kv.key.as_str()))
        .collect();
    tags.sort_unstable();
    tags.dedup();

    Json(json!({
        "scopes": [
            { "name": "resource", "tags": ["service.name"] },
            { "name": "span", "tags": tags },
        ]
    }))
    .into_response()
}
