use std::time::Duration;

use testkit::fixtures::{AUTH, CACHE, DB, POOL, ROOT, SELECT, TRACE_ID, WORKER};
use testkit::{DATASOURCE_UID, MockTempo, sample_trace};
use waterfall_core::WaterfallError;
use waterfall_core::config::Config;
use waterfall_core::model::ChildStatus;
use waterfall_core::query::SearchParams;
use waterfall_core::time::TraceWindow;
use waterfall_tempo::TempoClient;
use waterfall_tree::{QueryKey, SpanCache, TraceBackend, TraceSession};

fn config(endpoint: String) -> Config {
    Config {
        endpoint,
        timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

fn trace_window() -> TraceWindow {
    let start = sample_trace().start_time_unix_nano();
    TraceWindow::for_span(start, start)
}

#[tokio::test]
async fn walks_trace_over_http() {
    let server = MockTempo::start(sample_trace()).await;
    let client = TempoClient::new(&config(server.url())).unwrap();
    let session = TraceSession::new(
        client,
        SpanCache::new(),
        QueryKey::new("tempo", TRACE_ID),
        trace_window(),
    );

    session.load().await.unwrap();
    let snapshot = session.load_more(DB).await.unwrap();

    let ids: Vec<&str> = snapshot.spans.iter().map(|s| s.span_id.as_str()).collect();
    assert_eq!(ids, vec![ROOT, AUTH, DB, POOL, SELECT, CACHE, WORKER]);
    let db = snapshot.spans.iter().find(|s| s.span_id == DB).unwrap();
    assert_eq!(db.child_status, ChildStatus::ShowChildren);

    let requests = server.requests();
    let children = requests
        .iter()
        .find(|r| {
            r.params
                .get("q")
                .is_some_and(|q| q.contains(&format!("span:parentID = \"{DB}\" }} | select")))
        })
        .unwrap();
    assert_eq!(children.params["spss"], "4294967295");
    let start: i64 = children.params["start"].parse().unwrap();
    let end: i64 = children.params["end"].parse().unwrap();
    assert!(end > start);

    let probes = requests
        .iter()
        .filter(|r| r.params.get("q").is_some_and(|q| q.contains("count() > 0")))
        .count();
    assert!(probes > 0);
    server.shutdown().await;
}

#[tokio::test]
async fn matching_trace_without_spans_means_children() {
    let server = MockTempo::start(sample_trace()).await;
    let client = TempoClient::new(&config(server.url())).unwrap();

    assert!(client.has_children(TRACE_ID, DB, trace_window()).await.unwrap());
    assert!(!client.has_children(TRACE_ID, AUTH, trace_window()).await.unwrap());

    let requests = server.requests();
    assert!(requests.iter().all(|r| r.params["spss"] == "1"));
    server.shutdown().await;
}

#[tokio::test]
async fn child_count_support_skips_probes() {
    let server = MockTempo::start(sample_trace()).await;
    let cfg = Config {
        supports_child_count: true,
        ..config(server.url())
    };
    let client = TempoClient::new(&cfg).unwrap();
    let session = TraceSession::new(
        client,
        SpanCache::new(),
        QueryKey::new("tempo", TRACE_ID),
        trace_window(),
    );

    let snapshot = session.load().await.unwrap();

    let auth = snapshot.spans.iter().find(|s| s.span_id == AUTH).unwrap();
    assert_eq!(auth.child_status, ChildStatus::NoChildren);
    assert!(
        server
            .requests()
            .iter()
            .all(|r| !r.params.get("q").is_some_and(|q| q.contains("count() > 0")))
    );
    server.shutdown().await;
}

#[tokio::test]
async fn routes_through_datasource_proxy() {
    let server = MockTempo::start(sample_trace()).await;
    let cfg = Config {
        datasource_uid: Some(DATASOURCE_UID.to_string()),
        ..config(server.url())
    };
    let client = TempoClient::new(&cfg).unwrap();

    let response = client.root_spans(TRACE_ID, trace_window()).await.unwrap();

    assert_eq!(response.traces.len(), 1);
    let requests = server.requests();
    let request = &requests[0];
    assert_eq!(
        request.path,
        format!("/api/datasources/proxy/uid/{DATASOURCE_UID}/api/search")
    );
    server.shutdown().await;
}

#[tokio::test]
async fn empty_window_is_widened() {
    let server = MockTempo::start(sample_trace()).await;
    let client = TempoClient::new(&config(server.url())).unwrap();

    let params = SearchParams::new("{}", TraceWindow::new(100, 100));
    client.search(&params).await.unwrap();

    let requests = server.requests();
    let request = &requests[0];
    assert_eq!(request.params["start"], "100");
    assert_eq!(request.params["end"], "101");
    server.shutdown().await;
}

#[tokio::test]
async fn span_attributes_select_reported_tags() {
    let server = MockTempo::start(sample_trace()).await;
    let client = TempoClient::new(&config(server.url())).unwrap();

    let attributes = client
        .span_attributes(TRACE_ID, SELECT, trace_window())
        .await
        .unwrap();

    let keys: Vec<&str> = attributes.iter().map(|kv| kv.key.as_str()).collect();
    assert_eq!(keys, vec!["db.statement", "db.rows"]);
    let requests = server.requests();
    assert_eq!(requests[0].path, "/api/v2/search/tags");
    assert_eq!(requests[0].params["scope"], "span");
    assert!(requests[1].params["q"].ends_with("| select (span.db.rows, span.db.statement)"));
    server.shutdown().await;
}

#[tokio::test]
async fn server_errors_surface_as_backend_errors() {
    let server = MockTempo::start(sample_trace()).await;
    let client = TempoClient::new(&config(server.url())).unwrap();
    let session = TraceSession::new(
        client,
        SpanCache::new(),
        QueryKey::new("tempo", TRACE_ID),
        trace_window(),
    );
    session.load().await.unwrap();
    server.fail_children_of(DB);

    let err = session.load_more(DB).await.unwrap_err();

    assert!(matches!(err, WaterfallError::Backend(ref msg) if msg.contains("500")));
    let snapshot = session.snapshot().unwrap();
    let db = snapshot.spans.iter().find(|s| s.span_id == DB).unwrap();
    assert_eq!(db.child_status, ChildStatus::RemoteChildren);
    server.shutdown().await;
}

#[tokio::test]
async fn lists_traces() {
    let server = MockTempo::start(sample_trace()).await;
    let client = TempoClient::new(&config(server.url())).unwrap();

    let traces = client
        .list_traces("", TraceWindow::new(0, 10), 5)
        .await
        .unwrap();

    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].trace_id, TRACE_ID);
    assert_eq!(traces[0].root_trace_name.as_deref(), Some("GET /v1/orders"));
    assert_eq!(server.requests()[0].params["q"], "{}");
    server.shutdown().await;
}
