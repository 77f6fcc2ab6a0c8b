use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use waterfall_core::config::Config;
use waterfall_core::error::{Result, WaterfallError};
use waterfall_core::ids::{SpanId, TraceId};
use waterfall_core::model::KeyValue;
use waterfall_core::query::{
    ALL_SPANS_PER_SPAN_SET, SearchParams, SearchResponse, SearchTagsResponse, TraceSummary,
};
use waterfall_core::time::TraceWindow;
use waterfall_tree::TraceBackend;

use crate::traceql;

/// Client for the Tempo search API, either direct or through a Grafana
/// datasource proxy.
#[derive(Debug, Clone)]
pub struct TempoClient {
    http: Client,
    base: String,
    supports_child_count: bool,
}

impl TempoClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let mut headers = build_http_headers(&cfg.headers);
        if let Some(token) = &cfg.api_token {
            let value = HeaderValue::try_from(format!("Bearer {token}"))
                .map_err(|e| WaterfallError::Config(format!("bad api token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .timeout(cfg.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| WaterfallError::Backend(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base: cfg.api_base(),
            supports_child_count: cfg.supports_child_count,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// `GET /api/search`. The window end is bumped past the start when
    /// needed, the backend rejects empty windows.
    pub async fn search(&self, params: &SearchParams) -> Result<SearchResponse> {
        let mut query = vec![
            ("q", params.query.clone()),
            ("start", params.window.start.to_string()),
            ("end", params.window.query_end().to_string()),
        ];
        if let Some(spss) = params.spans_per_span_set {
            query.push(("spss", spss.to_string()));
        }
        if let Some(limit) = params.limit {
            query.push(("limit", limit.to_string()));
        }

        tracing::debug!(q = %params.query, start = params.window.start, "tempo search");
        let request = self
            .http
            .get(format!("{}/api/search", self.base))
            .query(&query);
        send_json(request, "search").await
    }

    /// Tag names of the span scope matching `query`.
    pub async fn search_tags(&self, query: &str, window: TraceWindow) -> Result<Vec<String>> {
        let request = self
            .http
            .get(format!("{}/api/v2/search/tags", self.base))
            .query(&[
                ("q", query.to_string()),
                ("start", window.start.to_string()),
                ("end", window.query_end().to_string()),
                ("scope", "span".to_string()),
            ]);
        let response: SearchTagsResponse = send_json(request, "search tags").await?;
        Ok(response.span_tags())
    }

    pub async fn list_traces(
        &self,
        query: &str,
        window: TraceWindow,
        limit: usize,
    ) -> Result<Vec<TraceSummary>> {
        let query = if query.trim().is_empty() {
            traceql::MATCH_ALL
        } else {
            query
        };
        let params = SearchParams::new(query, window).limit(limit);
        let mut traces = self.search(&params).await?.traces;
        traces.truncate(limit);
        Ok(traces)
    }
}

impl TraceBackend for TempoClient {
    async fn root_spans(&self, trace_id: &str, window: TraceWindow) -> Result<SearchResponse> {
        let trace_id = TraceId::parse(trace_id)?;
        let query = traceql::root_spans(trace_id.as_str(), self.supports_child_count);
        self.search(&SearchParams::new(query, window)).await
    }

    async fn child_spans(
        &self,
        trace_id: &str,
        parent_span_id: &str,
        window: TraceWindow,
    ) -> Result<SearchResponse> {
        let trace_id = TraceId::parse(trace_id)?;
        let parent_span_id = SpanId::parse(parent_span_id)?;
        let query = traceql::child_spans(
            trace_id.as_str(),
            parent_span_id.as_str(),
            self.supports_child_count,
        );
        let params = SearchParams::new(query, window).spans_per_span_set(ALL_SPANS_PER_SPAN_SET);
        self.search(&params).await
    }

    async fn has_children(&self, trace_id: &str, span_id: &str, window: TraceWindow) -> Result<bool> {
        let trace_id = TraceId::parse(trace_id)?;
        let span_id = SpanId::parse(span_id)?;
        let query = traceql::has_children(trace_id.as_str(), span_id.as_str());
        let response = self
            .search(&SearchParams::new(query, window).spans_per_span_set(1))
            .await?;
        // Any matching trace means at least one child, spans or not.
        Ok(response.find_trace(trace_id.as_str()).is_some())
    }

    async fn span_attributes(
        &self,
        trace_id: &str,
        span_id: &str,
        window: TraceWindow,
    ) -> Result<Vec<KeyValue>> {
        let trace_id = TraceId::parse(trace_id)?;
        let span_id = SpanId::parse(span_id)?;
        let tags = self
            .search_tags(
                &traceql::span_by_id(trace_id.as_str(), span_id.as_str(), &[]),
                window,
            )
            .await?;
        let query = traceql::span_by_id(trace_id.as_str(), span_id.as_str(), &tags);
        let response = self
            .search(&SearchParams::new(query, window).spans_per_span_set(1))
            .await?;
        Ok(response
            .find_trace(trace_id.as_str())
            .and_then(|t| t.spans().next().cloned())
            .map(|s| s.attributes)
            .unwrap_or_default())
    }
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| WaterfallError::Backend(format!("{what} request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(WaterfallError::Backend(format!(
            "{what} failed with status {status}: {}",
            body.trim()
        )));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| WaterfallError::Backend(format!("{what} response decode failed: {e}")))
}

fn build_http_headers(headers: &[(String, String)]) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::try_from(k.as_str());
        let value = HeaderValue::try_from(v.as_str());
        match (name, value) {
            (Ok(name), Ok(value)) => {
                out.insert(name, value);
            }
            _ => {
                tracing::warn!(header = %k, "ignored invalid tempo header");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn invalid_headers_are_skipped() {
        let headers = build_http_headers(&[
            ("x-scope-orgid".to_string(), "dev".to_string()),
            ("bad header".to_string(), "x".to_string()),
        ]);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-scope-orgid"], "dev");
    }

    #[tokio::test]
    async fn span_ids_are_validated_before_any_request() {
        let cfg = Config {
            endpoint: "http://127.0.0.1:9".to_string(),
            ..Config::default()
        };
        let client = TempoClient::new(&cfg).unwrap();
        let trace = "4bf92f3577b34da6a3ce929d0e0e4736";
        let window = TraceWindow::new(0, 1);

        let err = client
            .child_spans(trace, "\" || true", window)
            .await
            .unwrap_err();
        assert!(matches!(err, WaterfallError::Parse(_)));
        let err = client.has_children(trace, "", window).await.unwrap_err();
        assert!(matches!(err, WaterfallError::Parse(_)));
    }

    #[test]
    fn base_follows_datasource_proxy() {
        let cfg = Config {
            endpoint: "http://grafana:3000".to_string(),
            datasource_uid: Some("tempo".to_string()),
            api_token: Some("secret".to_string()),
            timeout: Duration::from_secs(2),
            ..Config::default()
        };
        let client = TempoClient::new(&cfg).unwrap();
        assert_eq!(
            client.base_url(),
            "http://grafana:3000/api/datasources/proxy/uid/tempo"
        );
    }
}
