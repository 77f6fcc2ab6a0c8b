use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use waterfall_core::model::SpanInfo;
use waterfall_tree::Snapshot;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ExploreRequest {
    Rows,
    LoadMore { span_id: String },
    Expand { span_id: String },
    Collapse { span_id: String },
    Details { span_id: String },
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExploreResponse {
    Rows(RowsView),
    Details {
        span_id: String,
        attributes: BTreeMap<String, Value>,
    },
    Error(String),
}

/// Visible rows of one snapshot, each tagged with its index in the full
/// span list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowsView {
    pub version: u64,
    pub total: usize,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub index: usize,
    pub span: SpanInfo,
}

impl RowsView {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let rows = snapshot
            .projection()
            .iter()
            .map(|(index, span)| Row {
                index,
                span: span.clone(),
            })
            .collect();
        Self {
            version: snapshot.version,
            total: snapshot.spans.len(),
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_externally_tagged() {
        let req: ExploreRequest =
            serde_json::from_str(r#"{"LoadMore":{"span_id":"00f067aa0ba902b7"}}"#).unwrap();
        assert_eq!(
            req,
            ExploreRequest::LoadMore {
                span_id: "00f067aa0ba902b7".to_string()
            }
        );
        let req: ExploreRequest = serde_json::from_str(r#""Rows""#).unwrap();
        assert_eq!(req, ExploreRequest::Rows);
    }

    #[test]
    fn error_response_shape() {
        let json = serde_json::to_value(ExploreResponse::Error("boom".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({"Error": "boom"}));
    }
}
