use serde::{Deserialize, Serialize};

use crate::model::attribute::{KeyValue, find_attribute};

pub const PARENT_ID_ATTR: &str = "span:parentID";
pub const CHILD_COUNT_ATTR: &str = "childCount";

/// A span record as returned by the search API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    #[serde(rename = "spanID", default)]
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, with = "nanos")]
    pub start_time_unix_nano: u64,
    #[serde(default, with = "nanos")]
    pub duration_nanos: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<KeyValue>,
}

impl Span {
    pub fn end_time_unix_nano(&self) -> u64 {
        self.start_time_unix_nano.saturating_add(self.duration_nanos)
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        find_attribute(&self.attributes, PARENT_ID_ATTR)
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Child count reported by backends that support it.
    pub fn child_count(&self) -> Option<u64> {
        find_attribute(&self.attributes, CHILD_COUNT_ATTR)
            .and_then(|v| v.as_i64())
            .map(|n| n.max(0) as u64)
    }
}

/// Expansion state of a tree node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChildStatus {
    NoChildren,
    RemoteChildren,
    LoadingChildren,
    ShowChildren,
    HideChildren,
}

impl ChildStatus {
    pub fn can_load(self) -> bool {
        matches!(self, Self::RemoteChildren)
    }
}

/// A leveled node of the materialized span tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanInfo {
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub trace_id: String,
    pub level: u32,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    pub name: String,
    pub child_status: ChildStatus,
    pub child_count: Option<u64>,
}

impl SpanInfo {
    pub fn duration_nanos(&self) -> u64 {
        self.end_time_unix_nano
            .saturating_sub(self.start_time_unix_nano)
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_nanos() as f64 / 1_000_000.0
    }
}

/// Nanosecond timestamps travel as decimal strings; plain numbers are accepted too.
pub(crate) mod nanos {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    pub fn serialize<S: Serializer>(v: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Num(n) => Ok(n),
            Raw::Str(s) if s.is_empty() => Ok(0),
            Raw::Str(s) => s.parse::<u64>().map_err(serde::de::Error::custom),
        }
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(v: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
            match v {
                Some(v) => super::serialize(v, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
            match Option::<super::Raw>::deserialize(d)? {
                None => Ok(None),
                Some(super::Raw::Num(n)) => Ok(Some(n)),
                Some(super::Raw::Str(s)) => s
                    .parse::<u64>()
                    .map(Some)
                    .map_err(serde::de::Error::custom),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attribute::AnyValue;

    #[test]
    fn decodes_search_api_span() {
        let raw = r#"{
            "spanID": "00f067aa0ba902b7",
            "name": "GET /v1/orders",
            "startTimeUnixNano": "1700000000000000000",
            "durationNanos": "1800000000",
            "attributes": [
                {"key": "span:parentID", "value": {"stringValue": "a1b2c3d4e5f60718"}},
                {"key": "childCount", "value": {"intValue": "3"}}
            ]
        }"#;
        let span: Span = serde_json::from_str(raw).unwrap();
        assert_eq!(span.span_id, "00f067aa0ba902b7");
        assert_eq!(span.start_time_unix_nano, 1_700_000_000_000_000_000);
        assert_eq!(span.end_time_unix_nano(), 1_700_000_001_800_000_000);
        assert_eq!(span.parent_span_id(), Some("a1b2c3d4e5f60718"));
        assert_eq!(span.child_count(), Some(3));
    }

    #[test]
    fn empty_parent_means_root() {
        let span = Span {
            span_id: "a".into(),
            attributes: vec![KeyValue::new(PARENT_ID_ATTR, AnyValue::String(String::new()))],
            ..Span::default()
        };
        assert_eq!(span.parent_span_id(), None);
        assert_eq!(span.child_count(), None);
    }

    #[test]
    fn numeric_times_are_accepted() {
        let span: Span =
            serde_json::from_str(r#"{"spanID":"a","startTimeUnixNano":10,"durationNanos":5}"#)
                .unwrap();
        assert_eq!(span.end_time_unix_nano(), 15);
        assert_eq!(span.name, None);
    }
}
