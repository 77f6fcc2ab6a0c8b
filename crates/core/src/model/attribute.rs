use std::collections::BTreeMap;

use base64::Engine;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};

/// Typed attribute value as carried by the search API (protobuf JSON mapping).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AnyValue {
    #[default]
    Empty,
    String(String),
    Bool(bool),
    Int(i64),
    Double(f64),
    Bytes(Vec<u8>),
    Array(Vec<AnyValue>),
    KvList(Vec<KeyValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: AnyValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: AnyValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

impl AnyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn from_json(value: &Value) -> Result<Self, String> {
        let Some(obj) = value.as_object() else {
            return match value {
                Value::Null => Ok(Self::Empty),
                other => Err(format!("expected attribute value object, got {other}")),
            };
        };

        if let Some(v) = obj.get("stringValue") {
            return Ok(Self::String(v.as_str().unwrap_or_default().to_string()));
        }
        if let Some(v) = obj.get("boolValue") {
            return v
                .as_bool()
                .map(Self::Bool)
                .ok_or_else(|| format!("bad boolValue: {v}"));
        }
        if let Some(v) = obj.get("intValue") {
            return parse_int(v).map(Self::Int);
        }
        if let Some(v) = obj.get("doubleValue") {
            return parse_double(v).map(Self::Double);
        }
        if let Some(v) = obj.get("bytesValue") {
            return parse_bytes(v).map(Self::Bytes);
        }
        if let Some(v) = obj.get("arrayValue") {
            let values = list_values(v)
                .iter()
                .map(Self::from_json)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Self::Array(values));
        }
        if let Some(v) = obj.get("kvlistValue") {
            let values = list_values(v)
                .iter()
                .map(|kv| serde_json::from_value::<KeyValue>(kv.clone()).map_err(|e| e.to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Self::KvList(values));
        }
        Ok(Self::Empty)
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Empty => json!({}),
            Self::String(s) => json!({ "stringValue": s }),
            Self::Bool(b) => json!({ "boolValue": b }),
            Self::Int(i) => json!({ "intValue": i.to_string() }),
            Self::Double(d) => json!({ "doubleValue": d }),
            Self::Bytes(b) => json!({
                "bytesValue": base64::engine::general_purpose::STANDARD.encode(b)
            }),
            Self::Array(values) => json!({
                "arrayValue": { "values": values.iter().map(Self::to_json).collect::<Vec<_>>() }
            }),
            Self::KvList(values) => json!({
                "kvlistValue": {
                    "values": values
                        .iter()
                        .map(|kv| json!({ "key": kv.key, "value": kv.value.to_json() }))
                        .collect::<Vec<_>>()
                }
            }),
        }
    }

    fn flatten_into(&self, key: String, out: &mut BTreeMap<String, Value>) {
        match self {
            Self::Empty => {
                out.insert(key, Value::Null);
            }
            Self::String(s) => {
                out.insert(key, Value::String(s.clone()));
            }
            Self::Bool(b) => {
                out.insert(key, Value::Bool(*b));
            }
            Self::Int(i) => {
                out.insert(key, json!(i));
            }
            Self::Double(d) => {
                out.insert(key, json!(d));
            }
            Self::Bytes(b) => {
                out.insert(key, json!(b));
            }
            Self::Array(values) => {
                for (idx, value) in values.iter().enumerate() {
                    value.flatten_into(format!("{key}[{idx}]"), out);
                }
            }
            Self::KvList(values) => {
                for kv in values {
                    kv.value.flatten_into(format!("{key}.{}", kv.key), out);
                }
            }
        }
    }
}

/// Flattens an attribute list into dotted / indexed keys, e.g.
/// `http.request.header[0]` or `resource.service.name`.
pub fn flatten_attributes(attrs: &[KeyValue]) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for kv in attrs {
        kv.value.flatten_into(kv.key.clone(), &mut out);
    }
    out
}

/// Finds the first attribute with the given key.
pub fn find_attribute<'a>(attrs: &'a [KeyValue], key: &str) -> Option<&'a AnyValue> {
    attrs.iter().find(|kv| kv.key == key).map(|kv| &kv.value)
}

fn list_values(v: &Value) -> Vec<Value> {
    v.get("values")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn parse_int(v: &Value) -> Result<i64, String> {
    match v {
        Value::Number(n) => n.as_i64().ok_or_else(|| format!("bad intValue: {n}")),
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|e| format!("bad intValue {s}: {e}")),
        other => Err(format!("bad intValue: {other}")),
    }
}

fn parse_double(v: &Value) -> Result<f64, String> {
    match v {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("bad doubleValue: {n}")),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| format!("bad doubleValue {s}: {e}")),
        other => Err(format!("bad doubleValue: {other}")),
    }
}

fn parse_bytes(v: &Value) -> Result<Vec<u8>, String> {
    match v {
        Value::String(s) => base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| format!("bad bytesValue: {e}")),
        Value::Array(items) => items
            .iter()
            .map(|b| {
                b.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| format!("bad byte in bytesValue: {b}"))
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(format!("bad bytesValue: {other}")),
    }
}

impl Serialize for AnyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AnyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Self::from_json(&raw).map_err(D::Error::custom)
    }
}

impl From<&str> for AnyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<i64> for AnyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_value_kind() {
        let raw = r#"[
            {"key":"s","value":{"stringValue":"GET"}},
            {"key":"b","value":{"boolValue":true}},
            {"key":"i","value":{"intValue":"42"}},
            {"key":"n","value":{"intValue":7}},
            {"key":"d","value":{"doubleValue":1.5}},
            {"key":"y","value":{"bytesValue":"AQID"}},
            {"key":"a","value":{"arrayValue":{"values":[{"stringValue":"x"},{"intValue":"1"}]}}},
            {"key":"m","value":{"kvlistValue":{"values":[{"key":"inner","value":{"boolValue":false}}]}}},
            {"key":"e","value":{}}
        ]"#;
        let attrs: Vec<KeyValue> = serde_json::from_str(raw).unwrap();
        assert_eq!(attrs[0].value, AnyValue::String("GET".into()));
        assert_eq!(attrs[1].value, AnyValue::Bool(true));
        assert_eq!(attrs[2].value, AnyValue::Int(42));
        assert_eq!(attrs[3].value, AnyValue::Int(7));
        assert_eq!(attrs[4].value, AnyValue::Double(1.5));
        assert_eq!(attrs[5].value, AnyValue::Bytes(vec![1, 2, 3]));
        assert_eq!(
            attrs[6].value,
            AnyValue::Array(vec![AnyValue::String("x".into()), AnyValue::Int(1)])
        );
        assert_eq!(
            attrs[7].value,
            AnyValue::KvList(vec![KeyValue::new("inner", AnyValue::Bool(false))])
        );
        assert_eq!(attrs[8].value, AnyValue::Empty);
    }

    #[test]
    fn accepts_byte_arrays() {
        let v: AnyValue = serde_json::from_str(r#"{"bytesValue":[4,5]}"#).unwrap();
        assert_eq!(v, AnyValue::Bytes(vec![4, 5]));
    }

    #[test]
    fn rejects_malformed_ints() {
        assert!(serde_json::from_str::<AnyValue>(r#"{"intValue":"x"}"#).is_err());
    }

    #[test]
    fn serializes_back_to_wire_shape() {
        let v = AnyValue::Int(3);
        assert_eq!(serde_json::to_value(&v).unwrap(), json!({"intValue":"3"}));
        let back: AnyValue = serde_json::from_value(serde_json::to_value(&v).unwrap()).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn flattens_nested_values() {
        let attrs = vec![
            KeyValue::new("http.method", "GET".into()),
            KeyValue::new("retries", AnyValue::Int(2)),
            KeyValue::new(
                "peer",
                AnyValue::KvList(vec![
                    KeyValue::new("host", "redis".into()),
                    KeyValue::new(
                        "ports",
                        AnyValue::Array(vec![AnyValue::Int(6379), AnyValue::Int(6380)]),
                    ),
                ]),
            ),
            KeyValue::new("raw", AnyValue::Bytes(vec![9])),
        ];
        let flat = flatten_attributes(&attrs);
        assert_eq!(flat["http.method"], json!("GET"));
        assert_eq!(flat["retries"], json!(2));
        assert_eq!(flat["peer.host"], json!("redis"));
        assert_eq!(flat["peer.ports[0]"], json!(6379));
        assert_eq!(flat["peer.ports[1]"], json!(6380));
        assert_eq!(flat["raw"], json!([9]));
    }
}
