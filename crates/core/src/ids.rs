use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaterfallError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(String);

impl TraceId {
    /// Accepts up to 32 hex digits; the backend drops leading zeros.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() || input.len() > 32 || !input.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WaterfallError::Parse(format!("invalid trace id: {input}")));
        }
        Ok(Self(input.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SpanId {
    /// Up to 16 hex digits. Ids are interpolated into quoted TraceQL
    /// strings, so nothing else gets through.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() || input.len() > 16 || !input.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WaterfallError::Parse(format!("invalid span id: {input}")));
        }
        Ok(Self(input.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn normalize_hex(id: &str) -> String {
    let trimmed = id.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_ascii_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ids() {
        let trace = TraceId::parse("4bf92f3577b34da6a3ce929d0e0e4736").unwrap();
        let span = SpanId::parse("00F067AA0BA902B7").unwrap();
        assert_eq!(trace.as_str(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(span.as_str(), "00f067aa0ba902b7");
    }

    #[test]
    fn rejects_bad_ids() {
        assert!(TraceId::parse("").is_err());
        assert!(TraceId::parse("xyz").is_err());
        assert!(TraceId::parse("\" || true").is_err());
        assert!(SpanId::parse("zzzzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn span_ids_may_lose_leading_zeros() {
        assert_eq!(SpanId::parse("f067aa0ba902b7").unwrap().as_str(), "f067aa0ba902b7");
        assert!(SpanId::parse("").is_err());
        assert!(SpanId::parse("00f067aa0ba902b700").is_err());
        assert!(SpanId::parse("\" || true").is_err());
    }

    #[test]
    fn normalize_hex_drops_leading_zeros_and_case() {
        assert_eq!(normalize_hex("00AB12"), "ab12");
        assert_eq!(normalize_hex("0000"), "0");
    }
}
