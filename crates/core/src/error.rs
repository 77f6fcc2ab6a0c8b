use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaterfallError {
    #[error("parent level not found for span {span_id} (parent {parent_span_id})")]
    MissingParentLevel {
        span_id: String,
        parent_span_id: String,
    },

    #[error("trace not found: {0}")]
    TraceNotFound(String),

    #[error("stale reconciliation: span {0} is not in the current list")]
    StaleReconciliation(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WaterfallError>;
