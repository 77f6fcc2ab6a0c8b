pub mod attribute;
pub mod span;

pub use attribute::{AnyValue, KeyValue, flatten_attributes};
pub use span::{ChildStatus, Span, SpanInfo};
