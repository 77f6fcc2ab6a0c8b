pub mod backend;
pub mod builder;
pub mod cache;
pub mod projector;
pub mod reconciler;
pub mod session;

pub use backend::TraceBackend;
pub use cache::{QueryKey, Snapshot, SpanCache};
pub use projector::{Projection, visible_indices};
pub use session::TraceSession;
