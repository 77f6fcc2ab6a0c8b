pub mod backend;
pub mod fixtures;
pub mod tempo;

pub use backend::MockBackend;
pub use fixtures::{FixtureSpan, FixtureTrace, sample_trace};
pub use tempo::{DATASOURCE_UID, MockTempo, RecordedRequest};
