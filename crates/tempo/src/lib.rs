pub mod client;
pub mod traceql;

pub use client::TempoClient;
