//! Observability: in-process metrics and log subscriber setup.

pub mod logging;
pub mod metrics;

pub use metrics::RenderMetrics;
