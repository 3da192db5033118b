//! Collaborator seams: template storage, PII detection, audit sinks and
//! include sources.
//!
//! The engine owns none of these concerns; it only depends on the traits.

pub mod audit;
pub mod include;
pub mod pii;
pub mod store;

pub use audit::{AuditEvent, AuditSink, ChannelAuditSink, MemoryAuditSink, TracingAuditSink};
pub use include::{DirIncludeSource, IncludeSource};
pub use pii::{NoPiiDetector, PiiDetector, PiiMatch};
pub use store::{InMemoryTemplateStore, TemplateStore};
