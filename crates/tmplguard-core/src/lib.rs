//! tmplguard core: template data model, error taxonomy and the template
//! grammar.
//!
//! This crate defines the contracts shared by the engine and by embedders
//! (template stores, PII detectors, audit consumers). It carries no runtime
//! or I/O dependencies.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths surface as `GuardError`/`Result` so hostile template
//! text cannot crash the host process.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod grammar;
pub mod issue;
pub mod template;

/// Shared result type.
pub use error::{ErrorCode, GuardError, LimitKind, Result};
pub use issue::{IssueCategory, Severity, ValidationIssue, ValidationReport};
pub use template::{RenderContext, Template, TypeTag, VariableSpec};
