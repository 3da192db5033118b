//! Sandboxed evaluation of parsed templates.
//!
//! A [`Sandbox`] is built once per renderer. Each evaluation goes
//! `prepare` (budget, deadline and scopes fixed) then `execute`, and always
//! ends in exactly one [`SandboxOutcome`]. Only `Completed` carries output;
//! every other outcome discards what was buffered.

pub mod deadline;
pub mod evaluator;
pub mod include;

use tmplguard_core::error::{GuardError, LimitKind, Result};
use tmplguard_core::issue::ValidationIssue;

pub use deadline::{CancelToken, Deadline};
pub use evaluator::{Run, Sandbox};
pub use include::IncludeLoader;

#[derive(Debug, Clone, PartialEq)]
pub enum SandboxOutcome {
    Completed(String),
    /// Include path or include content failed validation.
    Rejected(ValidationIssue),
    TimedOut,
    RecursionExceeded,
    IncludeDepthExceeded,
    IterationExceeded,
    SizeExceeded,
    /// Include could not be loaded or parsed, or an internal step failed.
    Aborted(GuardError),
}

impl SandboxOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SandboxOutcome::Completed(_))
    }

    pub fn into_result(self) -> Result<String> {
        match self {
            SandboxOutcome::Completed(out) => Ok(out),
            SandboxOutcome::Rejected(issue) => Err(GuardError::SecurityViolation(issue.category)),
            SandboxOutcome::TimedOut => Err(GuardError::ResourceLimitExceeded(LimitKind::Timeout)),
            SandboxOutcome::RecursionExceeded => {
                Err(GuardError::ResourceLimitExceeded(LimitKind::RecursionLimit))
            }
            SandboxOutcome::IncludeDepthExceeded => {
                Err(GuardError::ResourceLimitExceeded(LimitKind::IncludeDepthLimit))
            }
            SandboxOutcome::IterationExceeded => {
                Err(GuardError::ResourceLimitExceeded(LimitKind::IterationLimit))
            }
            SandboxOutcome::SizeExceeded => {
                Err(GuardError::ResourceLimitExceeded(LimitKind::SizeLimit))
            }
            SandboxOutcome::Aborted(e) => Err(e),
        }
    }
}
