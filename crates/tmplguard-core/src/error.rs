//! Shared error type across tmplguard crates.

use std::fmt;

use thiserror::Error;

use crate::issue::IssueCategory;

/// Caller-facing error codes (stable API, also used as audit outcomes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Template or variable content matched an attack signature.
    SecurityViolation,
    /// A render budget was exhausted.
    ResourceLimit,
    /// Rate limited.
    RateLimited,
    /// Caller lacks the required permission.
    PermissionDenied,
    /// Missing variables, invalid context or template syntax.
    RenderError,
    /// Invalid configuration.
    Config,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in audit events and metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::SecurityViolation => "SECURITY_VIOLATION",
            ErrorCode::ResourceLimit => "RESOURCE_LIMIT",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::RenderError => "RENDER_ERROR",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Which render budget was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    Timeout,
    RecursionLimit,
    IterationLimit,
    SizeLimit,
    IncludeDepthLimit,
    ExpressionLength,
}

impl LimitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LimitKind::Timeout => "timeout",
            LimitKind::RecursionLimit => "recursion_limit",
            LimitKind::IterationLimit => "iteration_limit",
            LimitKind::SizeLimit => "size_limit",
            LimitKind::IncludeDepthLimit => "include_depth_limit",
            LimitKind::ExpressionLength => "expression_length",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, GuardError>;

/// Unified error type used by core and engine.
///
/// Messages name the category, limit or variable involved but never the
/// detection rule that fired.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardError {
    #[error("security violation: {0}")]
    SecurityViolation(IssueCategory),
    #[error("resource limit exceeded: {0}")]
    ResourceLimitExceeded(LimitKind),
    #[error("rate limit exceeded for action `{action}`")]
    RateLimitExceeded { action: String },
    #[error("permission denied: {permission} required")]
    PermissionDenied { permission: String },
    #[error("missing required variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),
    #[error("invalid context: {0}")]
    InvalidContext(String),
    #[error("template syntax error: {0}")]
    Syntax(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl GuardError {
    /// Map an error to its stable caller-facing code.
    pub fn code(&self) -> ErrorCode {
        match self {
            GuardError::SecurityViolation(_) => ErrorCode::SecurityViolation,
            GuardError::ResourceLimitExceeded(_) => ErrorCode::ResourceLimit,
            GuardError::RateLimitExceeded { .. } => ErrorCode::RateLimited,
            GuardError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            GuardError::MissingVariables(_)
            | GuardError::InvalidContext(_)
            | GuardError::Syntax(_) => ErrorCode::RenderError,
            GuardError::Config(_) => ErrorCode::Config,
            GuardError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Short machine-readable reason, one level finer than [`ErrorCode`].
    pub fn reason(&self) -> &'static str {
        match self {
            GuardError::SecurityViolation(c) => c.as_str(),
            GuardError::ResourceLimitExceeded(k) => k.as_str(),
            GuardError::RateLimitExceeded { .. } => "rate_limit",
            GuardError::PermissionDenied { .. } => "permission",
            GuardError::MissingVariables(_) => "missing_variables",
            GuardError::InvalidContext(_) => "invalid_context",
            GuardError::Syntax(_) => "syntax",
            GuardError::Config(_) => "config",
            GuardError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn render_error_family_shares_code() {
        let missing = GuardError::MissingVariables(vec!["name".into()]);
        let syntax = GuardError::Syntax("unclosed".into());
        assert_eq!(missing.code(), ErrorCode::RenderError);
        assert_eq!(syntax.code(), ErrorCode::RenderError);
        assert_eq!(missing.to_string(), "missing required variables: name");
    }

    #[test]
    fn violation_message_names_category_only() {
        let e = GuardError::SecurityViolation(IssueCategory::Ssti);
        assert_eq!(e.to_string(), "security violation: ssti");
        assert_eq!(e.code().as_str(), "SECURITY_VIOLATION");
        assert_eq!(e.reason(), "ssti");
    }
}
