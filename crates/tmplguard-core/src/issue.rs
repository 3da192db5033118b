//! Validation findings produced by the content validator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Longest excerpt kept on an issue, in characters.
pub const MAX_EXCERPT_CHARS: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Ssti,
    Xss,
    PathTraversal,
    Pii,
}

impl IssueCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueCategory::Ssti => "ssti",
            IssueCategory::Xss => "xss",
            IssueCategory::PathTraversal => "path_traversal",
            IssueCategory::Pii => "pii",
        }
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Blocking,
    Warning,
}

/// One signature hit. `excerpt` is the offending input, never the rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub excerpt: String,
}

impl ValidationIssue {
    pub fn new(category: IssueCategory, severity: Severity, matched: &str) -> Self {
        Self {
            category,
            severity,
            excerpt: excerpt(matched),
        }
    }

    pub fn blocking(category: IssueCategory, matched: &str) -> Self {
        Self::new(category, Severity::Blocking, matched)
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// `is_valid` is derived: false iff any issue is blocking.
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let is_valid = !issues.iter().any(ValidationIssue::is_blocking);
        Self { is_valid, issues }
    }

    pub fn first_blocking(&self) -> Option<&ValidationIssue> {
        self.issues.iter().find(|i| i.is_blocking())
    }

    pub fn has_category(&self, category: IssueCategory) -> bool {
        self.issues.iter().any(|i| i.category == category)
    }
}

fn excerpt(s: &str) -> String {
    let mut out: String = s.chars().take(MAX_EXCERPT_CHARS).collect();
    if s.chars().count() > MAX_EXCERPT_CHARS {
        out.push('…');
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_invalidate() {
        let r = ValidationReport::from_issues(vec![ValidationIssue::new(
            IssueCategory::Pii,
            Severity::Warning,
            "a@b.c",
        )]);
        assert!(r.is_valid);
        assert!(r.first_blocking().is_none());

        let r = ValidationReport::from_issues(vec![ValidationIssue::blocking(
            IssueCategory::Xss,
            "<script",
        )]);
        assert!(!r.is_valid);
    }

    #[test]
    fn excerpt_is_truncated() {
        let long = "x".repeat(200);
        let issue = ValidationIssue::blocking(IssueCategory::Ssti, &long);
        assert_eq!(issue.excerpt.chars().count(), MAX_EXCERPT_CHARS + 1);
    }
}
