use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Value};
use tmplguard_core::error::{GuardError, LimitKind, Result};
use tmplguard_core::issue::{IssueCategory, Severity, ValidationIssue, ValidationReport};
use tmplguard_core::template::is_valid_variable_name;

use crate::collab::pii::PiiDetector;
use crate::config::RenderBudget;
use crate::render::escape::EscapeMode;

use super::include_path;
use super::signatures::{
    directive_comment_pattern, SignatureSet, EXPRESSION_BLOCK, PATH_TRAVERSAL, SSTI,
    SSTI_EXPRESSION, XSS,
};

/// Structured values nested deeper than this are refused outright.
const MAX_VALUE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct ValidatorSettings {
    pub max_content_bytes: usize,
    pub max_variable_bytes: usize,
    pub pii_severity: Severity,
    /// Reject markup in variable values. Set when substitutions are not
    /// escaped, since the sanitizer would otherwise drop it silently.
    pub reject_value_markup: bool,
}

impl ValidatorSettings {
    pub fn from_budget(budget: &RenderBudget, pii_severity: Severity, escape: EscapeMode) -> Self {
        Self {
            max_content_bytes: budget.max_content_bytes,
            max_variable_bytes: budget.max_variable_bytes,
            pii_severity,
            reject_value_markup: escape == EscapeMode::Raw,
        }
    }
}

/// Static pattern validator. Immutable once built; share it behind an `Arc`.
pub struct PatternValidator {
    settings: ValidatorSettings,
    ssti: SignatureSet,
    ssti_expression: SignatureSet,
    xss: SignatureSet,
    path_traversal: SignatureSet,
    expression_block: Regex,
    directive_comment: Regex,
    pii: Arc<dyn PiiDetector>,
}

impl PatternValidator {
    pub fn new(settings: ValidatorSettings, pii: Arc<dyn PiiDetector>) -> Result<Self> {
        let expression_block = Regex::new(EXPRESSION_BLOCK)
            .map_err(|e| GuardError::Internal(format!("expression block pattern: {e}")))?;
        let directive_comment = Regex::new(&directive_comment_pattern())
            .map_err(|e| GuardError::Internal(format!("directive pattern: {e}")))?;
        Ok(Self {
            settings,
            ssti: SignatureSet::compile(IssueCategory::Ssti, SSTI)?,
            ssti_expression: SignatureSet::compile(IssueCategory::Ssti, SSTI_EXPRESSION)?,
            xss: SignatureSet::compile(IssueCategory::Xss, XSS)?,
            path_traversal: SignatureSet::compile(IssueCategory::PathTraversal, PATH_TRAVERSAL)?,
            expression_block,
            directive_comment,
            pii,
        })
    }

    pub fn settings(&self) -> &ValidatorSettings {
        &self.settings
    }

    /// Scan template (or include) text with every signature set.
    ///
    /// Oversize input fails before any pattern runs.
    pub fn validate_content(&self, text: &str) -> Result<ValidationReport> {
        if text.len() > self.settings.max_content_bytes {
            return Err(GuardError::ResourceLimitExceeded(LimitKind::SizeLimit));
        }

        let mut issues = Vec::new();
        self.ssti.scan(text, Severity::Blocking, &mut issues);
        for caps in self.expression_block.captures_iter(text) {
            if let Some(body) = (1..=4).find_map(|i| caps.get(i)) {
                self.ssti_expression
                    .scan(body.as_str(), Severity::Blocking, &mut issues);
            }
        }
        self.xss
            .scan(&self.blank_directives(text), Severity::Blocking, &mut issues);
        self.path_traversal.scan(text, Severity::Blocking, &mut issues);

        // PII excerpts carry the kind only, never the personal data itself.
        for m in self.pii.detect(text) {
            issues.push(ValidationIssue::new(
                IssueCategory::Pii,
                self.settings.pii_severity,
                &format!("[{}]", m.kind),
            ));
        }

        let report = ValidationReport::from_issues(issues);
        tracing::debug!(
            bytes = text.len(),
            issues = report.issues.len(),
            valid = report.is_valid,
            "content validated"
        );
        Ok(report)
    }

    /// Check and clean one caller-supplied variable.
    ///
    /// Returns the value with control characters stripped. Markup is left in
    /// place when output escaping neutralizes it, and rejected otherwise.
    pub fn validate_variable_value(&self, name: &str, value: &Value) -> Result<Value> {
        if !is_valid_variable_name(name) {
            let shown: String = name.chars().take(64).collect();
            return Err(GuardError::InvalidContext(format!(
                "invalid variable name `{}`",
                shown.escape_debug()
            )));
        }

        let size = serde_json::to_vec(value)
            .map_err(|e| GuardError::Internal(format!("serialize variable: {e}")))?
            .len();
        if size > self.settings.max_variable_bytes {
            return Err(GuardError::InvalidContext(format!(
                "variable `{name}` exceeds {} bytes",
                self.settings.max_variable_bytes
            )));
        }

        self.clean_value(name, value, 0)
    }

    fn clean_value(&self, name: &str, value: &Value, depth: usize) -> Result<Value> {
        if depth > MAX_VALUE_DEPTH {
            return Err(GuardError::InvalidContext(format!(
                "variable `{name}` is nested too deeply"
            )));
        }
        match value {
            Value::String(s) => {
                let cleaned = strip_controls(s);
                self.check_text(name, &cleaned)?;
                Ok(Value::String(cleaned))
            }
            Value::Array(items) => items
                .iter()
                .map(|v| self.clean_value(name, v, depth + 1))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    let key = strip_controls(k);
                    self.check_text(name, &key)?;
                    out.insert(key, self.clean_value(name, v, depth + 1)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Values are never re-parsed, but template syntax in them is still a
    /// strong injection signal.
    fn check_text(&self, name: &str, text: &str) -> Result<()> {
        let hit = self
            .ssti
            .first_match(text)
            .or_else(|| self.expression_block.find(text).map(|m| m.as_str()));
        if let Some(matched) = hit {
            let issue = ValidationIssue::blocking(IssueCategory::Ssti, matched);
            tracing::warn!(variable = %name, excerpt = %issue.excerpt, "variable rejected");
            return Err(GuardError::SecurityViolation(IssueCategory::Ssti));
        }
        if self.settings.reject_value_markup {
            if let Some(matched) = self.xss.first_match(text) {
                let issue = ValidationIssue::blocking(IssueCategory::Xss, matched);
                tracing::warn!(variable = %name, excerpt = %issue.excerpt, "variable rejected");
                return Err(GuardError::SecurityViolation(IssueCategory::Xss));
            }
        }
        Ok(())
    }

    /// Same length as `text`, so excerpts line up with the original.
    fn blank_directives<'t>(&self, text: &'t str) -> Cow<'t, str> {
        self.directive_comment
            .replace_all(text, |caps: &regex::Captures<'_>| " ".repeat(caps[0].len()))
    }

    pub fn validate_include_path(&self, path: &str, base_dir: &Path) -> bool {
        include_path::validate_include_path(path, base_dir)
    }

    pub fn resolve_include_path(&self, path: &str, base_dir: &Path) -> Option<PathBuf> {
        include_path::resolve_include_path(path, base_dir)
    }
}

fn strip_controls(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}
