//! Attack signature tables.
//!
//! Rule labels stay inside this module and the debug log; issues and errors
//! only ever carry the matched input text.

use std::collections::HashSet;

use regex::Regex;
use tmplguard_core::error::{GuardError, Result};
use tmplguard_core::grammar::lexer::DIRECTIVE_KEYWORDS;
use tmplguard_core::issue::{IssueCategory, Severity, ValidationIssue};

/// Applied to the whole template.
pub const SSTI: &[(&str, &str)] = &[
    (
        "dunder_attribute",
        r"(?i)__(?:class|bases|base|mro|subclasses|globals|builtins|import|init|dict|getattribute|getattr|code|closure|func|self|module|reduce|reduce_ex|loader|spec)__",
    ),
    ("dunder_chain", r"\.\s*__[A-Za-z0-9_]+__"),
    ("statement_block", r"\{%"),
    (
        "dangerous_scheme",
        r"(?i)\b(?:file|gopher|dict|ldap|jar|php|expect|netdoc|phar)://",
    ),
];

/// Applied only to the inside of expression blocks.
pub const SSTI_EXPRESSION: &[(&str, &str)] = &[
    (
        "builtin_call",
        r"(?i)\b(?:exec|eval|compile|import|open|system|popen|subprocess|getattr|setattr|delattr|globals|locals|vars|builtins)\s*\(",
    ),
    ("call_or_index", r"[()\[\]]"),
    ("shell_meta", r"[;|&`$]"),
    ("operator", r"[*+/%^~<>=!\-]"),
    ("uri", r"(?i)\b[a-z][a-z0-9+.\-]*://"),
    ("escaped_char", r"\\x[0-9a-fA-F]{2}|\\u[0-9a-fA-F]{4}"),
];

/// `{{…}}`, `{%…%}`, `${…}` and `#{…}`. The first participating group is the body.
pub const EXPRESSION_BLOCK: &str = r"(?s)\{\{(.*?)\}\}|\{%(.*?)%\}|\$\{(.*?)\}|#\{(.*?)\}";

pub const XSS: &[(&str, &str)] = &[
    ("script_open", r"(?i)<\s*script\b"),
    ("script_close", r"(?i)<\s*/\s*script\s*>"),
    ("event_handler", r#"(?i)<\s*/?[a-z][^>]*[\s/"']on[a-z]+\s*="#),
    ("script_uri", r"(?i)\b(?:javascript|vbscript|livescript)\s*:"),
    (
        "data_uri",
        r"(?i)\bdata\s*:\s*(?:text/html|application/(?:x-)?javascript|image/svg\+xml)",
    ),
    (
        "embedding_tag",
        r"(?i)<\s*(?:iframe|frame|frameset|object|embed|applet|base|meta|form|link|svg|math)\b",
    ),
    ("css_expression", r"(?i)\bexpression\s*\("),
    ("srcdoc", r"(?i)\bsrcdoc\s*="),
    (
        "encoded_url",
        r#"(?i)\b(?:href|src|action|formaction|data|background|xlink:href)\s*=\s*["']?[^"'>\s]*&#"#,
    ),
];

pub const PATH_TRAVERSAL: &[(&str, &str)] = &[
    ("dot_dot", r"\.\.[/\\]"),
    ("dot_dot_tail", r"(?m)[/\\]\.\.(?:$|\s)"),
    ("encoded_dot", r"(?i)%2e%2e|%2e\.|\.%2e|%252e|%c0%ae|%c0%af"),
    ("drive_letter", r#"(?im)(?:^|[\s'"(=])[a-z]:[\\/]"#),
    ("unc_path", r"\\\\[A-Za-z0-9._\-]+\\"),
    (
        "sensitive_root",
        r#"(?m)(?:^|[\s'"(=])/(?:etc|proc|sys|root|dev|boot|var/log|windows|winnt)(?:/|\b)"#,
    ),
    ("file_uri", r"(?i)\bfile:/"),
];

struct Rule {
    label: &'static str,
    re: Regex,
}

/// Engine directives (`<!-- IF … -->` and friends). They are parsed, never
/// emitted, so their bodies are hidden from the XSS scan.
pub fn directive_comment_pattern() -> String {
    format!(
        r"<!--\s*(?:{})(?:\s(?s:.*?))?-->",
        DIRECTIVE_KEYWORDS.join("|")
    )
}

/// Compiled rules for one issue category.
pub struct SignatureSet {
    category: IssueCategory,
    rules: Vec<Rule>,
}

impl SignatureSet {
    pub fn compile(category: IssueCategory, table: &[(&'static str, &str)]) -> Result<Self> {
        let mut rules = Vec::with_capacity(table.len());
        for &(label, pattern) in table {
            let re = Regex::new(pattern).map_err(|e| {
                GuardError::Internal(format!("signature `{label}` failed to compile: {e}"))
            })?;
            rules.push(Rule { label, re });
        }
        Ok(Self { category, rules })
    }

    pub fn category(&self) -> IssueCategory {
        self.category
    }

    /// Push one issue per distinct matched span, across all rules.
    pub fn scan(&self, text: &str, severity: Severity, out: &mut Vec<ValidationIssue>) {
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        for rule in &self.rules {
            for m in rule.re.find_iter(text) {
                if !seen.insert((m.start(), m.end())) {
                    continue;
                }
                tracing::debug!(
                    category = %self.category,
                    rule = rule.label,
                    offset = m.start(),
                    "signature matched"
                );
                out.push(ValidationIssue::new(self.category, severity, m.as_str()));
            }
        }
    }

    pub fn first_match<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.rules
            .iter()
            .find_map(|r| r.re.find(text))
            .map(|m| m.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn every_table_compiles() {
        for (cat, table) in [
            (IssueCategory::Ssti, SSTI),
            (IssueCategory::Ssti, SSTI_EXPRESSION),
            (IssueCategory::Xss, XSS),
            (IssueCategory::PathTraversal, PATH_TRAVERSAL),
        ] {
            SignatureSet::compile(cat, table).unwrap();
        }
        Regex::new(EXPRESSION_BLOCK).unwrap();
        Regex::new(&directive_comment_pattern()).unwrap();
    }

    #[test]
    fn event_handler_needs_a_real_tag() {
        let set = SignatureSet::compile(IssueCategory::Xss, XSS).unwrap();
        assert!(set.first_match("<img src=x onerror=alert(1)>").is_some());
        assert!(set.first_match("< svg/onload=alert(1)>").is_some());
        assert_eq!(set.first_match("<!-- IF one == 1 -->"), None);
        assert_eq!(set.first_match("a <= b and online = yes"), None);
    }

    #[test]
    fn directive_pattern_spans_whole_directives_only() {
        let re = Regex::new(&directive_comment_pattern()).unwrap();
        let text = "<!-- IF srcdoc == 1 -->x<!-- ELSE -->y<!-- END IF --><!-- note onload=1 -->";
        let found: Vec<&str> = re.find_iter(text).map(|m| m.as_str()).collect();
        assert_eq!(found, ["<!-- IF srcdoc == 1 -->", "<!-- ELSE -->", "<!-- END IF -->"]);
    }

    #[test]
    fn overlapping_rules_report_a_span_once() {
        let set = SignatureSet::compile(IssueCategory::Ssti, SSTI).unwrap();
        let mut out = Vec::new();
        set.scan("x.__class__", Severity::Blocking, &mut out);
        // `__class__` (dunder) and `.__class__` (chain) are different spans.
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|i| i.excerpt.contains("__class__")));
    }

    #[test]
    fn plain_prose_is_clean() {
        let text = "Dear customer,\n\nYour order #42 ships on Monday. Reply to this mail\nif anything looks wrong: we're happy to help!\n";
        for (cat, table) in [
            (IssueCategory::Ssti, SSTI),
            (IssueCategory::Xss, XSS),
            (IssueCategory::PathTraversal, PATH_TRAVERSAL),
        ] {
            let set = SignatureSet::compile(cat, table).unwrap();
            assert_eq!(set.first_match(text), None, "{cat}");
        }
    }
}
