//! Final output sanitization pass.
//!
//! Runs on the fully rendered document, after escaping. Dangerous blocks and
//! comments are removed, allow-listed tags are rebuilt from allow-listed
//! attributes, and everything else is dropped. Text between tags gets stray
//! `<`, script schemes and inline handler syntax entity-encoded.

use std::borrow::Cow;
use std::collections::HashSet;

use regex::{Captures, Regex};
use tmplguard_core::error::{GuardError, Result};

/// Tags that are never emitted, whatever the configuration says.
pub const FORBIDDEN_TAGS: &[&str] = &[
    "script", "style", "iframe", "frame", "frameset", "object", "embed", "applet", "template",
    "noscript", "base", "meta", "link", "form", "svg", "math",
];

/// Removed together with their content.
const BLOCK_TAGS: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "template", "noscript",
];

pub const DEFAULT_ALLOWED_TAGS: &[&str] = &[
    "p", "br", "hr", "b", "i", "u", "em", "strong", "small", "sub", "sup", "code", "pre",
    "blockquote", "ul", "ol", "li", "dl", "dt", "dd", "h1", "h2", "h3", "h4", "h5", "h6", "a",
    "img", "table", "thead", "tbody", "tfoot", "tr", "th", "td", "caption", "span", "div",
];

const ALLOWED_ATTRS: &[&str] = &[
    "href", "src", "alt", "title", "class", "id", "colspan", "rowspan", "width", "height",
    "align",
];

const URL_ATTRS: &[&str] = &["href", "src"];

const SAFE_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// Block removal repeats until stable, so split payloads such as
/// `<scr<script></script>ipt>` cannot reassemble.
const MAX_BLOCK_PASSES: usize = 8;

pub struct OutputSanitizer {
    allowed: HashSet<String>,
    blocks: Vec<Regex>,
    comment: Regex,
    tag: Regex,
    attr: Regex,
    entity: Regex,
    script_scheme: Regex,
    handler: Regex,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| GuardError::Internal(format!("sanitizer pattern: {e}")))
}

impl OutputSanitizer {
    /// `extra_tags` extends the default allowlist; forbidden tags are ignored.
    pub fn new(extra_tags: &[String]) -> Result<Self> {
        let allowed = DEFAULT_ALLOWED_TAGS
            .iter()
            .map(|t| t.to_string())
            .chain(extra_tags.iter().map(|t| t.to_ascii_lowercase()))
            .filter(|t| !FORBIDDEN_TAGS.contains(&t.as_str()))
            .collect();

        // The regex crate has no backreferences, so each block tag gets its own pattern.
        let blocks = BLOCK_TAGS
            .iter()
            .map(|t| compile(&format!(r"(?is)<\s*{t}\b[^>]*>.*?<\s*/\s*{t}\s*>")))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            allowed,
            blocks,
            comment: compile(r"(?s)<!--.*?-->")?,
            tag: compile(r"<\s*(/?)\s*([A-Za-z][A-Za-z0-9]*)([^<>]*)>")?,
            attr: compile(
                r#"([A-Za-z_:][-A-Za-z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#,
            )?,
            entity: compile(r"(?i)&#x([0-9a-f]{1,6});?|&#([0-9]{1,7});?|&(colon|tab|newline|lpar|rpar|amp|lt|gt|quot|apos);")?,
            script_scheme: compile(r"(?i)\b(javascript|vbscript|livescript)(\s*):")?,
            handler: compile(r"(?i)\b(on[a-z]+)(\s*)=")?,
        })
    }

    pub fn sanitize(&self, html: &str) -> String {
        let mut doc = html.to_string();
        for _ in 0..MAX_BLOCK_PASSES {
            let before = doc.len();
            for re in &self.blocks {
                if let Cow::Owned(s) = re.replace_all(&doc, "") {
                    doc = s;
                }
            }
            if let Cow::Owned(s) = self.comment.replace_all(&doc, "") {
                doc = s;
            }
            if doc.len() == before {
                break;
            }
        }

        let mut out = String::with_capacity(doc.len());
        let mut last = 0usize;
        for caps in self.tag.captures_iter(&doc) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&self.neutralize_text(&doc[last..whole.start()]));
            if let Some(tag) = self.rebuild_tag(&caps) {
                out.push_str(&tag);
            }
            last = whole.end();
        }
        out.push_str(&self.neutralize_text(&doc[last..]));
        out
    }

    fn rebuild_tag(&self, caps: &Captures<'_>) -> Option<String> {
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let name = caps.get(2)?.as_str().to_ascii_lowercase();
        if !self.allowed.contains(&name) {
            tracing::debug!(tag = %name, "dropped disallowed tag");
            return None;
        }
        if closing {
            return Some(format!("</{name}>"));
        }

        let raw_attrs = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        let mut tag = format!("<{name}");
        for a in self.attr.captures_iter(raw_attrs) {
            let Some(attr_name) = a.get(1).map(|m| m.as_str().to_ascii_lowercase()) else {
                continue;
            };
            if attr_name.starts_with("on") || !ALLOWED_ATTRS.contains(&attr_name.as_str()) {
                continue;
            }
            let value = (2..=4).find_map(|i| a.get(i)).map(|m| m.as_str());
            match value {
                None => {
                    tag.push(' ');
                    tag.push_str(&attr_name);
                }
                Some(v) => {
                    let decoded = self.decode_entities(v);
                    if URL_ATTRS.contains(&attr_name.as_str()) && !is_safe_url(&decoded) {
                        tracing::debug!(attr = %attr_name, "dropped unsafe url");
                        continue;
                    }
                    tag.push(' ');
                    tag.push_str(&attr_name);
                    tag.push_str("=\"");
                    tag.push_str(&self.escape_attr(&decoded));
                    tag.push('"');
                }
            }
        }
        if raw_attrs.trim_end().ends_with('/') {
            tag.push_str(" /");
        }
        tag.push('>');
        Some(tag)
    }

    fn neutralize_text(&self, text: &str) -> String {
        let text = text.replace('<', "&lt;");
        let text = self.script_scheme.replace_all(&text, "$1$2&#58;");
        self.handler.replace_all(&text, "$1$2&#61;").into_owned()
    }

    fn escape_attr(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for c in value.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#x27;"),
                '=' => out.push_str("&#61;"),
                '`' => out.push_str("&#96;"),
                c => out.push(c),
            }
        }
        self.script_scheme.replace_all(&out, "$1$2&#58;").into_owned()
    }

    fn decode_entities(&self, s: &str) -> String {
        self.entity
            .replace_all(s, |c: &Captures<'_>| {
                let code = if let Some(hex) = c.get(1) {
                    u32::from_str_radix(hex.as_str(), 16).ok()
                } else if let Some(dec) = c.get(2) {
                    dec.as_str().parse::<u32>().ok()
                } else {
                    let named = c.get(3).map(|m| m.as_str().to_ascii_lowercase());
                    match named.as_deref() {
                        Some("colon") => Some(':' as u32),
                        Some("tab") => Some('\t' as u32),
                        Some("newline") => Some('\n' as u32),
                        Some("lpar") => Some('(' as u32),
                        Some("rpar") => Some(')' as u32),
                        Some("amp") => Some('&' as u32),
                        Some("lt") => Some('<' as u32),
                        Some("gt") => Some('>' as u32),
                        Some("quot") => Some('"' as u32),
                        Some("apos") => Some('\'' as u32),
                        _ => None,
                    }
                };
                code.and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

/// Relative URLs and an explicit scheme allowlist only.
fn is_safe_url(decoded: &str) -> bool {
    let compact: String = decoded
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();

    let Some(colon) = compact.find(':') else {
        return true;
    };
    // A ':' after the first '/', '?' or '#' is part of the path, not a scheme.
    if compact[..colon].contains(['/', '?', '#']) {
        return true;
    }
    SAFE_SCHEMES.contains(&&compact[..colon])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn s() -> OutputSanitizer {
        OutputSanitizer::new(&[]).unwrap()
    }

    #[test]
    fn removes_blocks_and_comments() {
        assert_eq!(
            s().sanitize("a<script type=\"x\">alert(1)</script>b<!-- c -->d<style>p{}</style>e"),
            "abde"
        );
    }

    #[test]
    fn split_payload_does_not_reassemble() {
        let out = s().sanitize("<scr<script>x</script>ipt>alert(1)</script>");
        assert!(!out.to_ascii_lowercase().contains("<script"), "{out}");
    }

    #[test]
    fn rebuilds_allowed_tags() {
        assert_eq!(
            s().sanitize(r#"<a href="https://x.io/?a=1" onclick="steal()" data-x=1>go</a>"#),
            r#"<a href="https://x.io/?a&#61;1">go</a>"#
        );
        assert_eq!(s().sanitize("<img src=x onerror=alert(1)>"), r#"<img src="x">"#);
        assert_eq!(s().sanitize("<br/>"), "<br />");
    }

    #[test]
    fn drops_unsafe_urls_even_when_obfuscated() {
        for payload in [
            r#"<a href="javascript:alert(1)">x</a>"#,
            r#"<a href="JaVaScRiPt:alert(1)">x</a>"#,
            r#"<a href="jav&#x09;ascript:alert(1)">x</a>"#,
            r#"<a href="javascript&colon;alert(1)">x</a>"#,
            r#"<a href="&#106;avascript:alert(1)">x</a>"#,
            r#"<img src="data:text/html;base64,PHNjcmlwdD4=">"#,
        ] {
            let out = s().sanitize(payload);
            assert!(!out.contains("href") && !out.contains("src"), "{payload} -> {out}");
        }
    }

    #[test]
    fn neutralizes_text() {
        assert_eq!(s().sanitize("a < b"), "a &lt; b");
        assert_eq!(s().sanitize("javascript:void(0)"), "javascript&#58;void(0)");
        assert_eq!(s().sanitize("onload=go"), "onload&#61;go");
        assert_eq!(s().sanitize("<svg/onload=alert(1)>"), "");
    }

    #[test]
    fn configured_tags_extend_but_never_unlock_forbidden() {
        let san = OutputSanitizer::new(&["section".into(), "script".into()]).unwrap();
        assert_eq!(san.sanitize("<section>x</section>"), "<section>x</section>");
        assert_eq!(san.sanitize("<script>x</script>"), "");
    }
}
