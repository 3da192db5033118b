use std::borrow::Cow;

use serde::Deserialize;

/// How substituted values are escaped before they reach the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscapeMode {
    #[default]
    Html,
    /// Values are inserted verbatim; only the output sanitizer applies.
    #[serde(rename = "none")]
    Raw,
}

impl EscapeMode {
    pub fn apply(self, s: &str) -> Cow<'_, str> {
        match self {
            EscapeMode::Html => escape_html(s),
            EscapeMode::Raw => Cow::Borrowed(s),
        }
    }
}

/// Escape `& < > " ' \``. Borrowed when nothing needs escaping.
pub fn escape_html(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"', '\'', '`']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#96;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html("<script>alert('x')</script>"),
            "&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;"
        );
        assert!(matches!(escape_html("plain"), Cow::Borrowed("plain")));
        assert_eq!(EscapeMode::Raw.apply("<b>"), "<b>");
    }

    #[test]
    fn deserializes_lowercase_names() {
        let m: EscapeMode = serde_yaml::from_str("none").unwrap();
        assert_eq!(m, EscapeMode::Raw);
        let m: EscapeMode = serde_yaml::from_str("html").unwrap();
        assert_eq!(m, EscapeMode::Html);
    }
}
