//! Template tokenizer (panic-free).
//!
//! Splits raw template text into literal text, `{{ … }}` expressions and
//! directive comments. `{# … #}` comments and non-directive HTML comments are
//! dropped here, so nothing after this point ever sees them.

use crate::error::{GuardError, Result};

/// Upper-case words that turn an HTML comment into a directive.
pub const DIRECTIVE_KEYWORDS: [&str; 6] = ["FOR", "END", "IF", "ELSE", "SECTION", "INCLUDE"];

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    /// `inner` is the trimmed text between the braces.
    Expr { inner: String, raw: String, line: usize },
    /// `body` is the trimmed comment text, starting with a keyword.
    Directive { body: String, line: usize },
}

#[derive(Clone, Copy)]
enum Opener {
    Expr,
    Comment,
    Html,
}

impl Opener {
    fn open(self) -> &'static str {
        match self {
            Opener::Expr => "{{",
            Opener::Comment => "{#",
            Opener::Html => "<!--",
        }
    }

    fn close(self) -> &'static str {
        match self {
            Opener::Expr => "}}",
            Opener::Comment => "#}",
            Opener::Html => "-->",
        }
    }

    fn what(self) -> &'static str {
        match self {
            Opener::Expr => "expression",
            Opener::Comment => "template comment",
            Opener::Html => "comment or directive",
        }
    }
}

pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut out: Vec<Token> = Vec::new();
    let mut pos = 0usize;

    while pos < src.len() {
        let rest = &src[pos..];
        let Some((offset, opener)) = next_opener(rest) else {
            push_text(&mut out, rest);
            break;
        };

        push_text(&mut out, &rest[..offset]);
        let start = pos + offset;
        let body_start = start + opener.open().len();
        let line = line_of(src, start);

        let Some(close_rel) = src[body_start..].find(opener.close()) else {
            return Err(GuardError::Syntax(format!(
                "line {line}: unterminated {}",
                opener.what()
            )));
        };
        let body_end = body_start + close_rel;
        let end = body_end + opener.close().len();
        let body = src[body_start..body_end].trim();

        match opener {
            Opener::Expr => out.push(Token::Expr {
                inner: body.to_string(),
                raw: src[start..end].to_string(),
                line,
            }),
            Opener::Comment => {}
            Opener::Html => {
                if is_directive(body) {
                    out.push(Token::Directive {
                        body: body.to_string(),
                        line,
                    });
                }
            }
        }
        pos = end;
    }

    Ok(out)
}

fn next_opener(s: &str) -> Option<(usize, Opener)> {
    [Opener::Expr, Opener::Comment, Opener::Html]
        .into_iter()
        .filter_map(|o| s.find(o.open()).map(|i| (i, o)))
        .min_by_key(|(i, _)| *i)
}

fn push_text(out: &mut Vec<Token>, s: &str) {
    if s.is_empty() {
        return;
    }
    if let Some(Token::Text(prev)) = out.last_mut() {
        prev.push_str(s);
    } else {
        out.push(Token::Text(s.to_string()));
    }
}

fn is_directive(body: &str) -> bool {
    body.split_whitespace()
        .next()
        .map(|w| DIRECTIVE_KEYWORDS.contains(&w))
        .unwrap_or(false)
}

/// 1-based line number of a byte offset.
pub fn line_of(src: &str, offset: usize) -> usize {
    src.get(..offset)
        .map(|s| s.matches('\n').count() + 1)
        .unwrap_or(1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn strips_comments_and_merges_text() {
        let toks = tokenize("a{# note #}b<!-- plain html comment -->c").unwrap_or_default();
        assert_eq!(toks, vec![Token::Text("abc".into())]);
    }

    #[test]
    fn directives_and_expressions() {
        let toks = tokenize("<!-- FOR x IN items -->{{ x }}<!-- END FOR -->").unwrap_or_default();
        assert_eq!(toks.len(), 3);
        assert!(matches!(&toks[0], Token::Directive { body, .. } if body == "FOR x IN items"));
        assert!(matches!(&toks[1], Token::Expr { inner, raw, .. } if inner == "x" && raw == "{{ x }}"));
    }

    #[test]
    fn lowercase_keyword_is_a_comment() {
        let toks = tokenize("<!-- for x in y -->z").unwrap_or_default();
        assert_eq!(toks, vec![Token::Text("z".into())]);
    }

    #[test]
    fn unterminated_expression_reports_line() {
        let err = tokenize("ok\n{{ name").err();
        assert_eq!(
            err,
            Some(GuardError::Syntax("line 2: unterminated expression".into()))
        );
    }
}
