//! Token stream -> [`Program`].
//!
//! Block nesting is tracked with an explicit frame stack, so hostile input
//! cannot drive the parser into deep native recursion. Nesting beyond
//! `max_nesting` fails with `RecursionLimit`.

use crate::error::{GuardError, LimitKind, Result};

use super::ast::{Condition, Node, Operand, Program};
use super::lexer::{tokenize, Token};

#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    pub max_expression_length: usize,
    pub max_nesting: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_expression_length: 256,
            max_nesting: 10,
        }
    }
}

enum Open {
    Loop { var: String, collection: Vec<String> },
    /// `then` is filled once `ELSE` is seen.
    Cond { cond: Condition, then: Option<Program> },
    Section { name: String },
}

impl Open {
    fn keyword(&self) -> &'static str {
        match self {
            Open::Loop { .. } => "FOR",
            Open::Cond { .. } => "IF",
            Open::Section { .. } => "SECTION",
        }
    }
}

struct Frame {
    open: Open,
    nodes: Program,
    line: usize,
}

struct Parser {
    limits: ParseLimits,
    root: Program,
    stack: Vec<Frame>,
}

pub fn parse(src: &str, limits: &ParseLimits) -> Result<Program> {
    let mut p = Parser {
        limits: *limits,
        root: Vec::new(),
        stack: Vec::new(),
    };

    for tok in tokenize(src)? {
        match tok {
            Token::Text(s) => p.current().push(Node::Literal(s)),
            Token::Expr { inner, raw, line } => {
                p.check_len(&inner)?;
                let node = parse_substitution(&inner, raw, line)?;
                p.current().push(node);
            }
            Token::Directive { body, line } => {
                p.check_len(&body)?;
                p.directive(&body, line)?;
            }
        }
    }

    if let Some(frame) = p.stack.last() {
        return Err(GuardError::Syntax(format!(
            "line {}: unclosed {} block",
            frame.line,
            frame.open.keyword()
        )));
    }
    Ok(p.root)
}

impl Parser {
    fn current(&mut self) -> &mut Program {
        match self.stack.last_mut() {
            Some(f) => &mut f.nodes,
            None => &mut self.root,
        }
    }

    fn check_len(&self, s: &str) -> Result<()> {
        if s.len() > self.limits.max_expression_length {
            return Err(GuardError::ResourceLimitExceeded(LimitKind::ExpressionLength));
        }
        Ok(())
    }

    fn push_frame(&mut self, open: Open, line: usize) -> Result<()> {
        if self.stack.len() >= self.limits.max_nesting {
            return Err(GuardError::ResourceLimitExceeded(LimitKind::RecursionLimit));
        }
        self.stack.push(Frame {
            open,
            nodes: Vec::new(),
            line,
        });
        Ok(())
    }

    fn directive(&mut self, body: &str, line: usize) -> Result<()> {
        let (keyword, rest) = match body.split_once(char::is_whitespace) {
            Some((k, r)) => (k, r.trim()),
            None => (body, ""),
        };
        let syntax = |msg: &str| GuardError::Syntax(format!("line {line}: {msg}"));

        match keyword {
            "FOR" => {
                let words: Vec<&str> = rest.split_whitespace().collect();
                let [var, "IN", collection] = words.as_slice() else {
                    return Err(syntax("expected `FOR <name> IN <path>`"));
                };
                let var = parse_ident(var, line)?;
                let collection = parse_path(collection, line)?;
                self.push_frame(Open::Loop { var, collection }, line)
            }
            "IF" => {
                if rest.is_empty() {
                    return Err(syntax("IF requires a condition"));
                }
                let cond = parse_condition(rest, line)?;
                self.push_frame(Open::Cond { cond, then: None }, line)
            }
            "ELSE" => {
                if !rest.is_empty() {
                    return Err(syntax("ELSE takes no arguments"));
                }
                match self.stack.last_mut() {
                    Some(Frame {
                        open: Open::Cond { then, .. },
                        nodes,
                        ..
                    }) if then.is_none() => {
                        *then = Some(std::mem::take(nodes));
                        Ok(())
                    }
                    _ => Err(syntax("ELSE outside of an IF block")),
                }
            }
            "SECTION" => {
                let name = parse_ident(rest, line)?;
                self.push_frame(Open::Section { name }, line)
            }
            "INCLUDE" => {
                let path = unquote(rest);
                if path.is_empty() {
                    return Err(syntax("INCLUDE requires a path"));
                }
                self.current().push(Node::Include {
                    path: path.to_string(),
                });
                Ok(())
            }
            "END" => self.close(rest, line),
            _ => Err(syntax("unknown directive")),
        }
    }

    fn close(&mut self, what: &str, line: usize) -> Result<()> {
        let Some(frame) = self.stack.pop() else {
            return Err(GuardError::Syntax(format!(
                "line {line}: END {what} without an open block"
            )));
        };
        if frame.open.keyword() != what {
            return Err(GuardError::Syntax(format!(
                "line {line}: END {what} closes {} opened on line {}",
                frame.open.keyword(),
                frame.line
            )));
        }

        let node = match frame.open {
            Open::Loop { var, collection } => Node::Loop {
                var,
                collection,
                body: frame.nodes,
            },
            Open::Cond { cond, then } => match then {
                Some(body) => Node::Conditional {
                    cond,
                    body,
                    otherwise: frame.nodes,
                },
                None => Node::Conditional {
                    cond,
                    body: frame.nodes,
                    otherwise: Vec::new(),
                },
            },
            Open::Section { name } => Node::Section {
                name,
                body: frame.nodes,
            },
        };
        self.current().push(node);
        Ok(())
    }
}

fn parse_substitution(inner: &str, raw: String, line: usize) -> Result<Node> {
    if inner.is_empty() {
        return Err(GuardError::Syntax(format!("line {line}: empty expression")));
    }
    let mut chain = parse_path(inner, line)?;
    if chain.len() == 1 {
        let name = chain.remove(0);
        Ok(Node::VariableRef { name, raw })
    } else {
        Ok(Node::FieldAccess { chain, raw })
    }
}

/// `ident ("." (ident | digits))*`
pub fn parse_path(s: &str, line: usize) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for (i, seg) in s.split('.').enumerate() {
        if i > 0 && !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()) {
            out.push(seg.to_string());
            continue;
        }
        out.push(parse_ident(seg, line)?);
    }
    Ok(out)
}

fn parse_ident(s: &str, line: usize) -> Result<String> {
    let mut chars = s.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(GuardError::Syntax(format!("line {line}: invalid name `{s}`")));
    }
    if s.starts_with("__") {
        return Err(GuardError::Syntax(format!("line {line}: reserved name")));
    }
    Ok(s.to_string())
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    for q in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return inner;
        }
    }
    s
}

#[derive(Debug, PartialEq)]
enum CondTok {
    Word(String),
    Quoted(String),
    Eq,
    Ne,
}

fn cond_tokens(s: &str, line: usize) -> Result<Vec<CondTok>> {
    let mut out = Vec::new();
    let mut word = String::new();
    let mut chars = s.chars().peekable();

    let flush = |word: &mut String, out: &mut Vec<CondTok>| {
        if !word.is_empty() {
            out.push(CondTok::Word(std::mem::take(word)));
        }
    };

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => flush(&mut word, &mut out),
            '"' | '\'' => {
                flush(&mut word, &mut out);
                let mut lit = String::new();
                let mut closed = false;
                for d in chars.by_ref() {
                    if d == c {
                        closed = true;
                        break;
                    }
                    lit.push(d);
                }
                if !closed {
                    return Err(GuardError::Syntax(format!(
                        "line {line}: unterminated string in condition"
                    )));
                }
                out.push(CondTok::Quoted(lit));
            }
            '=' | '!' if chars.peek() == Some(&'=') => {
                chars.next();
                flush(&mut word, &mut out);
                out.push(if c == '=' { CondTok::Eq } else { CondTok::Ne });
            }
            c => word.push(c),
        }
    }
    flush(&mut word, &mut out);
    Ok(out)
}

fn parse_condition(s: &str, line: usize) -> Result<Condition> {
    let toks = cond_tokens(s, line)?;
    let mut negations = 0usize;
    let mut rest = toks.as_slice();
    while let [CondTok::Word(w), tail @ ..] = rest {
        if w != "not" {
            break;
        }
        negations += 1;
        rest = tail;
    }

    let cond = match rest {
        [a] => Condition::Truthy(parse_operand(a, line)?),
        [a, CondTok::Eq, b] => Condition::Equals(parse_operand(a, line)?, parse_operand(b, line)?),
        [a, CondTok::Ne, b] => Condition::Not(Box::new(Condition::Equals(
            parse_operand(a, line)?,
            parse_operand(b, line)?,
        ))),
        _ => {
            return Err(GuardError::Syntax(format!(
                "line {line}: unsupported condition"
            )))
        }
    };

    Ok((0..negations).fold(cond, |c, _| Condition::Not(Box::new(c))))
}

fn parse_operand(tok: &CondTok, line: usize) -> Result<Operand> {
    match tok {
        CondTok::Quoted(s) => Ok(Operand::Str(s.clone())),
        CondTok::Word(w) => match w.as_str() {
            "true" => Ok(Operand::Bool(true)),
            "false" => Ok(Operand::Bool(false)),
            w => match w.parse::<i64>() {
                Ok(i) => Ok(Operand::Int(i)),
                Err(_) => Ok(Operand::Path(parse_path(w, line)?)),
            },
        },
        CondTok::Eq | CondTok::Ne => Err(GuardError::Syntax(format!(
            "line {line}: operator without operand"
        ))),
    }
}
