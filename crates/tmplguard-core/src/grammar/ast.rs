//! Closed node set of the template language.
//!
//! The evaluator dispatches over these variants only. There is no node that
//! carries an expression string to be interpreted later.

use std::fmt;

/// A parsed template body.
pub type Program = Vec<Node>;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Text copied to the output as-is.
    Literal(String),
    /// `{{ name }}`
    VariableRef { name: String, raw: String },
    /// `{{ a.b.0.c }}`
    FieldAccess { chain: Vec<String>, raw: String },
    /// `<!-- FOR var IN collection -->`
    Loop {
        var: String,
        collection: Vec<String>,
        body: Program,
    },
    /// `<!-- IF cond -->` with an optional `<!-- ELSE -->` branch.
    Conditional {
        cond: Condition,
        body: Program,
        otherwise: Program,
    },
    /// `<!-- SECTION name -->`, kept or dropped by the caller's section flags.
    Section { name: String, body: Program },
    /// `<!-- INCLUDE path -->`, resolved by the evaluator at run time.
    Include { path: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Truthy(Operand),
    Equals(Operand, Operand),
    Not(Box<Condition>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Path(Vec<String>),
    Str(String),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Path(p) => f.write_str(&p.join(".")),
            Operand::Str(s) => write!(f, "{s:?}"),
            Operand::Int(i) => write!(f, "{i}"),
            Operand::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Count of nodes, including nested bodies. Used for diagnostics.
pub fn node_count(program: &[Node]) -> usize {
    program
        .iter()
        .map(|n| {
            1 + match n {
                Node::Loop { body, .. } | Node::Section { body, .. } => node_count(body),
                Node::Conditional {
                    body, otherwise, ..
                } => node_count(body) + node_count(otherwise),
                _ => 0,
            }
        })
        .sum()
}

/// Every include path referenced anywhere in the program, in document order.
pub fn include_paths(program: &[Node]) -> Vec<&str> {
    let mut out = Vec::new();
    collect_includes(program, &mut out);
    out
}

fn collect_includes<'a>(program: &'a [Node], out: &mut Vec<&'a str>) {
    for n in program {
        match n {
            Node::Include { path } => out.push(path.as_str()),
            Node::Loop { body, .. } | Node::Section { body, .. } => collect_includes(body, out),
            Node::Conditional {
                body, otherwise, ..
            } => {
                collect_includes(body, out);
                collect_includes(otherwise, out);
            }
            _ => {}
        }
    }
}
