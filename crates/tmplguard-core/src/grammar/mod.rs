//! Template language: tokenizer, parser and the closed AST.
//!
//! The grammar is deliberately tiny: substitution of dotted paths, loops,
//! conditionals built from `==`/`!=`/`not`, caller-toggled sections and
//! includes. There are no calls, operators or filters, so no construct can
//! reach a general-purpose interpreter.
//!
//! All parsers are panic-free: malformed input is reported as `GuardError`.

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::{Condition, Node, Operand, Program};
pub use parser::{parse, ParseLimits};
