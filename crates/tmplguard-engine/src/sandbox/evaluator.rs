//! Closed-grammar interpreter.
//!
//! Dispatches over [`Node`] only. Every node, loop iteration and nested body
//! checks the deadline, and every budget in [`RenderBudget`] maps to one
//! terminal [`SandboxOutcome`].

use std::borrow::Cow;
use std::sync::Arc;

use serde_json::{json, Value};
use tmplguard_core::error::GuardError;
use tmplguard_core::grammar::{Condition, Node, Operand};

use crate::config::RenderBudget;
use crate::render::context::SanitizedContext;
use crate::render::escape::EscapeMode;

use super::deadline::{CancelToken, Deadline};
use super::include::IncludeLoader;
use super::SandboxOutcome;

type Flow = Result<(), SandboxOutcome>;

/// Name bound to loop metadata (`loop.index`, `loop.first`, `loop.last`).
const LOOP_META: &str = "loop";

pub struct Sandbox {
    budget: RenderBudget,
    escape: EscapeMode,
    includes: Option<Arc<IncludeLoader>>,
}

impl Sandbox {
    pub fn new(budget: RenderBudget, escape: EscapeMode) -> Self {
        Self {
            budget,
            escape,
            includes: None,
        }
    }

    pub fn with_includes(mut self, loader: Arc<IncludeLoader>) -> Self {
        self.includes = Some(loader);
        self
    }

    pub fn budget(&self) -> &RenderBudget {
        &self.budget
    }

    /// Fix the deadline and start an empty run.
    pub fn prepare<'a>(&'a self, ctx: &'a SanitizedContext, cancel: CancelToken) -> Run<'a> {
        Run {
            sandbox: self,
            ctx,
            deadline: Deadline::new(self.budget.max_wall_time(), cancel),
            out: String::new(),
            scopes: Vec::new(),
            depth: 0,
            include_depth: 0,
            iterations: 0,
        }
    }

    pub fn evaluate(
        &self,
        program: &[Node],
        ctx: &SanitizedContext,
        cancel: CancelToken,
    ) -> SandboxOutcome {
        self.prepare(ctx, cancel).execute(program)
    }
}

/// One evaluation in progress. Consumed by [`Run::execute`].
pub struct Run<'a> {
    sandbox: &'a Sandbox,
    ctx: &'a SanitizedContext,
    deadline: Deadline,
    out: String,
    /// Loop bindings, innermost last.
    scopes: Vec<(String, Value)>,
    depth: usize,
    include_depth: usize,
    iterations: usize,
}

impl<'a> Run<'a> {
    pub fn execute(mut self, program: &[Node]) -> SandboxOutcome {
        match self.exec_body(program) {
            Ok(()) => SandboxOutcome::Completed(self.out),
            Err(outcome) => {
                tracing::debug!(
                    outcome = ?outcome,
                    discarded_bytes = self.out.len(),
                    "evaluation stopped"
                );
                outcome
            }
        }
    }

    fn tick(&self) -> Flow {
        if self.deadline.expired() {
            return Err(SandboxOutcome::TimedOut);
        }
        Ok(())
    }

    fn exec_body(&mut self, nodes: &[Node]) -> Flow {
        self.tick()?;
        for node in nodes {
            self.tick()?;
            self.exec_node(node)?;
        }
        Ok(())
    }

    fn nested(&mut self, body: &[Node]) -> Flow {
        if self.depth >= self.sandbox.budget.max_recursion_depth {
            return Err(SandboxOutcome::RecursionExceeded);
        }
        self.depth += 1;
        let r = self.exec_body(body);
        self.depth -= 1;
        r
    }

    fn exec_node(&mut self, node: &Node) -> Flow {
        match node {
            Node::Literal(text) => self.emit(text),
            Node::VariableRef { name, raw } => self.substitute(std::slice::from_ref(name), raw),
            Node::FieldAccess { chain, raw } => self.substitute(chain, raw),
            Node::Loop {
                var,
                collection,
                body,
            } => self.exec_loop(var, collection, body),
            Node::Conditional {
                cond,
                body,
                otherwise,
            } => {
                let branch = if self.eval_cond(cond)? { body } else { otherwise };
                self.nested(branch)
            }
            Node::Section { name, body } => {
                if self.ctx.section_enabled(name) {
                    self.nested(body)
                } else {
                    Ok(())
                }
            }
            Node::Include { path } => self.exec_include(path),
        }
    }

    fn substitute(&mut self, path: &[String], raw: &str) -> Flow {
        let rendered = self.lookup(path).map(stringify).transpose()?;
        match rendered {
            Some(text) => {
                let escaped = self.sandbox.escape.apply(&text).into_owned();
                self.emit(&escaped)
            }
            // Unresolved references stay visible as written.
            None => self.emit(raw),
        }
    }

    fn exec_loop(&mut self, var: &str, collection: &[String], body: &[Node]) -> Flow {
        let cap = self.sandbox.budget.max_loop_iterations;
        let (items, total) = match self.lookup(collection) {
            Some(Value::Array(all)) => (all.iter().take(cap).cloned().collect::<Vec<_>>(), all.len()),
            Some(_) => {
                tracing::debug!(collection = %collection.join("."), "loop over a non-list value skipped");
                return Ok(());
            }
            None => return Ok(()),
        };
        if total > cap {
            tracing::debug!(
                collection = %collection.join("."),
                len = total,
                cap,
                "loop truncated"
            );
        }

        let shown = items.len();
        for (i, item) in items.into_iter().enumerate() {
            self.tick()?;
            self.iterations += 1;
            if self.iterations > self.sandbox.budget.max_total_iterations {
                return Err(SandboxOutcome::IterationExceeded);
            }

            let meta = json!({ "index": i + 1, "first": i == 0, "last": i + 1 == shown });
            let mark = self.scopes.len();
            self.scopes.push((var.to_string(), item));
            self.scopes.push((LOOP_META.to_string(), meta));
            let r = self.nested(body);
            self.scopes.truncate(mark);
            r?;
        }
        Ok(())
    }

    fn exec_include(&mut self, path: &str) -> Flow {
        let sandbox: &'a Sandbox = self.sandbox;
        let Some(loader) = sandbox.includes.as_ref() else {
            return Err(SandboxOutcome::Aborted(GuardError::InvalidContext(
                "includes are not enabled".into(),
            )));
        };
        if self.include_depth >= sandbox.budget.max_include_depth {
            return Err(SandboxOutcome::IncludeDepthExceeded);
        }

        let program = loader.load(path)?;
        self.include_depth += 1;
        let r = self.nested(&program);
        self.include_depth -= 1;
        r
    }

    fn emit(&mut self, text: &str) -> Flow {
        if self.out.len().saturating_add(text.len()) > self.sandbox.budget.max_output_bytes {
            return Err(SandboxOutcome::SizeExceeded);
        }
        self.out.push_str(text);
        Ok(())
    }

    /// Loop scopes (innermost first), then variables, then loop sources.
    fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let (head, rest) = path.split_first()?;
        let head = head.as_ref();
        let root = self
            .scopes
            .iter()
            .rev()
            .find(|(name, _)| name == head)
            .map(|(_, v)| v)
            .or_else(|| self.ctx.variable(head))
            .or_else(|| self.ctx.loop_source(head))?;
        rest.iter().try_fold(root, |v, seg| descend(v, seg.as_ref()))
    }

    fn eval_cond(&self, cond: &Condition) -> Result<bool, SandboxOutcome> {
        Ok(match cond {
            Condition::Truthy(op) => self.operand(op).is_some_and(|v| truthy(&v)),
            Condition::Equals(a, b) => self.operand_text(a)? == self.operand_text(b)?,
            Condition::Not(inner) => !self.eval_cond(inner)?,
        })
    }

    fn operand(&self, op: &Operand) -> Option<Cow<'_, Value>> {
        match op {
            Operand::Path(p) => self.lookup(p).map(Cow::Borrowed),
            Operand::Str(s) => Some(Cow::Owned(Value::String(s.clone()))),
            Operand::Int(i) => Some(Cow::Owned(Value::from(*i))),
            Operand::Bool(b) => Some(Cow::Owned(Value::Bool(*b))),
        }
    }

    fn operand_text(&self, op: &Operand) -> Result<String, SandboxOutcome> {
        match self.operand(op) {
            Some(v) => stringify(&v),
            None => Ok(String::new()),
        }
    }
}

fn descend<'v>(v: &'v Value, seg: &str) -> Option<&'v Value> {
    match v {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn stringify(v: &Value) -> Result<String, SandboxOutcome> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        composite => serde_json::to_string(composite).map_err(|e| {
            SandboxOutcome::Aborted(GuardError::Internal(format!("stringify value: {e}")))
        }),
    }
}
