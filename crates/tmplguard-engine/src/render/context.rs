//! Caller context after sanitization.
//!
//! [`SanitizedContext`] can only be produced by [`SanitizedContext::sanitize`],
//! so the evaluator never sees a value that skipped validation.

use std::collections::HashMap;

use serde_json::Value;
use tmplguard_core::error::{GuardError, Result};
use tmplguard_core::template::{is_valid_variable_name, RenderContext, Template};

use crate::validate::PatternValidator;

#[derive(Debug, Clone, Default)]
pub struct SanitizedContext {
    variables: HashMap<String, Value>,
    section_flags: HashMap<String, bool>,
    /// Always `Value::Array`.
    loop_sources: HashMap<String, Value>,
}

impl SanitizedContext {
    /// Clean every value, enforce declared types, then check required
    /// variables and merge declared defaults.
    pub fn sanitize(
        template: &Template,
        ctx: RenderContext,
        validator: &PatternValidator,
    ) -> Result<Self> {
        let RenderContext {
            variables,
            section_flags,
            loop_sources,
        } = ctx;

        // Sorted so the reported failure does not depend on hash order.
        let mut vars: Vec<(String, Value)> = variables.into_iter().collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        let mut clean_vars = HashMap::with_capacity(vars.len());
        for (name, value) in vars {
            let cleaned = validator.validate_variable_value(&name, &value)?;
            check_type(template, &name, &cleaned)?;
            clean_vars.insert(name, cleaned);
        }

        let mut sources: Vec<(String, Vec<Value>)> = loop_sources.into_iter().collect();
        sources.sort_by(|a, b| a.0.cmp(&b.0));
        let mut clean_sources = HashMap::with_capacity(sources.len());
        for (name, items) in sources {
            let cleaned = validator.validate_variable_value(&name, &Value::Array(items))?;
            check_type(template, &name, &cleaned)?;
            clean_sources.insert(name, cleaned);
        }

        for name in section_flags.keys() {
            if !is_valid_variable_name(name) {
                return Err(GuardError::InvalidContext(format!(
                    "invalid section name `{}`",
                    name.chars().take(64).collect::<String>().escape_debug()
                )));
            }
        }

        let missing: Vec<String> = template
            .declared_variables
            .iter()
            .filter(|spec| spec.required)
            .filter(|spec| {
                !clean_vars.contains_key(&spec.name) && !clean_sources.contains_key(&spec.name)
            })
            .map(|spec| spec.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(GuardError::MissingVariables(missing));
        }

        for spec in &template.declared_variables {
            if clean_vars.contains_key(&spec.name) || clean_sources.contains_key(&spec.name) {
                continue;
            }
            if let Some(default) = &spec.default {
                let cleaned = validator.validate_variable_value(&spec.name, default)?;
                clean_vars.insert(spec.name.clone(), cleaned);
            }
        }

        Ok(Self {
            variables: clean_vars,
            section_flags,
            loop_sources: clean_sources,
        })
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn loop_source(&self, name: &str) -> Option<&Value> {
        self.loop_sources.get(name)
    }

    /// Sections render unless explicitly switched off.
    pub fn section_enabled(&self, name: &str) -> bool {
        self.section_flags.get(name).copied().unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.variables.len() + self.loop_sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn trusted(ctx: RenderContext) -> Self {
        Self {
            variables: ctx.variables,
            section_flags: ctx.section_flags,
            loop_sources: ctx
                .loop_sources
                .into_iter()
                .map(|(k, v)| (k, Value::Array(v)))
                .collect(),
        }
    }
}

fn check_type(template: &Template, name: &str, value: &Value) -> Result<()> {
    match template.variable(name) {
        Some(spec) if !spec.type_tag.accepts(value) => Err(GuardError::InvalidContext(format!(
            "variable `{name}` must be of type {}",
            spec.type_tag.as_str()
        ))),
        _ => Ok(()),
    }
}
