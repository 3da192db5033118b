//! Template data model.
//!
//! `Template` is owned by an external store and borrowed for one render.
//! `RenderContext` is the caller-supplied, still untrusted input.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum variable name length (first char + 63).
pub const MAX_VARIABLE_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Template {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub declared_variables: Vec<VariableSpec>,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub mask_pii: bool,
}

impl Template {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            declared_variables: Vec::new(),
            owner: String::new(),
            mask_pii: false,
        }
    }

    pub fn with_variable(mut self, spec: VariableSpec) -> Self {
        self.declared_variables.push(spec);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_mask_pii(mut self, mask: bool) -> Self {
        self.mask_pii = mask;
        self
    }

    pub fn variable(&self, name: &str) -> Option<&VariableSpec> {
        self.declared_variables.iter().find(|v| v.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableSpec {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub type_tag: TypeTag,
}

impl VariableSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            default: None,
            type_tag: TypeTag::Any,
        }
    }

    pub fn optional(name: impl Into<String>, default: Option<Value>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default,
            type_tag: TypeTag::Any,
        }
    }

    pub fn with_type(mut self, type_tag: TypeTag) -> Self {
        self.type_tag = type_tag;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    List,
    Object,
}

impl TypeTag {
    /// `null` never matches a concrete tag.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            TypeTag::Any => true,
            TypeTag::String => value.is_string(),
            TypeTag::Number => value.is_number(),
            TypeTag::Boolean => value.is_boolean(),
            TypeTag::List => value.is_array(),
            TypeTag::Object => value.is_object(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Any => "any",
            TypeTag::String => "string",
            TypeTag::Number => "number",
            TypeTag::Boolean => "boolean",
            TypeTag::List => "list",
            TypeTag::Object => "object",
        }
    }
}

/// Untrusted per-render input as supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderContext {
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub section_flags: HashMap<String, bool>,
    #[serde(default)]
    pub loop_sources: HashMap<String, Vec<Value>>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn section(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.section_flags.insert(name.into(), enabled);
        self
    }

    pub fn loop_source(mut self, name: impl Into<String>, items: Vec<Value>) -> Self {
        self.loop_sources.insert(name.into(), items);
        self
    }
}

/// `[a-zA-Z_][a-zA-Z0-9_]{0,63}`
pub fn is_valid_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    name.len() <= MAX_VARIABLE_NAME_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn variable_names() {
        assert!(is_valid_variable_name("name"));
        assert!(is_valid_variable_name("_private9"));
        assert!(is_valid_variable_name(&format!("a{}", "b".repeat(63))));
        assert!(!is_valid_variable_name(&format!("a{}", "b".repeat(64))));
        assert!(!is_valid_variable_name(""));
        assert!(!is_valid_variable_name("9lives"));
        assert!(!is_valid_variable_name("user.name"));
        assert!(!is_valid_variable_name("naïve"));
    }

    #[test]
    fn type_tags() {
        assert!(TypeTag::List.accepts(&json!([1, 2])));
        assert!(!TypeTag::String.accepts(&json!(null)));
        assert!(TypeTag::Any.accepts(&json!(null)));
    }

    #[test]
    fn template_deserializes_with_defaults() {
        let t: Template = serde_json::from_value(json!({
            "id": "welcome",
            "content": "Hello {{name}}",
            "declared_variables": [{"name": "name", "required": true, "type_tag": "string"}]
        }))
        .unwrap();
        assert!(!t.mask_pii);
        assert_eq!(t.variable("name").map(|v| v.type_tag), Some(TypeTag::String));
    }
}
