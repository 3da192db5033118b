//! Template store collaborator (read-only from the engine's side).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use tmplguard_core::error::{GuardError, Result};
use tmplguard_core::template::Template;

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get_template(&self, id: &str) -> Result<Arc<Template>>;
}

/// Process-local store, mainly for embedders' tests and fixtures.
#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: DashMap<String, Arc<Template>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self {
            templates: DashMap::new(),
        }
    }

    pub fn insert(&self, template: Template) {
        self.templates.insert(template.id.clone(), Arc::new(template));
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Template>> {
        self.templates.remove(id).map(|(_, t)| t)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get_template(&self, id: &str) -> Result<Arc<Template>> {
        self.templates
            .get(id)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| GuardError::InvalidContext(format!("unknown template: {id}")))
    }
}
