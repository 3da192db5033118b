//! Include resolution for the evaluator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tmplguard_core::grammar::{parse, ParseLimits, Program};
use tmplguard_core::issue::{IssueCategory, ValidationIssue};

use crate::collab::include::IncludeSource;
use crate::obs::metrics::RenderMetrics;
use crate::render::cache::{content_hash, ShardedLru};
use crate::validate::PatternValidator;

use super::SandboxOutcome;

/// Parsed programs keyed by resolved path and content hash, so an edited
/// file is never served from a stale entry.
type IncludeCache = ShardedLru<(PathBuf, String), Arc<Program>>;

pub struct IncludeLoader {
    base_dir: PathBuf,
    source: Arc<dyn IncludeSource>,
    validator: Arc<PatternValidator>,
    limits: ParseLimits,
    cache: IncludeCache,
    metrics: Arc<RenderMetrics>,
}

impl IncludeLoader {
    pub fn new(
        base_dir: PathBuf,
        source: Arc<dyn IncludeSource>,
        validator: Arc<PatternValidator>,
        limits: ParseLimits,
        cache: IncludeCache,
        metrics: Arc<RenderMetrics>,
    ) -> Self {
        Self {
            base_dir,
            source,
            validator,
            limits,
            cache,
            metrics,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Validate, load, re-validate and parse one include.
    pub fn load(&self, path: &str) -> Result<Arc<Program>, SandboxOutcome> {
        let Some(resolved) = self.validator.resolve_include_path(path, &self.base_dir) else {
            tracing::warn!(path = %path, "include path rejected");
            return Err(SandboxOutcome::Rejected(ValidationIssue::blocking(
                IssueCategory::PathTraversal,
                path,
            )));
        };

        let content = self.source.load(&resolved).map_err(SandboxOutcome::Aborted)?;
        let key = (resolved, content_hash(&content));
        if let Some(program) = self.cache.get(&key) {
            self.metrics.cache_event("include", "hit");
            return Ok(program);
        }
        self.metrics.cache_event("include", "miss");

        let report = self
            .validator
            .validate_content(&content)
            .map_err(SandboxOutcome::Aborted)?;
        if let Some(issue) = report.first_blocking() {
            tracing::warn!(path = %path, category = %issue.category, "include content rejected");
            return Err(SandboxOutcome::Rejected(issue.clone()));
        }

        let program = Arc::new(parse(&content, &self.limits).map_err(SandboxOutcome::Aborted)?);
        self.cache.insert(key, Arc::clone(&program));
        tracing::debug!(path = %path, "include loaded");
        Ok(program)
    }
}
