//! The secure rendering pipeline.
//!
//! Gate order: permission, rate limit, content validation, context
//! sanitization, sandboxed evaluation, output sanitization, PII masking.
//! Every attempt ends with exactly one audit event, success or not.

use std::sync::Arc;
use std::time::Instant;

use tmplguard_core::error::{ErrorCode, GuardError, LimitKind, Result};
use tmplguard_core::grammar::parse;
use tmplguard_core::issue::ValidationReport;
use tmplguard_core::template::{RenderContext, Template};

use crate::collab::audit::{AuditEvent, AuditSink, TracingAuditSink, OUTCOME_SUCCESS};
use crate::collab::include::{DirIncludeSource, IncludeSource};
use crate::collab::pii::{NoPiiDetector, PiiDetector};
use crate::collab::store::TemplateStore;
use crate::config::{EngineConfig, RenderBudget};
use crate::obs::metrics::RenderMetrics;
use crate::policy::{Permission, PermissionManager, RateLimiter};
use crate::sandbox::{CancelToken, IncludeLoader, Sandbox};
use crate::validate::{PatternValidator, ValidatorSettings};

use super::cache::{content_hash, ShardedLru};
use super::context::SanitizedContext;
use super::sanitize::OutputSanitizer;

/// Rate-limit action charged for every render.
pub const RENDER_ACTION: &str = "render";

pub struct SecureRendererBuilder {
    config: EngineConfig,
    permissions: Option<Arc<PermissionManager>>,
    audit: Option<Arc<dyn AuditSink>>,
    pii: Option<Arc<dyn PiiDetector>>,
    include_source: Option<Arc<dyn IncludeSource>>,
    metrics: Option<Arc<RenderMetrics>>,
}

impl SecureRendererBuilder {
    pub fn permissions(mut self, permissions: Arc<PermissionManager>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn pii_detector(mut self, detector: Arc<dyn PiiDetector>) -> Self {
        self.pii = Some(detector);
        self
    }

    /// Replaces the filesystem reader used for `includes.base_dir`.
    pub fn include_source(mut self, source: Arc<dyn IncludeSource>) -> Self {
        self.include_source = Some(source);
        self
    }

    pub fn metrics(mut self, metrics: Arc<RenderMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<SecureRenderer> {
        let cfg = self.config;
        cfg.validate()?;
        let budget = cfg.budget();

        let pii = self.pii.unwrap_or_else(|| Arc::new(NoPiiDetector));
        let metrics = self.metrics.unwrap_or_default();
        let validator = Arc::new(PatternValidator::new(
            ValidatorSettings::from_budget(&budget, cfg.validation.pii_severity, cfg.output.escape),
            Arc::clone(&pii),
        )?);

        let mut sandbox = Sandbox::new(budget, cfg.output.escape);
        if let Some(base_dir) = cfg.includes.base_dir.clone() {
            let source = self
                .include_source
                .unwrap_or_else(|| Arc::new(DirIncludeSource::new(budget.max_content_bytes)));
            sandbox = sandbox.with_includes(Arc::new(IncludeLoader::new(
                base_dir,
                source,
                Arc::clone(&validator),
                budget.parse_limits(),
                ShardedLru::new(cfg.cache.include_capacity, cfg.cache.shards),
                Arc::clone(&metrics),
            )));
        }

        tracing::info!(
            profile = ?cfg.profile,
            includes = cfg.includes.base_dir.is_some(),
            "secure renderer ready"
        );

        Ok(SecureRenderer {
            inner: Arc::new(Inner {
                budget,
                validator,
                rate: RateLimiter::new(cfg.rate_policy()),
                permissions: self.permissions.unwrap_or_default(),
                audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
                pii,
                sandbox,
                sanitizer: OutputSanitizer::new(&cfg.output.allowed_tags)?,
                validation_cache: ShardedLru::new(cfg.cache.validation_capacity, cfg.cache.shards),
                metrics,
            }),
        })
    }
}

struct Inner {
    budget: RenderBudget,
    validator: Arc<PatternValidator>,
    rate: RateLimiter,
    permissions: Arc<PermissionManager>,
    audit: Arc<dyn AuditSink>,
    pii: Arc<dyn PiiDetector>,
    sandbox: Sandbox,
    sanitizer: OutputSanitizer,
    validation_cache: ShardedLru<String, ValidationReport>,
    metrics: Arc<RenderMetrics>,
}

/// Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct SecureRenderer {
    inner: Arc<Inner>,
}

impl SecureRenderer {
    pub fn builder(config: EngineConfig) -> SecureRendererBuilder {
        SecureRendererBuilder {
            config,
            permissions: None,
            audit: None,
            pii: None,
            include_source: None,
            metrics: None,
        }
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.inner.permissions
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate
    }

    pub fn validator(&self) -> &Arc<PatternValidator> {
        &self.inner.validator
    }

    pub fn metrics(&self) -> &Arc<RenderMetrics> {
        &self.inner.metrics
    }

    pub fn budget(&self) -> RenderBudget {
        self.inner.budget
    }

    /// Validate (cached by content hash) without rendering.
    pub fn validate_template(&self, template: &Template) -> Result<ValidationReport> {
        self.validate_cached(&template.content)
    }

    /// Synchronous render bounded by the cooperative deadline only.
    ///
    /// The evaluator stops itself once `max_wall_time_ms` has passed, but
    /// nothing interrupts work outside it. Callers that need a hard wall
    /// clock use [`render_async`](Self::render_async), or hold their own
    /// watchdog and call [`render_with_cancel`](Self::render_with_cancel).
    pub fn render(&self, template: &Template, ctx: RenderContext, user: &str) -> Result<String> {
        self.render_with_cancel(template, ctx, user, &CancelToken::new())
    }

    /// Synchronous render that also stops once `cancel` is set.
    ///
    /// `cancel` is the caller's watchdog: trip it from another thread to end
    /// the render with `Timeout`. A token that is already tripped fails
    /// before any gate runs, so no rate-limit slot is charged.
    pub fn render_with_cancel(
        &self,
        template: &Template,
        ctx: RenderContext,
        user: &str,
        cancel: &CancelToken,
    ) -> Result<String> {
        let started = Instant::now();
        self.inner.metrics.renders_in_flight.inc(&[]);
        let res = self.execute(template, ctx, user, cancel);
        self.finish(&template.id, user, &res, started);
        res
    }

    /// Runs the pipeline on the blocking pool under an external deadline.
    ///
    /// On timeout the cancellation token is tripped and `Timeout` is returned
    /// immediately; the abandoned evaluation stops at its next check.
    pub async fn render_async(
        &self,
        template: Arc<Template>,
        ctx: RenderContext,
        user: &str,
    ) -> Result<String> {
        let started = Instant::now();
        self.inner.metrics.renders_in_flight.inc(&[]);

        let cancel = CancelToken::new();
        let worker = {
            let this = self.clone();
            let template = Arc::clone(&template);
            let user = user.to_string();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || this.execute(&template, ctx, &user, &cancel))
        };

        let res = match tokio::time::timeout(self.inner.budget.max_wall_time(), worker).await {
            Ok(Ok(res)) => res,
            Ok(Err(join)) => Err(GuardError::Internal(format!("render task failed: {join}"))),
            Err(_) => {
                cancel.cancel();
                self.inner.metrics.gate_rejected("deadline");
                Err(GuardError::ResourceLimitExceeded(LimitKind::Timeout))
            }
        };
        self.finish(&template.id, user, &res, started);
        res
    }

    /// Fetch from `store`, then [`render_async`](Self::render_async).
    pub async fn render_by_id(
        &self,
        store: &dyn TemplateStore,
        id: &str,
        ctx: RenderContext,
        user: &str,
    ) -> Result<String> {
        match store.get_template(id).await {
            Ok(template) => self.render_async(template, ctx, user).await,
            Err(e) => {
                let res = Err(e);
                self.inner.metrics.renders_in_flight.inc(&[]);
                self.finish(id, user, &res, Instant::now());
                res
            }
        }
    }

    /// The gates, in order. Never audits; callers do that exactly once.
    fn execute(
        &self,
        template: &Template,
        ctx: RenderContext,
        user: &str,
        cancel: &CancelToken,
    ) -> Result<String> {
        let inner = &*self.inner;

        // The external deadline may fire before the blocking pool starts us.
        if cancel.is_cancelled() {
            tracing::debug!(template_id = %template.id, "render cancelled before gates");
            return Err(GuardError::ResourceLimitExceeded(LimitKind::Timeout));
        }

        if !inner
            .permissions
            .has_permission(user, &template.id, Permission::Execute)
        {
            tracing::warn!(user = %user, template_id = %template.id, "render permission denied");
            inner.metrics.gate_rejected("permission");
            return Err(GuardError::PermissionDenied {
                permission: Permission::Execute.to_string(),
            });
        }

        if let Err(e) = inner.rate.check_and_record(user, RENDER_ACTION) {
            tracing::warn!(user = %user, template_id = %template.id, "render rate limited");
            inner.metrics.gate_rejected("rate_limit");
            return Err(e);
        }

        let report = self.gate("validation", self.validate_cached(&template.content))?;
        if let Some(issue) = report.first_blocking() {
            tracing::warn!(
                template_id = %template.id,
                category = %issue.category,
                excerpt = %issue.excerpt,
                issues = report.issues.len(),
                "template content rejected"
            );
            inner.metrics.gate_rejected("validation");
            return Err(GuardError::SecurityViolation(issue.category));
        }
        tracing::debug!(template_id = %template.id, "content validation passed");

        let clean = self.gate(
            "context",
            SanitizedContext::sanitize(template, ctx, &inner.validator),
        )?;
        tracing::debug!(template_id = %template.id, values = clean.len(), "context sanitized");

        let program = self.gate(
            "parse",
            parse(&template.content, &inner.budget.parse_limits()),
        )?;
        let raw = self.gate(
            "sandbox",
            inner
                .sandbox
                .evaluate(&program, &clean, cancel.clone())
                .into_result(),
        )?;

        let mut out = inner.sanitizer.sanitize(&raw);
        if template.mask_pii {
            let found = inner.pii.detect(&out);
            if !found.is_empty() {
                tracing::debug!(template_id = %template.id, matches = found.len(), "pii masked");
                out = inner.pii.mask(&out, &found);
            }
        }
        Ok(out)
    }

    fn gate<T>(&self, gate: &'static str, res: Result<T>) -> Result<T> {
        if let Err(e) = &res {
            self.inner.metrics.gate_rejected(gate);
            match e.code() {
                ErrorCode::SecurityViolation => {
                    tracing::warn!(gate, error = %e, "render rejected")
                }
                _ => tracing::debug!(gate, error = %e, "render failed"),
            }
        }
        res
    }

    fn validate_cached(&self, content: &str) -> Result<ValidationReport> {
        let inner = &*self.inner;
        if content.len() > inner.budget.max_content_bytes {
            return Err(GuardError::ResourceLimitExceeded(LimitKind::SizeLimit));
        }

        let key = content_hash(content);
        if let Some(report) = inner.validation_cache.get(&key) {
            inner.metrics.cache_event("validation", "hit");
            return Ok(report);
        }
        inner.metrics.cache_event("validation", "miss");

        let report = inner.validator.validate_content(content)?;
        inner.validation_cache.insert(key, report.clone());
        Ok(report)
    }

    fn finish(&self, resource_id: &str, user: &str, res: &Result<String>, started: Instant) {
        let inner = &*self.inner;
        let elapsed = started.elapsed();
        let duration_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);

        inner.metrics.renders_in_flight.dec(&[]);
        inner.metrics.render_duration.observe(&[], elapsed);

        let event = match res {
            Ok(out) => {
                tracing::info!(
                    template_id = %resource_id,
                    user = %user,
                    bytes = out.len(),
                    duration_us,
                    "render completed"
                );
                AuditEvent::render(
                    user,
                    resource_id,
                    OUTCOME_SUCCESS,
                    format!("rendered {} bytes", out.len()),
                )
            }
            Err(e) => {
                tracing::info!(
                    template_id = %resource_id,
                    user = %user,
                    code = e.code().as_str(),
                    duration_us,
                    "render failed"
                );
                AuditEvent::render(user, resource_id, e.code().as_str(), e.to_string())
            }
        };
        inner
            .metrics
            .renders_total
            .inc(&[("outcome", event.outcome.as_str())]);
        inner.audit.emit(event);
    }
}
