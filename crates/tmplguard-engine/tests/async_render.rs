#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use serde_json::json;
use tmplguard_core::error::{GuardError, LimitKind};
use tmplguard_core::template::{RenderContext, Template};
use tmplguard_engine::collab::audit::{AuditSink, ChannelAuditSink, MemoryAuditSink};
use tmplguard_engine::collab::store::InMemoryTemplateStore;
use tmplguard_engine::config;
use tmplguard_engine::policy::Permission;
use tmplguard_engine::SecureRenderer;

fn renderer(yaml: &str, audit: Arc<dyn AuditSink>) -> SecureRenderer {
    SecureRenderer::builder(config::load_from_str(yaml).unwrap())
        .audit_sink(audit)
        .build()
        .unwrap()
}

const GENEROUS: &str = "version: 1\nrate_limits: { render: [ { window_secs: 60, limit: 10000 } ] }\n";

#[tokio::test]
async fn render_by_id_uses_the_store() {
    let audit = Arc::new(MemoryAuditSink::new());
    let r = renderer(GENEROUS, audit.clone());
    let store = InMemoryTemplateStore::new();
    store.insert(Template::new("welcome", "Welcome, {{ user.name }}."));
    r.permissions().grant("ann", "welcome", Permission::Execute);

    let out = r
        .render_by_id(&store, "welcome", RenderContext::new().var("user", json!({"name": "Ann"})), "ann")
        .await
        .unwrap();
    assert_eq!(out, "Welcome, Ann.");

    let missing = r
        .render_by_id(&store, "nope", RenderContext::new(), "ann")
        .await;
    assert!(missing.is_err());

    let events = audit.events();
    assert_eq!(events.len(), 2);
    assert!(events[0].is_success());
    assert_eq!(events[1].resource_id, "nope");
    assert_eq!(events[1].outcome, "RENDER_ERROR");
}

#[tokio::test]
async fn external_deadline_returns_timeout_once() {
    let audit = Arc::new(MemoryAuditSink::new());
    // A tiny wall-clock budget with a huge nested loop: either the external
    // deadline or the in-sandbox check fires, both as Timeout.
    let r = renderer(
        &format!(
            "{GENEROUS}budget: {{ max_wall_time_ms: 1, max_loop_iterations: 2000, max_total_iterations: 4000000, max_output_bytes: 100000000, max_variable_bytes: 1000000 }}\n"
        ),
        audit.clone(),
    );
    let t = Arc::new(Template::new(
        "slow",
        "<!-- FOR a IN xs --><!-- FOR b IN xs --><!-- FOR c IN xs -->.<!-- END FOR --><!-- END FOR --><!-- END FOR -->",
    ));
    r.permissions().grant_public("slow", Permission::Execute);
    let xs: Vec<_> = (0..2000).map(|i| json!(i)).collect();

    let res = r
        .render_async(t, RenderContext::new().loop_source("xs", xs), "u")
        .await;
    assert_eq!(res, Err(GuardError::ResourceLimitExceeded(LimitKind::Timeout)));

    // Let an abandoned worker observe the cancellation.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit.events()[0].outcome, "RESOURCE_LIMIT");
}

#[tokio::test]
async fn channel_sink_delivers_events() {
    let (sink, mut rx) = ChannelAuditSink::channel(8);
    let r = renderer(GENEROUS, Arc::new(sink));
    let t = Arc::new(Template::new("t", "ok"));
    r.permissions().grant_public("t", Permission::Execute);

    assert_eq!(r.render_async(t, RenderContext::new(), "u").await.unwrap(), "ok");
    let ev = rx.recv().await.unwrap();
    assert_eq!(ev.resource_id, "t");
    assert!(ev.is_success());
}
