#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tmplguard_core::error::GuardError;
use tmplguard_core::template::{RenderContext, Template};
use tmplguard_engine::collab::audit::MemoryAuditSink;
use tmplguard_engine::config::{self, WindowLimit};
use tmplguard_engine::policy::{Permission, PermissionManager, RateLimiter};
use tmplguard_engine::SecureRenderer;

#[test]
fn limiter_admits_exactly_the_limit_under_contention() {
    let rl = RateLimiter::new(HashMap::from([(
        "render".to_string(),
        vec![WindowLimit::new(60, 50)],
    )]));
    let admitted = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for _ in 0..100 {
            s.spawn(|| {
                if rl.check_and_record("u", "render").is_ok() {
                    admitted.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(admitted.load(Ordering::Relaxed), 50);
    assert_eq!(rl.usage("u", "render"), 50);
}

#[test]
fn renderer_is_shared_across_threads() {
    let audit = Arc::new(MemoryAuditSink::new());
    let r = SecureRenderer::builder(
        config::load_from_str("version: 1\nrate_limits: { render: [ { window_secs: 60, limit: 20 } ] }\n")
            .unwrap(),
    )
    .audit_sink(audit.clone())
    .build()
    .unwrap();
    let t = Template::new("t", "n={{ n }}");
    r.permissions().grant_public("t", Permission::Execute);

    let limited = AtomicUsize::new(0);
    std::thread::scope(|s| {
        for i in 0..40 {
            let r = r.clone();
            let t = &t;
            let limited = &limited;
            s.spawn(move || match r.render(t, RenderContext::new().var("n", i), "u") {
                Ok(out) => assert_eq!(out, format!("n={i}")),
                Err(GuardError::RateLimitExceeded { .. }) => {
                    limited.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => panic!("unexpected {e}"),
            });
        }
    });

    assert_eq!(limited.load(Ordering::Relaxed), 20);
    assert_eq!(audit.len(), 40);
}

#[test]
fn permission_grants_race_safely() {
    let pm = PermissionManager::new();
    std::thread::scope(|s| {
        for i in 0..64 {
            let pm = &pm;
            s.spawn(move || {
                let p = [Permission::Read, Permission::Write, Permission::Execute, Permission::Delete][i % 4];
                pm.grant("u", "doc", p);
            });
        }
    });
    assert!(pm.has_permission("u", "doc", Permission::Admin));
}
