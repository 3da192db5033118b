#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use tmplguard_core::issue::Severity;
use tmplguard_engine::config::{self, Profile, RenderBudget, WindowLimit};
use tmplguard_engine::render::EscapeMode;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
budget:
  max_loop_iteration: 10 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.profile, Profile::Secure);
    assert_eq!(cfg.budget(), RenderBudget::for_profile(Profile::Secure));
    assert_eq!(cfg.output.escape, EscapeMode::Html);
    assert_eq!(cfg.validation.pii_severity, Severity::Warning);
    assert_eq!(
        cfg.rate_policy().get("render"),
        Some(&vec![WindowLimit::new(60, 30), WindowLimit::new(3600, 300)])
    );
}

#[test]
fn overrides_apply_on_top_of_profile() {
    let cfg = config::load_from_str(
        r#"
version: 1
profile: performance
budget:
  max_loop_iterations: 100
rate_limits:
  render:
    - { window_secs: 60, limit: 5 }
validation:
  pii_severity: blocking
output:
  escape: none
  allowed_tags: [section, article]
includes:
  base_dir: /srv/templates
"#,
    )
    .unwrap();

    let budget = cfg.budget();
    assert_eq!(budget.max_loop_iterations, 100);
    assert_eq!(
        budget.max_output_bytes,
        RenderBudget::for_profile(Profile::Performance).max_output_bytes
    );
    assert_eq!(cfg.rate_policy()["render"], vec![WindowLimit::new(60, 5)]);
    assert_eq!(cfg.validation.pii_severity, Severity::Blocking);
    assert_eq!(cfg.output.escape, EscapeMode::Raw);
    assert!(cfg.includes.base_dir.is_some());
}

#[test]
fn range_checks() {
    for bad in [
        "version: 2\n",
        "version: 1\nbudget: { max_output_bytes: 0 }\n",
        "version: 1\nbudget: { max_wall_time_ms: 0 }\n",
        "version: 1\nbudget: { max_loop_iterations: 10, max_total_iterations: 5 }\n",
        "version: 1\nrate_limits: { render: [] }\n",
        "version: 1\nrate_limits: { render: [ { window_secs: 0, limit: 1 } ] }\n",
        "version: 1\ncache: { shards: 0 }\n",
        "version: 1\noutput: { allowed_tags: [script] }\n",
        "version: 1\noutput: { allowed_tags: [\"a b\"] }\n",
        "version: 1\nprofile: paranoid\n",
    ] {
        let err = config::load_from_str(bad).expect_err(bad);
        assert_eq!(err.code().as_str(), "CONFIG", "{bad}");
    }
}

#[test]
fn load_from_file_reads_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tmplguard.yaml");
    std::fs::write(&path, "version: 1\nprofile: basic\n").unwrap();
    let cfg = config::load_from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(cfg.profile, Profile::Basic);

    let missing = config::load_from_file("/definitely/not/here.yaml").expect_err("missing file");
    assert_eq!(missing.code().as_str(), "CONFIG");
}
