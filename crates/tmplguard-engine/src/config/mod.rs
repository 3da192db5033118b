//! Engine config loader (strict parsing).

pub mod schema;

use std::fs;

use tmplguard_core::error::{GuardError, Result};

pub use schema::{EngineConfig, Profile, RenderBudget, WindowLimit};

pub fn load_from_file(path: &str) -> Result<EngineConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| GuardError::Config(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<EngineConfig> {
    let cfg: EngineConfig =
        serde_yaml::from_str(s).map_err(|e| GuardError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
