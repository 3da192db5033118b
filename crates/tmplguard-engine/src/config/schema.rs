use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tmplguard_core::error::{GuardError, Result};
use tmplguard_core::grammar::ParseLimits;
use tmplguard_core::issue::Severity;

use crate::render::escape::EscapeMode;
use crate::render::sanitize::FORBIDDEN_TAGS;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub version: u32,

    #[serde(default)]
    pub profile: Profile,

    /// Field-by-field overrides on top of the profile budget.
    #[serde(default)]
    pub budget: BudgetOverrides,

    /// `action -> windows`. Absent means the profile defaults.
    #[serde(default)]
    pub rate_limits: Option<HashMap<String, Vec<WindowLimit>>>,

    #[serde(default)]
    pub validation: ValidationSection,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub output: OutputSection,

    #[serde(default)]
    pub includes: IncludeSection,
}

impl EngineConfig {
    /// Programmatic config for a profile with no overrides.
    pub fn for_profile(profile: Profile) -> Self {
        Self {
            version: 1,
            profile,
            budget: BudgetOverrides::default(),
            rate_limits: None,
            validation: ValidationSection::default(),
            cache: CacheSection::default(),
            output: OutputSection::default(),
            includes: IncludeSection::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(GuardError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        self.budget().validate()?;
        for (action, windows) in self.rate_policy() {
            if windows.is_empty() {
                return Err(GuardError::Config(format!(
                    "rate_limits.{action} must list at least one window"
                )));
            }
            for w in &windows {
                w.validate(&action)?;
            }
        }
        self.cache.validate()?;
        self.output.validate()?;
        Ok(())
    }

    /// Profile budget with overrides applied.
    pub fn budget(&self) -> RenderBudget {
        self.budget.apply(RenderBudget::for_profile(self.profile))
    }

    pub fn rate_policy(&self) -> HashMap<String, Vec<WindowLimit>> {
        match &self.rate_limits {
            Some(p) => p.clone(),
            None => default_rate_policy(self.profile),
        }
    }
}

/// Deployment profile. Selects the baseline budget and rate limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Basic,
    Performance,
    #[default]
    Secure,
    Enterprise,
}

/// Resource budget for one render. Constructed once, never mutated mid-render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderBudget {
    pub max_content_bytes: usize,
    pub max_output_bytes: usize,
    /// Per loop; longer collections are truncated.
    pub max_loop_iterations: usize,
    /// Across all loops of one render; exceeding it fails the render.
    pub max_total_iterations: usize,
    pub max_include_depth: usize,
    pub max_recursion_depth: usize,
    pub max_wall_time_ms: u64,
    pub max_expression_length: usize,
    pub max_variable_bytes: usize,
}

const KIB: usize = 1024;
/// Evaluation recurses per nested body, so this bounds native stack use.
const MAX_RECURSION_DEPTH: usize = 64;
const MIB: usize = 1024 * 1024;

impl RenderBudget {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Basic => Self {
                max_content_bytes: MIB,
                max_output_bytes: 5 * MIB,
                max_loop_iterations: 1_000,
                max_total_iterations: 10_000,
                max_include_depth: 3,
                max_recursion_depth: 10,
                max_wall_time_ms: 5_000,
                max_expression_length: 256,
                max_variable_bytes: 64 * KIB,
            },
            Profile::Performance => Self {
                max_content_bytes: 5 * MIB,
                max_output_bytes: 20 * MIB,
                max_loop_iterations: 10_000,
                max_total_iterations: 100_000,
                max_include_depth: 5,
                max_recursion_depth: 20,
                max_wall_time_ms: 10_000,
                max_expression_length: 512,
                max_variable_bytes: 256 * KIB,
            },
            Profile::Secure => Self {
                max_content_bytes: 512 * KIB,
                max_output_bytes: 2 * MIB,
                max_loop_iterations: 500,
                max_total_iterations: 5_000,
                max_include_depth: 2,
                max_recursion_depth: 8,
                max_wall_time_ms: 2_000,
                max_expression_length: 200,
                max_variable_bytes: 16 * KIB,
            },
            Profile::Enterprise => Self {
                max_content_bytes: MIB,
                max_output_bytes: 10 * MIB,
                max_loop_iterations: 1_000,
                max_total_iterations: 20_000,
                max_include_depth: 3,
                max_recursion_depth: 10,
                max_wall_time_ms: 3_000,
                max_expression_length: 256,
                max_variable_bytes: 64 * KIB,
            },
        }
    }

    pub fn max_wall_time(&self) -> Duration {
        Duration::from_millis(self.max_wall_time_ms)
    }

    pub fn parse_limits(&self) -> ParseLimits {
        ParseLimits {
            max_expression_length: self.max_expression_length,
            max_nesting: self.max_recursion_depth,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("max_content_bytes", self.max_content_bytes),
            ("max_output_bytes", self.max_output_bytes),
            ("max_loop_iterations", self.max_loop_iterations),
            ("max_total_iterations", self.max_total_iterations),
            ("max_recursion_depth", self.max_recursion_depth),
            ("max_expression_length", self.max_expression_length),
            ("max_variable_bytes", self.max_variable_bytes),
        ];
        for (name, v) in nonzero {
            if v == 0 {
                return Err(GuardError::Config(format!("budget.{name} must be greater than 0")));
            }
        }
        if self.max_recursion_depth > MAX_RECURSION_DEPTH {
            return Err(GuardError::Config(format!(
                "budget.max_recursion_depth must be at most {MAX_RECURSION_DEPTH}"
            )));
        }
        if !(1..=300_000).contains(&self.max_wall_time_ms) {
            return Err(GuardError::Config(
                "budget.max_wall_time_ms must be between 1 and 300000".into(),
            ));
        }
        if self.max_total_iterations < self.max_loop_iterations {
            return Err(GuardError::Config(
                "budget.max_total_iterations must be >= max_loop_iterations".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetOverrides {
    pub max_content_bytes: Option<usize>,
    pub max_output_bytes: Option<usize>,
    pub max_loop_iterations: Option<usize>,
    pub max_total_iterations: Option<usize>,
    pub max_include_depth: Option<usize>,
    pub max_recursion_depth: Option<usize>,
    pub max_wall_time_ms: Option<u64>,
    pub max_expression_length: Option<usize>,
    pub max_variable_bytes: Option<usize>,
}

impl BudgetOverrides {
    fn apply(&self, base: RenderBudget) -> RenderBudget {
        RenderBudget {
            max_content_bytes: self.max_content_bytes.unwrap_or(base.max_content_bytes),
            max_output_bytes: self.max_output_bytes.unwrap_or(base.max_output_bytes),
            max_loop_iterations: self.max_loop_iterations.unwrap_or(base.max_loop_iterations),
            max_total_iterations: self.max_total_iterations.unwrap_or(base.max_total_iterations),
            max_include_depth: self.max_include_depth.unwrap_or(base.max_include_depth),
            max_recursion_depth: self.max_recursion_depth.unwrap_or(base.max_recursion_depth),
            max_wall_time_ms: self.max_wall_time_ms.unwrap_or(base.max_wall_time_ms),
            max_expression_length: self
                .max_expression_length
                .unwrap_or(base.max_expression_length),
            max_variable_bytes: self.max_variable_bytes.unwrap_or(base.max_variable_bytes),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowLimit {
    pub window_secs: u64,
    pub limit: u32,
}

impl WindowLimit {
    pub fn new(window_secs: u64, limit: u32) -> Self {
        Self { window_secs, limit }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn validate(&self, action: &str) -> Result<()> {
        if self.window_secs == 0 || self.limit == 0 {
            return Err(GuardError::Config(format!(
                "rate_limits.{action}: window_secs and limit must be greater than 0"
            )));
        }
        Ok(())
    }
}

fn default_rate_policy(profile: Profile) -> HashMap<String, Vec<WindowLimit>> {
    let render = match profile {
        Profile::Basic => vec![WindowLimit::new(60, 100), WindowLimit::new(3600, 1_000)],
        Profile::Performance => vec![WindowLimit::new(60, 1_000), WindowLimit::new(3600, 20_000)],
        Profile::Secure => vec![WindowLimit::new(60, 30), WindowLimit::new(3600, 300)],
        Profile::Enterprise => vec![WindowLimit::new(60, 300), WindowLimit::new(3600, 5_000)],
    };
    HashMap::from([("render".to_string(), render)])
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationSection {
    /// Whether PII findings block a render or are only reported.
    #[serde(default = "default_pii_severity")]
    pub pii_severity: Severity,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            pii_severity: default_pii_severity(),
        }
    }
}

fn default_pii_severity() -> Severity {
    Severity::Warning
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    #[serde(default = "default_validation_capacity")]
    pub validation_capacity: usize,
    #[serde(default = "default_include_capacity")]
    pub include_capacity: usize,
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            validation_capacity: default_validation_capacity(),
            include_capacity: default_include_capacity(),
            shards: default_shards(),
        }
    }
}

impl CacheSection {
    fn validate(&self) -> Result<()> {
        if self.validation_capacity == 0 || self.include_capacity == 0 {
            return Err(GuardError::Config(
                "cache capacities must be greater than 0".into(),
            ));
        }
        if !(1..=256).contains(&self.shards) {
            return Err(GuardError::Config(
                "cache.shards must be between 1 and 256".into(),
            ));
        }
        Ok(())
    }
}

fn default_validation_capacity() -> usize {
    1024
}
fn default_include_capacity() -> usize {
    256
}
fn default_shards() -> usize {
    16
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    #[serde(default)]
    pub escape: EscapeMode,
    /// Tags allowed in addition to the built-in allowlist.
    #[serde(default)]
    pub allowed_tags: Vec<String>,
}

impl OutputSection {
    fn validate(&self) -> Result<()> {
        for tag in &self.allowed_tags {
            if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(GuardError::Config(format!(
                    "output.allowed_tags: invalid tag name `{tag}`"
                )));
            }
            if FORBIDDEN_TAGS.contains(&tag.to_ascii_lowercase().as_str()) {
                return Err(GuardError::Config(format!(
                    "output.allowed_tags: `{tag}` can never be allowed"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IncludeSection {
    /// Root directory for `<!-- INCLUDE … -->`. Includes are rejected when unset.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
}
