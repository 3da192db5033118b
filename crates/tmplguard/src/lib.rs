//! Top-level facade crate for tmplguard.
//!
//! Re-exports the core types and the engine so users can depend on a single crate.

pub mod core {
    pub use tmplguard_core::*;
}

pub mod engine {
    pub use tmplguard_engine::*;
}

pub use tmplguard_core::{GuardError, RenderContext, Result, Template, VariableSpec};
pub use tmplguard_engine::{EngineConfig, Profile, SecureRenderer};
