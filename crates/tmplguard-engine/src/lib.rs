//! tmplguard engine library entry.
//!
//! Wires the pattern validator, rate limiter, permission manager and
//! sandboxed evaluator into the [`SecureRenderer`] pipeline. Storage, PII
//! detection, auditing and include loading are reached through the traits
//! in [`collab`].
//!
//! Panics, `unwrap`, and `expect` are compile-denied. The one deliberate
//! panic (a corrupted permission table) opts out locally.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod collab;
pub mod config;
pub mod obs;
pub mod policy;
pub mod render;
pub mod sandbox;
pub mod validate;

pub use config::{EngineConfig, Profile, RenderBudget, WindowLimit};
pub use render::{SecureRenderer, SecureRendererBuilder};
