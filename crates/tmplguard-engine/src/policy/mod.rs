//! Access policy: per-user rate limiting and per-resource permissions.
//!
//! Both are built once at startup and shared via `Arc`.

pub mod permissions;
pub mod rate_limit;

pub use permissions::{Permission, PermissionManager, PUBLIC_USER};
pub use rate_limit::RateLimiter;
