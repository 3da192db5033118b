//! Secure renderer and its building blocks: context sanitization, escaping,
//! output sanitization and caches.

pub mod cache;
pub mod context;
pub mod escape;
pub mod renderer;
pub mod sanitize;

pub use context::SanitizedContext;
pub use escape::{escape_html, EscapeMode};
pub use renderer::{SecureRenderer, SecureRendererBuilder, RENDER_ACTION};
pub use sanitize::OutputSanitizer;
