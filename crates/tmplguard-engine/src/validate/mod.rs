//! Static content validation: SSTI, XSS and path-traversal signatures,
//! variable value cleaning, and include path confinement.

pub mod include_path;
pub mod signatures;
pub mod validator;

pub use include_path::{resolve_include_path, validate_include_path};
pub use validator::{PatternValidator, ValidatorSettings};
