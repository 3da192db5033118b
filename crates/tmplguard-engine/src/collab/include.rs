//! Include content source.
//!
//! The engine validates and resolves include paths itself; a source only
//! turns an already-vetted absolute path into text.

use std::fs;
use std::io::Read;
use std::path::Path;

use tmplguard_core::error::{GuardError, LimitKind, Result};

pub trait IncludeSource: Send + Sync {
    fn load(&self, resolved: &Path) -> Result<String>;
}

/// Reads includes from the local filesystem, refusing files over `max_bytes`.
#[derive(Debug, Clone)]
pub struct DirIncludeSource {
    max_bytes: usize,
}

impl DirIncludeSource {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

impl IncludeSource for DirIncludeSource {
    fn load(&self, resolved: &Path) -> Result<String> {
        let file = fs::File::open(resolved)
            .map_err(|e| GuardError::InvalidContext(format!("include not readable: {}", e.kind())))?;

        // Read one byte past the cap so oversize files are detected without
        // trusting metadata.
        let mut buf = Vec::new();
        file.take(self.max_bytes as u64 + 1)
            .read_to_end(&mut buf)
            .map_err(|e| GuardError::InvalidContext(format!("include not readable: {}", e.kind())))?;
        if buf.len() > self.max_bytes {
            return Err(GuardError::ResourceLimitExceeded(LimitKind::SizeLimit));
        }

        String::from_utf8(buf)
            .map_err(|_| GuardError::InvalidContext("include is not valid UTF-8".into()))
    }
}
