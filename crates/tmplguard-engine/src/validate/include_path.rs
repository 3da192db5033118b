//! Include path confinement.
//!
//! A path is accepted only if it is relative, free of `..`, and resolves
//! inside the base directory after every symlink on its existing prefix is
//! followed. Missing trailing segments are appended to that canonical
//! prefix, so a link to somewhere else cannot be smuggled in ahead of the
//! file it will later point at.

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Resolve `path` under `base_dir`, or `None` if it could escape.
pub fn resolve_include_path(path: &str, base_dir: &Path) -> Option<PathBuf> {
    if path.is_empty() || path.contains('\0') {
        return None;
    }
    // Covers absolute paths, drive letters, schemes and encoded separators.
    if path.starts_with('/') || path.starts_with('\\') || path.contains(':') || path.contains('%')
    {
        return None;
    }

    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split(['/', '\\']) {
        match seg {
            "" | "." => continue,
            ".." => return None,
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return None;
    }

    let base = canonicalize_existing(&lexical_absolute(base_dir))?;
    let mut candidate = base.clone();
    for seg in &segments {
        candidate.push(seg);
    }
    let resolved = canonicalize_existing(&candidate)?;

    if resolved.starts_with(&base) {
        Some(resolved)
    } else {
        tracing::warn!(path = %path, "include path resolves outside base dir");
        None
    }
}

pub fn validate_include_path(path: &str, base_dir: &Path) -> bool {
    resolve_include_path(path, base_dir).is_some()
}

/// Canonicalize the longest prefix of `p` that exists and re-append the
/// rest. A dangling symlink on the way is an error, not a missing segment.
fn canonicalize_existing(p: &Path) -> Option<PathBuf> {
    let mut existing = p.to_path_buf();
    let mut missing = Vec::new();
    while fs::symlink_metadata(&existing).is_err() {
        missing.push(existing.file_name()?.to_os_string());
        if !existing.pop() {
            return None;
        }
    }

    let mut out = fs::canonicalize(&existing).ok()?;
    out.extend(missing.iter().rev());
    Some(out)
}

/// Absolute form of `p` without touching the filesystem beyond `current_dir`.
fn lexical_absolute(p: &Path) -> PathBuf {
    let joined = if p.is_absolute() {
        p.to_path_buf()
    } else {
        match env::current_dir() {
            Ok(cwd) => cwd.join(p),
            Err(_) => p.to_path_buf(),
        }
    };

    let mut out = PathBuf::new();
    for c in joined.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn rejects_escapes_for_any_base() {
        let tmp = tempfile::tempdir().unwrap();
        let bases = [
            tmp.path().to_path_buf(),
            PathBuf::from("/definitely/not/here"),
            PathBuf::from("relative/base"),
        ];
        for base in &bases {
            for bad in [
                "../../etc/passwd",
                "/etc/passwd",
                "sub/../../x.md",
                "..",
                "C:\\Windows\\win.ini",
                "file:///etc/passwd",
                "%2e%2e/secret",
                "\\\\server\\share",
                "",
                "./.",
                "a\0b",
            ] {
                assert!(!validate_include_path(bad, base), "{bad:?} under {base:?}");
            }
            assert!(validate_include_path("sub/page.md", base), "{base:?}");
            assert!(validate_include_path("./sub/./page.md", base), "{base:?}");
        }
    }

    #[test]
    fn resolves_existing_file_to_canonical_path() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/page.md"), "hi").unwrap();

        let got = resolve_include_path("sub/page.md", tmp.path()).unwrap();
        assert_eq!(got, fs::canonicalize(tmp.path().join("sub/page.md")).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_base_is_rejected() {
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret.md"), "s").unwrap();

        let base = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), base.path().join("link")).unwrap();

        assert!(!validate_include_path("link/secret.md", base.path()));
        // Not there yet, but it would land outside once created.
        assert!(!validate_include_path("link/new.md", base.path()));
        assert!(!validate_include_path("link/deeper/new.md", base.path()));

        std::os::unix::fs::symlink(
            outside.path().join("missing.md"),
            base.path().join("dangling.md"),
        )
        .unwrap();
        assert!(!validate_include_path("dangling.md", base.path()));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_inside_base_is_followed() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir(base.path().join("real")).unwrap();
        std::os::unix::fs::symlink(base.path().join("real"), base.path().join("alias")).unwrap();

        let got = resolve_include_path("alias/new.md", base.path()).unwrap();
        assert_eq!(got, fs::canonicalize(base.path()).unwrap().join("real/new.md"));
    }
}
