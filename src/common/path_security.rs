//! Path Security Utilities
//!
//! Staged output names are derived from evidence paths (attacker-controlled),
//! and manifests are re-read from disk before ingestion. Both directions go
//! through these helpers so nothing is written or read outside the
//! extractor's output directory.

use std::path::{Component, Path, PathBuf};
use tracing::warn;

use crate::error::{ExtractorError, ExtractorResult};

/// Check if a relative path contains path traversal patterns.
///
/// Detects:
/// - `..` sequences
/// - Absolute path indicators
/// - Null bytes
/// - URL-encoded separators
pub fn contains_traversal_pattern(filename: &str) -> bool {
    if filename.contains('\0') {
        return true;
    }

    if filename.contains("..") {
        return true;
    }

    // Absolute paths (Unix and Windows)
    if filename.starts_with('/') || filename.starts_with('\\') {
        return true;
    }

    // Windows drive letters
    if filename.len() >= 2 {
        let bytes = filename.as_bytes();
        if bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
            return true;
        }
    }

    let lower = filename.to_lowercase();
    if lower.contains("%2e%2e") || lower.contains("%2f") || lower.contains("%5c") {
        return true;
    }

    false
}

/// Sanitize a single output filename component.
///
/// Path separators and whitespace become `_`; control characters and Windows
/// reserved characters are dropped; leading/trailing dots are trimmed.
pub fn sanitize_filename(filename: &str) -> String {
    let mut sanitized = String::with_capacity(filename.len());

    for c in filename.chars() {
        match c {
            '\0'..='\x1f' | '\x7f' => continue,
            '/' | '\\' | ' ' => sanitized.push('_'),
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => continue,
            _ => sanitized.push(c),
        }
    }

    let trimmed = sanitized.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Resolve a manifest-recorded path against the output directory.
///
/// Relative paths are joined to `base`; absolute paths are accepted only when
/// they already live under `base`. Anything else is rejected.
pub fn resolve_under(base: &Path, recorded: &str) -> ExtractorResult<PathBuf> {
    let recorded_path = Path::new(recorded);

    if recorded_path.is_absolute() {
        if recorded_path.starts_with(base) && !has_parent_component(recorded_path) {
            return Ok(recorded_path.to_path_buf());
        }
        // Output directories may be reached through a symlink or relative case root
        if let (Ok(canon_base), Ok(canon_path)) = (base.canonicalize(), recorded_path.canonicalize()) {
            if canon_path.starts_with(&canon_base) {
                return Ok(canon_path);
            }
        }
        warn!(
            target: "security",
            path = recorded,
            base = %base.display(),
            "Manifest path escapes output directory"
        );
        return Err(ExtractorError::UnsafePath(recorded.to_string()));
    }

    if contains_traversal_pattern(recorded) || has_parent_component(recorded_path) {
        warn!(target: "security", path = recorded, "Path traversal pattern in manifest path");
        return Err(ExtractorError::UnsafePath(recorded.to_string()));
    }

    Ok(base.join(recorded_path))
}

/// Express `path` relative to `base` with forward slashes, if it lives there.
pub fn relative_to(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

fn has_parent_component(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}
