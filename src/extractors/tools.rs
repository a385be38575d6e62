//! External tool resolution (foremost, scalpel, fls, ...)

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolve a tool binary: explicit override first, then `PATH`
pub fn find_tool(name: &str, overrides: &BTreeMap<String, PathBuf>) -> Option<PathBuf> {
    if let Some(path) = overrides.get(name) {
        if is_executable(path) {
            return Some(path.clone());
        }
        debug!(tool = name, path = %path.display(), "Configured tool path is not executable");
    }

    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        for candidate in candidate_names(name) {
            let full = dir.join(&candidate);
            if is_executable(&full) {
                return Some(full);
            }
        }
    }
    None
}

/// Required tools that cannot be resolved
pub fn missing_tools(required: &[&str], overrides: &BTreeMap<String, PathBuf>) -> Vec<String> {
    required
        .iter()
        .filter(|tool| find_tool(tool, overrides).is_none())
        .map(|tool| tool.to_string())
        .collect()
}

fn candidate_names(name: &str) -> Vec<String> {
    if cfg!(windows) && Path::new(name).extension().is_none() {
        vec![format!("{}.exe", name), name.to_string()]
    } else {
        vec![name.to_string()]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
