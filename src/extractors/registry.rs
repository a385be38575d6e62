//! Extractor registry
//!
//! Extractors are registered in one static table of module paths and
//! factories. The module path follows the source tree:
//!
//! ```text
//! browser/<family>/<artifact>   ->  <Family><Artifact>Extractor   (browser/chromium/history -> ChromiumHistoryExtractor)
//! <group>/<name>                ->  <Group><Name>Extractor        (system/file_list -> SystemFileListExtractor)
//! <name>                        ->  <Name>Extractor               (bulk_extractor -> BulkExtractorExtractor)
//! ```
//!
//! Each factory's product must carry the type name derived from its path.
//! A module that fails to load (factory error, panic, or wrong type) is
//! logged and skipped: a partial registry is acceptable. Two extractors
//! with the same `metadata().name` are a configuration bug; the later one
//! replaces the earlier with a warning.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{browser, media, system, Extractor};
use crate::error::{ExtractorError, ExtractorResult};

pub type ExtractorFactory = fn() -> ExtractorResult<Box<dyn Extractor>>;

/// One registrable extractor module
#[derive(Clone, Copy)]
pub struct ExtractorModule {
    /// Path under `extractors/`, e.g. `browser/chromium/history`
    pub path: &'static str,
    pub factory: ExtractorFactory,
}

/// Top-level modules that never hold an extractor
pub const SKIP_MODULES: &[&str] = &[
    "callbacks",
    "carving",
    "discovery",
    "manifest",
    "registry",
    "runner",
    "staging",
    "tools",
];

/// Group directories holding nested extractors
pub const GROUP_DIRECTORIES: &[&str] = &["browser", "system", "media", "carvers", "cache"];

/// Built-in extractors
pub static BUILTIN_MODULES: &[ExtractorModule] = &[
    ExtractorModule {
        path: "browser/chromium/history",
        factory: browser::chromium::history::create,
    },
    ExtractorModule {
        path: "system/file_list",
        factory: system::file_list::create,
    },
    ExtractorModule {
        path: "media/foremost_carver",
        factory: media::foremost_carver::create,
    },
];

fn pascal_case(segment: &str) -> String {
    segment
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn is_private(segment: &str) -> bool {
    segment.is_empty() || segment.starts_with('_')
}

/// Type name an extractor at `module_path` must have
///
/// `None` when the path is skipped or does not fit the layout.
pub fn expected_type_name(module_path: &str) -> Option<String> {
    let segments: Vec<&str> = module_path.split('/').collect();
    if segments.iter().any(|s| is_private(s)) || SKIP_MODULES.contains(&segments[0]) {
        return None;
    }

    let stem = match segments.as_slice() {
        ["browser", family, artifact] => format!("{}{}", pascal_case(family), pascal_case(artifact)),
        [group, name] if *group != "browser" && GROUP_DIRECTORIES.contains(group) => {
            format!("{}{}", pascal_case(group), pascal_case(name))
        }
        [name] if !GROUP_DIRECTORIES.contains(name) => pascal_case(name),
        _ => return None,
    };
    Some(format!("{}Extractor", stem))
}

/// Last path component of a `std::any::type_name` value
fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

fn load_module(module: &ExtractorModule) -> ExtractorResult<Box<dyn Extractor>> {
    let expected = expected_type_name(module.path)
        .ok_or_else(|| ExtractorError::load(module.path, "module path is skipped or malformed"))?;

    let extractor = match panic::catch_unwind(AssertUnwindSafe(module.factory)) {
        Ok(result) => result?,
        Err(_) => return Err(ExtractorError::load(module.path, "factory panicked")),
    };

    let actual = short_type_name(extractor.type_name());
    if actual != expected {
        return Err(ExtractorError::load(
            module.path,
            format!("expected type {}, found {}", expected, actual),
        ));
    }
    Ok(extractor)
}

// ============================================================================
// Registry
// ============================================================================

/// Extractors addressable by name, in registration order
#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
    by_name: HashMap<&'static str, usize>,
    failures: Vec<(String, String)>,
}

impl ExtractorRegistry {
    /// Registry of every built-in extractor
    pub fn discover() -> Self {
        Self::from_modules(BUILTIN_MODULES)
    }

    pub fn from_modules(modules: &[ExtractorModule]) -> Self {
        let mut registry = Self::default();
        for module in modules {
            match load_module(module) {
                Ok(extractor) => {
                    debug!(module = module.path, name = extractor.metadata().name, "Extractor loaded");
                    registry.register(Arc::from(extractor));
                }
                Err(e) => {
                    warn!("Skipping extractor module '{}': {}", module.path, e);
                    registry.failures.push((module.path.to_string(), e.to_string()));
                }
            }
        }
        info!(
            loaded = registry.len(),
            failed = registry.failures.len(),
            "Extractor registry ready"
        );
        registry
    }

    /// Register an extractor; a name collision replaces the earlier one
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        let name = extractor.metadata().name;
        match self.by_name.get(name) {
            Some(&index) => {
                warn!(
                    name,
                    previous = self.extractors[index].type_name(),
                    replacement = extractor.type_name(),
                    "Duplicate extractor name, last registration wins"
                );
                self.extractors[index] = extractor;
            }
            None => {
                self.by_name.insert(name, self.extractors.len());
                self.extractors.push(extractor);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Extractor>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.extractors[i]))
    }

    pub fn get_all(&self) -> Vec<Arc<dyn Extractor>> {
        self.extractors.clone()
    }

    pub fn get_by_category(&self, category: &str) -> Vec<Arc<dyn Extractor>> {
        self.extractors
            .iter()
            .filter(|e| e.metadata().category.matches(category))
            .cloned()
            .collect()
    }

    pub fn list_names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.metadata().name).collect()
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Modules skipped at load time, with the reason
    pub fn load_failures(&self) -> &[(String, String)] {
        &self.failures
    }
}
