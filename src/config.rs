//! Settings and per-run configuration
//!
//! `Settings` is the persisted, user-level configuration (`settings.json`):
//! case root, evidence database name, carving safety defaults and tool path
//! overrides. `RunConfig` is the free-form map handed to one extractor run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ExtractorError, ExtractorResult};

/// Current settings file format version
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name inside the config directory
pub const SETTINGS_FILE: &str = "settings.json";

// ============================================================================
// Settings
// ============================================================================

/// Persisted application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Settings file format version
    pub version: u32,
    /// Root of the case workspace (`{case_root}/evidences/{label}/{extractor}`)
    pub case_root: PathBuf,
    /// Evidence database file name, relative to the evidence directory
    pub evidence_db_name: String,
    /// Carving safety defaults
    pub carving: CarvingSettings,
    /// Explicit paths for external tools (name -> binary path)
    pub tool_paths: BTreeMap<String, PathBuf>,
}

/// Default caps applied to carving tools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CarvingSettings {
    pub max_output_mb: u64,
    pub max_files: u64,
    pub poll_interval_ms: u64,
    pub terminate_timeout_secs: u64,
    pub prune_non_ingested: bool,
}

impl Default for CarvingSettings {
    fn default() -> Self {
        Self {
            max_output_mb: 10_000, // 10 GB total carved output
            max_files: 50_000,
            poll_interval_ms: 2_000,
            terminate_timeout_secs: 10,
            prune_non_ingested: true,
        }
    }
}

impl CarvingSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            case_root: PathBuf::from("."),
            evidence_db_name: "evidence.sqlite".to_string(),
            carving: CarvingSettings::default(),
            tool_paths: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Default settings path under the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("core-extract").join(SETTINGS_FILE))
    }

    /// Load settings; a missing file yields defaults
    pub fn load(path: &Path) -> ExtractorResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }

        let json = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&json)
            .map_err(|e| ExtractorError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        if settings.version > SETTINGS_VERSION {
            warn!(
                "Settings file version {} is newer than supported version {}",
                settings.version, SETTINGS_VERSION
            );
        }

        Ok(settings)
    }

    /// Load from the default location, or defaults if there is none
    pub fn load_default() -> ExtractorResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Save settings as pretty JSON, creating the parent directory
    pub fn save(&self, path: &Path) -> ExtractorResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, &json)?;
        info!(path = %path.display(), bytes = json.len(), "Settings saved");
        Ok(())
    }

    /// Evidence database path for one evidence label
    pub fn evidence_db_path(&self, evidence_label: &str) -> PathBuf {
        self.case_root
            .join("evidences")
            .join(evidence_label)
            .join(&self.evidence_db_name)
    }
}

// ============================================================================
// Run configuration
// ============================================================================

/// Well-known run configuration keys
pub mod keys {
    pub const EVIDENCE_ID: &str = "evidence_id";
    pub const EVIDENCE_LABEL: &str = "evidence_label";
    pub const RUN_ID: &str = "run_id";
    pub const EXTRACTOR_NAME: &str = "extractor_name";
    pub const SCAN_ALL_PARTITIONS: &str = "scan_all_partitions";
    pub const MAX_CARVED_SIZE_MB: &str = "max_carved_size_mb";
    pub const MAX_CARVED_FILES: &str = "max_carved_files";
    pub const PRUNE_NON_INGESTED: &str = "prune_non_ingested";
    pub const POLL_INTERVAL_MS: &str = "poll_interval_ms";
    pub const TOOL_PATHS: &str = "tool_paths";
}

/// Free-form configuration for one extractor run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunConfig(Map<String, Value>);

impl RunConfig {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Parse from a JSON object string
    pub fn from_json(json: &str) -> ExtractorResult<Self> {
        match serde_json::from_str::<Value>(json)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ExtractorError::Config(format!(
                "Run configuration must be a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Insert only if the key is absent
    pub fn set_default(&mut self, key: &str, value: impl Into<Value>) {
        self.0.entry(key.to_string()).or_insert_with(|| value.into());
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.0.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    /// String list; a single string is accepted as a one-element list
    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.get_str(keys::RUN_ID)
    }

    pub fn evidence_id(&self) -> Option<i64> {
        self.get_i64(keys::EVIDENCE_ID)
    }

    pub fn evidence_label(&self) -> Option<&str> {
        self.get_str(keys::EVIDENCE_LABEL)
    }

    /// Tool path overrides carried in the run config (`{"tool_paths": {"foremost": "/opt/..."}}`)
    pub fn tool_paths(&self) -> BTreeMap<String, PathBuf> {
        let mut out = BTreeMap::new();
        if let Some(Value::Object(map)) = self.0.get(keys::TOOL_PATHS) {
            for (name, value) in map {
                if let Some(p) = value.as_str() {
                    out.insert(name.clone(), PathBuf::from(p));
                }
            }
        }
        out
    }
}

impl From<Map<String, Value>> for RunConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
