//! Run manifest: the only state carried from extraction to ingestion
//!
//! Written once at the end of extraction to `{output_dir}/manifest.json` and
//! read back, possibly by another process much later, at the start of
//! ingestion. Unknown fields survive a load/write cycle.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::common::audit;
use crate::common::path_security::resolve_under;
use crate::error::ExtractorResult;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Current manifest schema version
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// New run identifier: `YYYYMMDDTHHMMSS_xxxxxxxx` (UTC time, 8 random hex digits)
///
/// Sorts by start time; the random suffix keeps concurrent runs apart.
pub fn generate_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().format("%Y%m%dT%H%M%S"), &suffix[..8])
}

// ============================================================================
// Status types
// ============================================================================

/// Outcome of one extraction run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestStatus {
    Ok,
    Skipped,
    Partial,
    Cancelled,
    Error,
    /// Stopped by a carving safety limit; output is truncated but usable
    Limited,
}

impl ManifestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestStatus::Ok => "ok",
            ManifestStatus::Skipped => "skipped",
            ManifestStatus::Partial => "partial",
            ManifestStatus::Cancelled => "cancelled",
            ManifestStatus::Error => "error",
            ManifestStatus::Limited => "limited",
        }
    }

    /// Whether ingestion may consume a manifest in this status
    pub fn is_ingestible(&self) -> bool {
        matches!(
            self,
            ManifestStatus::Ok | ManifestStatus::Partial | ManifestStatus::Cancelled | ManifestStatus::Limited
        )
    }

    /// Return value of `run_extraction` for a run ending in this status
    pub fn extraction_succeeded(&self) -> bool {
        !matches!(self, ManifestStatus::Cancelled | ManifestStatus::Error)
    }
}

impl std::fmt::Display for ManifestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyStatus {
    #[default]
    Ok,
    Error,
}

// ============================================================================
// Manifest records
// ============================================================================

/// One file staged by an extraction run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Path inside the evidence
    pub logical_path: String,
    /// Path of the staged copy, relative to the output directory
    pub extracted_path: String,
    #[serde(default, alias = "file_size_bytes")]
    pub size_bytes: u64,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub copy_status: CopyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inode: Option<u64>,
    /// Extractor-specific fields (browser, profile, artifact type, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ManifestFile {
    /// Entry for a file that could not be copied
    pub fn failed(logical_path: impl Into<String>, partition_index: Option<u32>, error: impl Into<String>) -> Self {
        Self {
            logical_path: logical_path.into(),
            extracted_path: String::new(),
            size_bytes: 0,
            md5: None,
            sha256: None,
            copy_status: CopyStatus::Error,
            error_message: Some(error.into()),
            partition_index,
            inode: None,
            extra: Map::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.copy_status == CopyStatus::Ok
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// JSON record of one extraction run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub extractor: String,
    pub version: String,
    #[serde(default = "legacy_schema_version")]
    pub schema_version: u32,
    pub run_id: String,
    #[serde(default)]
    pub evidence_id: i64,
    pub extraction_timestamp_utc: String,
    #[serde(default)]
    pub files: Vec<ManifestFile>,
    pub status: ManifestStatus,
    #[serde(default)]
    pub notes: Vec<String>,
    /// Extractor-specific top-level fields (statistics, tool output, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Manifests written before the schema field existed
fn legacy_schema_version() -> u32 {
    0
}

impl Manifest {
    pub fn new(extractor: &str, version: &str, run_id: &str, evidence_id: i64) -> Self {
        Self {
            extractor: extractor.to_string(),
            version: version.to_string(),
            schema_version: MANIFEST_SCHEMA_VERSION,
            run_id: run_id.to_string(),
            evidence_id,
            extraction_timestamp_utc: Utc::now().to_rfc3339(),
            files: Vec::new(),
            status: ManifestStatus::Ok,
            notes: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn path_in(output_dir: &Path) -> PathBuf {
        output_dir.join(MANIFEST_FILE)
    }

    pub fn exists_in(output_dir: &Path) -> bool {
        Self::path_in(output_dir).is_file()
    }

    pub fn add_file(&mut self, file: ManifestFile) {
        self.files.push(file);
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn set_extra(&mut self, key: &str, value: impl Into<Value>) {
        self.extra.insert(key.to_string(), value.into());
    }

    pub fn ok_files(&self) -> impl Iterator<Item = &ManifestFile> {
        self.files.iter().filter(|f| f.is_ok())
    }

    pub fn ok_count(&self) -> usize {
        self.ok_files().count()
    }

    pub fn error_count(&self) -> usize {
        self.files.len() - self.ok_count()
    }

    /// Status implied by the file records alone
    pub fn derive_status(&self) -> ManifestStatus {
        let ok = self.ok_count();
        let errors = self.error_count();
        match (ok, errors) {
            (0, 0) => ManifestStatus::Skipped,
            (0, _) => ManifestStatus::Error,
            (_, 0) => ManifestStatus::Ok,
            _ => ManifestStatus::Partial,
        }
    }

    /// Host path of a staged file, refusing paths outside `output_dir`
    pub fn resolve_file(&self, output_dir: &Path, file: &ManifestFile) -> ExtractorResult<PathBuf> {
        resolve_under(output_dir, &file.extracted_path)
    }

    /// Write `manifest.json` atomically (temp file, then rename)
    pub fn write(&self, output_dir: &Path) -> ExtractorResult<PathBuf> {
        fs::create_dir_all(output_dir)?;
        let path = Self::path_in(output_dir);
        let tmp = output_dir.join(format!("{}.tmp", MANIFEST_FILE));

        let json = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;

        audit::log_manifest_written(&path, &self.run_id, self.status.as_str(), self.files.len());
        Ok(path)
    }

    pub fn load(output_dir: &Path) -> ExtractorResult<Self> {
        Self::load_path(&Self::path_in(output_dir))
    }

    pub fn load_path(path: &Path) -> ExtractorResult<Self> {
        let json = fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&json)?;
        debug!(
            path = %path.display(),
            run_id = %manifest.run_id,
            status = %manifest.status,
            files = manifest.files.len(),
            "Manifest loaded"
        );
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_id_format_and_uniqueness() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 15 + 1 + 8);
        assert_eq!(&a[8..9], "T");
        assert_eq!(&a[15..16], "_");
    }

    #[test]
    fn test_status_semantics() {
        assert!(ManifestStatus::Limited.is_ingestible());
        assert!(ManifestStatus::Cancelled.is_ingestible());
        assert!(!ManifestStatus::Error.is_ingestible());
        assert!(!ManifestStatus::Skipped.is_ingestible());
        assert!(ManifestStatus::Limited.extraction_succeeded());
        assert!(!ManifestStatus::Cancelled.extraction_succeeded());
    }

    #[test]
    fn test_write_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::new("chromium_history", "1.0.0", "20260101T000000_abcdef12", 7);
        manifest.add_file(ManifestFile {
            logical_path: "Users/bob/History".into(),
            extracted_path: "files/chrome_p1_0011aabb_History".into(),
            size_bytes: 42,
            md5: Some("m".into()),
            sha256: Some("s".into()),
            copy_status: CopyStatus::Ok,
            error_message: None,
            partition_index: Some(1),
            inode: Some(3869),
            extra: Map::new(),
        }.with_extra("browser", "chrome"));
        manifest.add_file(ManifestFile::failed("Users/eve/History", Some(2), "read error"));
        manifest.status = manifest.derive_status();
        manifest.set_extra("statistics", serde_json::json!({"profiles": 2}));

        manifest.write(dir.path()).unwrap();
        assert!(Manifest::exists_in(dir.path()));
        assert!(!dir.path().join("manifest.json.tmp").exists());

        let loaded = Manifest::load(dir.path()).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.status, ManifestStatus::Partial);
        assert_eq!(loaded.files[0].extra_str("browser"), Some("chrome"));
    }

    #[test]
    fn test_parses_older_manifest_shape() {
        let dir = TempDir::new().unwrap();
        let json = r#"{
            "extractor": "chromium_history",
            "version": "0.9",
            "run_id": "a1b2c3d4",
            "evidence_id": 1,
            "extraction_timestamp_utc": "2024-05-01T10:00:00+00:00",
            "status": "ok",
            "collection_tool": "legacy",
            "files": [
                {"logical_path": "Users/bob/History", "extracted_path": "History",
                 "file_size_bytes": 10, "md5": "x", "sha256": "y", "copy_status": "ok",
                 "browser": "edge"}
            ]
        }"#;
        fs::write(dir.path().join(MANIFEST_FILE), json).unwrap();

        let manifest = Manifest::load(dir.path()).unwrap();
        assert_eq!(manifest.schema_version, 0);
        assert_eq!(manifest.files[0].size_bytes, 10);
        assert_eq!(manifest.files[0].extra_str("browser"), Some("edge"));
        assert_eq!(manifest.extra["collection_tool"], "legacy");
        assert!(manifest.notes.is_empty());
    }

    #[test]
    fn test_resolve_file_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::new("x", "1", "r", 1);
        let mut file = ManifestFile::failed("a", None, "e");
        file.extracted_path = "../../etc/passwd".into();
        assert!(manifest.resolve_file(dir.path(), &file).is_err());
        file.extracted_path = "files/a".into();
        assert_eq!(manifest.resolve_file(dir.path(), &file).unwrap(), dir.path().join("files/a"));
    }
}
