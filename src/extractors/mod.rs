//! Extractor framework
//!
//! Every artifact module implements [`Extractor`]: static metadata, two
//! pre-flight checks and two phases.
//!
//! - **Extraction** copies or derives files from evidence into the output
//!   directory and writes `manifest.json`. It never writes the database.
//! - **Ingestion** reads the manifest plus the files it lists and writes
//!   rows tagged with the manifest's `run_id`, replacing any earlier rows of
//!   the same run.
//!
//! The runner decides which evidence resource to hand an extractor by
//! switching on [`ExtractorMetadata::resource`].

pub mod callbacks;
pub mod carving;
pub mod discovery;
pub mod manifest;
pub mod registry;
pub mod runner;
pub mod staging;
pub mod tools;

pub mod browser;
pub mod media;
pub mod system;

use rusqlite::Connection;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{keys, RunConfig};
use crate::database::EvidenceDatabase;
use crate::error::ExtractorResult;
use crate::evidence::EvidenceFs;

pub use callbacks::{CancellationToken, ExtractorCallbacks, LogLevel, TracingCallbacks};
pub use manifest::{Manifest, ManifestFile, ManifestStatus};

/// Per artifact type row counts returned by ingestion (`{"urls": 120}`)
pub type IngestCounts = BTreeMap<String, u64>;

// ============================================================================
// Metadata
// ============================================================================

/// Extractor grouping used by the registry and UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Browser,
    System,
    Media,
    ForensicTools,
    Other(&'static str),
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Browser => "browser",
            Category::System => "system",
            Category::Media => "media",
            Category::ForensicTools => "forensic_tools",
            Category::Other(name) => *name,
        }
    }

    /// Match a category name as given on the command line
    pub fn matches(&self, name: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(name.trim())
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Evidence resource an extraction phase needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Evidence filesystem handle (plus the file_list index when `uses_file_list`)
    Filesystem,
    /// Evidence database connection
    Database,
    /// Raw image / source path, for external tools
    SourcePath,
}

/// Immutable descriptor of one extractor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractorMetadata {
    /// Unique registry key
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub category: Category,
    pub version: &'static str,
    /// External binaries that must be resolvable before extraction
    pub requires_tools: &'static [&'static str],
    pub can_extract: bool,
    pub can_ingest: bool,
    pub resource: ResourceKind,
    /// Runner opens a read-only file_list connection for discovery
    pub uses_file_list: bool,
}

// ============================================================================
// Pre-flight
// ============================================================================

/// Answer to "can this phase run now?"
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preflight {
    pub ready: bool,
    pub reason: String,
}

impl Preflight {
    pub fn ready() -> Self {
        Self { ready: true, reason: String::new() }
    }

    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self { ready: false, reason: reason.into() }
    }
}

// ============================================================================
// Evidence context / resources
// ============================================================================

/// Everything known about one evidence item, owned and cheap to clone
#[derive(Clone)]
pub struct EvidenceContext {
    pub evidence_id: i64,
    pub label: String,
    pub fs: Option<Arc<dyn EvidenceFs>>,
    pub source_path: Option<PathBuf>,
    pub database: Option<EvidenceDatabase>,
}

impl EvidenceContext {
    pub fn new(evidence_id: i64, label: impl Into<String>) -> Self {
        Self {
            evidence_id,
            label: label.into(),
            fs: None,
            source_path: None,
            database: None,
        }
    }

    pub fn with_fs(mut self, fs: Arc<dyn EvidenceFs>) -> Self {
        if self.source_path.is_none() {
            self.source_path = fs.source_path().map(Path::to_path_buf);
        }
        self.fs = Some(fs);
        self
    }

    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_database(mut self, database: EvidenceDatabase) -> Self {
        self.database = Some(database);
        self
    }

    /// Whether the context can supply the resource kind
    pub fn provides(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Filesystem => self.fs.is_some(),
            ResourceKind::Database => self.database.is_some(),
            ResourceKind::SourcePath => self.source_path.is_some(),
        }
    }
}

impl std::fmt::Debug for EvidenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceContext")
            .field("evidence_id", &self.evidence_id)
            .field("label", &self.label)
            .field("fs", &self.fs.as_ref().map(|fs| fs.partition_index()))
            .field("source_path", &self.source_path)
            .field("database", &self.database)
            .finish()
    }
}

/// The one resource handed to `run_extraction`
pub enum EvidenceResource<'a> {
    Filesystem {
        fs: &'a dyn EvidenceFs,
        /// Read-only connection for file_list discovery, when requested
        file_list: Option<&'a Connection>,
        evidence_id: i64,
    },
    Database {
        conn: &'a Connection,
        evidence_id: i64,
    },
    SourcePath(&'a Path),
}

impl<'a> EvidenceResource<'a> {
    pub fn kind(&self) -> ResourceKind {
        match self {
            EvidenceResource::Filesystem { .. } => ResourceKind::Filesystem,
            EvidenceResource::Database { .. } => ResourceKind::Database,
            EvidenceResource::SourcePath(_) => ResourceKind::SourcePath,
        }
    }

    pub fn filesystem(&self) -> Option<&'a dyn EvidenceFs> {
        match self {
            EvidenceResource::Filesystem { fs, .. } => Some(*fs),
            _ => None,
        }
    }

    pub fn source_path(&self) -> Option<&'a Path> {
        match self {
            EvidenceResource::SourcePath(path) => Some(*path),
            _ => None,
        }
    }
}

// ============================================================================
// Extractor contract
// ============================================================================

/// Artifact module driven by the registry and runner
pub trait Extractor: Send + Sync {
    /// Cheap, side-effect free
    fn metadata(&self) -> &ExtractorMetadata;

    /// Concrete type path, checked against the registry naming convention
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Extraction pre-flight; "not ready" is a value, never an error
    fn can_run_extraction(&self, evidence: &EvidenceContext) -> Preflight;

    /// Ingestion pre-flight: a manifest exists and its status is usable
    fn can_run_ingestion(&self, output_dir: &Path) -> Preflight {
        if !self.metadata().can_ingest {
            return Preflight::not_ready(format!("{} does not support ingestion", self.metadata().name));
        }
        if !Manifest::exists_in(output_dir) {
            return Preflight::not_ready(format!("No manifest found in {}", output_dir.display()));
        }
        match Manifest::load(output_dir) {
            Ok(manifest) if manifest.status.is_ingestible() => Preflight::ready(),
            Ok(manifest) => Preflight::not_ready(format!(
                "Manifest status '{}' cannot be ingested",
                manifest.status
            )),
            Err(e) => Preflight::not_ready(format!("Manifest unreadable: {}", e)),
        }
    }

    /// `{case_root}/evidences/{label}/{name}`; `extractor_name` in the
    /// config overrides the last component
    fn get_output_dir(&self, case_root: &Path, evidence_label: &str, config: Option<&RunConfig>) -> PathBuf {
        let name = config
            .and_then(|c| c.get_str(keys::EXTRACTOR_NAME))
            .filter(|n| !n.trim().is_empty())
            .map(crate::common::sanitize_filename)
            .unwrap_or_else(|| self.metadata().name.to_string());
        case_root
            .join("evidences")
            .join(crate::common::sanitize_filename(evidence_label))
            .join(name)
    }

    /// Copy artifacts into `output_dir` and write the manifest
    ///
    /// Returns `false` on cancellation or when nothing usable was produced.
    fn run_extraction(
        &self,
        resource: EvidenceResource<'_>,
        output_dir: &Path,
        config: &RunConfig,
        callbacks: &dyn ExtractorCallbacks,
    ) -> ExtractorResult<bool> {
        let _ = (resource, output_dir, config);
        callbacks.on_error(
            "Extraction not supported",
            &format!("{} is ingestion-only", self.metadata().name),
        );
        Ok(false)
    }

    /// Load the manifest's files into the evidence database
    fn run_ingestion(
        &self,
        output_dir: &Path,
        conn: &mut Connection,
        evidence_id: i64,
        config: &RunConfig,
        callbacks: &dyn ExtractorCallbacks,
    ) -> ExtractorResult<IngestCounts> {
        let _ = (output_dir, conn, evidence_id, config);
        callbacks.on_error(
            "Ingestion not supported",
            &format!("{} is extraction-only", self.metadata().name),
        );
        Ok(IngestCounts::new())
    }
}

/// Extraction pre-flight shared by the built-ins: capability, resource, tools
pub fn standard_extraction_preflight(
    extractor: &dyn Extractor,
    evidence: &EvidenceContext,
    tool_overrides: &BTreeMap<String, PathBuf>,
) -> Preflight {
    let meta = extractor.metadata();
    if !meta.can_extract {
        return Preflight::not_ready(format!("{} does not support extraction", meta.name));
    }
    if !evidence.provides(meta.resource) {
        return Preflight::not_ready(match meta.resource {
            ResourceKind::Filesystem => "Evidence is not mounted".to_string(),
            ResourceKind::Database => "No evidence database available".to_string(),
            ResourceKind::SourcePath => "No evidence source path available".to_string(),
        });
    }
    let missing = tools::missing_tools(meta.requires_tools, tool_overrides);
    if !missing.is_empty() {
        return Preflight::not_ready(format!("Required tool not found: {}", missing.join(", ")));
    }
    Preflight::ready()
}
