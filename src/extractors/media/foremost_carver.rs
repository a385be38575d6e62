//! Image carving with foremost
//!
//! foremost scans the raw image for file signatures and writes hits into
//! `{output}/carved/<type>/`. The run is supervised by the carving monitor;
//! byproducts of types we never ingest are pruned afterwards and the
//! surviving images are hashed in parallel for the manifest.

use rayon::prelude::*;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::IMAGE_EXTENSIONS;
use crate::common::audit;
use crate::common::hash::digest_file;
use crate::common::path_security::relative_to;
use crate::config::{keys, CarvingSettings, RunConfig, Settings};
use crate::database::delete_run_rows;
use crate::error::{ExtractorError, ExtractorResult};
use crate::extractors::carving::{CarveOutcome, CarvingLimits, CarvingMonitor, PrunePolicy};
use crate::extractors::manifest::{generate_run_id, CopyStatus};
use crate::extractors::tools::find_tool;
use crate::extractors::{
    standard_extraction_preflight, Category, EvidenceContext, EvidenceResource, Extractor,
    ExtractorCallbacks, ExtractorMetadata, IngestCounts, LogLevel, Manifest, ManifestFile,
    ManifestStatus, Preflight, ResourceKind,
};

const TOOL: &str = "foremost";
const TABLE: &str = "carved_files";
const CARVED_DIR: &str = "carved";

/// Run config key: foremost `-t` types
pub const FILE_TYPES: &str = "file_types";
const DEFAULT_FILE_TYPES: &[&str] = &["jpg", "gif", "png", "bmp"];

/// foremost output folders for types that are never ingested
const NON_IMAGE_DIRS: &[&str] = &["htm", "ole", "zip", "rar", "exe", "pdf", "doc", "wav", "avi", "mov", "mp4", "wmv", "rif"];
const NON_IMAGE_EXTENSIONS: &[&str] = &[".htm", ".ole", ".zip", ".rar", ".exe", ".pdf", ".doc", ".wav", ".avi", ".mov", ".mp4", ".wmv"];

static METADATA: ExtractorMetadata = ExtractorMetadata {
    name: "foremost_carver",
    display_name: "Image Carving (foremost)",
    description: "Carve deleted images from unallocated space using foremost",
    category: Category::Media,
    version: "1.0.0",
    requires_tools: &[TOOL],
    can_extract: true,
    can_ingest: true,
    resource: ResourceKind::SourcePath,
    uses_file_list: false,
};

pub struct MediaForemostCarverExtractor {
    carving: CarvingSettings,
    tool_paths: BTreeMap<String, PathBuf>,
}

pub fn create() -> ExtractorResult<Box<dyn Extractor>> {
    let settings = Settings::load_default().unwrap_or_else(|e| {
        warn!("Unreadable settings, carving with defaults: {}", e);
        Settings::default()
    });
    Ok(Box::new(MediaForemostCarverExtractor::with_settings(&settings)))
}

impl MediaForemostCarverExtractor {
    pub fn with_settings(settings: &Settings) -> Self {
        Self {
            carving: settings.carving.clone(),
            tool_paths: settings.tool_paths.clone(),
        }
    }

    /// Settings overrides, then the run's own `tool_paths`
    fn tool_overrides(&self, config: &RunConfig) -> BTreeMap<String, PathBuf> {
        let mut overrides = self.tool_paths.clone();
        overrides.extend(config.tool_paths());
        overrides
    }

    fn prune_policy() -> PrunePolicy {
        PrunePolicy {
            directories: NON_IMAGE_DIRS.iter().map(|s| s.to_string()).collect(),
            extensions: NON_IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            keep_extensions: IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn collect_images(dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = fs::read_dir(dir) else { return };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                Self::collect_images(&path, out);
            } else if let Some(ext) = path.extension() {
                let ext = format!(".{}", ext.to_string_lossy().to_lowercase());
                if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                    out.push(path);
                }
            }
        }
    }

    /// Hash carved images on the rayon pool, in stable path order
    fn describe_images(output_dir: &Path, carved_dir: &Path) -> Vec<ManifestFile> {
        let mut images = Vec::new();
        Self::collect_images(carved_dir, &mut images);
        images.sort();

        images
            .par_iter()
            .map(|path| {
                let relative = relative_to(output_dir, path).unwrap_or_else(|| path.to_string_lossy().to_string());
                let file_type = path
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                let entry = match digest_file(path) {
                    Ok(digests) => ManifestFile {
                        logical_path: relative.clone(),
                        extracted_path: relative,
                        size_bytes: digests.size_bytes,
                        md5: Some(digests.md5),
                        sha256: Some(digests.sha256),
                        copy_status: CopyStatus::Ok,
                        error_message: None,
                        partition_index: None,
                        inode: None,
                        extra: serde_json::Map::new(),
                    },
                    Err(e) => ManifestFile::failed(relative, None, e.to_string()),
                };
                entry.with_extra("file_type", file_type).with_extra("tool", TOOL)
            })
            .collect()
    }
}

fn reset_dir(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)
}

impl Extractor for MediaForemostCarverExtractor {
    fn metadata(&self) -> &ExtractorMetadata {
        &METADATA
    }

    fn can_run_extraction(&self, evidence: &EvidenceContext) -> Preflight {
        standard_extraction_preflight(self, evidence, &self.tool_paths)
    }

    #[instrument(skip_all, fields(extractor = METADATA.name))]
    fn run_extraction(
        &self,
        resource: EvidenceResource<'_>,
        output_dir: &Path,
        config: &RunConfig,
        callbacks: &dyn ExtractorCallbacks,
    ) -> ExtractorResult<bool> {
        let source = resource.source_path().ok_or_else(|| {
            ExtractorError::MissingResource("foremost_carver needs the evidence source path".to_string())
        })?;
        let run_id = config.run_id().map(str::to_string).unwrap_or_else(generate_run_id);
        let evidence_id = config.evidence_id().unwrap_or_default();
        let carved_dir = output_dir.join(CARVED_DIR);
        fs::create_dir_all(output_dir)?;

        let mut manifest = Manifest::new(METADATA.name, METADATA.version, &run_id, evidence_id);
        manifest.set_extra("tool", TOOL);

        let Some(tool_path) = find_tool(TOOL, &self.tool_overrides(config)) else {
            callbacks.on_error("Required tool not found", TOOL);
            manifest.status = ManifestStatus::Error;
            manifest.add_note("foremost not found");
            manifest.write(output_dir)?;
            return Ok(false);
        };
        manifest.set_extra("tool_path", tool_path.to_string_lossy().to_string());

        let mut types = config.get_str_list(FILE_TYPES);
        if types.is_empty() {
            types = DEFAULT_FILE_TYPES.iter().map(|s| s.to_string()).collect();
        }

        let limits = CarvingLimits::from_config(config, &self.carving);
        let monitor = CarvingMonitor::from_settings(limits, &self.carving).with_poll_interval(
            Duration::from_millis(config.get_u64(keys::POLL_INTERVAL_MS, self.carving.poll_interval_ms)),
        );
        manifest.set_extra("limits", json!(limits));

        let mut command = Command::new(&tool_path);
        command
            .arg("-Q")
            .arg("-t")
            .arg(types.join(","))
            .arg("-i")
            .arg(source)
            .arg("-o")
            .arg(&carved_dir);

        // foremost refuses a non-empty output directory, and stale hits
        // would end up in this run's manifest
        if let Err(e) = reset_dir(&carved_dir) {
            callbacks.on_error("Failed to clear previous carving output", &e.to_string());
            manifest.status = ManifestStatus::Error;
            manifest.add_note(format!("Could not clear {}: {}", carved_dir.display(), e));
            manifest.write(output_dir)?;
            return Ok(false);
        }

        callbacks.on_step("Carving images");
        let outcome = monitor.run(TOOL, command, &carved_dir, callbacks);

        let mut succeeded = true;
        match &outcome {
            CarveOutcome::Completed { usage, exit_code, .. } => {
                manifest.set_extra("output_usage", json!(usage));
                manifest.set_extra("exit_code", json!(exit_code));
                if !outcome.is_clean_exit() {
                    let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                    callbacks.on_log(
                        &format!("foremost exited with {}, keeping carved output", code),
                        LogLevel::Warning,
                    );
                    manifest.add_note(format!("foremost exited with {}", code));
                }
            }
            CarveOutcome::Limited { reason, usage, spawned } => {
                manifest.set_extra("output_usage", json!(usage));
                manifest.set_extra("tool_started", json!(spawned));
                manifest.add_note(format!("Carving limited: {}", reason));
            }
            CarveOutcome::Cancelled => {
                manifest.add_note("Carving cancelled");
                succeeded = false;
            }
            CarveOutcome::Failed { reason } => {
                callbacks.on_error("foremost failed", reason);
                manifest.add_note(reason.clone());
                succeeded = false;
            }
        }

        if succeeded && config.get_bool(keys::PRUNE_NON_INGESTED, self.carving.prune_non_ingested) {
            callbacks.on_step("Pruning non-image output");
            let stats = Self::prune_policy().prune(&carved_dir, callbacks);
            manifest.set_extra("pruned", json!(stats));
        }

        if succeeded {
            callbacks.on_step("Hashing carved images");
            for entry in Self::describe_images(output_dir, &carved_dir) {
                manifest.add_file(entry);
            }
            callbacks.on_log(&format!("{} images carved", manifest.ok_count()), LogLevel::Info);
        }

        manifest.status = match &outcome {
            CarveOutcome::Completed { .. } if outcome.is_clean_exit() => manifest.derive_status(),
            // Non-zero exit: whatever was carved is a partial result
            CarveOutcome::Completed { .. } => match manifest.derive_status() {
                ManifestStatus::Ok => ManifestStatus::Partial,
                ManifestStatus::Skipped => ManifestStatus::Error,
                other => other,
            },
            CarveOutcome::Limited { .. } => ManifestStatus::Limited,
            CarveOutcome::Cancelled => ManifestStatus::Cancelled,
            CarveOutcome::Failed { .. } => ManifestStatus::Error,
        };
        manifest.write(output_dir)?;

        info!(run_id = %run_id, status = %manifest.status, images = manifest.ok_count(), "Carving finished");
        Ok(manifest.status.extraction_succeeded())
    }

    #[instrument(skip_all, fields(extractor = METADATA.name))]
    fn run_ingestion(
        &self,
        output_dir: &Path,
        conn: &mut Connection,
        evidence_id: i64,
        _config: &RunConfig,
        callbacks: &dyn ExtractorCallbacks,
    ) -> ExtractorResult<IngestCounts> {
        let manifest = Manifest::load(output_dir)?;

        let tx = conn.transaction()?;
        let deleted = delete_run_rows(&tx, TABLE, evidence_id, &manifest.run_id)?;
        if deleted > 0 {
            audit::log_rows_replaced(TABLE, evidence_id, &manifest.run_id, deleted);
        }

        let mut inserted = 0u64;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO carved_files (evidence_id, run_id, tool, relative_path, file_type, size_bytes, md5, sha256)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for file in manifest.ok_files() {
                if let Err(e) = manifest.resolve_file(output_dir, file) {
                    callbacks.on_error("Refusing manifest entry", &e.to_string());
                    continue;
                }
                insert.execute(params![
                    evidence_id,
                    manifest.run_id,
                    file.extra_str("tool").unwrap_or(TOOL),
                    file.extracted_path,
                    file.extra_str("file_type"),
                    file.size_bytes as i64,
                    file.md5,
                    file.sha256,
                ])?;
                inserted += 1;
            }
        }
        tx.commit()?;

        info!(run_id = %manifest.run_id, images = inserted, "Carved images ingested");
        Ok(IngestCounts::from([("carved_images".to_string(), inserted)]))
    }
}
