//! File index builder
//!
//! Walks the evidence filesystem (every partition unless told otherwise) and
//! writes one JSON object per file to `file_list.jsonl`. Ingestion loads the
//! index into the `file_list` table, which every discovery-aware extractor
//! queries before falling back to globbing.

use rusqlite::Connection;
use serde_json::json;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, instrument, warn};

use crate::common::audit;
use crate::common::hash::digest_file;
use crate::config::{keys, RunConfig};
use crate::database::{delete_run_rows, insert_file_list_rows, FileListRow};
use crate::error::{ExtractorError, ExtractorResult};
use crate::evidence::open_partition_for_extraction;
use crate::extractors::manifest::{generate_run_id, CopyStatus};
use crate::extractors::{
    standard_extraction_preflight, Category, EvidenceContext, EvidenceResource, Extractor,
    ExtractorCallbacks, ExtractorMetadata, IngestCounts, LogLevel, Manifest, ManifestFile,
    ManifestStatus, Preflight, ResourceKind,
};

pub const INDEX_FILE: &str = "file_list.jsonl";

/// Replace rows of earlier runs on ingestion (default true)
pub const REPLACE_EXISTING: &str = "replace_existing";

const TABLE: &str = "file_list";
const INSERT_BATCH: usize = 5_000;
const CANCEL_CHECK_EVERY: usize = 1_000;

static METADATA: ExtractorMetadata = ExtractorMetadata {
    name: "file_list",
    display_name: "File List",
    description: "Index of every file in the evidence, used to speed up artifact discovery",
    category: Category::System,
    version: "1.0.0",
    requires_tools: &[],
    can_extract: true,
    can_ingest: true,
    resource: ResourceKind::Filesystem,
    uses_file_list: false,
};

pub struct SystemFileListExtractor;

pub fn create() -> ExtractorResult<Box<dyn Extractor>> {
    Ok(Box::new(SystemFileListExtractor))
}

impl Extractor for SystemFileListExtractor {
    fn metadata(&self) -> &ExtractorMetadata {
        &METADATA
    }

    fn can_run_extraction(&self, evidence: &EvidenceContext) -> Preflight {
        standard_extraction_preflight(self, evidence, &Default::default())
    }

    #[instrument(skip_all, fields(extractor = METADATA.name))]
    fn run_extraction(
        &self,
        resource: EvidenceResource<'_>,
        output_dir: &Path,
        config: &RunConfig,
        callbacks: &dyn ExtractorCallbacks,
    ) -> ExtractorResult<bool> {
        let EvidenceResource::Filesystem { fs: evidence_fs, evidence_id, .. } = resource else {
            return Err(ExtractorError::MissingResource(
                "file_list needs the evidence filesystem".to_string(),
            ));
        };
        let run_id = config.run_id().map(str::to_string).unwrap_or_else(generate_run_id);
        fs::create_dir_all(output_dir)?;

        let partitions = if config.get_bool(keys::SCAN_ALL_PARTITIONS, true) {
            evidence_fs.partitions()
        } else {
            vec![evidence_fs.partition_index().unwrap_or(0)]
        };

        let mut manifest = Manifest::new(METADATA.name, METADATA.version, &run_id, evidence_id);
        let index_path = output_dir.join(INDEX_FILE);
        let mut writer = BufWriter::new(File::create(&index_path)?);
        let mut per_partition = serde_json::Map::new();
        let mut total = 0u64;
        let mut cancelled = false;

        'partitions: for (step, &partition) in partitions.iter().enumerate() {
            callbacks.on_step(&format!("Indexing partition {}", partition));
            let handle = match open_partition_for_extraction(evidence_fs, Some(partition)) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(partition, "Cannot open partition: {}", e);
                    manifest.add_note(format!("Partition {} could not be opened: {}", partition, e));
                    continue;
                }
            };

            let paths = handle.iter_paths("**")?;
            for (i, path) in paths.iter().enumerate() {
                if i % CANCEL_CHECK_EVERY == 0 && callbacks.is_cancelled() {
                    cancelled = true;
                    break 'partitions;
                }
                let row = FileListRow::from_path(path, partition, handle.file_size(path).ok());
                serde_json::to_writer(&mut writer, &row)?;
                writer.write_all(b"\n")?;
            }

            total += paths.len() as u64;
            per_partition.insert(partition.to_string(), json!(paths.len()));
            callbacks.on_progress(step as u64 + 1, partitions.len() as u64, "Indexing partitions");
        }
        writer.flush()?;
        drop(writer);

        let digests = digest_file(&index_path)?;
        // Generated, not copied: the logical path is the evidence root
        let entry = ManifestFile {
            logical_path: "/".to_string(),
            extracted_path: INDEX_FILE.to_string(),
            size_bytes: digests.size_bytes,
            md5: Some(digests.md5),
            sha256: Some(digests.sha256),
            copy_status: CopyStatus::Ok,
            error_message: None,
            partition_index: None,
            inode: None,
            extra: serde_json::Map::new(),
        };
        manifest.add_file(entry.with_extra("artifact_type", "file_index"));

        manifest.set_extra("partitions_scanned", json!(partitions));
        manifest.set_extra("files_by_partition", serde_json::Value::Object(per_partition));
        manifest.set_extra("total_files", json!(total));
        manifest.status = if cancelled {
            manifest.add_note("Cancelled before every partition was indexed");
            ManifestStatus::Cancelled
        } else if total == 0 {
            ManifestStatus::Skipped
        } else {
            ManifestStatus::Ok
        };
        manifest.write(output_dir)?;

        info!(run_id = %run_id, files = total, "File index written");
        Ok(!cancelled)
    }

    #[instrument(skip_all, fields(extractor = METADATA.name))]
    fn run_ingestion(
        &self,
        output_dir: &Path,
        conn: &mut Connection,
        evidence_id: i64,
        config: &RunConfig,
        callbacks: &dyn ExtractorCallbacks,
    ) -> ExtractorResult<IngestCounts> {
        let manifest = Manifest::load(output_dir)?;
        let index = manifest
            .ok_files()
            .find(|f| f.extra_str("artifact_type") == Some("file_index"))
            .ok_or_else(|| ExtractorError::MissingResource(format!("no {} in manifest", INDEX_FILE)))?;
        let index_path = manifest.resolve_file(output_dir, index)?;
        let run_id = manifest.run_id.as_str();

        let tx = conn.transaction()?;
        let mut deleted = delete_run_rows(&tx, TABLE, evidence_id, run_id)?;
        if config.get_bool(REPLACE_EXISTING, true) {
            deleted += tx.execute(
                "DELETE FROM file_list WHERE evidence_id = ?1 AND (run_id IS NULL OR run_id != ?2)",
                rusqlite::params![evidence_id, run_id],
            )?;
        }
        if deleted > 0 {
            audit::log_rows_replaced(TABLE, evidence_id, run_id, deleted);
        }

        let reader = BufReader::new(File::open(&index_path)?);
        let mut batch: Vec<FileListRow> = Vec::with_capacity(INSERT_BATCH);
        let mut inserted = 0u64;
        let mut skipped = 0u64;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FileListRow>(&line) {
                Ok(row) => batch.push(row),
                Err(e) => {
                    skipped += 1;
                    callbacks.on_log(&format!("Skipping index line {}: {}", line_no + 1, e), LogLevel::Warning);
                }
            }

            if batch.len() >= INSERT_BATCH {
                if callbacks.is_cancelled() {
                    callbacks.on_log("Ingestion cancelled, rolling back", LogLevel::Warning);
                    return Ok(IngestCounts::new());
                }
                inserted += insert_file_list_rows(&tx, evidence_id, Some(run_id), &batch)? as u64;
                batch.clear();
                callbacks.on_progress(inserted, 0, "Loading file index");
            }
        }
        inserted += insert_file_list_rows(&tx, evidence_id, Some(run_id), &batch)? as u64;
        tx.commit()?;

        info!(run_id, files = inserted, skipped, "File index ingested");
        let mut counts = IngestCounts::from([("files".to_string(), inserted)]);
        if skipped > 0 {
            counts.insert("skipped_lines".to_string(), skipped);
        }
        Ok(counts)
    }
}
