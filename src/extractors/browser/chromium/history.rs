//! Chromium History databases
//!
//! Extraction finds every `History` database across partitions (file_list
//! first, filesystem glob as fallback), attributes it to a browser profile
//! and stages it together with its SQLite sidecars. Ingestion reads the
//! `urls` table of each staged copy into `browser_history`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use super::classify_profile_path;
use crate::common::audit;
use crate::config::{keys, RunConfig};
use crate::database::delete_run_rows;
use crate::error::{ExtractorError, ExtractorResult};
use crate::evidence::open_partition_for_extraction;
use crate::extractors::discovery::{discover_with_fallback, DiscoveryQuery, FileListMatch};
use crate::extractors::manifest::generate_run_id;
use crate::extractors::staging::{stage_sqlite_with_companions, staged_file_name};
use crate::extractors::{
    standard_extraction_preflight, Category, EvidenceContext, EvidenceResource, Extractor,
    ExtractorCallbacks, ExtractorMetadata, IngestCounts, LogLevel, Manifest, ManifestFile,
    ManifestStatus, Preflight, ResourceKind,
};

const ARTIFACT_FILE: &str = "History";
const TABLE: &str = "browser_history";

/// Microseconds between 1601-01-01 and 1970-01-01
const WEBKIT_EPOCH_OFFSET_US: i64 = 11_644_473_600_000_000;

static METADATA: ExtractorMetadata = ExtractorMetadata {
    name: "chromium_history",
    display_name: "Chromium History",
    description: "Browsing history from Chrome, Edge, Brave, Opera and other Chromium browsers",
    category: Category::Browser,
    version: "1.0.0",
    requires_tools: &[],
    can_extract: true,
    can_ingest: true,
    resource: ResourceKind::Filesystem,
    uses_file_list: true,
};

pub struct ChromiumHistoryExtractor;

pub fn create() -> ExtractorResult<Box<dyn Extractor>> {
    Ok(Box::new(ChromiumHistoryExtractor))
}

/// Chromium timestamp (microseconds since 1601) to RFC 3339, `None` when unset
pub fn webkit_to_rfc3339(value: i64) -> Option<String> {
    if value <= 0 {
        return None;
    }
    let unix_us = value - WEBKIT_EPOCH_OFFSET_US;
    let secs = unix_us.div_euclid(1_000_000);
    let nanos = (unix_us.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos).map(|dt| dt.to_rfc3339())
}

/// A History database attributed to a profile
struct Candidate {
    found: FileListMatch,
    browser: &'static str,
    profile: String,
}

impl ChromiumHistoryExtractor {
    fn candidates<'m>(matches: impl Iterator<Item = &'m FileListMatch>) -> Vec<Candidate> {
        matches
            .filter_map(|m| {
                let location = classify_profile_path(&m.file_path, ARTIFACT_FILE);
                if location.is_none() {
                    debug!(path = %m.file_path, "History file outside any known profile root");
                }
                location.map(|loc| Candidate {
                    found: m.clone(),
                    browser: loc.browser,
                    profile: loc.profile,
                })
            })
            .collect()
    }

    fn ingest_database(
        tx: &Connection,
        staged: &Path,
        file: &ManifestFile,
        evidence_id: i64,
        run_id: &str,
    ) -> ExtractorResult<u64> {
        let source = Connection::open_with_flags(
            staged,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let mut select = source.prepare(
            "SELECT url, title, visit_count, typed_count, last_visit_time FROM urls ORDER BY id",
        )?;
        let mut insert = tx.prepare_cached(
            "INSERT INTO browser_history
                (evidence_id, run_id, browser, profile, url, title, visit_count, typed_count,
                 last_visit_time_utc, source_path, partition_index, discovered_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;

        let browser = file.extra_str("browser").unwrap_or("chromium");
        let profile = file.extra_str("profile");
        let discovered_by = file.extra_str("discovered_by").unwrap_or(METADATA.name);

        let mut rows = select.query([])?;
        let mut inserted = 0u64;
        while let Some(row) = rows.next()? {
            let url: String = row.get(0)?;
            let title: Option<String> = row.get(1)?;
            let visit_count: Option<i64> = row.get(2)?;
            let typed_count: Option<i64> = row.get(3)?;
            let last_visit: Option<i64> = row.get(4)?;

            insert.execute(params![
                evidence_id,
                run_id,
                browser,
                profile,
                url,
                title,
                visit_count,
                typed_count,
                last_visit.and_then(webkit_to_rfc3339),
                file.logical_path,
                file.partition_index,
                discovered_by,
            ])?;
            inserted += 1;
        }
        Ok(inserted)
    }
}

impl Extractor for ChromiumHistoryExtractor {
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
        let EvidenceResource::Filesystem { fs: evidence_fs, file_list, evidence_id } = resource else {
            return Err(ExtractorError::MissingResource(
                "chromium_history needs the evidence filesystem".to_string(),
            ));
        };
        let run_id = config.run_id().map(str::to_string).unwrap_or_else(generate_run_id);
        fs::create_dir_all(output_dir)?;

        callbacks.on_step("Discovering History databases");
        let scan_all = config.get_bool(keys::SCAN_ALL_PARTITIONS, true);
        let query = DiscoveryQuery::new().filename_patterns([ARTIFACT_FILE]);
        let discovery = discover_with_fallback(file_list, evidence_fs, evidence_id, &query, scan_all)?;
        callbacks.on_log(&format!("Discovery: {}", discovery.partition_summary()), LogLevel::Info);

        let candidates = Self::candidates(discovery.all_matches());
        let partitions_scanned: Vec<u32> = if scan_all {
            evidence_fs.partitions()
        } else {
            vec![evidence_fs.partition_index().unwrap_or(0)]
        };
        let partitions_with_artifacts: BTreeSet<u32> =
            candidates.iter().map(|c| c.found.partition_index).collect();

        let mut manifest = Manifest::new(METADATA.name, METADATA.version, &run_id, evidence_id);
        manifest.set_extra("partitions_scanned", json!(partitions_scanned));
        manifest.set_extra("partitions_with_artifacts", json!(partitions_with_artifacts));
        manifest.set_extra("discovery_source", json!(discovery.source));

        let mut by_partition: BTreeMap<u32, Vec<&Candidate>> = BTreeMap::new();
        for candidate in &candidates {
            by_partition.entry(candidate.found.partition_index).or_default().push(candidate);
        }

        let total = candidates.len() as u64;
        let mut done = 0u64;
        let mut cancelled = false;

        callbacks.on_step("Copying History databases");
        'partitions: for (partition, batch) in by_partition {
            let handle = match open_partition_for_extraction(evidence_fs, Some(partition)) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(partition, "Cannot open partition: {}", e);
                    manifest.add_note(format!("Partition {} could not be opened: {}", partition, e));
                    for candidate in batch {
                        manifest.add_file(ManifestFile::failed(
                            candidate.found.file_path.clone(),
                            Some(partition),
                            e.to_string(),
                        ));
                    }
                    continue;
                }
            };

            for candidate in batch {
                if callbacks.is_cancelled() {
                    cancelled = true;
                    break 'partitions;
                }

                let prefix = format!("{}_{}", candidate.browser, candidate.profile);
                let dest_name = staged_file_name(&prefix, partition, &candidate.found.file_path);
                let dest_dir = output_dir.join(candidate.browser);

                let entries = stage_sqlite_with_companions(
                    &*handle,
                    METADATA.name,
                    &candidate.found.file_path,
                    partition,
                    output_dir,
                    &dest_dir,
                    &dest_name,
                );
                for entry in entries {
                    let mut entry = entry
                        .with_extra("browser", candidate.browser)
                        .with_extra("profile", candidate.profile.as_str())
                        .with_extra("artifact_type", "history")
                        .with_extra("discovered_by", json!(discovery.source));
                    entry.inode = candidate.found.inode;
                    if !entry.is_ok() {
                        callbacks.on_error(
                            "Failed to copy History database",
                            entry.error_message.as_deref().unwrap_or_default(),
                        );
                    }
                    manifest.add_file(entry);
                }

                done += 1;
                callbacks.on_progress(done, total, "Copying History databases");
            }
        }

        manifest.status = if cancelled {
            manifest.add_note(format!("Cancelled after {} of {} databases", done, total));
            ManifestStatus::Cancelled
        } else {
            manifest.derive_status()
        };
        manifest.write(output_dir)?;

        info!(
            run_id = %run_id,
            databases = done,
            status = %manifest.status,
            "Chromium history extraction finished"
        );
        Ok(!cancelled && manifest.status.extraction_succeeded())
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
        let databases: Vec<&ManifestFile> = manifest
            .ok_files()
            .filter(|f| f.extra_str("companion_of").is_none())
            .collect();

        let mut tx = conn.transaction()?;
        let deleted = delete_run_rows(&tx, TABLE, evidence_id, &manifest.run_id)?;
        if deleted > 0 {
            audit::log_rows_replaced(TABLE, evidence_id, &manifest.run_id, deleted);
        }

        let mut urls = 0u64;
        for (index, file) in databases.iter().enumerate() {
            if callbacks.is_cancelled() {
                callbacks.on_log("Ingestion cancelled, rolling back", LogLevel::Warning);
                return Ok(IngestCounts::new());
            }

            let staged = match manifest.resolve_file(output_dir, file) {
                Ok(path) => path,
                Err(e) => {
                    callbacks.on_error("Refusing manifest entry", &e.to_string());
                    continue;
                }
            };
            // A database that fails partway leaves none of its rows behind
            let savepoint = tx.savepoint()?;
            match Self::ingest_database(&savepoint, &staged, file, evidence_id, &manifest.run_id) {
                Ok(count) => {
                    savepoint.commit()?;
                    urls += count;
                }
                Err(e) => {
                    drop(savepoint);
                    callbacks.on_error(&format!("Failed to read {}", file.logical_path), &e.to_string());
                }
            }
            callbacks.on_progress(index as u64 + 1, databases.len() as u64, "Ingesting History databases");
        }
        tx.commit()?;

        info!(run_id = %manifest.run_id, urls, "Chromium history ingested");
        Ok(IngestCounts::from([("urls".to_string(), urls)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{count_run_rows, EvidenceDatabase};
    use crate::evidence::MountedEvidence;
    use crate::extractors::TracingCallbacks;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    const CHROME_ROOT: &str = "Users/bob/AppData/Local/Google/Chrome/User Data";

    fn write_history(path: &Path, urls: &[(&str, i64)]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE urls (id INTEGER PRIMARY KEY, url TEXT NOT NULL, title TEXT,
                visit_count INTEGER, typed_count INTEGER, last_visit_time INTEGER);",
        )
        .unwrap();
        for (url, time) in urls {
            conn.execute(
                "INSERT INTO urls (url, title, visit_count, typed_count, last_visit_time) VALUES (?1, 'T', 3, 1, ?2)",
                params![url, time],
            )
            .unwrap();
        }
    }

    /// Cancels once `limit` progress events have been seen
    struct CancelAfter {
        seen: AtomicU64,
        limit: u64,
    }

    impl ExtractorCallbacks for CancelAfter {
        fn on_progress(&self, _current: u64, _total: u64, _message: &str) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
        fn on_log(&self, _message: &str, _level: LogLevel) {}
        fn on_error(&self, _message: &str, _detail: &str) {}
        fn on_step(&self, _name: &str) {}
        fn is_cancelled(&self) -> bool {
            self.seen.load(Ordering::SeqCst) >= self.limit
        }
    }

    fn extract(
        evidence: &MountedEvidence,
        out: &Path,
        config: &RunConfig,
        callbacks: &dyn ExtractorCallbacks,
    ) -> bool {
        let resource = EvidenceResource::Filesystem { fs: evidence, file_list: None, evidence_id: 7 };
        ChromiumHistoryExtractor
            .run_extraction(resource, out, config, callbacks)
            .unwrap()
    }

    #[test]
    fn test_webkit_time() {
        assert_eq!(webkit_to_rfc3339(0), None);
        assert_eq!(
            webkit_to_rfc3339(WEBKIT_EPOCH_OFFSET_US).as_deref(),
            Some("1970-01-01T00:00:00+00:00")
        );
        assert_eq!(
            webkit_to_rfc3339(13_300_000_000_000_000).as_deref(),
            Some("2022-06-18T04:26:40+00:00")
        );
    }

    #[test]
    fn test_cancel_midway_keeps_completed_files() {
        let evidence_dir = TempDir::new().unwrap();
        for profile in ["Default", "Profile 1", "Profile 2", "Profile 3", "Profile 4"] {
            write_history(&evidence_dir.path().join(CHROME_ROOT).join(profile).join("History"), &[]);
        }
        let evidence = MountedEvidence::open(evidence_dir.path()).unwrap();
        let out = TempDir::new().unwrap();

        let callbacks = CancelAfter { seen: AtomicU64::new(0), limit: 2 };
        let config = RunConfig::new().with(keys::RUN_ID, "run-cancel");
        assert!(!extract(&evidence, out.path(), &config, &callbacks));

        let manifest = Manifest::load(out.path()).unwrap();
        assert_eq!(manifest.status, ManifestStatus::Cancelled);
        assert_eq!(manifest.run_id, "run-cancel");
        assert_eq!(manifest.ok_count(), 2);
        assert_eq!(manifest.error_count(), 0);
        for file in manifest.ok_files() {
            assert!(manifest.resolve_file(out.path(), file).unwrap().is_file());
        }
        assert!(ChromiumHistoryExtractor.can_run_ingestion(out.path()).ready);
    }

    #[test]
    fn test_two_partitions_staged_apart() {
        let evidence_dir = TempDir::new().unwrap();
        let root = evidence_dir.path();
        write_history(
            &root.join("partition_1").join(CHROME_ROOT).join("Default/History"),
            &[("https://a.example/", 13_300_000_000_000_000)],
        );
        write_history(
            &root.join("partition_2").join(CHROME_ROOT).join("Default/History"),
            &[("https://b.example/", 13_300_000_000_000_000)],
        );
        fs::write(root.join("partition_2/Users/bob/History"), b"not a profile").unwrap();

        let evidence = MountedEvidence::open(root).unwrap();
        let out = TempDir::new().unwrap();
        assert!(extract(&evidence, out.path(), &RunConfig::new(), &TracingCallbacks::new("test")));

        let manifest = Manifest::load(out.path()).unwrap();
        assert_eq!(manifest.status, ManifestStatus::Ok);
        let partitions: Vec<Option<u32>> = manifest.files.iter().map(|f| f.partition_index).collect();
        assert_eq!(partitions, vec![Some(1), Some(2)]);
        assert_ne!(manifest.files[0].extracted_path, manifest.files[1].extracted_path);
        assert!(manifest.files[0].extracted_path.starts_with("chrome/chrome_Default_p1_"));
        assert_eq!(manifest.extra["partitions_with_artifacts"], json!([1, 2]));
        assert_eq!(manifest.extra["partitions_scanned"], json!([1, 2]));
    }

    #[test]
    fn test_reingestion_replaces_rows() {
        let evidence_dir = TempDir::new().unwrap();
        write_history(
            &evidence_dir.path().join(CHROME_ROOT).join("Default/History"),
            &[("https://a.example/", 13_300_000_000_000_000), ("https://b.example/", 0)],
        );
        fs::write(
            evidence_dir.path().join(CHROME_ROOT).join("Default/History-journal"),
            b"",
        )
        .unwrap();

        let evidence = MountedEvidence::open(evidence_dir.path()).unwrap();
        let out = TempDir::new().unwrap();
        let config = RunConfig::new().with(keys::RUN_ID, "run-1");
        assert!(extract(&evidence, out.path(), &config, &TracingCallbacks::new("test")));

        let manifest = Manifest::load(out.path()).unwrap();
        assert_eq!(manifest.ok_count(), 2);
        assert_eq!(manifest.files[1].extra_str("companion_suffix"), Some("-journal"));

        let db_dir = TempDir::new().unwrap();
        let db = EvidenceDatabase::new(db_dir.path().join("evidence.sqlite")).unwrap();
        let mut conn = db.connect().unwrap();

        let callbacks = TracingCallbacks::new("test");
        for _ in 0..2 {
            let counts = ChromiumHistoryExtractor
                .run_ingestion(out.path(), &mut conn, 7, &config, &callbacks)
                .unwrap();
            assert_eq!(counts["urls"], 2);
        }
        assert_eq!(count_run_rows(&conn, TABLE, 7, "run-1").unwrap(), 2);

        let (profile, visited): (String, Option<String>) = conn
            .query_row(
                "SELECT profile, last_visit_time_utc FROM browser_history WHERE url = 'https://a.example/'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(profile, "Default");
        assert_eq!(visited.as_deref(), Some("2022-06-18T04:26:40+00:00"));
    }

    #[test]
    fn test_unreadable_database_leaves_no_rows() {
        let evidence_dir = TempDir::new().unwrap();
        let profiles = evidence_dir.path().join(CHROME_ROOT);
        write_history(
            &profiles.join("Default/History"),
            &[("https://a.example/", 0), ("https://b.example/", 0)],
        );

        // Second row has a NULL url, so reading it fails after row one went in
        let broken = profiles.join("Profile 1/History");
        fs::create_dir_all(broken.parent().unwrap()).unwrap();
        let source = Connection::open(&broken).unwrap();
        source
            .execute_batch(
                "CREATE TABLE urls (id INTEGER PRIMARY KEY, url TEXT, title TEXT,
                    visit_count INTEGER, typed_count INTEGER, last_visit_time INTEGER);
                 INSERT INTO urls (url) VALUES ('https://c.example/');
                 INSERT INTO urls (url) VALUES (NULL);",
            )
            .unwrap();
        drop(source);

        let evidence = MountedEvidence::open(evidence_dir.path()).unwrap();
        let out = TempDir::new().unwrap();
        let config = RunConfig::new().with(keys::RUN_ID, "run-broken");
        assert!(extract(&evidence, out.path(), &config, &TracingCallbacks::new("test")));
        assert_eq!(Manifest::load(out.path()).unwrap().ok_count(), 2);

        let db_dir = TempDir::new().unwrap();
        let db = EvidenceDatabase::new(db_dir.path().join("evidence.sqlite")).unwrap();
        let mut conn = db.connect().unwrap();
        let counts = ChromiumHistoryExtractor
            .run_ingestion(out.path(), &mut conn, 7, &config, &TracingCallbacks::new("test"))
            .unwrap();

        let rows = count_run_rows(&conn, TABLE, 7, "run-broken").unwrap();
        assert_eq!(counts["urls"], rows as u64);
        assert_eq!(rows, 2);
        let stray: i64 = conn
            .query_row("SELECT COUNT(*) FROM browser_history WHERE url = 'https://c.example/'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stray, 0);
    }
}
