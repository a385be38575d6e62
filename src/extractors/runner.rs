//! Dual-phase lifecycle runner
//!
//! Drives one extractor through extraction and (optionally) ingestion on a
//! dedicated OS thread. Each phase opens its own SQLite connection on the
//! thread that uses it and drops it before returning, whatever the outcome.
//!
//! Cancellation is cooperative: the runner only flips a shared flag that the
//! extractor polls. An extractor that ignores it runs to completion.

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{info, instrument, warn};

use super::callbacks::{CancellationToken, ExtractorCallbacks, GuardedCallbacks};
use super::manifest::{generate_run_id, Manifest, ManifestStatus};
use super::{EvidenceContext, EvidenceResource, Extractor, IngestCounts, ResourceKind};
use crate::common::audit;
use crate::config::{keys, RunConfig};
use crate::error::{ExtractorError, ExtractorResult};

// ============================================================================
// Outcome types
// ============================================================================

/// Coarse result of a phase or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Extraction,
    Ingestion,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Extraction => "extraction",
            Phase::Ingestion => "ingestion",
        }
    }
}

/// What happened in one phase
#[derive(Debug, Clone, Serialize)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub status: RunStatus,
    pub run_id: Option<String>,
    pub elapsed_secs: f64,
    /// Manifest status after extraction, or of the manifest ingested
    pub manifest_status: Option<ManifestStatus>,
    /// Rows per artifact type (ingestion only)
    pub counts: IngestCounts,
    pub error: Option<String>,
}

/// Both phases of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub extractor: String,
    pub evidence_id: i64,
    pub output_dir: PathBuf,
    pub status: RunStatus,
    pub run_id: Option<String>,
    pub extraction: Option<PhaseOutcome>,
    pub ingestion: Option<PhaseOutcome>,
}

/// Audit record written per phase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseRecord {
    pub evidence_id: i64,
    pub extractor: String,
    pub phase: String,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: String,
    pub elapsed_secs: f64,
    pub records: u64,
    pub errors: u64,
    pub message: Option<String>,
}

/// Persistent run audit trail, owned by the caller
pub trait RunAuditSink: Send + Sync {
    fn record_phase(&self, record: &PhaseRecord) -> Result<(), String>;
}

// ============================================================================
// Runner
// ============================================================================

/// One extractor run against one evidence item
pub struct ExtractorRunner {
    extractor: Arc<dyn Extractor>,
    evidence: EvidenceContext,
    output_dir: PathBuf,
    config: RunConfig,
    ingest_after: bool,
    token: CancellationToken,
    audit: Option<Arc<dyn RunAuditSink>>,
}

impl ExtractorRunner {
    pub fn new(extractor: Arc<dyn Extractor>, evidence: EvidenceContext, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            extractor,
            evidence,
            output_dir: output_dir.into(),
            config: RunConfig::new(),
            ingest_after: false,
            token: CancellationToken::new(),
            audit: None,
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Follow a successful extraction with ingestion
    pub fn ingest_after(mut self, enabled: bool) -> Self {
        self.ingest_after = enabled;
        self
    }

    pub fn with_audit(mut self, sink: Arc<dyn RunAuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Token that cancels this run
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn phase_config(&self) -> RunConfig {
        let mut config = self.config.clone();
        config.set_default(keys::EVIDENCE_ID, self.evidence.evidence_id);
        config.set_default(keys::EVIDENCE_LABEL, self.evidence.label.clone());
        config
    }

    fn name(&self) -> &'static str {
        self.extractor.metadata().name
    }

    /// Extraction, then ingestion when requested and extraction succeeded
    pub fn run(&self, callbacks: &dyn ExtractorCallbacks) -> RunReport {
        let meta = self.extractor.metadata();

        let extraction = meta.can_extract.then(|| self.run_extraction(callbacks));
        let extraction_ok = extraction.as_ref().map_or(true, |o| o.status == RunStatus::Success);

        let ingestion = (self.ingest_after && meta.can_ingest && extraction_ok && !self.token.is_cancelled())
            .then(|| self.run_ingestion(callbacks));

        let last = ingestion.as_ref().or(extraction.as_ref());
        let status = last.map_or(RunStatus::Failed, |o| o.status);
        let run_id = extraction
            .as_ref()
            .and_then(|o| o.run_id.clone())
            .or_else(|| ingestion.as_ref().and_then(|o| o.run_id.clone()));

        RunReport {
            extractor: meta.name.to_string(),
            evidence_id: self.evidence.evidence_id,
            output_dir: self.output_dir.clone(),
            status,
            run_id,
            extraction,
            ingestion,
        }
    }

    /// Run the extraction phase on the calling thread
    #[instrument(skip_all, fields(extractor = self.name(), evidence_id = self.evidence.evidence_id))]
    pub fn run_extraction(&self, callbacks: &dyn ExtractorCallbacks) -> PhaseOutcome {
        let started_at = Utc::now();
        let start = Instant::now();
        let guarded = GuardedCallbacks::new(callbacks, &self.token);

        let mut config = self.phase_config();
        let run_id = generate_run_id();
        config.insert(keys::RUN_ID, run_id.clone());

        audit::log_phase_start(self.name(), Phase::Extraction.as_str(), &run_id, self.evidence.evidence_id);

        let preflight = self.extractor.can_run_extraction(&self.evidence);
        let result = if preflight.ready {
            self.extract_with_resource(&config, &guarded)
        } else {
            Err(PhaseFailure::NotReady(preflight.reason))
        };

        // Manifest is the extractor's own record of how the run ended
        let manifest = Manifest::load(&self.output_dir).ok().filter(|m| m.run_id == run_id);
        let manifest_status = manifest.as_ref().map(|m| m.status);
        let cancelled = self.token.is_cancelled() || manifest_status == Some(ManifestStatus::Cancelled);

        let (status, error) = match result {
            Ok(_) if cancelled => (RunStatus::Cancelled, None),
            Ok(true) => (RunStatus::Success, None),
            Ok(false) => (
                RunStatus::Failed,
                Some(format!(
                    "Extraction reported failure (manifest status: {})",
                    manifest_status.map_or("missing", |s| s.as_str())
                )),
            ),
            Err(failure) => {
                let message = failure.to_string();
                guarded.on_error("Extraction failed", &message);
                (RunStatus::Failed, Some(message))
            }
        };

        let outcome = PhaseOutcome {
            phase: Phase::Extraction,
            status,
            run_id: Some(run_id),
            elapsed_secs: start.elapsed().as_secs_f64(),
            manifest_status,
            counts: IngestCounts::new(),
            error,
        };

        let (records, errors) = manifest
            .as_ref()
            .map_or((0, 0), |m| (m.ok_count() as u64, m.error_count() as u64));
        self.finish_phase(&outcome, started_at, records, errors);
        outcome
    }

    /// Supply exactly the resource the extractor declared, then run it
    fn extract_with_resource(&self, config: &RunConfig, callbacks: &dyn ExtractorCallbacks) -> Result<bool, PhaseFailure> {
        let meta = self.extractor.metadata();
        fs::create_dir_all(&self.output_dir).map_err(ExtractorError::from)?;
        let evidence_id = self.evidence.evidence_id;

        // Connections opened here live on this thread and drop on return
        let mut file_list_conn: Option<Connection> = None;
        let mut db_conn: Option<Connection> = None;

        let resource = match meta.resource {
            ResourceKind::Filesystem => {
                let fs = self
                    .evidence
                    .fs
                    .as_deref()
                    .ok_or_else(|| ExtractorError::MissingResource("evidence filesystem".into()))?;
                if meta.uses_file_list {
                    if let Some(db) = &self.evidence.database {
                        match db.connect_read_only() {
                            Ok(conn) => file_list_conn = Some(conn),
                            Err(e) => warn!("file_list connection unavailable, discovery will walk the filesystem: {}", e),
                        }
                    }
                }
                EvidenceResource::Filesystem {
                    fs,
                    file_list: file_list_conn.as_ref(),
                    evidence_id,
                }
            }
            ResourceKind::Database => {
                let db = self
                    .evidence
                    .database
                    .as_ref()
                    .ok_or_else(|| ExtractorError::MissingResource("evidence database".into()))?;
                db_conn = Some(db.connect().map_err(ExtractorError::from)?);
                match db_conn.as_ref() {
                    Some(conn) => EvidenceResource::Database { conn, evidence_id },
                    None => return Err(ExtractorError::MissingResource("evidence database".into()).into()),
                }
            }
            ResourceKind::SourcePath => {
                let path = self
                    .evidence
                    .source_path
                    .as_deref()
                    .ok_or_else(|| ExtractorError::MissingResource("evidence source path".into()))?;
                EvidenceResource::SourcePath(path)
            }
        };

        let extractor = &self.extractor;
        let output_dir = &self.output_dir;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            extractor.run_extraction(resource, output_dir, config, callbacks)
        }));

        drop(file_list_conn);
        drop(db_conn);

        match result {
            Ok(Ok(ok)) => Ok(ok),
            Ok(Err(e)) => Err(PhaseFailure::Error(e)),
            Err(payload) => Err(PhaseFailure::Panic(panic_message(payload.as_ref()))),
        }
    }

    /// Run the ingestion phase on the calling thread
    #[instrument(skip_all, fields(extractor = self.name(), evidence_id = self.evidence.evidence_id))]
    pub fn run_ingestion(&self, callbacks: &dyn ExtractorCallbacks) -> PhaseOutcome {
        let started_at = Utc::now();
        let start = Instant::now();
        let guarded = GuardedCallbacks::new(callbacks, &self.token);
        let config = self.phase_config();

        let manifest = Manifest::load(&self.output_dir).ok();
        let run_id = manifest.as_ref().map(|m| m.run_id.clone());
        let manifest_status = manifest.as_ref().map(|m| m.status);

        audit::log_phase_start(
            self.name(),
            Phase::Ingestion.as_str(),
            run_id.as_deref().unwrap_or("-"),
            self.evidence.evidence_id,
        );

        let preflight = self.extractor.can_run_ingestion(&self.output_dir);
        let result = if preflight.ready {
            self.ingest_with_connection(&config, &guarded)
        } else {
            Err(PhaseFailure::NotReady(preflight.reason))
        };

        let (status, counts, error) = match result {
            Ok(counts) if self.token.is_cancelled() => (RunStatus::Cancelled, counts, None),
            Ok(counts) => (RunStatus::Success, counts, None),
            Err(failure) => {
                let message = failure.to_string();
                guarded.on_error("Ingestion failed", &message);
                (RunStatus::Failed, IngestCounts::new(), Some(message))
            }
        };

        let records = counts.values().sum();
        let outcome = PhaseOutcome {
            phase: Phase::Ingestion,
            status,
            run_id,
            elapsed_secs: start.elapsed().as_secs_f64(),
            manifest_status,
            counts,
            error,
        };
        self.finish_phase(&outcome, started_at, records, u64::from(outcome.error.is_some()));
        outcome
    }

    fn ingest_with_connection(&self, config: &RunConfig, callbacks: &dyn ExtractorCallbacks) -> Result<IngestCounts, PhaseFailure> {
        let db = self
            .evidence
            .database
            .as_ref()
            .ok_or_else(|| ExtractorError::MissingResource("evidence database".into()))?;
        let mut conn = db.connect().map_err(ExtractorError::from)?;

        let extractor = &self.extractor;
        let output_dir = &self.output_dir;
        let evidence_id = self.evidence.evidence_id;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            extractor.run_ingestion(output_dir, &mut conn, evidence_id, config, callbacks)
        }));
        drop(conn);

        match result {
            Ok(Ok(counts)) => Ok(counts),
            Ok(Err(e)) => Err(PhaseFailure::Error(e)),
            Err(payload) => Err(PhaseFailure::Panic(panic_message(payload.as_ref()))),
        }
    }

    fn finish_phase(&self, outcome: &PhaseOutcome, started_at: chrono::DateTime<Utc>, records: u64, errors: u64) {
        let run_id = outcome.run_id.clone().unwrap_or_else(|| "-".to_string());
        audit::log_phase_end(
            self.name(),
            outcome.phase.as_str(),
            &run_id,
            outcome.status.as_str(),
            outcome.elapsed_secs,
        );
        info!(
            phase = outcome.phase.as_str(),
            status = outcome.status.as_str(),
            elapsed_secs = outcome.elapsed_secs,
            records,
            "Phase finished"
        );

        if let Some(sink) = &self.audit {
            let record = PhaseRecord {
                evidence_id: self.evidence.evidence_id,
                extractor: self.name().to_string(),
                phase: outcome.phase.as_str().to_string(),
                run_id,
                status: outcome.status.as_str().to_string(),
                started_at: started_at.to_rfc3339(),
                finished_at: Utc::now().to_rfc3339(),
                elapsed_secs: outcome.elapsed_secs,
                records,
                errors,
                message: outcome.error.clone(),
            };
            if let Err(e) = sink.record_phase(&record) {
                warn!("Failed to write run audit record: {}", e);
            }
        }
    }

    /// Run on a new OS thread
    pub fn spawn(self, callbacks: Arc<dyn ExtractorCallbacks>) -> ExtractorResult<RunHandle> {
        self.spawn_with(callbacks, |runner, callbacks| runner.run(callbacks))
    }

    /// Run only the ingestion phase on a new OS thread
    pub fn spawn_ingestion(self, callbacks: Arc<dyn ExtractorCallbacks>) -> ExtractorResult<RunHandle> {
        self.spawn_with(callbacks, |runner, callbacks| {
            let ingestion = runner.run_ingestion(callbacks);
            RunReport {
                extractor: runner.name().to_string(),
                evidence_id: runner.evidence.evidence_id,
                output_dir: runner.output_dir.clone(),
                status: ingestion.status,
                run_id: ingestion.run_id.clone(),
                extraction: None,
                ingestion: Some(ingestion),
            }
        })
    }

    fn spawn_with(
        self,
        callbacks: Arc<dyn ExtractorCallbacks>,
        body: fn(&ExtractorRunner, &dyn ExtractorCallbacks) -> RunReport,
    ) -> ExtractorResult<RunHandle> {
        let token = self.token.clone();
        let extractor = self.name().to_string();
        let evidence_id = self.evidence.evidence_id;
        let output_dir = self.output_dir.clone();

        let handle = thread::Builder::new()
            .name(format!("extract-{}", extractor))
            .spawn(move || body(&self, callbacks.as_ref()))?;

        Ok(RunHandle { handle, token, extractor, evidence_id, output_dir })
    }
}

/// Background run started by `ExtractorRunner::spawn`
pub struct RunHandle {
    handle: JoinHandle<RunReport>,
    token: CancellationToken,
    extractor: String,
    evidence_id: i64,
    output_dir: PathBuf,
}

impl RunHandle {
    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run; a dead worker thread reads as a failed run
    pub fn join(self) -> RunReport {
        match self.handle.join() {
            Ok(report) => report,
            Err(payload) => RunReport {
                extractor: self.extractor,
                evidence_id: self.evidence_id,
                output_dir: self.output_dir,
                status: RunStatus::Failed,
                run_id: None,
                extraction: Some(PhaseOutcome {
                    phase: Phase::Extraction,
                    status: RunStatus::Failed,
                    run_id: None,
                    elapsed_secs: 0.0,
                    manifest_status: None,
                    counts: IngestCounts::new(),
                    error: Some(panic_message(payload.as_ref())),
                }),
                ingestion: None,
            },
        }
    }
}

// ============================================================================
// Failure plumbing
// ============================================================================

enum PhaseFailure {
    NotReady(String),
    Error(ExtractorError),
    Panic(String),
}

impl From<ExtractorError> for PhaseFailure {
    fn from(e: ExtractorError) -> Self {
        PhaseFailure::Error(e)
    }
}

impl std::fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseFailure::NotReady(reason) => write!(f, "Not ready: {}", reason),
            PhaseFailure::Error(e) => write!(f, "{}", e),
            PhaseFailure::Panic(message) => write!(f, "Extractor panicked: {}", message),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{EvidenceDatabase, ProcessLog};
    use crate::evidence::MountedEvidence;
    use crate::extractors::callbacks::{CallbackEvent, ChannelCallbacks, TracingCallbacks};
    use crate::extractors::{Category, ExtractorMetadata, Preflight};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Writes a manifest and counts what it was handed
    struct ScriptedExtractor {
        meta: ExtractorMetadata,
        panic_in_extraction: bool,
        wait_for_cancel: bool,
        ingested: AtomicUsize,
    }

    impl ScriptedExtractor {
        fn new(resource: ResourceKind) -> Self {
            Self {
                meta: ExtractorMetadata {
                    name: "scripted",
                    display_name: "Scripted",
                    description: "test",
                    category: Category::Other("test"),
                    version: "1.0.0",
                    requires_tools: &[],
                    can_extract: true,
                    can_ingest: true,
                    resource,
                    uses_file_list: true,
                },
                panic_in_extraction: false,
                wait_for_cancel: false,
                ingested: AtomicUsize::new(0),
            }
        }
    }

    impl Extractor for ScriptedExtractor {
        fn metadata(&self) -> &ExtractorMetadata {
            &self.meta
        }

        fn can_run_extraction(&self, evidence: &EvidenceContext) -> Preflight {
            if evidence.provides(self.meta.resource) {
                Preflight::ready()
            } else {
                Preflight::not_ready("resource missing")
            }
        }

        fn run_extraction(
            &self,
            resource: EvidenceResource<'_>,
            output_dir: &Path,
            config: &RunConfig,
            callbacks: &dyn ExtractorCallbacks,
        ) -> ExtractorResult<bool> {
            if self.panic_in_extraction {
                panic!("parser bug");
            }
            callbacks.on_step("scripted");
            let run_id = config.run_id().unwrap_or("none").to_string();
            let mut manifest = Manifest::new("scripted", "1.0.0", &run_id, config.evidence_id().unwrap_or(0));
            manifest.set_extra("resource", format!("{:?}", resource.kind()));
            if let EvidenceResource::Filesystem { file_list, .. } = &resource {
                manifest.set_extra("had_file_list", file_list.is_some());
            }

            if self.wait_for_cancel {
                while !callbacks.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                manifest.status = ManifestStatus::Cancelled;
                manifest.write(output_dir)?;
                return Ok(false);
            }

            manifest.write(output_dir)?;
            Ok(true)
        }

        fn run_ingestion(
            &self,
            _output_dir: &Path,
            _conn: &mut Connection,
            _evidence_id: i64,
            _config: &RunConfig,
            _callbacks: &dyn ExtractorCallbacks,
        ) -> ExtractorResult<IngestCounts> {
            self.ingested.fetch_add(1, Ordering::SeqCst);
            Ok(IngestCounts::from([("scripted_rows".to_string(), 3)]))
        }
    }

    fn evidence(dir: &Path) -> EvidenceContext {
        std::fs::create_dir_all(dir.join("evidence")).unwrap();
        let fs = MountedEvidence::open(dir.join("evidence")).unwrap();
        let db = EvidenceDatabase::new(dir.join("evidence.sqlite")).unwrap();
        EvidenceContext::new(5, "laptop").with_fs(Arc::new(fs)).with_database(db)
    }

    #[test]
    fn test_extract_then_ingest_with_audit() {
        let dir = TempDir::new().unwrap();
        let ctx = evidence(dir.path());
        let log = Arc::new(ProcessLog::new(ctx.database.clone().unwrap()));
        let scripted = Arc::new(ScriptedExtractor::new(ResourceKind::Filesystem));

        let runner = ExtractorRunner::new(scripted.clone(), ctx, dir.path().join("out"))
            .ingest_after(true)
            .with_audit(log.clone());
        let report = runner.run(&TracingCallbacks::new("scripted"));

        assert_eq!(report.status, RunStatus::Success);
        let extraction = report.extraction.unwrap();
        assert_eq!(extraction.manifest_status, Some(ManifestStatus::Ok));
        assert_eq!(report.ingestion.unwrap().counts["scripted_rows"], 3);
        assert_eq!(scripted.ingested.load(Ordering::SeqCst), 1);

        let manifest = Manifest::load(&dir.path().join("out")).unwrap();
        assert_eq!(Some(manifest.run_id.clone()), report.run_id);
        assert_eq!(manifest.evidence_id, 5);
        assert_eq!(manifest.extra["resource"], "Filesystem");
        assert_eq!(manifest.extra["had_file_list"], true);

        let records = log.records_for_run(&manifest.run_id).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].phase, "extraction");
        assert_eq!(records[1].records, 3);
    }

    #[test]
    fn test_only_declared_resource_is_supplied() {
        let dir = TempDir::new().unwrap();
        let ctx = EvidenceContext::new(1, "img").with_source_path(dir.path().join("disk.dd"));
        let scripted = Arc::new(ScriptedExtractor::new(ResourceKind::SourcePath));

        let report = ExtractorRunner::new(scripted, ctx.clone(), dir.path().join("out"))
            .run(&TracingCallbacks::new("scripted"));
        assert_eq!(report.status, RunStatus::Success);
        let manifest = Manifest::load(&dir.path().join("out")).unwrap();
        assert_eq!(manifest.extra["resource"], "SourcePath");

        let needs_db = Arc::new(ScriptedExtractor::new(ResourceKind::Database));
        let report = ExtractorRunner::new(needs_db, ctx, dir.path().join("out2"))
            .run(&TracingCallbacks::new("scripted"));
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.extraction.unwrap().error.unwrap().contains("resource missing"));
    }

    #[test]
    fn test_panic_becomes_failed_status() {
        let dir = TempDir::new().unwrap();
        let mut scripted = ScriptedExtractor::new(ResourceKind::Filesystem);
        scripted.panic_in_extraction = true;

        let (tx, rx) = mpsc::channel();
        let callbacks = ChannelCallbacks::new(tx, CancellationToken::new());
        let report = ExtractorRunner::new(Arc::new(scripted), evidence(dir.path()), dir.path().join("out"))
            .ingest_after(true)
            .run(&callbacks);

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.ingestion.is_none());
        let errors: Vec<CallbackEvent> = rx
            .try_iter()
            .filter(|e| matches!(e, CallbackEvent::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        if let CallbackEvent::Error { detail, .. } = &errors[0] {
            assert!(detail.contains("parser bug"));
        }
    }

    #[test]
    fn test_spawned_run_cancels_cooperatively() {
        let dir = TempDir::new().unwrap();
        let mut scripted = ScriptedExtractor::new(ResourceKind::Filesystem);
        scripted.wait_for_cancel = true;
        let scripted = Arc::new(scripted);

        let handle = ExtractorRunner::new(scripted.clone(), evidence(dir.path()), dir.path().join("out"))
            .ingest_after(true)
            .spawn(Arc::new(TracingCallbacks::new("scripted")))
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        handle.cancel();
        let report = handle.join();

        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.extraction.unwrap().manifest_status, Some(ManifestStatus::Cancelled));
        assert!(report.ingestion.is_none());
        assert_eq!(scripted.ingested.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ingestion_requires_usable_manifest() {
        let dir = TempDir::new().unwrap();
        let scripted = Arc::new(ScriptedExtractor::new(ResourceKind::Filesystem));
        let runner = ExtractorRunner::new(scripted.clone(), evidence(dir.path()), dir.path().join("out"));

        let outcome = runner.run_ingestion(&TracingCallbacks::new("scripted"));
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().contains("No manifest"));
        assert_eq!(scripted.ingested.load(Ordering::SeqCst), 0);

        let handle = runner.spawn_ingestion(Arc::new(TracingCallbacks::new("scripted"))).unwrap();
        assert_eq!(handle.join().status, RunStatus::Failed);
    }
}
