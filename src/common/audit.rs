//! Forensic Audit Logging
//!
//! Structured chain-of-custody events for extraction runs. Everything is
//! emitted on the `forensic_audit` target so it can be routed separately
//! from diagnostic logs.

use std::path::Path;
use tracing::{info, warn};

/// Log a read of an evidence file during extraction
pub fn log_evidence_read(
    extractor: &str,
    logical_path: &str,
    partition_index: u32,
    size_bytes: u64,
) {
    info!(
        target: "forensic_audit",
        operation = "evidence_read",
        extractor = extractor,
        logical_path = logical_path,
        partition_index = partition_index,
        size_bytes = size_bytes,
        timestamp = %chrono::Utc::now().to_rfc3339(),
        "Evidence file read"
    );
}

/// Log the start of an extraction or ingestion phase
pub fn log_phase_start(extractor: &str, phase: &str, run_id: &str, evidence_id: i64) {
    info!(
        target: "forensic_audit",
        operation = "phase_start",
        extractor = extractor,
        phase = phase,
        run_id = run_id,
        evidence_id = evidence_id,
        timestamp = %chrono::Utc::now().to_rfc3339(),
        "Extractor phase started"
    );
}

/// Log the end of an extraction or ingestion phase
pub fn log_phase_end(
    extractor: &str,
    phase: &str,
    run_id: &str,
    status: &str,
    elapsed_secs: f64,
) {
    info!(
        target: "forensic_audit",
        operation = "phase_end",
        extractor = extractor,
        phase = phase,
        run_id = run_id,
        status = status,
        elapsed_secs = elapsed_secs,
        timestamp = %chrono::Utc::now().to_rfc3339(),
        "Extractor phase finished"
    );
}

/// Log a manifest write
pub fn log_manifest_written(path: &Path, run_id: &str, status: &str, files: usize) {
    info!(
        target: "forensic_audit",
        operation = "manifest_write",
        path = %path.display(),
        run_id = run_id,
        status = status,
        files = files,
        timestamp = %chrono::Utc::now().to_rfc3339(),
        "Run manifest written"
    );
}

/// Log a carving tool terminated for exceeding output limits
pub fn log_carving_limited(tool: &str, output_dir: &Path, reason: &str) {
    warn!(
        target: "forensic_audit",
        operation = "carving_limited",
        tool = tool,
        output_dir = %output_dir.display(),
        reason = reason,
        timestamp = %chrono::Utc::now().to_rfc3339(),
        "Carving output limit exceeded"
    );
}

/// Log rows replaced by a re-ingestion of the same run
pub fn log_rows_replaced(table: &str, evidence_id: i64, run_id: &str, deleted: usize) {
    info!(
        target: "forensic_audit",
        operation = "rows_replaced",
        table = table,
        evidence_id = evidence_id,
        run_id = run_id,
        deleted = deleted,
        timestamp = %chrono::Utc::now().to_rfc3339(),
        "Prior rows for run removed before re-ingestion"
    );
}

/// Log security event (rejected path, etc.)
pub fn log_security_event(event_type: &str, description: &str, path: Option<&Path>) {
    warn!(
        target: "forensic_audit",
        event_type = "security",
        security_event = event_type,
        description = description,
        path = path.map(|p| p.display().to_string()).unwrap_or_default(),
        timestamp = %chrono::Utc::now().to_rfc3339(),
        "Security event"
    );
}
