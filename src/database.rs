//! SQLite evidence database
//!
//! Handles:
//! - Connection factory (one fresh connection per worker thread and phase)
//! - Schema for the tables the framework and built-in extractors touch
//! - file_list (pre-built file index, read by the discovery engine)
//! - process_log (run audit trail)
//! - browser_history / carved_files (built-in extractor output)
//!
//! SQLite connections are never shared across threads: `EvidenceDatabase`
//! only remembers the path and hands out new connections on demand.

use rusqlite::{params, Connection, OpenFlags, Result as SqlResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::extractors::runner::{PhaseRecord, RunAuditSink};

/// Busy timeout applied to every connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Evidence database location and connection factory
#[derive(Debug, Clone)]
pub struct EvidenceDatabase {
    path: PathBuf,
}

// ============================================================================
// Data Types
// ============================================================================

/// One row of the file_list index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileListRow {
    pub file_path: String,
    pub file_name: String,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub partition_index: Option<u32>,
    #[serde(default)]
    pub inode: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub deleted: bool,
}

impl FileListRow {
    /// Build a row from a logical path, deriving name and extension
    pub fn from_path(file_path: &str, partition_index: u32, size_bytes: Option<u64>) -> Self {
        let file_name = file_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(file_path)
            .to_string();
        let extension = file_name
            .rfind('.')
            .filter(|&i| i > 0)
            .map(|i| file_name[i..].to_lowercase());
        Self {
            file_path: file_path.to_string(),
            file_name,
            extension,
            partition_index: Some(partition_index),
            inode: None,
            size_bytes,
            deleted: false,
        }
    }
}

// ============================================================================
// Database Implementation
// ============================================================================

impl EvidenceDatabase {
    /// Initialize database at the given path, creating tables if needed
    pub fn new(db_path: impl Into<PathBuf>) -> SqlResult<Self> {
        let db = EvidenceDatabase { path: db_path.into() };

        if let Some(parent) = db.path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = db.connect()?;
        init_schema(&conn)?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new read-write connection for the calling thread
    pub fn connect(&self) -> SqlResult<Connection> {
        debug!(path = %self.path.display(), "Opening evidence connection");
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Open a new read-only connection (discovery never writes)
    pub fn connect_read_only(&self) -> SqlResult<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

/// Create all tables if they don't exist
pub fn init_schema(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(r#"
        -- Pre-built file index (fls / bodyfile / directory walk)
        CREATE TABLE IF NOT EXISTS file_list (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            evidence_id INTEGER NOT NULL,
            run_id TEXT,
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            extension TEXT,
            partition_index INTEGER,
            inode TEXT,
            size_bytes INTEGER,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT
        );

        -- Run audit trail (one row per phase)
        CREATE TABLE IF NOT EXISTS process_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            evidence_id INTEGER NOT NULL,
            extractor TEXT NOT NULL,
            phase TEXT NOT NULL,
            run_id TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            elapsed_secs REAL NOT NULL,
            records INTEGER NOT NULL DEFAULT 0,
            errors INTEGER NOT NULL DEFAULT 0,
            message TEXT
        );

        -- Browser history visits (chromium_history)
        CREATE TABLE IF NOT EXISTS browser_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            evidence_id INTEGER NOT NULL,
            run_id TEXT NOT NULL,
            browser TEXT NOT NULL,
            profile TEXT,
            url TEXT NOT NULL,
            title TEXT,
            visit_count INTEGER,
            typed_count INTEGER,
            last_visit_time_utc TEXT,
            source_path TEXT NOT NULL,
            partition_index INTEGER,
            discovered_by TEXT NOT NULL
        );

        -- Carved files (foremost_carver)
        CREATE TABLE IF NOT EXISTS carved_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            evidence_id INTEGER NOT NULL,
            run_id TEXT NOT NULL,
            tool TEXT NOT NULL,
            relative_path TEXT NOT NULL,
            file_type TEXT,
            size_bytes INTEGER NOT NULL,
            md5 TEXT,
            sha256 TEXT
        );

        -- Indexes for common queries
        CREATE INDEX IF NOT EXISTS idx_file_list_name ON file_list(evidence_id, file_name);
        CREATE INDEX IF NOT EXISTS idx_file_list_partition ON file_list(evidence_id, partition_index);
        CREATE INDEX IF NOT EXISTS idx_file_list_run ON file_list(evidence_id, run_id);
        CREATE INDEX IF NOT EXISTS idx_process_log_run ON process_log(run_id);
        CREATE INDEX IF NOT EXISTS idx_history_run ON browser_history(evidence_id, run_id);
        CREATE INDEX IF NOT EXISTS idx_carved_run ON carved_files(evidence_id, run_id);
    "#)?;

    Ok(())
}

// ============================================================================
// file_list Operations
// ============================================================================

/// Insert file_list rows for one run inside the caller's transaction
pub fn insert_file_list_rows(
    conn: &Connection,
    evidence_id: i64,
    run_id: Option<&str>,
    rows: &[FileListRow],
) -> SqlResult<usize> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut stmt = conn.prepare_cached(
        "INSERT INTO file_list (evidence_id, run_id, file_path, file_name, extension, partition_index, inode, size_bytes, deleted, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
    )?;

    for row in rows {
        stmt.execute(params![
            evidence_id,
            run_id,
            row.file_path,
            row.file_name,
            row.extension,
            row.partition_index,
            row.inode,
            row.size_bytes.map(|s| s as i64),
            row.deleted as i64,
            now,
        ])?;
    }
    Ok(rows.len())
}

/// Delete every row tagged with `run_id` from `table` for one evidence
///
/// `table` is always a compile-time constant from the calling extractor.
pub fn delete_run_rows(conn: &Connection, table: &str, evidence_id: i64, run_id: &str) -> SqlResult<usize> {
    conn.execute(
        &format!("DELETE FROM {} WHERE evidence_id = ?1 AND run_id = ?2", table),
        params![evidence_id, run_id],
    )
}

/// Count rows tagged with `run_id` in `table` for one evidence
pub fn count_run_rows(conn: &Connection, table: &str, evidence_id: i64, run_id: &str) -> SqlResult<i64> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE evidence_id = ?1 AND run_id = ?2", table),
        params![evidence_id, run_id],
        |row| row.get(0),
    )
}

// ============================================================================
// process_log audit sink
// ============================================================================

/// Run audit trail persisted in the evidence database
///
/// Each record opens its own short-lived connection, so one sink can be
/// shared by concurrent runners.
#[derive(Debug, Clone)]
pub struct ProcessLog {
    db: EvidenceDatabase,
}

impl ProcessLog {
    pub fn new(db: EvidenceDatabase) -> Self {
        Self { db }
    }

    pub fn records_for_run(&self, run_id: &str) -> SqlResult<Vec<PhaseRecord>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(
            "SELECT evidence_id, extractor, phase, run_id, status, started_at, finished_at, elapsed_secs, records, errors, message
             FROM process_log WHERE run_id = ?1 ORDER BY id"
        )?;

        let rows = stmt.query_map(params![run_id], |row| {
            Ok(PhaseRecord {
                evidence_id: row.get(0)?,
                extractor: row.get(1)?,
                phase: row.get(2)?,
                run_id: row.get(3)?,
                status: row.get(4)?,
                started_at: row.get(5)?,
                finished_at: row.get(6)?,
                elapsed_secs: row.get(7)?,
                records: row.get::<_, i64>(8)? as u64,
                errors: row.get::<_, i64>(9)? as u64,
                message: row.get(10)?,
            })
        })?;

        rows.collect()
    }
}

impl RunAuditSink for ProcessLog {
    fn record_phase(&self, record: &PhaseRecord) -> Result<(), String> {
        let conn = self.db.connect().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO process_log (evidence_id, extractor, phase, run_id, status, started_at, finished_at, elapsed_secs, records, errors, message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.evidence_id,
                record.extractor,
                record.phase,
                record.run_id,
                record.status,
                record.started_at,
                record.finished_at,
                record.elapsed_secs,
                record.records as i64,
                record.errors as i64,
                record.message,
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }
}
