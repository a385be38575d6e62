//! File-list discovery across every partition of an evidence item
//!
//! Resolves filename and path patterns against the pre-built `file_list`
//! index in one query instead of walking the image once per extractor.
//! Discovery is read-only: it never writes `file_list`.
//!
//! Callers check [`check_file_list_available`] first and fall back to
//! globbing the evidence filesystem when the index is empty;
//! [`discover_with_fallback`] does both and returns the same
//! partition -> matches shape either way.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ExtractorError, ExtractorResult};
use crate::evidence::{open_partition_for_extraction, EvidenceFs};

// ============================================================================
// Result types
// ============================================================================

/// One discovered file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileListMatch {
    /// Logical path inside the partition
    pub file_path: String,
    pub file_name: String,
    /// 0 for an unpartitioned filesystem
    pub partition_index: u32,
    pub inode: Option<u64>,
    pub size_bytes: Option<u64>,
}

/// Where a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    FileList,
    Filesystem,
}

/// Matches grouped by partition
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    pub matches_by_partition: BTreeMap<u32, Vec<FileListMatch>>,
    pub source: DiscoverySource,
    /// Human-readable description of the query, for logs
    pub query_info: String,
}

impl DiscoveryResult {
    fn new(source: DiscoverySource, query_info: String) -> Self {
        Self {
            matches_by_partition: BTreeMap::new(),
            source,
            query_info,
        }
    }

    fn push(&mut self, m: FileListMatch) {
        self.matches_by_partition.entry(m.partition_index).or_default().push(m);
    }

    pub fn is_empty(&self) -> bool {
        self.total_matches() == 0
    }

    pub fn total_matches(&self) -> usize {
        self.matches_by_partition.values().map(Vec::len).sum()
    }

    /// Partition indices with at least one match, ascending
    pub fn partitions_with_matches(&self) -> Vec<u32> {
        self.matches_by_partition
            .iter()
            .filter(|(_, m)| !m.is_empty())
            .map(|(p, _)| *p)
            .collect()
    }

    pub fn is_multi_partition(&self) -> bool {
        self.partitions_with_matches().len() > 1
    }

    /// Every match, partition order then path order
    pub fn all_matches(&self) -> impl Iterator<Item = &FileListMatch> {
        self.matches_by_partition.values().flatten()
    }

    /// Match count per partition
    pub fn partition_counts(&self) -> BTreeMap<u32, usize> {
        self.matches_by_partition
            .iter()
            .map(|(p, m)| (*p, m.len()))
            .collect()
    }

    /// `"3 matches (partition 1: 2, partition 2: 1)"`
    pub fn partition_summary(&self) -> String {
        if self.is_empty() {
            return "No matches found".to_string();
        }
        let parts: Vec<String> = self
            .partition_counts()
            .iter()
            .map(|(p, n)| format!("partition {}: {}", p, n))
            .collect();
        format!("{} matches ({})", self.total_matches(), parts.join(", "))
    }
}

// ============================================================================
// Query builder
// ============================================================================

/// Patterns and filters for one discovery
///
/// Filename and path patterns combine as a union: a file matching either
/// set is returned once.
#[derive(Debug, Clone)]
pub struct DiscoveryQuery {
    pub filename_patterns: Vec<String>,
    pub path_patterns: Vec<String>,
    /// Normalized to a lowercase leading-dot form
    pub extensions: Vec<String>,
    pub partitions: Vec<u32>,
    pub exclude_deleted: bool,
}

impl Default for DiscoveryQuery {
    fn default() -> Self {
        Self {
            filename_patterns: Vec::new(),
            path_patterns: Vec::new(),
            extensions: Vec::new(),
            partitions: Vec::new(),
            exclude_deleted: true,
        }
    }
}

impl DiscoveryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base-name patterns: exact names or globs (`*`, `?`)
    pub fn filename_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filename_patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Full-path patterns: SQL LIKE when they contain `%`, otherwise a glob
    /// matched anywhere in the path
    pub fn path_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path_patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for ext in extensions {
            let ext = ext.as_ref().trim().to_lowercase();
            if ext.is_empty() {
                continue;
            }
            if ext.starts_with('.') {
                self.extensions.push(ext);
            } else {
                self.extensions.push(format!(".{}", ext));
            }
        }
        self
    }

    pub fn partitions<I: IntoIterator<Item = u32>>(mut self, partitions: I) -> Self {
        self.partitions.extend(partitions);
        self
    }

    pub fn exclude_deleted(mut self, exclude: bool) -> Self {
        self.exclude_deleted = exclude;
        self
    }

    pub fn has_patterns(&self) -> bool {
        !self.filename_patterns.is_empty() || !self.path_patterns.is_empty()
    }

    fn describe(&self) -> String {
        format!(
            "filename={:?}, path={:?}, ext={:?}, partitions={:?}, exclude_deleted={}",
            self.filename_patterns, self.path_patterns, self.extensions, self.partitions, self.exclude_deleted
        )
    }

    fn extension_allowed(&self, file_name: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let lower = file_name.to_lowercase();
        self.extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    fn partition_allowed(&self, partition: u32) -> bool {
        self.partitions.is_empty() || self.partitions.contains(&partition)
    }
}

// ============================================================================
// Pattern translation
// ============================================================================

fn has_wildcard(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Translate a glob into a SQL LIKE pattern for `ESCAPE '\'`
///
/// Literal `\`, `%` and `_` are escaped before wildcards are translated;
/// `*` and `**` become `%`, `?` becomes `_`.
pub fn glob_to_sql_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut prev_star = false;

    for c in pattern.chars() {
        match c {
            '*' => {
                if !prev_star {
                    out.push('%');
                }
                prev_star = true;
                continue;
            }
            '?' => out.push('_'),
            '\\' => out.push_str("\\\\"),
            '%' => out.push_str("\\%"),
            '_' => out.push_str("\\_"),
            c => out.push(c),
        }
        prev_star = false;
    }

    out
}

fn escape_like_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// NTFS inodes arrive as `MFT-TYPE-ID` ("3869-128-4"); keep the record number
fn parse_inode(raw: Option<SqlValue>) -> Option<u64> {
    match raw? {
        SqlValue::Integer(i) => u64::try_from(i).ok(),
        SqlValue::Text(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.split('-').next().and_then(|head| head.parse::<u64>().ok()))
        }
        SqlValue::Real(f) if f >= 0.0 => Some(f as u64),
        _ => None,
    }
}

// ============================================================================
// file_list queries
// ============================================================================

/// Whether file_list has rows for this evidence, and how many
///
/// Fails open: a missing table or query error reads as `(false, 0)`.
pub fn check_file_list_available(conn: &Connection, evidence_id: i64) -> (bool, u64) {
    let result: rusqlite::Result<i64> = conn.query_row(
        "SELECT COUNT(*) FROM file_list WHERE evidence_id = ?1",
        params![evidence_id],
        |row| row.get(0),
    );

    match result {
        Ok(count) if count > 0 => (true, count as u64),
        Ok(_) => (false, 0),
        Err(e) => {
            debug!(evidence_id, "file_list not available: {}", e);
            (false, 0)
        }
    }
}

/// Query file_list for files matching `query` across all partitions
pub fn discover_from_file_list(
    conn: &Connection,
    evidence_id: i64,
    query: &DiscoveryQuery,
) -> ExtractorResult<DiscoveryResult> {
    if !query.has_patterns() {
        return Err(ExtractorError::InvalidQuery(
            "at least one filename or path pattern is required".to_string(),
        ));
    }

    let start = Instant::now();
    let mut sql = String::from(
        "SELECT DISTINCT file_path, file_name, partition_index, inode, size_bytes \
         FROM file_list WHERE evidence_id = ?",
    );
    let mut values: Vec<SqlValue> = vec![SqlValue::Integer(evidence_id)];

    if query.exclude_deleted {
        sql.push_str(" AND COALESCE(deleted, 0) = 0");
    }

    if !query.partitions.is_empty() {
        let placeholders = vec!["?"; query.partitions.len()].join(", ");
        sql.push_str(&format!(" AND COALESCE(partition_index, 0) IN ({})", placeholders));
        values.extend(query.partitions.iter().map(|p| SqlValue::Integer(*p as i64)));
    }

    if !query.extensions.is_empty() {
        let clauses: Vec<&str> = query
            .extensions
            .iter()
            .map(|_| "LOWER(file_name) LIKE ? ESCAPE '\\'")
            .collect();
        sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
        values.extend(
            query
                .extensions
                .iter()
                .map(|ext| SqlValue::Text(format!("%{}", escape_like_literal(ext)))),
        );
    }

    // Filename and path clauses are OR-ed together
    let mut pattern_clauses: Vec<&str> = Vec::new();
    for pattern in &query.filename_patterns {
        if has_wildcard(pattern) {
            pattern_clauses.push("file_name LIKE ? ESCAPE '\\'");
            values.push(SqlValue::Text(glob_to_sql_like(pattern)));
        } else {
            pattern_clauses.push("LOWER(file_name) = LOWER(?)");
            values.push(SqlValue::Text(pattern.clone()));
        }
    }
    for pattern in &query.path_patterns {
        if pattern.contains('%') {
            pattern_clauses.push("file_path LIKE ?");
            values.push(SqlValue::Text(pattern.clone()));
        } else {
            pattern_clauses.push("file_path LIKE ? ESCAPE '\\'");
            values.push(SqlValue::Text(format!("%{}%", glob_to_sql_like(pattern))));
        }
    }
    sql.push_str(&format!(" AND ({})", pattern_clauses.join(" OR ")));
    sql.push_str(" ORDER BY partition_index, file_path");

    debug!(sql = %sql, "file_list discovery query");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
        Ok((
            row.get::<_, Option<String>>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<i64>>(2)?,
            row.get::<_, Option<SqlValue>>(3)?,
            row.get::<_, Option<i64>>(4)?,
        ))
    })?;

    let mut result = DiscoveryResult::new(DiscoverySource::FileList, query.describe());
    for row in rows {
        let (file_path, file_name, partition, inode, size) = row?;
        result.push(FileListMatch {
            file_path: file_path.unwrap_or_default(),
            file_name: file_name.unwrap_or_default(),
            partition_index: partition.and_then(|p| u32::try_from(p).ok()).unwrap_or(0),
            inode: parse_inode(inode),
            size_bytes: size.and_then(|s| u64::try_from(s).ok()),
        });
    }

    info!(
        evidence_id,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "file_list discovery: {}",
        result.partition_summary()
    );
    Ok(result)
}

/// File count per partition in file_list
pub fn get_partition_stats(conn: &Connection, evidence_id: i64) -> ExtractorResult<BTreeMap<u32, u64>> {
    let mut stmt = conn.prepare(
        "SELECT COALESCE(partition_index, 0), COUNT(*) FROM file_list \
         WHERE evidence_id = ?1 GROUP BY COALESCE(partition_index, 0)",
    )?;
    let rows = stmt.query_map(params![evidence_id], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut stats = BTreeMap::new();
    for row in rows {
        let (partition, count) = row?;
        stats.insert(partition.max(0) as u32, count.max(0) as u64);
    }
    Ok(stats)
}

// ============================================================================
// Filesystem fallback
// ============================================================================

/// Glob equivalents of a query, for `EvidenceFs::iter_paths`
fn fallback_globs(query: &DiscoveryQuery) -> Vec<String> {
    let mut globs = Vec::new();
    for pattern in &query.filename_patterns {
        globs.push(format!("**/{}", pattern));
    }
    for pattern in &query.path_patterns {
        let glob = if pattern.contains('%') {
            pattern.replace('%', "**").replace('_', "?")
        } else {
            format!("**{}**", pattern.trim_matches('/'))
        };
        globs.push(glob);
    }
    globs
}

/// Glob the evidence filesystem into the same shape as a file_list query
///
/// `partitions` are visited in order; one that fails to open is skipped.
pub fn discover_from_filesystem(
    fs: &dyn EvidenceFs,
    partitions: &[u32],
    query: &DiscoveryQuery,
) -> ExtractorResult<DiscoveryResult> {
    if !query.has_patterns() {
        return Err(ExtractorError::InvalidQuery(
            "at least one filename or path pattern is required".to_string(),
        ));
    }

    let globs = fallback_globs(query);
    let mut result = DiscoveryResult::new(DiscoverySource::Filesystem, query.describe());

    for &partition in partitions.iter().filter(|p| query.partition_allowed(**p)) {
        let handle = match open_partition_for_extraction(fs, Some(partition)) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(partition, "Skipping partition in filesystem discovery: {}", e);
                continue;
            }
        };

        let mut seen = BTreeSet::new();
        for glob in &globs {
            let paths = match handle.iter_paths(glob) {
                Ok(paths) => paths,
                Err(e) => {
                    warn!(partition, glob = %glob, "Glob iteration failed: {}", e);
                    continue;
                }
            };
            seen.extend(paths);
        }

        for path in seen {
            let file_name = path.rsplit('/').next().unwrap_or(&path).to_string();
            if !query.extension_allowed(&file_name) {
                continue;
            }
            let size_bytes = handle.file_size(&path).ok();
            result.push(FileListMatch {
                file_path: path,
                file_name,
                partition_index: partition,
                inode: None,
                size_bytes,
            });
        }
    }

    info!("filesystem discovery: {}", result.partition_summary());
    Ok(result)
}

/// file_list discovery, falling back to filesystem globbing
///
/// The fallback runs when no file_list connection is given, the index has
/// no rows for this evidence, or the index yields no match. With
/// `scan_all_partitions` unset the fallback only visits the current
/// partition.
pub fn discover_with_fallback(
    file_list: Option<&Connection>,
    fs: &dyn EvidenceFs,
    evidence_id: i64,
    query: &DiscoveryQuery,
    scan_all_partitions: bool,
) -> ExtractorResult<DiscoveryResult> {
    if let Some(conn) = file_list {
        let (available, rows) = check_file_list_available(conn, evidence_id);
        if available {
            debug!(evidence_id, rows, "Using file_list for discovery");
            let result = discover_from_file_list(conn, evidence_id, query)?;
            if !result.is_empty() {
                return Ok(result);
            }
            debug!("file_list returned no matches, falling back to filesystem");
        }
    }

    let partitions = if scan_all_partitions {
        fs.partitions()
    } else {
        vec![fs.partition_index().unwrap_or(0)]
    };
    discover_from_filesystem(fs, &partitions, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{init_schema, insert_file_list_rows, FileListRow};
    use crate::evidence::MountedEvidence;
    use tempfile::TempDir;

    fn fixture(rows: &[(&str, Option<u32>, bool)]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let rows: Vec<FileListRow> = rows
            .iter()
            .map(|(path, partition, deleted)| {
                let mut row = FileListRow::from_path(path, partition.unwrap_or(0), Some(100));
                row.partition_index = *partition;
                row.deleted = *deleted;
                row
            })
            .collect();
        insert_file_list_rows(&conn, 1, Some("fls"), &rows).unwrap();
        conn
    }

    fn paths(result: &DiscoveryResult) -> Vec<String> {
        result.all_matches().map(|m| m.file_path.clone()).collect()
    }

    #[test]
    fn test_glob_to_sql_like() {
        assert_eq!(glob_to_sql_like("Users/*/AppData"), "Users/%/AppData");
        assert_eq!(glob_to_sql_like("**/*.sqlite"), "%/%.sqlite");
        assert_eq!(glob_to_sql_like("file_name.db"), "file\\_name.db");
        assert_eq!(glob_to_sql_like("100%_done*.log"), "100\\%\\_done%.log");
        assert_eq!(glob_to_sql_like("a?b"), "a_b");
        assert_eq!(glob_to_sql_like("C:\\x"), "C:\\\\x");
    }

    #[test]
    fn test_glob_escaping_matches_only_literal() {
        let conn = fixture(&[
            ("logs/100%_done*.log", Some(1), false),
            ("logs/100X_doneY.log", Some(1), false),
            ("logs/100%_done-final.log", Some(1), false),
        ]);

        let like = glob_to_sql_like("100%_done*.log");
        let mut stmt = conn
            .prepare("SELECT file_name FROM file_list WHERE file_name LIKE ?1 ESCAPE '\\' ORDER BY file_name")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map(params![like], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(names, vec!["100%_done*.log", "100%_done-final.log"]);

        let result = discover_from_file_list(
            &conn,
            1,
            &DiscoveryQuery::new().filename_patterns(["100%_done*.log"]),
        )
        .unwrap();
        assert!(!paths(&result).contains(&"logs/100X_doneY.log".to_string()));
    }

    #[test]
    fn test_availability_fails_open() {
        let bare = Connection::open_in_memory().unwrap();
        assert_eq!(check_file_list_available(&bare, 1), (false, 0));

        let conn = fixture(&[("a.txt", Some(1), false)]);
        assert_eq!(check_file_list_available(&conn, 1), (true, 1));
        assert_eq!(check_file_list_available(&conn, 2), (false, 0));
    }

    #[test]
    fn test_requires_a_pattern() {
        let conn = fixture(&[]);
        let err = discover_from_file_list(&conn, 1, &DiscoveryQuery::new().extensions(["db"]));
        assert!(matches!(err, Err(ExtractorError::InvalidQuery(_))));
    }

    #[test]
    fn test_union_of_filename_and_path_patterns() {
        let conn = fixture(&[
            ("home/a.txt", Some(1), false),      // name only
            ("var/logs/a.txt", Some(1), false),  // both
            ("var/logs/b.txt", Some(1), false),  // path only
            ("srv/b.txt", Some(1), false),       // neither
        ]);

        let query = DiscoveryQuery::new()
            .filename_patterns(["a.txt"])
            .path_patterns(["%/logs/%"]);
        let result = discover_from_file_list(&conn, 1, &query).unwrap();

        assert_eq!(result.total_matches(), 3);
        assert_eq!(
            paths(&result),
            vec!["home/a.txt", "var/logs/a.txt", "var/logs/b.txt"]
        );
    }

    #[test]
    fn test_partition_isolation() {
        let conn = fixture(&[
            ("Windows/System32/config/SOFTWARE", Some(1), false),
            ("Users/bob/NTUSER.DAT", Some(2), false),
            ("Users/bob/NTUSER.DAT", Some(3), false),
            ("Users/old/NTUSER.DAT", Some(3), true),
        ]);

        let query = DiscoveryQuery::new()
            .filename_patterns(["ntuser.dat"])
            .path_patterns(["config/SOFTWARE"]);
        let result = discover_from_file_list(&conn, 1, &query).unwrap();

        assert_eq!(result.partitions_with_matches(), vec![1, 2, 3]);
        assert!(result.is_multi_partition());
        for (partition, matches) in &result.matches_by_partition {
            assert_eq!(matches.len(), 1);
            assert_eq!(matches[0].partition_index, *partition);
        }
        assert_eq!(
            result.partition_summary(),
            "3 matches (partition 1: 1, partition 2: 1, partition 3: 1)"
        );

        let with_deleted = discover_from_file_list(&conn, 1, &query.clone().exclude_deleted(false)).unwrap();
        assert_eq!(with_deleted.matches_by_partition[&3].len(), 2);

        let only_two = discover_from_file_list(&conn, 1, &query.partitions([2])).unwrap();
        assert_eq!(only_two.partitions_with_matches(), vec![2]);
    }

    #[test]
    fn test_history_across_two_partitions() {
        let conn = fixture(&[
            ("Users/bob/History.db", Some(1), false),
            ("Users/alice/History.db", Some(2), false),
        ]);

        let result = discover_from_file_list(
            &conn,
            1,
            &DiscoveryQuery::new().filename_patterns(["History.db"]),
        )
        .unwrap();

        assert!(!result.is_empty());
        assert_eq!(result.matches_by_partition.len(), 2);
        assert_eq!(result.matches_by_partition[&1][0].file_path, "Users/bob/History.db");
        assert_eq!(result.matches_by_partition[&2][0].file_path, "Users/alice/History.db");
        assert_eq!(result.source, DiscoverySource::FileList);
    }

    #[test]
    fn test_null_partition_inode_and_extension_filter() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO file_list (evidence_id, file_path, file_name, partition_index, inode, size_bytes)
             VALUES (1, 'a/Cookies.sqlite', 'Cookies.sqlite', NULL, '3869-128-4', 4096),
                    (1, 'a/Cookies.txt', 'Cookies.txt', NULL, '12', NULL);",
        )
        .unwrap();

        let query = DiscoveryQuery::new().filename_patterns(["Cookies*"]).extensions(["SQLITE"]);
        let result = discover_from_file_list(&conn, 1, &query).unwrap();
        let m = &result.matches_by_partition[&0];
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].inode, Some(3869));
        assert_eq!(m[0].size_bytes, Some(4096));

        assert_eq!(get_partition_stats(&conn, 1).unwrap()[&0], 2);
    }

    #[test]
    fn test_fallback_produces_same_shape() {
        let dir = TempDir::new().unwrap();
        for (rel, data) in [
            ("partition_1/Users/bob/History.db", "b"),
            ("partition_2/Users/alice/History.db", "a"),
            ("partition_2/var/logs/x.log", "x"),
        ] {
            let p = dir.path().join(rel);
            std::fs::create_dir_all(p.parent().unwrap()).unwrap();
            std::fs::write(p, data).unwrap();
        }
        let fs = MountedEvidence::open(dir.path()).unwrap();
        let empty = fixture(&[]);

        let query = DiscoveryQuery::new().filename_patterns(["History.db"]);
        let all = discover_with_fallback(Some(&empty), &fs, 1, &query, true).unwrap();
        assert_eq!(all.source, DiscoverySource::Filesystem);
        assert_eq!(all.partitions_with_matches(), vec![1, 2]);
        assert_eq!(all.matches_by_partition[&2][0].file_path, "Users/alice/History.db");
        assert_eq!(all.matches_by_partition[&2][0].size_bytes, Some(1));

        let current_only = discover_with_fallback(None, &fs, 1, &query, false).unwrap();
        assert_eq!(current_only.partitions_with_matches(), vec![1]);

        let logs = discover_with_fallback(
            None,
            &fs,
            1,
            &DiscoveryQuery::new().path_patterns(["%/logs/%"]),
            true,
        )
        .unwrap();
        assert_eq!(paths(&logs), vec!["var/logs/x.log"]);
    }
}
