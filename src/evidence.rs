//! Evidence filesystem access
//!
//! Extractors never touch a disk image directly. They go through the
//! `EvidenceFs` capability: read a file by logical path, list paths matching
//! a glob, and open a sibling partition of a multi-partition image.
//!
//! `MountedEvidence` is the directory-backed implementation used for mounted
//! or exported evidence. A directory holding `partition_<N>` subdirectories is
//! treated as a multi-partition image.

use regex::{Regex, RegexBuilder};
use std::fs;
use std::io;
use std::ops::Deref;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace, warn};

/// Directory prefix marking one partition of an exported image
pub const PARTITION_DIR_PREFIX: &str = "partition_";

// ============================================================================
// Capability trait
// ============================================================================

/// Read access to one partition of an evidence item
pub trait EvidenceFs: Send + Sync {
    /// Read a whole file by logical path (`/` separated, relative to the partition root)
    fn read_file(&self, logical_path: &str) -> io::Result<Vec<u8>>;

    /// Logical paths matching a glob (`**` any depth, `*` and `?` within a segment)
    fn iter_paths(&self, pattern: &str) -> io::Result<Vec<String>>;

    /// Partition this handle is positioned on, if the evidence is partitioned
    fn partition_index(&self) -> Option<u32> {
        None
    }

    /// Every partition index present in the evidence
    fn partitions(&self) -> Vec<u32> {
        vec![self.partition_index().unwrap_or(0)]
    }

    /// Location of the underlying image or mount point
    fn source_path(&self) -> Option<&Path> {
        None
    }

    fn file_size(&self, logical_path: &str) -> io::Result<u64> {
        self.read_file(logical_path).map(|data| data.len() as u64)
    }

    /// Copy one file out of evidence, returning the bytes written
    fn copy_to(&self, logical_path: &str, dest: &Path) -> io::Result<u64> {
        let data = self.read_file(logical_path)?;
        fs::write(dest, &data)?;
        Ok(data.len() as u64)
    }

    /// Open another partition of the same evidence as an independent handle
    fn open_partition(&self, index: u32) -> io::Result<Box<dyn EvidenceFs>>;

    /// Release resources held by this handle
    fn close(&self) {}
}

// ============================================================================
// Scoped partition handle
// ============================================================================

/// Partition handle for one extraction batch
///
/// Borrowed when the requested partition is the one already open, owned
/// otherwise. An owned handle is closed when dropped, on every exit path.
pub enum PartitionHandle<'a> {
    Borrowed(&'a dyn EvidenceFs),
    Owned(Box<dyn EvidenceFs>),
}

impl PartitionHandle<'_> {
    pub fn is_owned(&self) -> bool {
        matches!(self, PartitionHandle::Owned(_))
    }
}

impl<'a> Deref for PartitionHandle<'a> {
    type Target = dyn EvidenceFs + 'a;

    fn deref(&self) -> &Self::Target {
        match self {
            PartitionHandle::Borrowed(fs) => *fs,
            PartitionHandle::Owned(fs) => fs.as_ref(),
        }
    }
}

impl Drop for PartitionHandle<'_> {
    fn drop(&mut self) {
        if let PartitionHandle::Owned(fs) = self {
            debug!(partition = ?fs.partition_index(), "Closing partition handle");
            fs.close();
        }
    }
}

/// Get a handle positioned on `partition_index`
///
/// With no index, or the index the handle is already on, the caller's
/// handle is reused. Any other index opens that partition explicitly.
pub fn open_partition_for_extraction(
    fs: &dyn EvidenceFs,
    partition_index: Option<u32>,
) -> io::Result<PartitionHandle<'_>> {
    match partition_index {
        None => Ok(PartitionHandle::Borrowed(fs)),
        Some(index) if fs.partition_index().unwrap_or(0) == index => {
            Ok(PartitionHandle::Borrowed(fs))
        }
        Some(index) => {
            debug!(
                current = ?fs.partition_index(),
                requested = index,
                "Opening partition for extraction"
            );
            Ok(PartitionHandle::Owned(fs.open_partition(index)?))
        }
    }
}

// ============================================================================
// Glob matching
// ============================================================================

/// Compile a filesystem glob into an anchored, case-insensitive regex
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let pattern = pattern.trim_start_matches(['/', '\\']).replace('\\', "/");
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    RegexBuilder::new(&out).case_insensitive(true).build()
}

/// Normalize a logical path to `/` separators without a leading slash
pub fn normalize_logical_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

// ============================================================================
// Directory-backed evidence
// ============================================================================

/// Evidence exported or mounted as a directory tree
#[derive(Debug, Clone)]
pub struct MountedEvidence {
    /// Top-level directory (image root)
    image_root: PathBuf,
    /// Directory logical paths resolve against
    fs_root: PathBuf,
    partition: Option<u32>,
    partitions: Vec<u32>,
}

impl MountedEvidence {
    /// Open a mounted evidence directory, positioned on its first partition
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let image_root = root.into();
        if !image_root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Evidence directory not found: {}", image_root.display()),
            ));
        }

        let partitions = scan_partitions(&image_root)?;
        let partition = partitions.first().copied();
        let fs_root = match partition {
            Some(p) => partition_dir(&image_root, p),
            None => image_root.clone(),
        };

        debug!(
            root = %image_root.display(),
            partitions = partitions.len(),
            "Opened mounted evidence"
        );

        Ok(Self { image_root, fs_root, partition, partitions })
    }

    /// Directory logical paths are resolved against
    pub fn fs_root(&self) -> &Path {
        &self.fs_root
    }

    /// Map a logical path to a host path, rejecting `..` escapes
    pub fn resolve(&self, logical_path: &str) -> io::Result<PathBuf> {
        let normalized = normalize_logical_path(logical_path);
        let relative = Path::new(&normalized);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            crate::common::audit::log_security_event(
                "path_traversal",
                "Logical path escapes evidence root",
                Some(relative),
            );
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Logical path escapes evidence root: {}", logical_path),
            ));
        }
        Ok(self.fs_root.join(relative))
    }

    fn walk(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read directory {:?}: {}", dir, e);
                return;
            }
        };

        for entry in entries.flatten() {
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(e) => {
                    warn!("Failed to get file type for {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy().to_string();
            let logical = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };

            if file_type.is_dir() {
                self.walk(&entry.path(), &logical, out);
            } else if file_type.is_file() {
                out.push(logical);
            }
        }
    }
}

impl EvidenceFs for MountedEvidence {
    fn read_file(&self, logical_path: &str) -> io::Result<Vec<u8>> {
        let path = self.resolve(logical_path)?;
        trace!(path = %path.display(), "Reading evidence file");
        fs::read(path)
    }

    fn iter_paths(&self, pattern: &str) -> io::Result<Vec<String>> {
        let matcher = glob_to_regex(pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        let mut all = Vec::new();
        self.walk(&self.fs_root, "", &mut all);

        let mut matched: Vec<String> = all.into_iter().filter(|p| matcher.is_match(p)).collect();
        matched.sort();
        debug!(pattern, matches = matched.len(), partition = ?self.partition, "Glob iteration");
        Ok(matched)
    }

    fn partition_index(&self) -> Option<u32> {
        self.partition
    }

    fn partitions(&self) -> Vec<u32> {
        if self.partitions.is_empty() {
            vec![0]
        } else {
            self.partitions.clone()
        }
    }

    fn source_path(&self) -> Option<&Path> {
        Some(&self.image_root)
    }

    fn file_size(&self, logical_path: &str) -> io::Result<u64> {
        Ok(fs::metadata(self.resolve(logical_path)?)?.len())
    }

    fn copy_to(&self, logical_path: &str, dest: &Path) -> io::Result<u64> {
        fs::copy(self.resolve(logical_path)?, dest)
    }

    fn open_partition(&self, index: u32) -> io::Result<Box<dyn EvidenceFs>> {
        if self.partitions.is_empty() {
            if index == 0 {
                return Ok(Box::new(self.clone()));
            }
        } else if self.partitions.contains(&index) {
            return Ok(Box::new(Self {
                image_root: self.image_root.clone(),
                fs_root: partition_dir(&self.image_root, index),
                partition: Some(index),
                partitions: self.partitions.clone(),
            }));
        }

        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Partition {} not present in {}", index, self.image_root.display()),
        ))
    }

    fn close(&self) {
        trace!(root = %self.image_root.display(), partition = ?self.partition, "Mounted evidence closed");
    }
}

fn partition_dir(root: &Path, index: u32) -> PathBuf {
    root.join(format!("{}{}", PARTITION_DIR_PREFIX, index))
}

/// Sorted partition indices from `partition_<N>` subdirectories
fn scan_partitions(root: &Path) -> io::Result<Vec<u32>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(root)?.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if let Some(index) = name
            .strip_prefix(PARTITION_DIR_PREFIX)
            .and_then(|n| n.parse::<u32>().ok())
        {
            found.push(index);
        }
    }
    found.sort_unstable();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("Users/*/AppData/**/History").unwrap();
        assert!(re.is_match("Users/bob/AppData/Local/Google/Chrome/User Data/Default/History"));
        assert!(re.is_match("users/BOB/appdata/History"));
        assert!(!re.is_match("Users/bob/x/AppData/Local/History"));

        let re = glob_to_regex("*.db").unwrap();
        assert!(re.is_match("a.db"));
        assert!(!re.is_match("dir/a.db"));

        let re = glob_to_regex("**/History?db").unwrap();
        assert!(re.is_match("History.db"));
        assert!(re.is_match("a/b/History_db"));
        assert!(!re.is_match("a/History/db"));

        let re = glob_to_regex("file[1].txt").unwrap();
        assert!(re.is_match("file[1].txt"));
        assert!(!re.is_match("file1.txt"));
    }

    #[test]
    fn test_single_directory_evidence() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Users/bob/History", b"sqlite");
        write(dir.path(), "Windows/System32/config/SAM", b"regf");

        let fs = MountedEvidence::open(dir.path()).unwrap();
        assert_eq!(fs.partition_index(), None);
        assert_eq!(fs.partitions(), vec![0]);
        assert_eq!(fs.read_file("/Users/bob/History").unwrap(), b"sqlite");
        assert_eq!(fs.file_size("Windows\\System32\\config\\SAM").unwrap(), 4);
        assert_eq!(fs.iter_paths("**/History").unwrap(), vec!["Users/bob/History"]);
        assert!(fs.read_file("../outside").is_err());
        assert!(fs.open_partition(0).is_ok());
        assert!(fs.open_partition(2).is_err());
    }

    #[test]
    fn test_multi_partition_evidence() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "partition_1/Users/bob/History.db", b"bob");
        write(dir.path(), "partition_2/Users/alice/History.db", b"alice");

        let fs = MountedEvidence::open(dir.path()).unwrap();
        assert_eq!(fs.partition_index(), Some(1));
        assert_eq!(fs.partitions(), vec![1, 2]);
        assert_eq!(fs.iter_paths("**/History.db").unwrap(), vec!["Users/bob/History.db"]);

        let handle = open_partition_for_extraction(&fs, Some(2)).unwrap();
        assert!(handle.is_owned());
        assert_eq!(handle.partition_index(), Some(2));
        assert_eq!(handle.read_file("Users/alice/History.db").unwrap(), b"alice");

        let same = open_partition_for_extraction(&fs, Some(1)).unwrap();
        assert!(!same.is_owned());
        let none = open_partition_for_extraction(&fs, None).unwrap();
        assert!(!none.is_owned());

        assert!(open_partition_for_extraction(&fs, Some(7)).is_err());
    }

    struct CountingFs {
        partition: u32,
        closed: Arc<AtomicUsize>,
    }

    impl EvidenceFs for CountingFs {
        fn read_file(&self, _logical_path: &str) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::Other, "boom"))
        }

        fn iter_paths(&self, _pattern: &str) -> io::Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn partition_index(&self) -> Option<u32> {
            Some(self.partition)
        }

        fn open_partition(&self, index: u32) -> io::Result<Box<dyn EvidenceFs>> {
            Ok(Box::new(CountingFs { partition: index, closed: self.closed.clone() }))
        }

        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_owned_handle_closed_on_error_path() {
        let closed = Arc::new(AtomicUsize::new(0));
        let fs = CountingFs { partition: 1, closed: closed.clone() };

        let read_other = || -> io::Result<Vec<u8>> {
            let handle = open_partition_for_extraction(&fs, Some(3))?;
            handle.read_file("x")
        };
        assert!(read_other().is_err());
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        {
            let _borrowed = open_partition_for_extraction(&fs, Some(1)).unwrap();
        }
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
