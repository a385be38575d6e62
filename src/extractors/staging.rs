//! Staging evidence files into an extractor's output directory
//!
//! Output names carry the partition and a short hash of the logical path:
//! the same profile found in two places (dual boot, old OS install) never
//! collides. Every copy is hashed (MD5 + SHA-256) for the manifest.

use serde_json::Map;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::common::audit;
use crate::common::hash::digest_file;
use crate::common::path_security::{relative_to, sanitize_filename};
use crate::evidence::EvidenceFs;
use crate::extractors::manifest::{CopyStatus, ManifestFile};

/// SQLite sidecar files staged next to their database
pub const SQLITE_COMPANION_SUFFIXES: &[&str] = &["-wal", "-journal", "-shm"];

/// First 8 hex digits of SHA-256 over the logical path
pub fn path_mini_hash(logical_path: &str) -> String {
    let digest = Sha256::digest(logical_path.as_bytes());
    hex::encode(digest)[..8].to_string()
}

/// `{prefix}_p{partition}_{mini_hash}_{file_name}`, each part sanitized
pub fn staged_file_name(prefix: &str, partition_index: u32, logical_path: &str) -> String {
    let file_name = logical_path
        .rsplit(['/', '\\'])
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("unnamed");
    format!(
        "{}_p{}_{}_{}",
        sanitize_filename(prefix),
        partition_index,
        path_mini_hash(logical_path),
        sanitize_filename(file_name)
    )
}

/// Copy one evidence file to `dest_dir/dest_name` and describe it
///
/// Failures become a `copy_status = "error"` entry; they never abort the run.
pub fn stage_file(
    fs: &dyn EvidenceFs,
    extractor: &str,
    logical_path: &str,
    partition_index: u32,
    output_dir: &Path,
    dest_dir: &Path,
    dest_name: &str,
) -> ManifestFile {
    match try_stage(fs, extractor, logical_path, partition_index, output_dir, dest_dir, dest_name) {
        Ok(entry) => entry,
        Err(e) => {
            warn!(logical_path, partition_index, "Failed to stage file: {}", e);
            ManifestFile::failed(logical_path, Some(partition_index), e.to_string())
        }
    }
}

fn try_stage(
    fs: &dyn EvidenceFs,
    extractor: &str,
    logical_path: &str,
    partition_index: u32,
    output_dir: &Path,
    dest_dir: &Path,
    dest_name: &str,
) -> std::io::Result<ManifestFile> {
    fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.join(dest_name);

    let written = fs.copy_to(logical_path, &dest)?;
    audit::log_evidence_read(extractor, logical_path, partition_index, written);

    let digests = digest_file(&dest)?;
    debug!(logical_path, dest = %dest.display(), sha256 = %digests.sha256, "Staged file");

    let extracted_path = relative_to(output_dir, &dest).unwrap_or_else(|| dest.to_string_lossy().to_string());

    Ok(ManifestFile {
        logical_path: logical_path.to_string(),
        extracted_path,
        size_bytes: digests.size_bytes,
        md5: Some(digests.md5),
        sha256: Some(digests.sha256),
        copy_status: CopyStatus::Ok,
        error_message: None,
        partition_index: Some(partition_index),
        inode: None,
        extra: Map::new(),
    })
}

/// Stage a SQLite database plus any `-wal`/`-journal`/`-shm` sidecars
///
/// Sidecars keep the database's staged name plus their suffix so SQLite
/// picks them up when the copy is opened. Returns the database entry
/// followed by one entry per sidecar found.
pub fn stage_sqlite_with_companions(
    fs: &dyn EvidenceFs,
    extractor: &str,
    logical_path: &str,
    partition_index: u32,
    output_dir: &Path,
    dest_dir: &Path,
    dest_name: &str,
) -> Vec<ManifestFile> {
    let main = stage_file(fs, extractor, logical_path, partition_index, output_dir, dest_dir, dest_name);
    if !main.is_ok() {
        return vec![main];
    }

    let mut entries = vec![main];
    for suffix in SQLITE_COMPANION_SUFFIXES {
        let companion = format!("{}{}", logical_path, suffix);
        if fs.file_size(&companion).is_err() {
            continue;
        }
        let entry = stage_file(
            fs,
            extractor,
            &companion,
            partition_index,
            output_dir,
            dest_dir,
            &format!("{}{}", dest_name, suffix),
        )
        .with_extra("companion_of", logical_path)
        .with_extra("companion_suffix", *suffix);
        entries.push(entry);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::MountedEvidence;
    use tempfile::TempDir;

    #[test]
    fn test_staged_file_name() {
        let a = staged_file_name("chrome_Default", 1, "Users/bob/AppData/Local/Google/Chrome/User Data/Default/History");
        let b = staged_file_name("chrome_Default", 1, "Users/alice/AppData/Local/Google/Chrome/User Data/Default/History");
        assert_ne!(a, b);
        assert!(a.starts_with("chrome_Default_p1_"));
        assert!(a.ends_with("_History"));
        assert_eq!(a.len(), "chrome_Default_p1_".len() + 8 + "_History".len());

        let odd = staged_file_name("edge_Profile 1", 2, "x\\y\\Web Data");
        assert!(odd.starts_with("edge_Profile_1_p2_"));
        assert!(odd.ends_with("_Web_Data"));
    }

    #[test]
    fn test_stage_with_companions_and_failure() {
        let evidence = TempDir::new().unwrap();
        let profile = evidence.path().join("Users/bob/Chrome/Default");
        fs::create_dir_all(&profile).unwrap();
        fs::write(profile.join("History"), b"SQLite format 3\0").unwrap();
        fs::write(profile.join("History-wal"), b"wal").unwrap();

        let out = TempDir::new().unwrap();
        let fs_handle = MountedEvidence::open(evidence.path()).unwrap();
        let dest_dir = out.path().join("files");

        let entries = stage_sqlite_with_companions(
            &fs_handle,
            "test",
            "Users/bob/Chrome/Default/History",
            0,
            out.path(),
            &dest_dir,
            "chrome_p0_abcd_History",
        );
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.is_ok()));
        assert_eq!(entries[0].extracted_path, "files/chrome_p0_abcd_History");
        assert_eq!(entries[1].extracted_path, "files/chrome_p0_abcd_History-wal");
        assert_eq!(entries[1].extra_str("companion_suffix"), Some("-wal"));
        assert_eq!(entries[0].size_bytes, 16);
        assert_eq!(entries[0].md5.as_ref().unwrap().len(), 32);

        let missing = stage_file(&fs_handle, "test", "Users/nobody/History", 0, out.path(), &dest_dir, "x");
        assert_eq!(missing.copy_status, CopyStatus::Error);
        assert!(missing.error_message.is_some());
    }
}
