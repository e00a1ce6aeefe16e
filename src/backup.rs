//! Database file snapshots.
//!
//! Snapshots are advisory. They run before destructive work (schema
//! upgrades, bulk exports) and never block it; a failed copy is logged
//! and forgotten.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

/// Receives a copy request for the live database file.
///
/// Requests are advisory: implementations handle and log their own
/// failures rather than propagating them into the operation that asked
/// for the snapshot.
pub trait SnapshotHook: Send + Sync {
    fn snapshot(&self, db_path: &Path, label: &str);
}

/// Discards every snapshot request. Used for in-memory databases and
/// tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSnapshot;

impl SnapshotHook for NoSnapshot {
    fn snapshot(&self, _db_path: &Path, label: &str) {
        debug!(label, "snapshot skipped");
    }
}

/// Copies the database file into a backup directory, keeping one
/// previous generation per label as `{label}.bak`.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    backup_dir: PathBuf,
}

impl FileSnapshot {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        FileSnapshot { backup_dir: backup_dir.into() }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn copy_rotating(&self, db_path: &Path, label: &str) -> io::Result<u64> {
        fs::create_dir_all(&self.backup_dir)?;
        let target = self.backup_dir.join(label);
        if target.exists() {
            let previous = self.backup_dir.join(format!("{label}.bak"));
            // Only one previous generation is kept.
            let _ = fs::remove_file(&previous);
            fs::rename(&target, &previous)?;
        }
        fs::copy(db_path, &target)
    }
}

impl SnapshotHook for FileSnapshot {
    fn snapshot(&self, db_path: &Path, label: &str) {
        match self.copy_rotating(db_path, label) {
            Ok(bytes) => info!(label, bytes, "database snapshot written"),
            Err(error) => warn!(label, %error, "database snapshot failed"),
        }
    }
}

/// `{prefix}-{YYYYMMDD}` in UTC, for daily snapshot labels.
pub fn dated_label(prefix: &str) -> String {
    format!("{}-{}", prefix, Utc::now().format("%Y%m%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn file_snapshot_copies_and_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("library.db");
        fs::write(&db_path, b"first").unwrap();

        let hook = FileSnapshot::new(dir.path().join("backups"));
        hook.snapshot(&db_path, "DbUpgrade-1-2");
        let target = dir.path().join("backups").join("DbUpgrade-1-2");
        assert_eq!(fs::read(&target).unwrap(), b"first");

        fs::write(&db_path, b"second").unwrap();
        hook.snapshot(&db_path, "DbUpgrade-1-2");
        assert_eq!(fs::read(&target).unwrap(), b"second");
        let rotated = dir.path().join("backups").join("DbUpgrade-1-2.bak");
        assert_eq!(fs::read(&rotated).unwrap(), b"first");
    }

    #[test]
    fn snapshot_of_missing_file_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let hook = FileSnapshot::new(dir.path().join("backups"));
        // Must not panic or propagate.
        hook.snapshot(&dir.path().join("no-such.db"), "DbUpgrade-1-2");
        assert!(!dir.path().join("backups").join("DbUpgrade-1-2").exists());
    }

    #[test]
    fn dated_labels_are_prefix_plus_day() {
        let label = dated_label("DbExport");
        assert!(label.starts_with("DbExport-"));
        assert_eq!(label.len(), "DbExport-".len() + 8);
        assert!(label["DbExport-".len()..].chars().all(|c| c.is_ascii_digit()));
    }
}
