//! The catalogue store: one context object wiring together the
//! synchronized database, the upgrade engine, and a statement cache.
//!
//! Collaborators receive a [`CatalogStore`] (or a handle cloned from its
//! [`SynchronizedDb`]) instead of reaching for process-wide state.

pub mod covers;

use std::fs;
use std::path::Path;

use tracing::info;

use crate::backup::{dated_label, FileSnapshot, NoSnapshot, SnapshotHook};
use crate::error::{DbResult, OpenError};
use crate::schema::catalog::check_definitions;
use crate::schema::history::COLLATION;
use crate::schema::upgrade::{UpgradeEngine, UpgradeReport, DB_VERSION};
use crate::sync::{StatementCache, SynchronizedDb};

pub use covers::CoverStore;

/// File name of the catalogue database inside the data directory.
pub const CATALOGUE_DB_NAME: &str = "book_catalogue.db";

pub struct CatalogStore {
    db: SynchronizedDb,
    engine: UpgradeEngine,
    statements: StatementCache,
}

impl CatalogStore {
    /// Open the catalogue at `path`, creating or upgrading the schema as
    /// needed. Pre-migration snapshots go through `snapshot`.
    pub fn open(path: &Path, snapshot: Box<dyn SnapshotHook>) -> Result<CatalogStore, OpenError> {
        Self::open_with_engine(Some(path), UpgradeEngine::new(snapshot))
    }

    /// Open the catalogue inside `data_dir` with the conventional layout:
    /// `book_catalogue.db`, `backups/` for snapshot copies, `covers/` for
    /// cover image files.
    pub fn open_in_dir(data_dir: &Path) -> Result<CatalogStore, OpenError> {
        fs::create_dir_all(data_dir).map_err(|source| OpenError::Io {
            path: data_dir.to_path_buf(),
            source,
        })?;
        let engine = UpgradeEngine::new(Box::new(FileSnapshot::new(data_dir.join("backups"))))
            .with_covers_dir(data_dir.join("covers"));
        Self::open_with_engine(Some(&data_dir.join(CATALOGUE_DB_NAME)), engine)
    }

    /// Throwaway private store, mostly for tests and tooling.
    pub fn open_in_memory() -> Result<CatalogStore, OpenError> {
        Self::open_with_engine(None, UpgradeEngine::new(Box::new(NoSnapshot)))
    }

    fn open_with_engine(
        path: Option<&Path>,
        engine: UpgradeEngine,
    ) -> Result<CatalogStore, OpenError> {
        #[cfg(debug_assertions)]
        {
            if let Err(problem) = check_definitions() {
                panic!("schema definitions inconsistent: {problem}");
            }
        }
        let db = SynchronizedDb::open_versioned(path, DB_VERSION, &engine)?;
        let statements = StatementCache::new(&db);
        if db.was_created() {
            info!(version = DB_VERSION, "catalogue created");
        }
        Ok(CatalogStore { db, engine, statements })
    }

    pub fn db(&self) -> &SynchronizedDb {
        &self.db
    }

    /// Store-wide registry for long-lived statements.
    pub fn statements(&self) -> &StatementCache {
        &self.statements
    }

    /// True when this open created the schema from scratch.
    pub fn is_new_install(&self) -> bool {
        self.db.was_created()
    }

    /// What the upgrade did, when this open walked an older file forward.
    pub fn upgrade_report(&self) -> Option<UpgradeReport> {
        self.engine.report()
    }

    /// Whether the configured text collation distinguishes case.
    pub fn collation_case_sensitive(&self) -> DbResult<bool> {
        self.db.collation_is_case_sensitive(COLLATION)
    }

    /// Request a dated export copy of the database file through the
    /// snapshot hook. Returns the label used; `None` for an in-memory
    /// store.
    pub fn export_snapshot(&self) -> Option<String> {
        let path = self.db.path()?;
        let label = dated_label("DbExport");
        self.engine.snapshot_hook().snapshot(path, &label);
        Some(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_is_fresh() {
        let store = CatalogStore::open_in_memory().unwrap();
        assert!(store.is_new_install());
        assert!(store.upgrade_report().is_none());
        // NOCASE compares case-insensitively.
        assert!(!store.collation_case_sensitive().unwrap());
        assert!(store.export_snapshot().is_none());

        let count = store
            .statements()
            .get_or_compile("books_count", || "Select Count(*) From books".to_string())
            .unwrap();
        assert_eq!(count.count([]).unwrap(), 0);
    }

    #[test]
    fn directory_layout_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("shelfdb");
        {
            let store = CatalogStore::open_in_dir(&data).unwrap();
            assert!(store.is_new_install());
            assert!(data.join(CATALOGUE_DB_NAME).exists());
            store.db().set_schema_version(82).unwrap();
        }
        {
            let store = CatalogStore::open_in_dir(&data).unwrap();
            assert!(!store.is_new_install());
            let report = store.upgrade_report().unwrap();
            assert_eq!((report.from, report.to), (82, DB_VERSION));
            // The pre-migration copy landed in backups/.
            assert!(data.join("backups").join("DbUpgrade-82-83").exists());
        }
        {
            let store = CatalogStore::open_in_dir(&data).unwrap();
            assert!(store.upgrade_report().is_none());
        }
    }

    #[test]
    fn export_snapshot_writes_a_dated_copy() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("shelfdb");
        let store = CatalogStore::open_in_dir(&data).unwrap();
        let label = store.export_snapshot().unwrap();
        assert!(label.starts_with("DbExport-"));
        assert!(data.join("backups").join(&label).exists());
    }
}
