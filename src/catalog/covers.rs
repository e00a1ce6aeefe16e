//! Blob cache for scaled cover images.
//!
//! Covers live in their own database file next to the catalogue. The cache
//! is disposable: when the file cannot be opened it is moved aside and
//! recreated, and if even that fails the store runs disabled, with every
//! operation a cheap no-op. Losing cached covers is acceptable; failing a
//! catalogue open over them is not.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::{debug, error, info, warn};

use crate::error::{DbError, DbResult, MigrationError, OpenError};
use crate::schema::column::{ColumnDefinition, ColumnType};
use crate::schema::table::{IndexDefinition, TableDefinition, TableKind};
use crate::sync::{LockKind, SchemaHooks, StatementCache, SyncLock, SynchronizedDb};

pub const COVERS_DB_NAME: &str = "covers.db";
pub const COVERS_VERSION: u32 = 1;

/// Timestamps are stored as text and compared as text, so the format must
/// sort chronologically.
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub static COVER_ID: ColumnDefinition =
    ColumnDefinition::new("_id", ColumnType::Integer).primary_key();
pub static COVER_TYPE: ColumnDefinition =
    ColumnDefinition::new("type", ColumnType::Text).not_null();
pub static COVER_IMAGE: ColumnDefinition =
    ColumnDefinition::new("image", ColumnType::Blob).not_null();
pub static COVER_DATE: ColumnDefinition = ColumnDefinition::new("date", ColumnType::DateTime)
    .not_null()
    .default_expr("current_timestamp");
pub static COVER_WIDTH: ColumnDefinition =
    ColumnDefinition::new("width", ColumnType::Integer).not_null();
pub static COVER_HEIGHT: ColumnDefinition =
    ColumnDefinition::new("height", ColumnType::Integer).not_null();
pub static COVER_SIZE: ColumnDefinition =
    ColumnDefinition::new("size", ColumnType::Integer).not_null();
pub static COVER_FILENAME: ColumnDefinition =
    ColumnDefinition::new("filename", ColumnType::Text);

pub static COVER_IMAGES: TableDefinition = TableDefinition {
    name: "image",
    alias: "img",
    kind: TableKind::Standard,
    columns: &[
        &COVER_ID,
        &COVER_TYPE,
        &COVER_IMAGE,
        &COVER_DATE,
        &COVER_WIDTH,
        &COVER_HEIGHT,
        &COVER_SIZE,
        &COVER_FILENAME,
    ],
    primary_key: &[],
    foreign_keys: &[],
    indexes: &[
        IndexDefinition { unique: true, columns: &[&COVER_ID], collated: false },
        IndexDefinition { unique: true, columns: &[&COVER_FILENAME], collated: false },
        IndexDefinition { unique: true, columns: &[&COVER_FILENAME, &COVER_DATE], collated: false },
    ],
};

struct CoversSchema;

impl SchemaHooks for CoversSchema {
    fn on_create(&self, db: &SynchronizedDb) -> Result<(), MigrationError> {
        COVER_IMAGES
            .create_all(db, true)
            .map_err(|e| MigrationError { from: 0, to: COVERS_VERSION, source: e })
    }

    fn on_upgrade(
        &self,
        db: &SynchronizedDb,
        old_version: u32,
        new_version: u32,
    ) -> Result<(), MigrationError> {
        // Cached images carry no state worth migrating; any future shape
        // change just starts the cache over.
        let wrap = |e: DbError| MigrationError { from: old_version, to: new_version, source: e };
        COVER_IMAGES.drop_if_exists(db).map_err(wrap)?;
        COVER_IMAGES.create_all(db, true).map_err(wrap)
    }
}

struct CoverDb {
    db: SynchronizedDb,
    statements: StatementCache,
}

struct CoverInner {
    db: Option<CoverDb>,
    handles: AtomicUsize,
}

/// Handle on the cover cache. Clones share one connection; an explicit
/// handle count closes the statement cache when the last clone drops.
pub struct CoverStore {
    inner: Arc<CoverInner>,
}

impl CoverStore {
    /// Open (or create) the cache at `path`. Never fails: a file that
    /// cannot be opened is renamed aside and recreated, and if the retry
    /// fails too the store comes up disabled.
    pub fn open(path: &Path) -> CoverStore {
        CoverStore {
            inner: Arc::new(CoverInner {
                db: open_or_recover(path),
                handles: AtomicUsize::new(1),
            }),
        }
    }

    /// False when open failed twice and the cache is running disabled.
    pub fn is_enabled(&self) -> bool {
        self.inner.db.is_some()
    }

    /// Live handle count, for diagnostics.
    pub fn handles(&self) -> usize {
        self.inner.handles.load(Ordering::Relaxed)
    }

    /// Insert or update the image stored under `filename`, refreshing its
    /// timestamp.
    pub fn save_cover(
        &self,
        filename: &str,
        image: &[u8],
        width: i64,
        height: i64,
    ) -> DbResult<()> {
        let Some(active) = &self.inner.db else {
            return Ok(());
        };
        let exists = active.statements.get_or_compile("covers_exists", || {
            format!(
                "Select Count({}) From {} Where {} = ?1",
                COVER_ID.name, COVER_IMAGES.name, COVER_FILENAME.name
            )
        })?;
        let now = Utc::now().format(DATE_FORMAT).to_string();
        let lock = active.db.begin_transaction(LockKind::Exclusive)?;
        let outcome = (|| -> DbResult<()> {
            if exists.count([filename])? == 0 {
                active.db.exec_with_params(
                    &COVER_IMAGES.insert_sql(&[
                        &COVER_FILENAME,
                        &COVER_IMAGE,
                        &COVER_DATE,
                        &COVER_TYPE,
                        &COVER_WIDTH,
                        &COVER_HEIGHT,
                        &COVER_SIZE,
                    ]),
                    params![filename, image, now, "T", width, height, image.len() as i64],
                )?;
            } else {
                active.db.exec_with_params(
                    &format!(
                        "Update {} Set {} = ?1, {} = ?2, {} = ?3, {} = ?4, {} = ?5 Where {} = ?6",
                        COVER_IMAGES.name,
                        COVER_IMAGE.name,
                        COVER_DATE.name,
                        COVER_WIDTH.name,
                        COVER_HEIGHT.name,
                        COVER_SIZE.name,
                        COVER_FILENAME.name
                    ),
                    params![image, now, width, height, image.len() as i64, filename],
                )?;
            }
            Ok(())
        })();
        finish_transaction(&active.db, lock, outcome)
    }

    /// The stored blob, but only when its timestamp is strictly newer than
    /// `newer_than`. Stale or missing entries read as `None`.
    pub fn get_cover(
        &self,
        filename: &str,
        newer_than: DateTime<Utc>,
    ) -> DbResult<Option<Vec<u8>>> {
        let Some(active) = &self.inner.db else {
            return Ok(None);
        };
        let since = newer_than.format(DATE_FORMAT).to_string();
        active.db.query_row_opt(
            &format!(
                "Select {} From {} Where {} = ?1 And {} > ?2",
                COVER_IMAGE.name, COVER_IMAGES.name, COVER_FILENAME.name, COVER_DATE.name
            ),
            params![filename, since],
            |row| row.get(0),
        )
    }

    /// Delete every cached size of one cover (filenames are
    /// `{key}.thumb.{w}x{h}.jpg`, so a prefix match catches them all).
    pub fn delete_cover(&self, filename_prefix: &str) -> DbResult<()> {
        let Some(active) = &self.inner.db else {
            return Ok(());
        };
        let delete = active.statements.get_or_compile("covers_delete", || {
            format!(
                "Delete From {} Where {} LIKE ?1",
                COVER_IMAGES.name, COVER_FILENAME.name
            )
        })?;
        let lock = active.db.begin_transaction(LockKind::Exclusive)?;
        let outcome = delete.execute([format!("{filename_prefix}%")]).map(|_| ());
        finish_transaction(&active.db, lock, outcome)
    }

    /// Remove every entry whose filename is `{uuid}.{anything}`. The uuid
    /// goes in as a bound parameter; imported files can carry arbitrary
    /// bytes in theirs.
    pub fn purge_uuid(&self, uuid: &str) -> DbResult<()> {
        let Some(active) = &self.inner.db else {
            return Ok(());
        };
        active.db.exec_with_params(
            &format!(
                "Delete From {} Where {} glob ?1",
                COVER_IMAGES.name, COVER_FILENAME.name
            ),
            [format!("{uuid}.*")],
        )?;
        Ok(())
    }

    pub fn erase_all(&self) -> DbResult<()> {
        let Some(active) = &self.inner.db else {
            return Ok(());
        };
        let erase = active
            .statements
            .get_or_compile("covers_erase", || format!("Delete From {}", COVER_IMAGES.name))?;
        erase.execute([])?;
        Ok(())
    }

    pub fn count(&self) -> DbResult<i64> {
        let Some(active) = &self.inner.db else {
            return Ok(0);
        };
        let found = active.db.query_row_opt(
            &format!("Select Count(*) From {}", COVER_IMAGES.name),
            [],
            |row| row.get(0),
        )?;
        Ok(found.unwrap_or(0))
    }

    /// Refresh the query planner's statistics. No vacuum: that is a full
    /// rebuild and this file can get large.
    pub fn analyze(&self) -> DbResult<()> {
        let Some(active) = &self.inner.db else {
            return Ok(());
        };
        active.db.analyze()
    }
}

impl Clone for CoverStore {
    fn clone(&self) -> Self {
        self.inner.handles.fetch_add(1, Ordering::Relaxed);
        CoverStore { inner: Arc::clone(&self.inner) }
    }
}

impl Drop for CoverStore {
    fn drop(&mut self) {
        if self.inner.handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(active) = &self.inner.db {
                active.statements.close_all();
                debug!("last covers handle dropped, statement cache closed");
            }
        }
    }
}

fn finish_transaction(
    db: &SynchronizedDb,
    lock: SyncLock<'_>,
    outcome: DbResult<()>,
) -> DbResult<()> {
    let flagged = match &outcome {
        Ok(()) => db.set_transaction_successful(),
        Err(_) => Ok(()),
    };
    let ended = db.end_transaction(lock);
    outcome?;
    flagged?;
    ended
}

fn open_or_recover(path: &Path) -> Option<CoverDb> {
    match open_once(path) {
        Ok(db) => Some(db),
        Err(error) => {
            error!(path = %path.display(), %error, "covers database failed to open");
            let dead = dead_path(path);
            if let Err(rename_error) = fs::rename(path, &dead) {
                warn!(%rename_error, "could not move broken covers database aside");
            }
            match open_once(path) {
                Ok(db) => {
                    info!(dead = %dead.display(), "covers database recreated");
                    Some(db)
                }
                Err(error) => {
                    error!(%error, "covers database unavailable, cache disabled");
                    None
                }
            }
        }
    }
}

fn open_once(path: &Path) -> Result<CoverDb, OpenError> {
    let db = SynchronizedDb::open_versioned(Some(path), COVERS_VERSION, &CoversSchema)?;
    let statements = StatementCache::new(&db);
    Ok(CoverDb { db, statements })
}

fn dead_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".dead");
    PathBuf::from(name)
}
