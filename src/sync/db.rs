//! Locking wrapper around a single SQLite connection.
//!
//! Every read acquires a shared lock for the duration of the call and every
//! mutation acquires the exclusive lock, unless an explicit transaction is
//! open, in which case the transaction's lock covers the work. The native
//! connection itself sits behind a mutex, since SQLite handles are not
//! `Sync`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info, trace, warn};

use crate::error::{DbError, DbResult, LockError, MigrationError, OpenError, TransactionError};
use crate::sync::rows::RowSet;
use crate::sync::statement::SynchronizedStatement;
use crate::sync::synchronizer::{LockKind, SyncLock, Synchronizer};

const OPEN_RETRY_START: Duration = Duration::from_millis(10);
const OPEN_MAX_ATTEMPTS: u32 = 10;

/// Schema lifecycle callbacks for [`SynchronizedDb::open_versioned`].
pub trait SchemaHooks: Send + Sync {
    /// Build the full current schema on a freshly created database.
    fn on_create(&self, db: &SynchronizedDb) -> Result<(), MigrationError>;

    /// Walk the schema from `old_version` up to `new_version`.
    fn on_upgrade(
        &self,
        db: &SynchronizedDb,
        old_version: u32,
        new_version: u32,
    ) -> Result<(), MigrationError>;
}

#[derive(Default)]
struct TxState {
    current: Option<(LockKind, u64)>,
    successful: bool,
}

struct DbInner {
    conn: Mutex<Connection>,
    sync: Synchronizer,
    tx: Mutex<TxState>,
    collation_probe: Mutex<Option<bool>>,
    path: Option<PathBuf>,
    was_created: AtomicBool,
}

/// Handle to one synchronized database. Clones are cheap and share the
/// connection, the synchronizer, and the single tracked transaction.
#[derive(Clone)]
pub struct SynchronizedDb {
    inner: Arc<DbInner>,
}

impl SynchronizedDb {
    /// Open (creating if needed) with busy retries and PRAGMA tuning.
    pub fn open(path: &Path) -> Result<Self, OpenError> {
        let conn = open_with_retries(Some(path))?;
        Ok(Self::wrap(conn, Some(path.to_path_buf())))
    }

    pub fn open_in_memory() -> Result<Self, OpenError> {
        let conn = open_with_retries(None)?;
        Ok(Self::wrap(conn, None))
    }

    fn wrap(conn: Connection, path: Option<PathBuf>) -> Self {
        SynchronizedDb {
            inner: Arc::new(DbInner {
                conn: Mutex::new(conn),
                sync: Synchronizer::new(),
                tx: Mutex::new(TxState::default()),
                collation_probe: Mutex::new(None),
                path,
                was_created: AtomicBool::new(false),
            }),
        }
    }

    /// Open and bring the schema to `version` through `hooks`.
    ///
    /// `PRAGMA user_version` 0 means a fresh database and runs `on_create`;
    /// anything below `version` runs `on_upgrade`; anything above refuses
    /// to open. The hook and the version bump run inside one exclusive
    /// transaction, under a freshly held exclusive lock.
    pub fn open_versioned(
        path: Option<&Path>,
        version: u32,
        hooks: &dyn SchemaHooks,
    ) -> Result<Self, OpenError> {
        let db = match path {
            Some(p) => Self::open(p)?,
            None => Self::open_in_memory()?,
        };
        let guard = db.inner.sync.acquire_exclusive().map_err(DbError::from)?;
        let found = db.schema_version()?;
        match found {
            0 => {
                info!(version, path = ?path, "creating schema");
                db.run_schema_hook(version, |db| hooks.on_create(db))?;
                db.inner.was_created.store(true, Ordering::Release);
            }
            v if v < version => {
                info!(from = v, to = version, path = ?path, "upgrading schema");
                db.run_schema_hook(version, |db| hooks.on_upgrade(db, v, version))?;
            }
            v if v > version => {
                if let Err(e) = guard.release() {
                    debug!("releasing open lock failed: {e}");
                }
                return Err(OpenError::Downgrade {
                    found: v,
                    supported: version,
                });
            }
            _ => trace!(version, "schema already current"),
        }
        guard.release().map_err(DbError::from)?;
        Ok(db)
    }

    fn run_schema_hook(
        &self,
        version: u32,
        hook: impl FnOnce(&Self) -> Result<(), MigrationError>,
    ) -> Result<(), OpenError> {
        let tx = self.begin_transaction(LockKind::Exclusive)?;
        match hook(self) {
            Ok(()) => {
                self.set_schema_version(version)?;
                self.set_transaction_successful()?;
                self.end_transaction(tx)?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.end_transaction(tx) {
                    warn!("rollback after failed schema hook also failed: {rollback}");
                }
                Err(e.into())
            }
        }
    }

    /// Whether this handle's open created the schema from scratch.
    pub fn was_created(&self) -> bool {
        self.inner.was_created.load(Ordering::Acquire)
    }

    /// File path, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.inner.sync
    }

    /// Current `PRAGMA user_version`.
    pub fn schema_version(&self) -> DbResult<u32> {
        let v: i64 =
            self.guarded_read(|conn| conn.query_row("PRAGMA user_version", [], |row| row.get(0)))?;
        Ok(v as u32)
    }

    pub(crate) fn set_schema_version(&self, version: u32) -> DbResult<()> {
        self.guarded_write(|conn| conn.pragma_update(None, "user_version", version))
    }

    /// Modern SQLite rewrites sibling FK references on `ALTER TABLE
    /// RENAME`; rename-based rebuilds need the old semantics.
    pub(crate) fn set_legacy_alter_table(&self, on: bool) -> DbResult<()> {
        self.guarded_write(|conn| conn.pragma_update(None, "legacy_alter_table", on))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.inner.conn.lock().map_err(|_| LockError::Poisoned.into())
    }

    fn tx_state(&self) -> Result<MutexGuard<'_, TxState>, DbError> {
        self.inner.tx.lock().map_err(|_| LockError::Poisoned.into())
    }

    /// Run `f` under a shared lock, unless an open transaction already
    /// covers this call.
    pub(crate) fn guarded_read<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> DbResult<T> {
        let in_tx = self.tx_state()?.current.is_some();
        let _lock = if in_tx {
            None
        } else {
            Some(self.inner.sync.acquire_shared()?)
        };
        let conn = self.conn()?;
        Ok(f(&conn)?)
    }

    /// Run `f` under the exclusive lock. Inside an exclusive transaction
    /// the transaction's lock covers it; inside a shared transaction the
    /// mutation is refused.
    pub(crate) fn guarded_write<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> DbResult<T> {
        let tx_kind = self.tx_state()?.current.map(|(kind, _)| kind);
        let _lock = match tx_kind {
            Some(LockKind::Exclusive) => None,
            Some(LockKind::Shared) => {
                return Err(TransactionError::WriteInsideSharedTransaction.into())
            }
            None => Some(self.inner.sync.acquire_exclusive()?),
        };
        let conn = self.conn()?;
        Ok(f(&conn)?)
    }

    /// Statement construction happens under the exclusive lock, skipped
    /// inside any open transaction.
    fn guarded_compile<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> DbResult<T> {
        let in_tx = self.tx_state()?.current.is_some();
        let _lock = if in_tx {
            None
        } else {
            Some(self.inner.sync.acquire_exclusive()?)
        };
        let conn = self.conn()?;
        Ok(f(&conn)?)
    }

    /// Execute one mutating statement, returning the affected row count.
    pub fn exec(&self, sql: &str) -> DbResult<usize> {
        trace!(sql, "exec");
        self.guarded_write(|conn| conn.execute(sql, []))
    }

    pub fn exec_with_params<P: rusqlite::Params>(&self, sql: &str, params: P) -> DbResult<usize> {
        trace!(sql, "exec with params");
        self.guarded_write(|conn| conn.execute(sql, params))
    }

    /// Insert, returning the new rowid.
    pub fn insert<P: rusqlite::Params>(&self, sql: &str, params: P) -> DbResult<i64> {
        self.guarded_write(|conn| {
            conn.execute(sql, params)?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Query and materialize every row; no lock is held once this returns.
    pub fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> DbResult<RowSet> {
        trace!(sql, "query");
        self.guarded_read(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let width = columns.len();
            let mut rows = stmt.query(params)?;
            let mut data = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(row.get::<_, rusqlite::types::Value>(i)?);
                }
                data.push(values);
            }
            Ok(RowSet::new(columns, data))
        })
    }

    pub fn query_map<T, P, F>(&self, sql: &str, params: P, f: F) -> DbResult<Vec<T>>
    where
        P: rusqlite::Params,
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        self.guarded_read(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let collected = stmt.query_map(params, f)?.collect();
            collected
        })
    }

    /// Single-row query; a missing row maps to `None`.
    pub fn query_row_opt<T, P, F>(&self, sql: &str, params: P, f: F) -> DbResult<Option<T>>
    where
        P: rusqlite::Params,
        F: FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        match self.guarded_read(|conn| conn.query_row(sql, params, f)) {
            Err(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows)) => Ok(None),
            Ok(v) => Ok(Some(v)),
            Err(e) => Err(e),
        }
    }

    /// Compile a statement wrapper for repeated use. The SQL is validated
    /// here, so a bad statement fails at compile time rather than first use.
    pub fn compile(&self, sql: &str) -> DbResult<SynchronizedStatement> {
        self.guarded_compile(|conn| conn.prepare_cached(sql).map(|_| ()))?;
        Ok(SynchronizedStatement::new(self, sql))
    }

    /// Checks both the persistent and the temporary schema catalogs.
    pub fn table_exists(&self, name: &str) -> DbResult<bool> {
        let count: i64 = self.guarded_read(|conn| {
            conn.query_row(
                "SELECT (SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?1) + \
                 (SELECT COUNT(*) FROM sqlite_temp_master WHERE type='table' AND name = ?1)",
                [name],
                |row| row.get(0),
            )
        })?;
        Ok(count > 0)
    }

    pub fn analyze(&self) -> DbResult<()> {
        self.exec("analyze")?;
        Ok(())
    }

    /// Begin the single tracked transaction: `Shared` for read-only work,
    /// `Exclusive` for updates. The returned token must come back to
    /// [`SynchronizedDb::end_transaction`].
    pub fn begin_transaction(&self, kind: LockKind) -> DbResult<SyncLock<'_>> {
        let lock = match kind {
            LockKind::Shared => self.inner.sync.acquire_shared()?,
            LockKind::Exclusive => self.inner.sync.acquire_exclusive()?,
        };
        let mut tx = self.tx_state()?;
        if tx.current.is_some() {
            // The fresh lock drops, and with it its hold.
            return Err(TransactionError::AlreadyOpen.into());
        }
        {
            let conn = self.conn()?;
            conn.execute_batch("BEGIN")?;
        }
        tx.current = Some((kind, lock.id()));
        tx.successful = false;
        debug!(?kind, "transaction started");
        Ok(lock)
    }

    /// Flag the open transaction to commit at end.
    pub fn set_transaction_successful(&self) -> DbResult<()> {
        let mut tx = self.tx_state()?;
        if tx.current.is_none() {
            return Err(TransactionError::NotInTransaction.into());
        }
        tx.successful = true;
        Ok(())
    }

    /// End the transaction started with `lock`: commit if flagged
    /// successful, roll back otherwise. The tracked state is cleared before
    /// the lock is released.
    pub fn end_transaction(&self, lock: SyncLock<'_>) -> DbResult<()> {
        let commit = {
            let mut tx = self.tx_state()?;
            match tx.current {
                None => return Err(TransactionError::NotInTransaction.into()),
                Some((_, id)) if id != lock.id() => {
                    return Err(TransactionError::WrongLock.into())
                }
                Some(_) => {}
            }
            let commit = tx.successful;
            tx.current = None;
            tx.successful = false;
            commit
        };
        let finished = {
            let conn = self.conn()?;
            conn.execute_batch(if commit { "COMMIT" } else { "ROLLBACK" })
        };
        debug!(commit, "transaction ended");
        let released = lock.release();
        finished?;
        released?;
        Ok(())
    }

    /// Whether the tracked transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.tx_state().map(|tx| tx.current.is_some()).unwrap_or(false)
    }

    /// Determine once whether `collation` orders case-sensitively, by
    /// probing a scratch table. The scratch table never survives, and the
    /// first probe's answer is cached for the life of the handle.
    pub fn collation_is_case_sensitive(&self, collation: &str) -> DbResult<bool> {
        let mut cached = self
            .inner
            .collation_probe
            .lock()
            .map_err(|_| LockError::Poisoned)?;
        if let Some(answer) = *cached {
            return Ok(answer);
        }
        let answer = self.probe_collation(collation)?;
        *cached = Some(answer);
        Ok(answer)
    }

    fn probe_collation(&self, collation: &str) -> DbResult<bool> {
        self.exec("DROP TABLE If Exists collation_cs_check")?;
        let probed = (|| -> DbResult<bool> {
            self.exec("CREATE TEMPORARY TABLE collation_cs_check (t text, i integer)")?;
            self.exec("INSERT INTO collation_cs_check VALUES ('a', 1), ('A', 2)")?;
            let first: Option<String> = self.query_row_opt(
                &format!("SELECT t FROM collation_cs_check ORDER BY t{collation}, i"),
                [],
                |row| row.get(0),
            )?;
            Ok(!matches!(first.as_deref(), Some("a")))
        })();
        if let Err(e) = self.exec("DROP TABLE If Exists collation_cs_check") {
            warn!("dropping collation scratch table failed: {e}");
        }
        let sensitive = probed?;
        debug!(collation, sensitive, "collation probed");
        Ok(sensitive)
    }
}

fn open_with_retries(path: Option<&Path>) -> Result<Connection, OpenError> {
    let mut wait = OPEN_RETRY_START;
    let mut attempt = 1u32;
    loop {
        let opened = match path {
            Some(p) => Connection::open(p),
            None => Connection::open_in_memory(),
        };
        match opened.and_then(configure) {
            Ok(conn) => return Ok(conn),
            Err(e) if is_busy(&e) && attempt < OPEN_MAX_ATTEMPTS => {
                warn!(attempt, ?wait, "database busy on open, backing off");
                thread::sleep(wait);
                wait *= 2;
                attempt += 1;
            }
            Err(e) if is_busy(&e) => {
                return Err(OpenError::Busy {
                    attempts: attempt,
                    source: e,
                })
            }
            Err(e) => return Err(OpenError::Sqlite(e)),
        }
    }
}

fn configure(conn: Connection) -> rusqlite::Result<Connection> {
    // journal_mode returns the resulting mode as a row
    conn.query_row("PRAGMA journal_mode=WAL", [], |row| {
        row.get::<_, String>(0)
    })?;
    conn.execute_batch(
        "PRAGMA synchronous=NORMAL;
         PRAGMA cache_size=10000;
         PRAGMA temp_store=MEMORY;",
    )?;
    Ok(conn)
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}
