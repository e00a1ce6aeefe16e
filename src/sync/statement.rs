//! Synchronized wrapper for repeatedly executed statements.

use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::Params;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::sync::db::SynchronizedDb;

/// One SQL statement bound to a [`SynchronizedDb`].
///
/// The wrapper owns only the SQL text; the prepared form lives in the
/// connection's prepared-statement cache and is picked up again on each
/// call. Read-only statements take a shared lock per call, everything else
/// takes exclusive, and an open transaction's lock covers both.
pub struct SynchronizedStatement {
    db: SynchronizedDb,
    sql: String,
    read_only: bool,
    closed: AtomicBool,
}

impl SynchronizedStatement {
    pub(crate) fn new(db: &SynchronizedDb, sql: &str) -> Self {
        SynchronizedStatement {
            db: db.clone(),
            sql: sql.to_owned(),
            read_only: is_read_only(sql),
            closed: AtomicBool::new(false),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> DbResult<()> {
        if self.is_closed() {
            return Err(DbError::StatementClosed {
                sql: self.sql.clone(),
            });
        }
        Ok(())
    }

    fn guarded<T>(
        &self,
        f: impl FnOnce(&mut rusqlite::CachedStatement<'_>) -> rusqlite::Result<T>,
    ) -> DbResult<T> {
        self.check_open()?;
        let run = |conn: &rusqlite::Connection| {
            let mut stmt = conn.prepare_cached(&self.sql)?;
            f(&mut stmt)
        };
        if self.read_only {
            self.db.guarded_read(run)
        } else {
            self.db.guarded_write(run)
        }
    }

    /// Execute, returning the affected row count.
    pub fn execute<P: Params>(&self, params: P) -> DbResult<usize> {
        self.guarded(|stmt| stmt.execute(params))
    }

    /// Execute an INSERT, returning the new rowid.
    pub fn execute_insert<P: Params>(&self, params: P) -> DbResult<i64> {
        self.check_open()?;
        self.db.guarded_write(|conn| {
            let mut stmt = conn.prepare_cached(&self.sql)?;
            stmt.insert(params)
        })
    }

    /// First column of the first row; a missing row is an error, matching
    /// lookups that must find their target.
    pub fn query_i64<P: Params>(&self, params: P) -> DbResult<i64> {
        self.guarded(|stmt| stmt.query_row(params, |row| row.get(0)))
    }

    /// Like [`SynchronizedStatement::query_i64`], but a missing row is 0.
    pub fn query_i64_or_zero<P: Params>(&self, params: P) -> DbResult<i64> {
        match self.query_i64(params) {
            Err(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows)) => Ok(0),
            other => other,
        }
    }

    /// Convenience for `SELECT COUNT(..)` statements.
    pub fn count<P: Params>(&self, params: P) -> DbResult<i64> {
        self.query_i64_or_zero(params)
    }

    pub fn query_string<P: Params>(&self, params: P) -> DbResult<String> {
        self.guarded(|stmt| stmt.query_row(params, |row| row.get(0)))
    }

    pub fn query_string_opt<P: Params>(&self, params: P) -> DbResult<Option<String>> {
        match self.query_string(params) {
            Err(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows)) => Ok(None),
            Ok(s) => Ok(Some(s)),
            Err(e) => Err(e),
        }
    }

    /// Close the statement. Idempotent; discards this SQL's entry in the
    /// connection's prepared cache, best effort.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let discarded = self.db.guarded_write(|conn| {
            conn.prepare_cached(&self.sql).map(|stmt| stmt.discard())
        });
        if let Err(e) = discarded {
            debug!(sql = %self.sql, "discarding prepared statement failed: {e}");
        }
    }
}

impl Drop for SynchronizedStatement {
    fn drop(&mut self) {
        if !self.is_closed() {
            debug!(sql = %self.sql, "statement dropped without close");
        }
    }
}

/// Trimmed, upper-cased SELECT prefix marks a statement read-only.
fn is_read_only(sql: &str) -> bool {
    sql.trim_start().to_uppercase().starts_with("SELECT")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_table() -> SynchronizedDb {
        let db = SynchronizedDb::open_in_memory().unwrap();
        db.exec("CREATE TABLE t (_id integer primary key autoincrement, v text)")
            .unwrap();
        db
    }

    #[test]
    fn select_prefix_detection() {
        assert!(is_read_only("SELECT 1"));
        assert!(is_read_only("  select v from t"));
        assert!(is_read_only("\n\tSeLeCt count(*) from t"));
        assert!(!is_read_only("INSERT INTO t VALUES (1)"));
        assert!(!is_read_only("UPDATE t SET v = 'x'"));
        assert!(!is_read_only("-- SELECT\nDELETE FROM t"));
    }

    #[test]
    fn execute_and_query_through_wrapper() {
        let db = db_with_table();
        let insert = db.compile("INSERT INTO t (v) VALUES (?1)").unwrap();
        assert!(!insert.is_read_only());
        let rowid = insert.execute_insert(["first"]).unwrap();
        assert_eq!(rowid, 1);
        insert.execute(["second"]).unwrap();

        let count = db.compile("SELECT COUNT(*) FROM t").unwrap();
        assert!(count.is_read_only());
        assert_eq!(count.count([]).unwrap(), 2);

        let lookup = db
            .compile("SELECT v FROM t WHERE _id = ?1")
            .unwrap();
        assert_eq!(lookup.query_string([1i64]).unwrap(), "first");
        assert_eq!(lookup.query_string_opt([99i64]).unwrap(), None);
        insert.close();
        count.close();
        lookup.close();
    }

    #[test]
    fn missing_row_is_an_error_unless_defaulted() {
        let db = db_with_table();
        let lookup = db.compile("SELECT _id FROM t WHERE v = ?1").unwrap();
        assert!(matches!(
            lookup.query_i64(["absent"]),
            Err(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        ));
        assert_eq!(lookup.query_i64_or_zero(["absent"]).unwrap(), 0);
        lookup.close();
    }

    #[test]
    fn close_is_idempotent_and_guards_use() {
        let db = db_with_table();
        let stmt = db.compile("SELECT COUNT(*) FROM t").unwrap();
        stmt.close();
        stmt.close();
        assert!(stmt.is_closed());
        assert!(matches!(
            stmt.query_i64([]),
            Err(DbError::StatementClosed { .. })
        ));
    }

    #[test]
    fn compile_rejects_bad_sql() {
        let db = db_with_table();
        assert!(db.compile("SELECT FROM WHERE").is_err());
    }
}
