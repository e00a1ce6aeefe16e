//! Error types for the storage layer.
//!
//! The synchronized wrapper and the migration engine return typed errors so
//! callers can tell lock misuse, transaction misuse, and failed upgrade
//! steps apart. `anyhow` is only used at the configuration edge.

use std::path::PathBuf;
use std::thread::ThreadId;

use thiserror::Error;

/// Errors from the reader/writer coordination layer.
#[derive(Debug, Error)]
pub enum LockError {
    /// A thread panicked while the synchronizer's internal state was held.
    #[error("lock state poisoned by a panicked thread")]
    Poisoned,
    /// Shared release from a thread that holds no shared lock.
    #[error("thread {0:?} holds no shared lock")]
    NotASharedHolder(ThreadId),
    /// Exclusive release from a thread that is not the writer.
    #[error("thread {0:?} does not hold the exclusive lock")]
    NotTheWriter(ThreadId),
}

/// Misuse of the single tracked transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("a transaction is already open")]
    AlreadyOpen,
    #[error("no transaction is open")]
    NotInTransaction,
    #[error("transaction ended with a lock other than the one that started it")]
    WrongLock,
    #[error("mutating statement inside a read-only transaction")]
    WriteInsideSharedTransaction,
}

/// A schema upgrade step that failed, identified by its version gate.
#[derive(Debug, Error)]
#[error("schema upgrade step {from} -> {to} failed: {source}")]
pub struct MigrationError {
    pub from: u32,
    pub to: u32,
    #[source]
    pub source: DbError,
}

impl MigrationError {
    pub(crate) fn at_step(from: u32, source: DbError) -> Self {
        MigrationError {
            from,
            to: from + 1,
            source,
        }
    }
}

/// Failure to open a database file.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("database busy after {attempts} open attempts: {source}")]
    Busy {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },
    #[error("database schema is newer than this build (found {found}, supported {supported})")]
    Downgrade { found: u32, supported: u32 },
    #[error("could not prepare {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite error while opening: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Umbrella error for synchronized database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("statement already closed: {sql}")]
    StatementClosed { sql: String },
}

pub type DbResult<T> = Result<T, DbError>;
