//! Thread-synchronized access to a SQLite database.
//!
//! The catalogue is read and written from multiple threads at once. A
//! reentrant reader/writer [`Synchronizer`] coordinates threads above the
//! connection, [`SynchronizedDb`] takes the right lock for each call and
//! tracks the single explicit transaction, and [`SynchronizedStatement`] /
//! [`StatementCache`] carry the long-lived statement workflow on top.

pub mod cache;
pub mod db;
pub mod rows;
pub mod statement;
pub mod synchronizer;

pub use cache::StatementCache;
pub use db::{SchemaHooks, SynchronizedDb};
pub use rows::{RowRef, RowSet};
pub use statement::SynchronizedStatement;
pub use synchronizer::{LockKind, SyncLock, Synchronizer};
