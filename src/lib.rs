#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! shelfdb - embedded storage engine for a personal book catalogue
//!
//! shelfdb wraps a single SQLite file behind a thread-synchronized access
//! layer and carries the catalogue's schema from any version ever shipped
//! up to the current one. It is the storage half of a book collection
//! manager: the data access objects, import/export and UI live above it.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - **[`sync`]**: Thread-synchronized SQLite access
//!   - `synchronizer`: reentrant readers/writer lock above the connection
//!   - `db`: locking connection wrapper, transactions, versioned open
//!   - `statement` / `rows`: synchronized statements and materialized rows
//!   - `cache`: named registry of long-lived statements
//!
//! - **[`schema`]**: The catalogue schema, past and present
//!   - `catalog`: current tables as `'static` definitions
//!   - `history`: frozen DDL of every historical shape
//!   - `upgrade`: the creation hooks and the gate-by-gate upgrade ladder
//!   - `info`: live table introspection (`PRAGMA table_info`)
//!
//! - **[`catalog`]**: Store context objects
//!   - `CatalogStore`: database + upgrade engine + statement cache
//!   - `covers`: ref-counted blob cache for scaled cover images
//!
//! - **[`backup`]**: Pre-migration and export snapshot collaborators
//!
//! - **[`config`]**: Configuration management
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use shelfdb::CatalogStore;
//!
//! // Open or create the catalogue under a data directory. An old file is
//! // snapshotted into backups/ and upgraded in place.
//! let store = CatalogStore::open_in_dir("~/.shelfdb".as_ref())?;
//!
//! if let Some(report) = store.upgrade_report() {
//!     println!("upgraded {} -> {}\n{}", report.from, report.to, report.message);
//! }
//!
//! let count = store
//!     .statements()
//!     .get_or_compile("books_count", || "Select Count(*) From books".into())?;
//! println!("{} books", count.count([])?);
//! ```
//!
//! ## Explicit transactions
//!
//! ```rust,ignore
//! use shelfdb::{CatalogStore, LockKind};
//!
//! let store = CatalogStore::open_in_memory()?;
//! let db = store.db();
//!
//! let tx = db.begin_transaction(LockKind::Exclusive)?;
//! db.exec("Insert Into books (title) Values ('Dune')")?;
//! db.set_transaction_successful()?;
//! db.end_transaction(tx)?;
//! ```

pub mod backup;
pub mod catalog;
pub mod config;
pub mod error;
pub mod schema;
pub mod sync;

// =============================================================================
// Configuration
// =============================================================================

pub use config::ShelfConfig;

// Shared file info types (used by config and diagnostics)
pub use config::{format_size, get_catalogue_info, get_covers_info, CatalogueInfo, CoversInfo};

// =============================================================================
// Store context objects
// =============================================================================

pub use catalog::{CatalogStore, CoverStore, CATALOGUE_DB_NAME};

// =============================================================================
// Synchronized access layer
// =============================================================================

pub use sync::{
    LockKind, RowRef, RowSet, SchemaHooks, StatementCache, SyncLock, SynchronizedDb,
    SynchronizedStatement, Synchronizer,
};

// =============================================================================
// Schema model and upgrade engine
// =============================================================================

pub use schema::{
    ColumnDefinition, ColumnType, TableDefinition, TableInfo, UpgradeEngine, UpgradeReport,
    DB_VERSION,
};

// =============================================================================
// Snapshots and errors
// =============================================================================

pub use backup::{dated_label, FileSnapshot, NoSnapshot, SnapshotHook};

pub use error::{
    DbError, DbResult, LockError, MigrationError, OpenError, TransactionError,
};
