//! The catalogue schema, past and present.
//!
//! [`catalog`] declares the current tables through the [`TableDefinition`]
//! model, [`history`] keeps the verbatim DDL of every shape that ever
//! shipped, and [`UpgradeEngine`] walks old files forward gate by gate.
//! [`info`] reads the live shape of a table back out of SQLite.

pub mod catalog;
pub mod column;
pub mod history;
pub mod info;
pub mod table;
pub mod upgrade;

pub use column::{ColumnDefinition, ColumnType, References};
pub use info::{ColumnInfo, TableInfo};
pub use table::{ForeignKey, IndexDefinition, TableDefinition, TableKind};
pub use upgrade::{UpgradeEngine, UpgradeReport, DB_VERSION};
