//! Runtime introspection of a table's actual shape via `PRAGMA table_info`.
//!
//! Upgrade steps consult this rather than the static catalogue, since a
//! half-migrated file can hold any historical shape.

use crate::error::DbResult;
use crate::sync::SynchronizedDb;

/// One row of `PRAGMA table_info`.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub position: i64,
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    table: String,
    columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn load(db: &SynchronizedDb, table: &str) -> DbResult<TableInfo> {
        let columns = db.query_map(&format!("PRAGMA table_info({table})"), [], |row| {
            Ok(ColumnInfo {
                position: row.get(0)?,
                name: row.get(1)?,
                type_name: row.get(2)?,
                not_null: row.get::<_, i64>(3)? != 0,
                default: row.get(4)?,
                primary_key: row.get::<_, i64>(5)? != 0,
            })
        })?;
        Ok(TableInfo { table: table.to_owned(), columns })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Lookup by name, case-insensitively; SQLite treats `Title` and
    /// `title` as the same column.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_shape_of_a_live_table() {
        let db = SynchronizedDb::open_in_memory().unwrap();
        db.exec(
            "create table sample (_id integer primary key autoincrement, \
             title text not null, pages int, language text default '')",
        )
        .unwrap();

        let info = TableInfo::load(&db, "sample").unwrap();
        assert_eq!(info.table(), "sample");
        assert_eq!(info.columns().len(), 4);
        assert!(info.has_column("TITLE"));
        assert!(!info.has_column("missing"));

        let id = info.column("_id").unwrap();
        assert!(id.primary_key);
        let title = info.column("title").unwrap();
        assert!(title.not_null);
        assert_eq!(title.type_name, "text");
        let language = info.column("language").unwrap();
        assert_eq!(language.default.as_deref(), Some("''"));
    }

    #[test]
    fn missing_table_reads_as_empty() {
        let db = SynchronizedDb::open_in_memory().unwrap();
        let info = TableInfo::load(&db, "nowhere").unwrap();
        assert!(info.is_empty());
    }
}
