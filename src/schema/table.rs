//! Table, index, and foreign-key descriptors.
//!
//! Like the columns, these are immutable `'static` values; foreign-key edges
//! are plain references between table statics, resolved at compile time, so
//! join fragments can be derived instead of hand-written. Only the auxiliary
//! tables are ever *created* from this model; the historical tables come from
//! [`crate::schema::history`].

use crate::error::DbResult;
use crate::schema::column::ColumnDefinition;
use crate::schema::history::COLLATION;
use crate::sync::SynchronizedDb;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Standard,
    Temporary,
    /// FTS virtual table; columns render as bare names.
    Fts4,
}

/// One named index over a table's columns.
///
/// The index name is derived at render time as
/// `{table}_IX{position}_{first column}`.
#[derive(Debug, Clone, Copy)]
pub struct IndexDefinition {
    pub unique: bool,
    pub columns: &'static [&'static ColumnDefinition],
    /// Append the collation suffix to every indexed column.
    pub collated: bool,
}

/// Foreign-key edge from this (child) table to a parent table.
///
/// `columns` are the child-side columns, matched pairwise against the
/// parent's primary key.
#[derive(Debug, Clone, Copy)]
pub struct ForeignKey {
    pub parent: &'static TableDefinition,
    pub columns: &'static [&'static ColumnDefinition],
}

#[derive(Debug, Clone, Copy)]
pub struct TableDefinition {
    pub name: &'static str,
    pub alias: &'static str,
    pub kind: TableKind,
    pub columns: &'static [&'static ColumnDefinition],
    /// Composite primary key; empty when a column is the rowid alias.
    pub primary_key: &'static [&'static ColumnDefinition],
    pub foreign_keys: &'static [ForeignKey],
    pub indexes: &'static [IndexDefinition],
}

impl TableDefinition {
    /// `name alias`, for use in FROM clauses.
    pub fn ref_name(&self) -> String {
        format!("{} {}", self.name, self.alias)
    }

    /// `alias.column`.
    pub fn dot(&self, column: &ColumnDefinition) -> String {
        format!("{}.{}", self.alias, column.name)
    }

    pub fn create_sql(&self, with_constraints: bool) -> String {
        let mut sql = String::from("Create ");
        match self.kind {
            TableKind::Standard => {}
            TableKind::Temporary => sql.push_str("Temporary "),
            TableKind::Fts4 => sql.push_str("Virtual "),
        }
        sql.push_str("Table ");
        sql.push_str(self.name);
        if self.kind == TableKind::Fts4 {
            sql.push_str(" USING fts4");
        }
        sql.push_str(" (");
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            if self.kind == TableKind::Fts4 {
                sql.push_str(column.name);
            } else {
                sql.push_str(&column.definition(with_constraints));
            }
        }
        if !self.primary_key.is_empty() {
            sql.push_str(", PRIMARY KEY (");
            for (i, column) in self.primary_key.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(column.name);
            }
            sql.push(')');
        }
        sql.push(')');
        sql
    }

    fn index_sql(&self, position: usize, index: &IndexDefinition) -> String {
        let first = index.columns.first().map(|c| c.name).unwrap_or_default();
        let mut sql = String::from("Create ");
        if index.unique {
            sql.push_str("Unique ");
        }
        sql.push_str(&format!("Index {}_IX{}_{} on {} (", self.name, position + 1, first, self.name));
        for (i, column) in index.columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(column.name);
            if index.collated {
                sql.push_str(COLLATION);
            }
        }
        sql.push(')');
        sql
    }

    pub fn create(&self, db: &SynchronizedDb, with_constraints: bool) -> DbResult<()> {
        db.exec(&self.create_sql(with_constraints))?;
        Ok(())
    }

    pub fn create_indexes(&self, db: &SynchronizedDb) -> DbResult<()> {
        for (position, index) in self.indexes.iter().enumerate() {
            db.exec(&self.index_sql(position, index))?;
        }
        Ok(())
    }

    /// Create the table and its indexes.
    pub fn create_all(&self, db: &SynchronizedDb, with_constraints: bool) -> DbResult<()> {
        self.create(db, with_constraints)?;
        self.create_indexes(db)
    }

    pub fn drop_if_exists(&self, db: &SynchronizedDb) -> DbResult<()> {
        db.exec(&format!("Drop Table If Exists {}", self.name))?;
        Ok(())
    }

    /// Checks both the persistent and the temporary schema catalogs.
    pub fn exists(&self, db: &SynchronizedDb) -> DbResult<bool> {
        db.table_exists(self.name)
    }

    fn primary_key_columns(&self) -> Vec<&'static ColumnDefinition> {
        if !self.primary_key.is_empty() {
            return self.primary_key.to_vec();
        }
        self.columns
            .iter()
            .filter(|c| c.is_primary_key())
            .copied()
            .collect()
    }

    /// Predicate matching this table to `other` along the declared
    /// foreign-key edge, in either direction. `None` when no edge exists.
    pub fn fk_match(&self, other: &TableDefinition) -> Option<String> {
        if let Some(fk) = self
            .foreign_keys
            .iter()
            .find(|fk| fk.parent.name == other.name)
        {
            return Some(render_fk_predicate(fk.parent, self, fk.columns));
        }
        other
            .foreign_keys
            .iter()
            .find(|fk| fk.parent.name == self.name)
            .map(|fk| render_fk_predicate(self, other, fk.columns))
    }

    /// ` join other_name other_alias On (predicate)`, or `None` when the
    /// tables share no foreign-key edge.
    pub fn join(&self, other: &TableDefinition) -> Option<String> {
        self.fk_match(other)
            .map(|predicate| format!(" join {} On ({})", other.ref_name(), predicate))
    }

    /// `Insert Into name (a, b) Values (?1, ?2)` over the given columns.
    pub fn insert_sql(&self, columns: &[&ColumnDefinition]) -> String {
        let mut sql = format!("Insert Into {} (", self.name);
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(column.name);
        }
        sql.push_str(") Values (");
        for i in 0..columns.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&format!("?{}", i + 1));
        }
        sql.push(')');
        sql
    }
}

fn render_fk_predicate(
    parent: &TableDefinition,
    child: &TableDefinition,
    child_columns: &[&ColumnDefinition],
) -> String {
    parent
        .primary_key_columns()
        .iter()
        .zip(child_columns)
        .map(|(pk, col)| format!("{}.{} = {}.{}", parent.alias, pk.name, child.alias, col.name))
        .collect::<Vec<_>>()
        .join(" and ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::column::ColumnType;

    static ID: ColumnDefinition = ColumnDefinition::new("_id", ColumnType::Integer).primary_key();
    static NAME: ColumnDefinition = ColumnDefinition::new("name", ColumnType::Text).not_null();
    static PARENT_ID: ColumnDefinition = ColumnDefinition::new("parent", ColumnType::Integer);
    static SLOT: ColumnDefinition = ColumnDefinition::new("slot", ColumnType::Integer).not_null();

    static PARENT: TableDefinition = TableDefinition {
        name: "parents",
        alias: "p",
        kind: TableKind::Standard,
        columns: &[&ID, &NAME],
        primary_key: &[],
        foreign_keys: &[],
        indexes: &[IndexDefinition {
            unique: false,
            columns: &[&NAME],
            collated: true,
        }],
    };

    static CHILD: TableDefinition = TableDefinition {
        name: "children",
        alias: "c",
        kind: TableKind::Standard,
        columns: &[&PARENT_ID, &SLOT],
        primary_key: &[&PARENT_ID, &SLOT],
        foreign_keys: &[ForeignKey {
            parent: &PARENT,
            columns: &[&PARENT_ID],
        }],
        indexes: &[],
    };

    static SCRATCH: TableDefinition = TableDefinition {
        name: "scratch",
        alias: "sc",
        kind: TableKind::Temporary,
        columns: &[&NAME],
        primary_key: &[],
        foreign_keys: &[],
        indexes: &[],
    };

    static SEARCH: TableDefinition = TableDefinition {
        name: "search",
        alias: "search",
        kind: TableKind::Fts4,
        columns: &[&NAME],
        primary_key: &[],
        foreign_keys: &[],
        indexes: &[],
    };

    #[test]
    fn create_sql_covers_all_kinds() {
        assert_eq!(
            PARENT.create_sql(true),
            "Create Table parents (_id integer primary key autoincrement, name text not null)"
        );
        assert_eq!(
            CHILD.create_sql(false),
            "Create Table children (parent integer, slot integer, PRIMARY KEY (parent, slot))"
        );
        assert_eq!(SCRATCH.create_sql(true), "Create Temporary Table scratch (name text not null)");
        assert_eq!(SEARCH.create_sql(true), "Create Virtual Table search USING fts4 (name)");
    }

    #[test]
    fn index_names_carry_table_and_position() {
        assert_eq!(
            PARENT.index_sql(0, &PARENT.indexes[0]),
            format!("Create Index parents_IX1_name on parents (name{COLLATION})")
        );
    }

    #[test]
    fn fk_match_works_in_both_directions() {
        assert_eq!(CHILD.fk_match(&PARENT).as_deref(), Some("p._id = c.parent"));
        assert_eq!(PARENT.fk_match(&CHILD).as_deref(), Some("p._id = c.parent"));
        assert!(PARENT.fk_match(&SCRATCH).is_none());
        assert_eq!(
            PARENT.join(&CHILD).as_deref(),
            Some(" join children c On (p._id = c.parent)")
        );
    }

    #[test]
    fn insert_sql_numbers_placeholders() {
        assert_eq!(
            PARENT.insert_sql(&[&ID, &NAME]),
            "Insert Into parents (_id, name) Values (?1, ?2)"
        );
    }

    #[test]
    fn create_exists_drop_roundtrip() {
        let db = SynchronizedDb::open_in_memory().unwrap();
        assert!(!PARENT.exists(&db).unwrap());
        PARENT.create_all(&db, true).unwrap();
        assert!(PARENT.exists(&db).unwrap());
        PARENT.drop_if_exists(&db).unwrap();
        assert!(!PARENT.exists(&db).unwrap());
        // Dropping again is harmless.
        PARENT.drop_if_exists(&db).unwrap();
    }

    #[test]
    fn temporary_tables_show_up_in_exists() {
        let db = SynchronizedDb::open_in_memory().unwrap();
        SCRATCH.create(&db, true).unwrap();
        assert!(SCRATCH.exists(&db).unwrap());
    }
}
