//! Column descriptors for the declarative schema model.
//!
//! A [`ColumnDefinition`] is a `'static` value built once at startup; the
//! builder methods are `const fn` so the whole catalog can live in statics.
//! Rendering is deterministic and matches the column text the storage layer
//! has always emitted.

use std::fmt;

/// SQL type keyword a column is declared with.
///
/// `Real` renders as `float` and `Boolean` as `boolean`: both are historical
/// spellings already shipped in the on-disk DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Text,
    Real,
    Boolean,
    Date,
    DateTime,
    Blob,
}

impl ColumnType {
    pub const fn as_sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Text => "text",
            ColumnType::Real => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Blob => "blob",
        }
    }
}

/// Referential clause carried on a foreign-key column.
///
/// Enforcement stays at the engine default (off); the clause documents the
/// relationship and keeps the generated DDL identical to the shipped text.
#[derive(Debug, Clone, Copy)]
pub struct References {
    pub table: &'static str,
    /// `ON DELETE ... ON UPDATE ...` text, empty when the historical DDL
    /// carried none.
    pub actions: &'static str,
}

/// One column of a table definition.
#[derive(Debug, Clone, Copy)]
pub struct ColumnDefinition {
    pub name: &'static str,
    pub kind: ColumnType,
    not_null: bool,
    default: Option<&'static str>,
    primary_key: bool,
    references: Option<References>,
}

impl ColumnDefinition {
    pub const fn new(name: &'static str, kind: ColumnType) -> Self {
        ColumnDefinition {
            name,
            kind,
            not_null: false,
            default: None,
            primary_key: false,
            references: None,
        }
    }

    pub const fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Default expression, rendered verbatim after `default `.
    pub const fn default_expr(mut self, expr: &'static str) -> Self {
        self.default = Some(expr);
        self
    }

    pub const fn default_empty_string(self) -> Self {
        self.default_expr("''")
    }

    /// Marks the rowid alias column; renders as
    /// `name integer primary key autoincrement` regardless of `kind`.
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub const fn references(mut self, table: &'static str, actions: &'static str) -> Self {
        self.references = Some(References { table, actions });
        self
    }

    pub const fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// Column text for a CREATE TABLE statement. With `with_constraints`
    /// false only the name and type are emitted, the form the temporary
    /// booklist tables are built with.
    pub fn definition(&self, with_constraints: bool) -> String {
        if self.primary_key {
            return format!("{} integer primary key autoincrement", self.name);
        }
        let mut sql = format!("{} {}", self.name, self.kind.as_sql());
        if with_constraints {
            if self.not_null {
                sql.push_str(" not null");
            }
            if let Some(default) = self.default {
                sql.push_str(" default ");
                sql.push_str(default);
            }
            if let Some(r) = self.references {
                sql.push_str(" REFERENCES ");
                sql.push_str(r.table);
                if !r.actions.is_empty() {
                    sql.push(' ');
                    sql.push_str(r.actions);
                }
            }
        }
        sql
    }
}

impl fmt::Display for ColumnDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
