//! The full catalogue schema as `'static` definitions.
//!
//! Column and table statics mirror what actually lives in a current
//! database file. The historical tables (books, authors, loans and so on)
//! are *created* from the frozen SQL in [`crate::schema::history`]; their
//! definitions here exist for joins, inserts, and introspection. The
//! auxiliary tables at the bottom (list node settings, styles, full-text
//! search) are created from this model.

use std::collections::HashSet;

use crate::schema::column::{ColumnDefinition, ColumnType};
use crate::schema::table::{ForeignKey, IndexDefinition, TableDefinition, TableKind};

// Shared across every rowid table.
pub static ID: ColumnDefinition = ColumnDefinition::new("_id", ColumnType::Integer).primary_key();

// authors
pub static FAMILY_NAME: ColumnDefinition =
    ColumnDefinition::new("family_name", ColumnType::Text).not_null();
pub static GIVEN_NAMES: ColumnDefinition =
    ColumnDefinition::new("given_names", ColumnType::Text).not_null();

// bookshelf
pub static BOOKSHELF_NAME: ColumnDefinition =
    ColumnDefinition::new("bookshelf", ColumnType::Text).not_null();

// books
pub static TITLE: ColumnDefinition = ColumnDefinition::new("title", ColumnType::Text).not_null();
pub static ISBN: ColumnDefinition = ColumnDefinition::new("isbn", ColumnType::Text);
pub static PUBLISHER: ColumnDefinition = ColumnDefinition::new("publisher", ColumnType::Text);
pub static DATE_PUBLISHED: ColumnDefinition =
    ColumnDefinition::new("date_published", ColumnType::Date);
pub static RATING: ColumnDefinition =
    ColumnDefinition::new("rating", ColumnType::Real).not_null().default_expr("0");
pub static READ: ColumnDefinition =
    ColumnDefinition::new("read", ColumnType::Boolean).not_null().default_expr("0");
pub static PAGES: ColumnDefinition = ColumnDefinition::new("pages", ColumnType::Integer);
pub static NOTES: ColumnDefinition = ColumnDefinition::new("notes", ColumnType::Text);
pub static LIST_PRICE: ColumnDefinition = ColumnDefinition::new("list_price", ColumnType::Text);
pub static ANTHOLOGY_MASK: ColumnDefinition =
    ColumnDefinition::new("anthology", ColumnType::Integer).not_null().default_expr("0");
pub static LOCATION: ColumnDefinition = ColumnDefinition::new("location", ColumnType::Text);
pub static READ_START: ColumnDefinition = ColumnDefinition::new("read_start", ColumnType::Date);
pub static READ_END: ColumnDefinition = ColumnDefinition::new("read_end", ColumnType::Date);
pub static FORMAT: ColumnDefinition = ColumnDefinition::new("format", ColumnType::Text);
pub static SIGNED: ColumnDefinition =
    ColumnDefinition::new("signed", ColumnType::Boolean).not_null().default_expr("0");
pub static DESCRIPTION: ColumnDefinition = ColumnDefinition::new("description", ColumnType::Text);
pub static GENRE: ColumnDefinition = ColumnDefinition::new("genre", ColumnType::Text);
pub static LANGUAGE: ColumnDefinition =
    ColumnDefinition::new("language", ColumnType::Text).default_empty_string();
pub static DATE_ADDED: ColumnDefinition =
    ColumnDefinition::new("date_added", ColumnType::DateTime).default_expr("current_timestamp");
pub static GOODREADS_BOOK_ID: ColumnDefinition =
    ColumnDefinition::new("goodreads_book_id", ColumnType::Integer);
pub static GOODREADS_LAST_SYNC_DATE: ColumnDefinition =
    ColumnDefinition::new("last_goodreads_sync_date", ColumnType::Date)
        .default_expr("'0000-00-00'");
pub static BOOK_UUID: ColumnDefinition = ColumnDefinition::new("book_uuid", ColumnType::Text)
    .not_null()
    .default_expr("(lower(hex(randomblob(16))))");
pub static LAST_UPDATE_DATE: ColumnDefinition =
    ColumnDefinition::new("last_update_date", ColumnType::DateTime)
        .not_null()
        .default_expr("current_timestamp");

// loan
pub static LOAN_BOOK: ColumnDefinition = ColumnDefinition::new("book", ColumnType::Integer)
    .references("books", "ON DELETE SET NULL ON UPDATE SET NULL");
pub static LOANED_TO: ColumnDefinition = ColumnDefinition::new("loaned_to", ColumnType::Text);

// anthology
pub static ANTH_BOOK: ColumnDefinition = ColumnDefinition::new("book", ColumnType::Integer)
    .references("books", "ON DELETE SET NULL ON UPDATE SET NULL");
pub static ANTH_AUTHOR: ColumnDefinition =
    ColumnDefinition::new("author", ColumnType::Integer).not_null().references("authors", "");
pub static ANTH_POSITION: ColumnDefinition = ColumnDefinition::new("position", ColumnType::Integer);

// series
pub static SERIES_NAME: ColumnDefinition =
    ColumnDefinition::new("series_name", ColumnType::Text).not_null();

// book_author
pub static BA_BOOK: ColumnDefinition = ColumnDefinition::new("book", ColumnType::Integer)
    .references("books", "ON DELETE CASCADE ON UPDATE CASCADE");
pub static BA_AUTHOR: ColumnDefinition = ColumnDefinition::new("author", ColumnType::Integer)
    .references("authors", "ON DELETE SET NULL ON UPDATE CASCADE");
pub static AUTHOR_POSITION: ColumnDefinition =
    ColumnDefinition::new("author_position", ColumnType::Integer).not_null();

// book_bookshelf_weak
pub static BBW_BOOK: ColumnDefinition = ColumnDefinition::new("book", ColumnType::Integer)
    .references("books", "ON DELETE SET NULL ON UPDATE SET NULL");
pub static BBW_BOOKSHELF: ColumnDefinition =
    ColumnDefinition::new("bookshelf", ColumnType::Integer)
        .references("bookshelf", "ON DELETE SET NULL ON UPDATE SET NULL");

// book_series
pub static BS_BOOK: ColumnDefinition = ColumnDefinition::new("book", ColumnType::Integer)
    .not_null()
    .references("books", "ON DELETE CASCADE ON UPDATE CASCADE");
pub static BS_SERIES: ColumnDefinition =
    ColumnDefinition::new("series_id", ColumnType::Integer).not_null().references("series", "");
pub static SERIES_NUM: ColumnDefinition = ColumnDefinition::new("series_num", ColumnType::Text);
pub static SERIES_POSITION: ColumnDefinition =
    ColumnDefinition::new("series_position", ColumnType::Integer);

// book_list_node_settings
pub static NODE_KIND: ColumnDefinition =
    ColumnDefinition::new("kind", ColumnType::Integer).not_null();
pub static NODE_ROOT_KEY: ColumnDefinition =
    ColumnDefinition::new("root_key", ColumnType::Text).not_null();

// book_list_styles
pub static STYLE: ColumnDefinition = ColumnDefinition::new("style", ColumnType::Blob).not_null();

// books_fts; declared types never reach the engine, virtual-table columns
// render as bare names.
pub static FTS_AUTHOR: ColumnDefinition = ColumnDefinition::new("author", ColumnType::Text);

pub static AUTHORS: TableDefinition = TableDefinition {
    name: "authors",
    alias: "a",
    kind: TableKind::Standard,
    columns: &[&ID, &FAMILY_NAME, &GIVEN_NAMES],
    primary_key: &[],
    foreign_keys: &[],
    indexes: &[],
};

pub static BOOKSHELF: TableDefinition = TableDefinition {
    name: "bookshelf",
    alias: "bsh",
    kind: TableKind::Standard,
    columns: &[&ID, &BOOKSHELF_NAME],
    primary_key: &[],
    foreign_keys: &[],
    indexes: &[],
};

pub static BOOKS: TableDefinition = TableDefinition {
    name: "books",
    alias: "b",
    kind: TableKind::Standard,
    columns: &[
        &ID,
        &TITLE,
        &ISBN,
        &PUBLISHER,
        &DATE_PUBLISHED,
        &RATING,
        &READ,
        &PAGES,
        &NOTES,
        &LIST_PRICE,
        &ANTHOLOGY_MASK,
        &LOCATION,
        &READ_START,
        &READ_END,
        &FORMAT,
        &SIGNED,
        &DESCRIPTION,
        &GENRE,
        &LANGUAGE,
        &DATE_ADDED,
        &GOODREADS_BOOK_ID,
        &GOODREADS_LAST_SYNC_DATE,
        &BOOK_UUID,
        &LAST_UPDATE_DATE,
    ],
    primary_key: &[],
    foreign_keys: &[],
    indexes: &[],
};

pub static LOAN: TableDefinition = TableDefinition {
    name: "loan",
    alias: "l",
    kind: TableKind::Standard,
    columns: &[&ID, &LOAN_BOOK, &LOANED_TO],
    primary_key: &[],
    foreign_keys: &[ForeignKey { parent: &BOOKS, columns: &[&LOAN_BOOK] }],
    indexes: &[],
};

pub static ANTHOLOGY: TableDefinition = TableDefinition {
    name: "anthology",
    alias: "an",
    kind: TableKind::Standard,
    columns: &[&ID, &ANTH_BOOK, &ANTH_AUTHOR, &TITLE, &ANTH_POSITION],
    primary_key: &[],
    foreign_keys: &[
        ForeignKey { parent: &BOOKS, columns: &[&ANTH_BOOK] },
        ForeignKey { parent: &AUTHORS, columns: &[&ANTH_AUTHOR] },
    ],
    indexes: &[],
};

pub static SERIES: TableDefinition = TableDefinition {
    name: "series",
    alias: "s",
    kind: TableKind::Standard,
    columns: &[&ID, &SERIES_NAME],
    primary_key: &[],
    foreign_keys: &[],
    indexes: &[],
};

pub static BOOK_AUTHOR: TableDefinition = TableDefinition {
    name: "book_author",
    alias: "ba",
    kind: TableKind::Standard,
    columns: &[&BA_BOOK, &BA_AUTHOR, &AUTHOR_POSITION],
    primary_key: &[&BA_BOOK, &AUTHOR_POSITION],
    foreign_keys: &[
        ForeignKey { parent: &BOOKS, columns: &[&BA_BOOK] },
        ForeignKey { parent: &AUTHORS, columns: &[&BA_AUTHOR] },
    ],
    indexes: &[],
};

pub static BOOK_BOOKSHELF_WEAK: TableDefinition = TableDefinition {
    name: "book_bookshelf_weak",
    alias: "bbsh",
    kind: TableKind::Standard,
    columns: &[&BBW_BOOK, &BBW_BOOKSHELF],
    primary_key: &[],
    foreign_keys: &[
        ForeignKey { parent: &BOOKS, columns: &[&BBW_BOOK] },
        ForeignKey { parent: &BOOKSHELF, columns: &[&BBW_BOOKSHELF] },
    ],
    indexes: &[],
};

pub static BOOK_SERIES: TableDefinition = TableDefinition {
    name: "book_series",
    alias: "bs",
    kind: TableKind::Standard,
    columns: &[&BS_BOOK, &BS_SERIES, &SERIES_NUM, &SERIES_POSITION],
    primary_key: &[&BS_BOOK, &SERIES_POSITION],
    foreign_keys: &[
        ForeignKey { parent: &BOOKS, columns: &[&BS_BOOK] },
        ForeignKey { parent: &SERIES, columns: &[&BS_SERIES] },
    ],
    indexes: &[],
};

pub static BOOK_LIST_NODE_SETTINGS: TableDefinition = TableDefinition {
    name: "book_list_node_settings",
    alias: "blns",
    kind: TableKind::Standard,
    columns: &[&ID, &NODE_KIND, &NODE_ROOT_KEY],
    primary_key: &[],
    foreign_keys: &[],
    indexes: &[IndexDefinition {
        unique: true,
        columns: &[&NODE_KIND, &NODE_ROOT_KEY],
        collated: false,
    }],
};

pub static BOOK_LIST_STYLES: TableDefinition = TableDefinition {
    name: "book_list_styles",
    alias: "bls",
    kind: TableKind::Standard,
    columns: &[&ID, &STYLE],
    primary_key: &[],
    foreign_keys: &[],
    indexes: &[],
};

pub static BOOKS_FTS: TableDefinition = TableDefinition {
    name: "books_fts",
    alias: "fts",
    kind: TableKind::Fts4,
    columns: &[
        &FTS_AUTHOR,
        &TITLE,
        &DESCRIPTION,
        &NOTES,
        &PUBLISHER,
        &GENRE,
        &LOCATION,
        &ISBN,
    ],
    primary_key: &[],
    foreign_keys: &[],
    indexes: &[],
};

/// Every table, in creation order.
pub static ALL_TABLES: &[&TableDefinition] = &[
    &AUTHORS,
    &BOOKSHELF,
    &BOOKS,
    &LOAN,
    &ANTHOLOGY,
    &SERIES,
    &BOOK_AUTHOR,
    &BOOK_BOOKSHELF_WEAK,
    &BOOK_SERIES,
    &BOOK_LIST_NODE_SETTINGS,
    &BOOK_LIST_STYLES,
    &BOOKS_FTS,
];

/// Sanity-check the static catalogue for duplicate names.
///
/// Run from a `debug_assert!` when a store opens; a failure here is a
/// programming error, not a runtime condition.
pub fn check_definitions() -> Result<(), String> {
    let mut names = HashSet::new();
    let mut aliases = HashSet::new();
    for table in ALL_TABLES {
        if !names.insert(table.name) {
            return Err(format!("duplicate table name: {}", table.name));
        }
        if !aliases.insert(table.alias) {
            return Err(format!("duplicate table alias: {}", table.alias));
        }
        let mut columns = HashSet::new();
        for column in table.columns {
            if !columns.insert(column.name.to_ascii_lowercase()) {
                return Err(format!("duplicate column {} in {}", column.name, table.name));
            }
        }
        for fk in table.foreign_keys {
            for column in fk.columns {
                if !columns.contains(&column.name.to_ascii_lowercase()) {
                    return Err(format!(
                        "foreign key on {} names unknown column {}",
                        table.name, column.name
                    ));
                }
            }
        }
    }
    Ok(())
}
