//! Frozen historical DDL.
//!
//! Every statement here is part of the persisted contract: databases in the
//! field were created from these exact strings, and the upgrade gates copy
//! rows between the historical table shapes by column name. None of this text
//! is ever regenerated from the live catalog in [`crate::schema::catalog`];
//! when the current shape changes, the old constant is renamed to the last
//! version that used it and a new one is added.

/// Collation suffix for case-insensitive text columns and indexes.
///
/// Kept with its surrounding spaces so it can be concatenated straight into
/// SQL text.
pub const COLLATION: &str = " Collate NOCASE ";

pub const CREATE_AUTHORS: &str = "create table authors \
    (_id integer primary key autoincrement, \
    family_name text not null, \
    given_names text not null)";

pub const CREATE_BOOKSHELF: &str = "create table bookshelf \
    (_id integer primary key autoincrement, \
    bookshelf text not null )";

pub const BOOKSHELF_DEFAULT_ROW: &str = "INSERT INTO bookshelf (bookshelf) VALUES ('Default')";

/// `books` as created up to schema version 41: single author column,
/// free-text series, audiobook flag, booleans stored as `'t'`/`'f'`.
pub const CREATE_BOOKS_41: &str = "create table books \
    (_id integer primary key autoincrement, \
    author integer not null REFERENCES authors, \
    title text not null, \
    isbn text, \
    publisher text, \
    date_published date, \
    rating float not null default 0, \
    read boolean not null default 'f', \
    series text, \
    pages int, \
    series_num text, \
    notes text, \
    list_price text, \
    anthology int not null default 0, \
    location text, \
    read_start date, \
    read_end date, \
    audiobook boolean not null default 'f', \
    signed boolean not null default 'f' )";

/// `books` after the author/series columns moved to their link tables.
pub const CREATE_BOOKS_63: &str = "create table books \
    (_id integer primary key autoincrement, \
    title text not null, \
    isbn text, \
    publisher text, \
    date_published date, \
    rating float not null default 0, \
    read boolean not null default 0, \
    pages int, \
    notes text, \
    list_price text, \
    anthology int not null default 0, \
    location text, \
    read_start date, \
    read_end date, \
    format text, \
    signed boolean not null default 0, \
    description text, \
    genre text )";

pub const CREATE_BOOKS_68: &str = "create table books \
    (_id integer primary key autoincrement, \
    title text not null, \
    isbn text, \
    publisher text, \
    date_published date, \
    rating float not null default 0, \
    read boolean not null default 0, \
    pages int, \
    notes text, \
    list_price text, \
    anthology int not null default 0, \
    location text, \
    read_start date, \
    read_end date, \
    format text, \
    signed boolean not null default 0, \
    description text, \
    genre text, \
    date_added datetime default current_timestamp)";

pub const CREATE_BOOKS_81: &str = "create table books \
    (_id integer primary key autoincrement, \
    title text not null, \
    isbn text, \
    publisher text, \
    date_published date, \
    rating float not null default 0, \
    read boolean not null default 0, \
    pages int, \
    notes text, \
    list_price text, \
    anthology int not null default 0, \
    location text, \
    read_start date, \
    read_end date, \
    format text, \
    signed boolean not null default 0, \
    description text, \
    genre text, \
    date_added datetime default current_timestamp, \
    goodreads_book_id int, \
    last_goodreads_sync_date date default '0000-00-00', \
    book_uuid text not null default (lower(hex(randomblob(16)))), \
    last_update_date datetime not null default current_timestamp)";

/// Current `books` shape. Never change this in place: rename it to the last
/// version that used it and add a new constant.
pub const CREATE_BOOKS: &str = "create table books \
    (_id integer primary key autoincrement, \
    title text not null, \
    isbn text, \
    publisher text, \
    date_published date, \
    rating float not null default 0, \
    read boolean not null default 0, \
    pages int, \
    notes text, \
    list_price text, \
    anthology int not null default 0, \
    location text, \
    read_start date, \
    read_end date, \
    format text, \
    signed boolean not null default 0, \
    description text, \
    genre text, \
    language text default '', \
    date_added datetime default current_timestamp, \
    goodreads_book_id int, \
    last_goodreads_sync_date date default '0000-00-00', \
    book_uuid text not null default (lower(hex(randomblob(16)))), \
    last_update_date datetime not null default current_timestamp)";

pub const CREATE_LOAN: &str = "create table loan \
    (_id integer primary key autoincrement, \
    book integer REFERENCES books ON DELETE SET NULL ON UPDATE SET NULL, \
    loaned_to text )";

pub const CREATE_ANTHOLOGY: &str = "create table anthology \
    (_id integer primary key autoincrement, \
    book integer REFERENCES books ON DELETE SET NULL ON UPDATE SET NULL, \
    author integer not null REFERENCES authors, \
    title text not null, \
    position int)";

pub const CREATE_BOOK_BOOKSHELF_WEAK: &str = "create table book_bookshelf_weak(\
    book integer REFERENCES books ON DELETE SET NULL ON UPDATE SET NULL, \
    bookshelf integer REFERENCES bookshelf ON DELETE SET NULL ON UPDATE SET NULL)";

pub const CREATE_SERIES: &str = "create table series \
    (_id integer primary key autoincrement, \
    series_name text not null )";

/// `book_series` as first created: `series_num` was still an integer.
pub const CREATE_BOOK_SERIES_54: &str = "create table book_series(\
    book integer REFERENCES books ON DELETE CASCADE ON UPDATE CASCADE, \
    series_id integer REFERENCES series ON DELETE SET NULL ON UPDATE CASCADE, \
    series_num integer, \
    series_position integer,\
    PRIMARY KEY(book, series_position))";

pub const CREATE_BOOK_SERIES: &str = "create table book_series(\
    book integer REFERENCES books ON DELETE CASCADE ON UPDATE CASCADE, \
    series_id integer REFERENCES series ON DELETE SET NULL ON UPDATE CASCADE, \
    series_num text, \
    series_position integer,\
    PRIMARY KEY(book, series_position))";

pub const CREATE_BOOK_AUTHOR: &str = "create table book_author(\
    book integer REFERENCES books ON DELETE CASCADE ON UPDATE CASCADE, \
    author integer REFERENCES authors ON DELETE SET NULL ON UPDATE CASCADE, \
    author_position integer NOT NULL, \
    PRIMARY KEY(book, author_position))";

/// The full current index catalogue for the frozen tables.
///
/// Rebuilt from scratch after every create and every upgrade; the `_ci`
/// entries carry the collation suffix.
pub fn index_statements() -> Vec<String> {
    vec![
        "CREATE INDEX IF NOT EXISTS authors_given_names ON authors (given_names)".to_string(),
        format!("CREATE INDEX IF NOT EXISTS authors_given_names_ci ON authors (given_names{COLLATION})"),
        "CREATE INDEX IF NOT EXISTS authors_family_name ON authors (family_name)".to_string(),
        format!("CREATE INDEX IF NOT EXISTS authors_family_name_ci ON authors (family_name{COLLATION})"),
        "CREATE INDEX IF NOT EXISTS bookshelf_bookshelf ON bookshelf (bookshelf)".to_string(),
        "CREATE INDEX IF NOT EXISTS books_title ON books (title)".to_string(),
        format!("CREATE INDEX IF NOT EXISTS books_title_ci ON books (title{COLLATION})"),
        "CREATE INDEX IF NOT EXISTS books_isbn ON books (isbn)".to_string(),
        "CREATE INDEX IF NOT EXISTS books_publisher ON books (publisher)".to_string(),
        "CREATE UNIQUE INDEX IF NOT EXISTS books_uuid ON books (book_uuid)".to_string(),
        "CREATE INDEX IF NOT EXISTS books_gr_book ON books (goodreads_book_id)".to_string(),
        "CREATE INDEX IF NOT EXISTS anthology_book ON anthology (book)".to_string(),
        "CREATE INDEX IF NOT EXISTS anthology_author ON anthology (author)".to_string(),
        "CREATE INDEX IF NOT EXISTS anthology_title ON anthology (title)".to_string(),
        "CREATE UNIQUE INDEX IF NOT EXISTS series_series ON series (_id)".to_string(),
        "CREATE UNIQUE INDEX IF NOT EXISTS loan_book_loaned_to ON loan (book)".to_string(),
        "CREATE INDEX IF NOT EXISTS book_bookshelf_weak_book ON book_bookshelf_weak (book)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS book_bookshelf_weak_bookshelf ON book_bookshelf_weak (bookshelf)"
            .to_string(),
        "CREATE UNIQUE INDEX IF NOT EXISTS book_series_series ON book_series (series_id, book, series_num)"
            .to_string(),
        "CREATE UNIQUE INDEX IF NOT EXISTS book_series_book ON book_series (book, series_id, series_num)"
            .to_string(),
        "CREATE UNIQUE INDEX IF NOT EXISTS book_author_author ON book_author (author, book)"
            .to_string(),
        "CREATE UNIQUE INDEX IF NOT EXISTS book_author_book ON book_author (book, author)"
            .to_string(),
        "CREATE UNIQUE INDEX IF NOT EXISTS anthology_pk_idx ON anthology (book, author, title)"
            .to_string(),
    ]
}

pub const GOODREADS_RESET_TRIGGER: &str = "books_tg_reset_goodreads";

/// Drop-then-create statements for the one trigger the schema carries:
/// editing a book's isbn invalidates its cached goodreads linkage.
pub fn trigger_statements() -> Vec<String> {
    let body = " after update of isbn on books for each row\n \
                When New.isbn <> Old.isbn\n\
                \tBegin \n\
                \t\tUpdate books Set \n\
                \t\t    goodreads_book_id = 0,\n\
                \t\t    last_goodreads_sync_date = ''\n\
                \t\tWhere\n\
                \t\t\t_id = new._id;\n\
                \tEnd";
    vec![
        format!("Drop Trigger if Exists {GOODREADS_RESET_TRIGGER}"),
        format!("Create Trigger {GOODREADS_RESET_TRIGGER}{body}"),
    ]
}
