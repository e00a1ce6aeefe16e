//! Schema creation and the historical upgrade ladder.
//!
//! Every database shape that ever shipped can be walked forward to the
//! current version in one pass. Each gate is guarded by the tracked
//! version number and applies exactly one historical step; the ladder's
//! oddities (gates 54/55 nested inside gate 53, the 69/70 double-step)
//! are preserved because real files depend on them. After the gates, the
//! index catalogue and triggers are rebuilt unconditionally.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backup::SnapshotHook;
use crate::error::{DbError, DbResult, MigrationError};
use crate::schema::catalog::{ALL_TABLES, BOOKS_FTS, BOOK_LIST_NODE_SETTINGS, BOOK_LIST_STYLES};
use crate::schema::history::{
    index_statements, trigger_statements, BOOKSHELF_DEFAULT_ROW, COLLATION, CREATE_ANTHOLOGY,
    CREATE_AUTHORS, CREATE_BOOKS, CREATE_BOOKSHELF, CREATE_BOOKS_41, CREATE_BOOKS_63,
    CREATE_BOOKS_68, CREATE_BOOKS_81, CREATE_BOOK_AUTHOR, CREATE_BOOK_BOOKSHELF_WEAK,
    CREATE_BOOK_SERIES, CREATE_BOOK_SERIES_54, CREATE_LOAN, CREATE_SERIES,
};
use crate::schema::info::TableInfo;
use crate::sync::{SchemaHooks, SynchronizedDb};

/// Current schema version.
pub const DB_VERSION: u32 = 83;

/// `books` columns shared by the old and new shapes when the author and
/// series columns were split out to their link tables.
const TMP_BOOK_FIELDS: &str = "_id, title, isbn, publisher, date_published, rating, read, \
    pages, notes, list_price, anthology, location, read_start, read_end, format, signed, \
    description, genre";

/// What one upgrade run did, for the application to show and act on.
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeReport {
    pub from: u32,
    pub to: u32,
    /// Cumulative release notes for the versions stepped through.
    pub message: String,
    /// The full-text index must be rebuilt from the book data.
    pub fts_rebuild_required: bool,
    /// Author and series ordering needs a maintenance pass.
    pub author_series_fixup_required: bool,
    /// Label the pre-migration snapshot was requested under, if any.
    pub snapshot_label: Option<String>,
}

#[derive(Debug, Default)]
struct LadderRun {
    message: String,
    fts_rebuild_required: bool,
    author_series_fixup_required: bool,
    snapshot_label: Option<String>,
}

impl LadderRun {
    fn note(&mut self, line: &str) {
        self.message.push_str("* ");
        self.message.push_str(line);
        self.message.push_str("\n\n");
    }
}

/// Creates fresh schemas and upgrades old ones; plug into
/// [`SynchronizedDb::open_versioned`].
pub struct UpgradeEngine {
    snapshot: Box<dyn SnapshotHook>,
    covers_dir: Option<PathBuf>,
    last_run: Mutex<Option<UpgradeReport>>,
}

impl UpgradeEngine {
    pub fn new(snapshot: Box<dyn SnapshotHook>) -> Self {
        UpgradeEngine {
            snapshot,
            covers_dir: None,
            last_run: Mutex::new(None),
        }
    }

    /// Directory holding cover images, needed by the gate that renames
    /// covers from row ids to UUIDs.
    pub fn with_covers_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.covers_dir = Some(dir.into());
        self
    }

    /// Report of the upgrade this engine performed, if one ran.
    pub fn report(&self) -> Option<UpgradeReport> {
        self.last_run.lock().ok().and_then(|r| r.clone())
    }

    pub(crate) fn snapshot_hook(&self) -> &dyn SnapshotHook {
        self.snapshot.as_ref()
    }

    fn run_ladder(
        &self,
        db: &SynchronizedDb,
        cur: &mut u32,
        run: &mut LadderRun,
    ) -> Result<(), MigrationError> {
        let exec = |gate: u32, sql: &str| -> Result<usize, MigrationError> {
            db.exec(sql).map_err(|e| MigrationError::at_step(gate, e))
        };

        if *cur < 11 {
            // Pre-baseline files start over with the current schema.
            self.on_create(db)?;
        }
        if *cur == 11 {
            exec(11, "ALTER TABLE books ADD series_num text")?;
            exec(11, "UPDATE books SET series_num = ''")?;
            *cur += 1;
        }
        while matches!(*cur, 12..=15) {
            *cur += 1;
        }
        if *cur == 16 {
            run.note("Upgrade messages and assorted SQL fixes");
            *cur += 1;
        }
        while matches!(*cur, 17..=18) {
            *cur += 1;
        }
        if *cur == 19 {
            exec(19, "ALTER TABLE books ADD notes text")?;
            exec(19, "UPDATE books SET notes = ''")?;
            *cur += 1;
        }
        if *cur == 20 {
            exec(20, CREATE_LOAN)?;
            *cur += 1;
        }
        if *cur == 21 {
            *cur += 1;
        }
        if *cur == 22 {
            run.note("Tabbed edit views, loan tracking and faster search");
            *cur += 1;
        }
        if *cur == 23 {
            *cur += 1;
        }
        if *cur == 24 {
            // Repeats the v19 steps and fails on databases that already
            // have them, exactly as the historical script did.
            exec(24, "ALTER TABLE books ADD notes text")?;
            exec(24, "UPDATE books SET notes = ''")?;
            exec(24, CREATE_LOAN)?;
            *cur += 1;
        }
        if *cur == 25 {
            run.note("Sort order is saved on exit");
            *cur += 1;
        }
        if *cur == 26 {
            run.note("Sort by series and by loan status");
            *cur += 1;
        }
        if *cur == 27 {
            run.note("Thumbnails in the list view and better exports");
            *cur += 1;
        }
        if *cur == 28 {
            exec(28, "ALTER TABLE books ADD list_price text")?;
            *cur += 1;
        }
        if *cur == 29 {
            run.note("Amazon search and a list price field");
            *cur += 1;
        }
        if *cur == 30 {
            run.note("Individual thumbnails can be deleted");
            *cur += 1;
        }
        if *cur == 31 {
            run.note("Field visibility preferences");
            *cur += 1;
        }
        if *cur == 32 {
            exec(32, CREATE_ANTHOLOGY)?;
            exec(32, "ALTER TABLE books ADD anthology int not null default 0")?;
            run.note("Anthology support and camera covers");
            *cur += 1;
        }
        if *cur == 33 {
            run.note("Online help and thumbnail rotation");
            *cur += 1;
        }
        if *cur == 34 {
            exec(34, "ALTER TABLE books ADD location text")?;
            exec(34, "ALTER TABLE books ADD read_start date")?;
            exec(34, "ALTER TABLE books ADD read_end date")?;
            exec(34, "ALTER TABLE books ADD audiobook boolean not null default 'f'")?;
            exec(34, "ALTER TABLE books ADD signed boolean not null default 'f'")?;
            *cur += 1;
        }
        if *cur == 35 {
            exec(35, "UPDATE books SET location=''")?;
            exec(35, "UPDATE books SET read_start=''")?;
            exec(35, "UPDATE books SET read_end=''")?;
            exec(35, "UPDATE books SET audiobook='f'")?;
            exec(35, "UPDATE books SET signed='f'")?;
            *cur += 1;
        }
        if *cur == 36 {
            run.note("Location, reading dates, audiobook and signed fields");
            *cur += 1;
        }
        if *cur == 37 {
            run.note("Sort by unread and gallery thumbnails");
            *cur += 1;
        }
        if *cur == 38 {
            exec(38, "DELETE FROM loan WHERE (loaned_to='' OR loaned_to='null')")?;
            *cur += 1;
        }
        while matches!(*cur, 39..=40) {
            *cur += 1;
        }
        if *cur == 41 {
            run.note("Books can sit on multiple bookshelves");
            drop_scratch_tables(db, &["tmp1", "tmp2", "tmp3"]);
            exec(41, CREATE_BOOK_BOOKSHELF_WEAK)?;
            exec(
                41,
                "INSERT INTO book_bookshelf_weak (book, bookshelf) SELECT _id, bookshelf FROM books",
            )?;
            exec(
                41,
                "CREATE TABLE tmp1 AS SELECT _id, author, title, isbn, publisher, \
                 date_published, rating, read, series, pages, series_num, notes, list_price, \
                 anthology, location, read_start, read_end, audiobook, signed FROM books",
            )?;
            exec(41, "CREATE TABLE tmp2 AS SELECT _id, book, loaned_to FROM loan")?;
            exec(41, "CREATE TABLE tmp3 AS SELECT _id, book, author, title, position FROM anthology")?;
            exec(41, "DROP TABLE anthology")?;
            exec(41, "DROP TABLE loan")?;
            exec(41, "DROP TABLE books")?;
            exec(41, CREATE_BOOKS_41)?;
            exec(41, CREATE_LOAN)?;
            exec(41, CREATE_ANTHOLOGY)?;
            exec(41, "INSERT INTO books SELECT * FROM tmp1")?;
            exec(41, "INSERT INTO loan SELECT * FROM tmp2")?;
            exec(41, "INSERT INTO anthology SELECT * FROM tmp3")?;
            exec(41, "DROP TABLE tmp1")?;
            exec(41, "DROP TABLE tmp2")?;
            exec(41, "DROP TABLE tmp3")?;
            *cur += 1;
        }
        if *cur == 42 {
            run.note("Export fixes and series improvements");
            *cur += 1;
        }
        if *cur == 43 {
            exec(
                43,
                "DELETE FROM anthology WHERE _id IN (SELECT a._id FROM anthology a, anthology b \
                 WHERE a.book=b.book AND a.author=b.author AND a.title=b.title AND a._id > b._id)",
            )?;
            exec(
                43,
                "CREATE UNIQUE INDEX IF NOT EXISTS anthology_pk_idx ON anthology (book, author, title)",
            )?;
            *cur += 1;
        }
        if *cur == 44 {
            // The audiobook flag becomes a free-text format column.
            const CREATE_BOOKS_44: &str = "create table books \
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
                format text, \
                signed boolean not null default 'f' )";
            drop_scratch_tables(db, &["tmp1", "tmp2", "tmp3"]);
            exec(
                44,
                "CREATE TABLE tmp1 AS SELECT _id, author, title, isbn, publisher, \
                 date_published, rating, read, series, pages, series_num, notes, list_price, \
                 anthology, location, read_start, read_end, \
                 CASE WHEN audiobook='t' THEN 'Audiobook' ELSE 'Paperback' END AS audiobook, \
                 signed FROM books",
            )?;
            exec(44, "CREATE TABLE tmp2 AS SELECT _id, book, loaned_to FROM loan")?;
            exec(44, "CREATE TABLE tmp3 AS SELECT _id, book, author, title, position FROM anthology")?;
            exec(44, "CREATE TABLE tmp4 AS SELECT book, bookshelf FROM book_bookshelf_weak")?;
            exec(44, "DROP TABLE anthology")?;
            exec(44, "DROP TABLE loan")?;
            exec(44, "DROP TABLE books")?;
            exec(44, "DROP TABLE book_bookshelf_weak")?;
            exec(44, CREATE_BOOKS_44)?;
            exec(44, CREATE_LOAN)?;
            exec(44, CREATE_ANTHOLOGY)?;
            exec(44, CREATE_BOOK_BOOKSHELF_WEAK)?;
            exec(44, "INSERT INTO books SELECT * FROM tmp1")?;
            exec(44, "INSERT INTO loan SELECT * FROM tmp2")?;
            exec(44, "INSERT INTO anthology SELECT * FROM tmp3")?;
            exec(44, "INSERT INTO book_bookshelf_weak SELECT * FROM tmp4")?;
            exec(44, "DROP TABLE tmp1")?;
            exec(44, "DROP TABLE tmp2")?;
            exec(44, "DROP TABLE tmp3")?;
            exec(44, "DROP TABLE tmp4")?;
            *cur += 1;
        }
        if *cur == 45 {
            exec(45, "DELETE FROM loan WHERE loaned_to='null'")?;
            *cur += 1;
        }
        if *cur == 46 {
            exec(46, "ALTER TABLE books ADD description text")?;
            exec(46, "ALTER TABLE books ADD genre text")?;
            *cur += 1;
        }
        if *cur == 47 {
            run.note("A format selector replaces the audiobook flag");
            *cur += 1;
        }
        if *cur == 48 {
            exec(48, "delete from loan where loaned_to='null';")?;
            exec(
                48,
                "delete from loan where _id!=(select max(l2._id) from loan l2 where l2.book=loan.book);",
            )?;
            exec(
                48,
                "delete from anthology where _id!=(select max(a2._id) from anthology a2 \
                 where a2.book=anthology.book AND a2.author=anthology.author AND a2.title=anthology.title);",
            )?;
            *cur += 1;
        }
        if *cur == 49 {
            run.note("Search by author name and title");
            *cur += 1;
        }
        if *cur == 50 {
            *cur += 1;
        }
        if *cur == 51 {
            run.note("Faster lists and thumbnail zoom");
            *cur += 1;
        }
        if *cur == 52 {
            run.note("Minor fixes and error logging");
            *cur += 1;
        }
        if *cur == 53 {
            *cur += 1;
            // Two release branches met here; only databases still carrying
            // the single-author shape take the split.
            let probe = db
                .query("SELECT * FROM books", [])
                .map_err(|e| MigrationError::at_step(53, e))?;
            if probe.count() > 0 && probe.has_column("author") {
                run.note("Multiple authors and series per book");
                split_authors_and_series(db, 53)?;
            }
            // Nested on purpose: files already at 54 or 55 skip these
            // and fall through to the version stamp untouched.
            if *cur == 54 {
                *cur += 1;
            }
            if *cur == 55 {
                let probe = db
                    .query("SELECT * FROM books", [])
                    .map_err(|e| MigrationError::at_step(55, e))?;
                let wants_split = if probe.count() > 0 {
                    probe.has_column("author")
                } else {
                    true
                };
                if wants_split {
                    split_authors_and_series(db, 55)?;
                }
                *cur += 1;
            }
        }
        if *cur == 56 {
            run.note("French translation and a duplicate-book option");
            *cur += 1;
        }
        if *cur == 57 {
            repair_base_tables(db)?;
            *cur += 1;
        }
        if *cur == 58 {
            exec(
                58,
                "DELETE FROM loan WHERE (book='' OR book=null OR loaned_to='' OR loaned_to=null)",
            )?;
            run.note("Orphan loan records are cleaned up");
            *cur += 1;
        }
        if *cur == 59 {
            run.note("Sort by first author only, if preferred");
            *cur += 1;
        }
        if *cur == 60 {
            run.note("Cover cropping and sharing");
            *cur += 1;
        }
        if *cur == 61 {
            run.note("Author prefix and suffix fixes");
            *cur += 1;
        }
        if *cur == 62 {
            *cur += 1;
        }
        if *cur == 63 {
            exec(63, "UPDATE books Set read = 0 Where read = 'f'")?;
            exec(63, "UPDATE books Set read = 1 Where read = 't'")?;
            exec(63, "ALTER TABLE books RENAME TO books_tmp")?;
            exec(63, CREATE_BOOKS_63)?;
            exec(63, "INSERT INTO books Select * FROM books_tmp")?;
            exec(63, "DROP TABLE books_tmp")?;
            *cur += 1;
        }
        if *cur == 64 {
            exec(64, "UPDATE books Set signed = 0 Where signed = 'f'")?;
            exec(64, "UPDATE books Set signed = 1 Where signed = 't'")?;
            exec(64, "ALTER TABLE books Add date_added datetime")?;
            exec(64, "ALTER TABLE books RENAME TO books_tmp")?;
            exec(64, CREATE_BOOKS_68)?;
            exec(64, "INSERT INTO books Select * FROM books_tmp")?;
            exec(64, "DROP TABLE books_tmp")?;
            *cur += 1;
        }
        if *cur == 65 {
            let at = |e: DbError| MigrationError::at_step(65, e);
            BOOK_LIST_NODE_SETTINGS.drop_if_exists(db).map_err(at)?;
            BOOK_LIST_NODE_SETTINGS.create(db, true).map_err(at)?;
            BOOK_LIST_NODE_SETTINGS.create_indexes(db).map_err(at)?;
            *cur += 1;
        }
        if *cur == 66 {
            let at = |e: DbError| MigrationError::at_step(66, e);
            BOOKS_FTS.drop_if_exists(db).map_err(at)?;
            BOOKS_FTS.create(db, false).map_err(at)?;
            run.fts_rebuild_required = true;
            *cur += 1;
        }
        if *cur == 67 {
            let at = |e: DbError| MigrationError::at_step(67, e);
            BOOK_LIST_STYLES.drop_if_exists(db).map_err(at)?;
            BOOK_LIST_STYLES.create_all(db, true).map_err(at)?;
            *cur += 1;
        }
        if *cur == 68 {
            exec(68, "ALTER TABLE books Add goodreads_book_id int")?;
            *cur += 1;
        }
        if *cur == 69 || *cur == 70 {
            // Covers two releases; both land on the v81 shape at once.
            let from = *cur;
            let at = |e: DbError| MigrationError {
                from,
                to: 71,
                source: e,
            };
            db.exec("ALTER TABLE books RENAME TO books_tmp").map_err(at)?;
            db.exec(CREATE_BOOKS_81).map_err(at)?;
            copy_table_safely(db, "books_tmp", "books", &[]).map_err(at)?;
            db.exec("DROP TABLE books_tmp").map_err(at)?;
            *cur = 71;
        }
        if *cur == 71 {
            self.rename_covers_to_uuid(db)
                .map_err(|e| MigrationError::at_step(71, e))?;
            run.note("Unique cover names and goodreads synchronization");
            *cur += 1;
        }
        if *cur == 72 {
            // Triggers are reapplied by the unconditional tail.
            *cur += 1;
        }
        if *cur == 73 {
            run.note("Background bitmap preference and book counts");
            *cur += 1;
        }
        if *cur == 74 {
            run.author_series_fixup_required = true;
            run.note("ISBN validation and an available-books list");
            *cur += 1;
        }
        if *cur == 75 {
            run.fts_rebuild_required = true;
            run.note("Search covers series and anthology data");
            *cur += 1;
        }
        if *cur == 76 {
            *cur += 1;
        }
        if *cur == 77 {
            run.note("Existing ISBNs offer an edit option");
            *cur += 1;
        }
        if *cur == 78 {
            run.note("Location and date-read style groups");
            *cur += 1;
        }
        if *cur == 79 {
            // Index terms moved to lower case.
            run.fts_rebuild_required = true;
            *cur += 1;
        }
        if *cur == 80 {
            exec(80, "ALTER TABLE book_series RENAME TO books_series_tmp")?;
            exec(80, CREATE_BOOK_SERIES)?;
            copy_table_safely(db, "books_series_tmp", "book_series", &[])
                .map_err(|e| MigrationError::at_step(80, e))?;
            exec(80, "DROP TABLE books_series_tmp")?;
            *cur += 1;
        }
        if *cur == 81 {
            recreate_and_reload_table(db, "books", CREATE_BOOKS, &[])
                .map_err(|e| MigrationError::at_step(81, e))?;
            *cur += 1;
        }
        if *cur == 82 {
            exec(82, "UPDATE books Set read = 0 Where read = 'f' Or read = 'false'")?;
            exec(82, "UPDATE books Set read = 1 Where read = 't' Or read = 'true'")?;
            exec(82, "UPDATE books Set signed = 0 Where signed = 'f' Or signed = 'false'")?;
            exec(82, "UPDATE books Set signed = 1 Where signed = 't' Or signed = 'true'")?;
            for column in ["notes", "location", "read_start", "read_end", "language"] {
                exec(82, &format!("UPDATE books Set {column} = '' Where {column} is null"))?;
            }
            run.note("Legacy boolean and empty-text values normalized");
            *cur += 1;
        }
        Ok(())
    }

    /// Cover images were once keyed by book row id; rename them to the
    /// stable UUID key. File-level failures are logged, never fatal.
    fn rename_covers_to_uuid(&self, db: &SynchronizedDb) -> DbResult<()> {
        let Some(dir) = &self.covers_dir else {
            return Ok(());
        };
        let rows: Vec<(i64, String)> = db.query_map(
            "select _id, book_uuid from books Order by _id",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        for (id, uuid) in rows {
            for ext in ["jpg", "png"] {
                let old = dir.join(format!("{id}.{ext}"));
                if old.exists() {
                    if let Err(error) = fs::rename(&old, dir.join(format!("{uuid}.{ext}"))) {
                        warn!(book = id, %error, "cover rename failed");
                    }
                }
            }
        }
        Ok(())
    }
}

impl SchemaHooks for UpgradeEngine {
    fn on_create(&self, db: &SynchronizedDb) -> Result<(), MigrationError> {
        let exec = |sql: &str| db.exec(sql).map_err(creation_error);
        exec(CREATE_AUTHORS)?;
        exec(CREATE_BOOKSHELF)?;
        exec(CREATE_BOOKS)?;
        exec(BOOKSHELF_DEFAULT_ROW)?;
        exec(CREATE_LOAN)?;
        exec(CREATE_ANTHOLOGY)?;
        exec(CREATE_SERIES)?;
        exec(CREATE_BOOK_AUTHOR)?;
        exec(CREATE_BOOK_BOOKSHELF_WEAK)?;
        exec(CREATE_BOOK_SERIES)?;
        rebuild_indices(db).map_err(creation_error)?;
        BOOK_LIST_NODE_SETTINGS
            .create_all(db, true)
            .map_err(creation_error)?;
        BOOKS_FTS.create(db, false).map_err(creation_error)?;
        BOOK_LIST_STYLES
            .create_all(db, true)
            .map_err(creation_error)?;
        create_triggers(db).map_err(creation_error)?;
        Ok(())
    }

    fn on_upgrade(
        &self,
        db: &SynchronizedDb,
        old_version: u32,
        new_version: u32,
    ) -> Result<(), MigrationError> {
        let mut run = LadderRun::default();
        if old_version != new_version {
            if let Some(path) = db.path() {
                let label = format!("DbUpgrade-{old_version}-{new_version}");
                self.snapshot.snapshot(path, &label);
                run.snapshot_label = Some(label);
            }
        }

        let mut cur = old_version;
        db.set_legacy_alter_table(true)
            .map_err(|e| MigrationError::at_step(cur, e))?;
        let ladder = self.run_ladder(db, &mut cur, &mut run);
        let restored = db.set_legacy_alter_table(false);
        ladder?;
        restored.map_err(|e| MigrationError::at_step(cur, e))?;

        let tail = |e: DbError| MigrationError {
            from: old_version,
            to: new_version,
            source: e,
        };
        rebuild_indices(db).map_err(tail)?;
        create_triggers(db).map_err(tail)?;
        info!(from = old_version, to = new_version, "schema upgrade complete");

        if let Ok(mut last) = self.last_run.lock() {
            *last = Some(UpgradeReport {
                from: old_version,
                to: new_version,
                message: run.message,
                fts_rebuild_required: run.fts_rebuild_required,
                author_series_fixup_required: run.author_series_fixup_required,
                snapshot_label: run.snapshot_label,
            });
        }
        Ok(())
    }
}

fn creation_error(source: DbError) -> MigrationError {
    MigrationError {
        from: 0,
        to: DB_VERSION,
        source,
    }
}

/// Copy every column of `from`, minus `skip`, into `to`. Columns only the
/// destination has fill from their defaults; columns the destination lost
/// must be named in `skip`.
pub fn copy_table_safely(
    db: &SynchronizedDb,
    from: &str,
    to: &str,
    skip: &[&str],
) -> DbResult<()> {
    let info = TableInfo::load(db, from)?;
    let columns: Vec<&str> = info
        .column_names()
        .filter(|name| !skip.iter().any(|s| s.eq_ignore_ascii_case(name)))
        .collect();
    let list = columns.join(", ");
    db.exec(&format!("Insert into {to}({list}) select {list} from {from}"))?;
    Ok(())
}

/// Rebuild `table` under `ddl`, reloading the surviving rows. Handles
/// reordered and removed columns.
pub fn recreate_and_reload_table(
    db: &SynchronizedDb,
    table: &str,
    ddl: &str,
    skip: &[&str],
) -> DbResult<()> {
    let temp = "recreate_tmp";
    db.exec(&format!("ALTER TABLE {table} RENAME TO {temp}"))?;
    db.exec(ddl)?;
    copy_table_safely(db, temp, table, skip)?;
    db.exec(&format!("DROP TABLE {temp}"))?;
    Ok(())
}

fn drop_scratch_tables(db: &SynchronizedDb, names: &[&str]) {
    for name in names {
        // Leftovers from an interrupted earlier attempt, if any.
        if let Err(error) = db.exec(&format!("DROP TABLE {name}")) {
            debug!(table = name, %error, "no scratch table to drop");
        }
    }
}

fn series_backfill_sql() -> String {
    // The old shape allowed series names differing only in case; fold
    // them to one canonical row each.
    format!(
        "INSERT INTO series (series_name) SELECT name from \
         (SELECT Upper(series){COLLATION}as ucName, max(series){COLLATION}as name FROM books \
         WHERE Coalesce(series,'') <> '' Group By Upper(series))"
    )
}

fn book_series_backfill_sql() -> String {
    format!(
        "INSERT INTO book_series (book, series_id, series_num, series_position) \
         SELECT DISTINCT b._id, s._id, b.series_num, 1 FROM books b \
         Join series s On Upper(s.series_name) = Upper(b.series){COLLATION}\
         Where Coalesce(b.series, '') <> ''"
    )
}

const BOOK_AUTHOR_BACKFILL: &str = "INSERT INTO book_author (book, author, author_position) \
    SELECT b._id, b.author, 1 FROM books b";

/// Move the single author/series columns out of `books` into the link
/// tables, then rebuild `books` without them.
fn split_authors_and_series(db: &SynchronizedDb, gate: u32) -> Result<(), MigrationError> {
    let exec = |sql: &str| db.exec(sql).map_err(|e| MigrationError::at_step(gate, e));
    exec(CREATE_SERIES)?;
    exec(&series_backfill_sql())?;
    exec(CREATE_BOOK_SERIES_54)?;
    exec(CREATE_BOOK_AUTHOR)?;
    exec(&book_series_backfill_sql())?;
    exec(BOOK_AUTHOR_BACKFILL)?;
    rebuild_books_without_author_series(db, gate)
}

fn rebuild_books_without_author_series(
    db: &SynchronizedDb,
    gate: u32,
) -> Result<(), MigrationError> {
    let exec = |sql: &str| db.exec(sql).map_err(|e| MigrationError::at_step(gate, e));
    exec(&format!("CREATE TABLE tmpBooks AS SELECT {TMP_BOOK_FIELDS} FROM books"))?;
    exec("DROP TABLE books")?;
    exec(CREATE_BOOKS_63)?;
    exec(&format!("INSERT INTO books ({TMP_BOOK_FIELDS}) SELECT * FROM tmpBooks"))?;
    exec("DROP TABLE tmpBooks")?;
    Ok(())
}

/// Gate 57: one release shipped with upgrade paths that could leave any
/// of the base tables missing. Recreate whatever is absent.
fn repair_base_tables(db: &SynchronizedDb) -> Result<(), MigrationError> {
    let at = |e: DbError| MigrationError::at_step(57, e);
    let exec = |sql: &str| db.exec(sql).map_err(at);

    if !db.table_exists("authors").map_err(at)? {
        exec(CREATE_AUTHORS)?;
    }
    if !db.table_exists("bookshelf").map_err(at)? {
        exec(CREATE_BOOKSHELF)?;
        exec(BOOKSHELF_DEFAULT_ROW)?;
    }
    if !db.table_exists("series").map_err(at)? {
        exec(CREATE_SERIES)?;
        let probe = db.query("SELECT * FROM books", []).map_err(at)?;
        if probe.count() > 0 && probe.has_column("series") {
            exec(&series_backfill_sql())?;
        }
    }
    if !db.table_exists("books").map_err(at)? {
        exec(CREATE_BOOKS_63)?;
    }
    if !db.table_exists("loan").map_err(at)? {
        exec(CREATE_LOAN)?;
    }
    if !db.table_exists("anthology").map_err(at)? {
        exec(CREATE_ANTHOLOGY)?;
    }
    if !db.table_exists("book_bookshelf_weak").map_err(at)? {
        exec(CREATE_BOOK_BOOKSHELF_WEAK)?;
    }
    if !db.table_exists("book_series").map_err(at)? {
        exec(CREATE_BOOK_SERIES_54)?;
        exec(&book_series_backfill_sql())?;
    }
    if !db.table_exists("book_author").map_err(at)? {
        exec(CREATE_BOOK_AUTHOR)?;
        exec(BOOK_AUTHOR_BACKFILL)?;
    }
    let probe = db.query("SELECT * FROM books", []).map_err(at)?;
    if probe.count() > 0 && probe.has_column("series") {
        rebuild_books_without_author_series(db, 57)?;
    }
    Ok(())
}

/// Drop every named index and recreate the full catalogue. Individual
/// failures are expected on multi-version upgrades (a table may not
/// exist yet at this point) and are logged, not propagated.
fn rebuild_indices(db: &SynchronizedDb) -> DbResult<()> {
    let existing: Vec<String> = db.query_map(
        "select name from sqlite_master where type = 'index' and sql is not null",
        [],
        |row| row.get(0),
    )?;
    for name in existing {
        if let Err(error) = db.exec(&format!("DROP INDEX {name}")) {
            debug!(index = %name, %error, "index drop failed, continuing");
        }
    }
    for sql in index_statements() {
        if let Err(error) = db.exec(&sql) {
            warn!(sql = %sql, %error, "index creation failed, continuing");
        }
    }
    for table in ALL_TABLES {
        if table.indexes.is_empty() {
            continue;
        }
        if table.exists(db)? {
            if let Err(error) = table.create_indexes(db) {
                warn!(table = table.name, %error, "index creation failed, continuing");
            }
        }
    }
    db.analyze()
}

fn create_triggers(db: &SynchronizedDb) -> DbResult<()> {
    for sql in trigger_statements() {
        db.exec(&sql)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::NoSnapshot;
    use std::path::Path;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct RecordingSnapshot {
        labels: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingSnapshot {
        fn taken(&self) -> Vec<String> {
            self.labels.lock().unwrap().clone()
        }
    }

    impl SnapshotHook for RecordingSnapshot {
        fn snapshot(&self, _db_path: &Path, label: &str) {
            self.labels.lock().unwrap().push(label.to_string());
        }
    }

    fn fresh_engine() -> UpgradeEngine {
        UpgradeEngine::new(Box::new(NoSnapshot))
    }

    fn query_i64(db: &SynchronizedDb, sql: &str) -> i64 {
        db.query_row_opt(sql, [], |row| row.get(0)).unwrap().unwrap()
    }

    fn query_string(db: &SynchronizedDb, sql: &str) -> String {
        db.query_row_opt(sql, [], |row| row.get(0)).unwrap().unwrap()
    }

    #[test]
    fn fresh_create_builds_the_full_catalogue() {
        let engine = fresh_engine();
        let db = SynchronizedDb::open_versioned(None, DB_VERSION, &engine).unwrap();
        assert!(db.was_created());
        assert_eq!(db.schema_version().unwrap(), DB_VERSION);
        for table in ALL_TABLES {
            assert!(table.exists(&db).unwrap(), "{} missing", table.name);
        }
        assert_eq!(
            query_string(&db, "Select bookshelf From bookshelf Where _id = 1"),
            "Default"
        );
        assert_eq!(
            query_i64(
                &db,
                "Select Count(*) From sqlite_master Where type = 'index' And name = 'books_uuid'"
            ),
            1
        );
        assert_eq!(
            query_i64(
                &db,
                "Select Count(*) From sqlite_master Where type = 'trigger' \
                 And name = 'books_tg_reset_goodreads'"
            ),
            1
        );
        // No upgrade ran.
        assert!(engine.report().is_none());
    }

    #[test]
    fn isbn_change_resets_goodreads_fields() {
        let engine = fresh_engine();
        let db = SynchronizedDb::open_versioned(None, DB_VERSION, &engine).unwrap();
        db.exec(
            "Insert Into books (title, isbn, goodreads_book_id, last_goodreads_sync_date) \
             Values ('Dune', '0441013597', 42, '2020-01-01')",
        )
        .unwrap();
        db.exec("Update books Set isbn = '0441172717' Where title = 'Dune'").unwrap();
        assert_eq!(
            query_i64(&db, "Select goodreads_book_id From books Where title = 'Dune'"),
            0
        );
        assert_eq!(
            query_string(&db, "Select last_goodreads_sync_date From books Where title = 'Dune'"),
            ""
        );
    }

    #[test]
    fn upgrade_82_to_83_normalizes_and_snapshots_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book_catalogue.db");
        {
            // v82 and v83 share the table shapes; only the data differs.
            let engine = fresh_engine();
            let db = SynchronizedDb::open_versioned(Some(&path), 82, &engine).unwrap();
            db.exec(
                "Insert Into books (title, read, signed, notes) \
                 Values ('Dune', 'true', 'false', Null)",
            )
            .unwrap();
        }

        let recorder = RecordingSnapshot::default();
        let engine = UpgradeEngine::new(Box::new(recorder.clone()));
        let db = SynchronizedDb::open_versioned(Some(&path), DB_VERSION, &engine).unwrap();
        assert_eq!(db.schema_version().unwrap(), DB_VERSION);
        assert_eq!(query_i64(&db, "Select read From books Where title = 'Dune'"), 1);
        assert_eq!(query_i64(&db, "Select signed From books Where title = 'Dune'"), 0);
        assert_eq!(query_string(&db, "Select notes From books Where title = 'Dune'"), "");
        assert_eq!(recorder.taken(), vec!["DbUpgrade-82-83".to_string()]);

        let report = engine.report().unwrap();
        assert_eq!(report.from, 82);
        assert_eq!(report.to, DB_VERSION);
        assert_eq!(report.snapshot_label.as_deref(), Some("DbUpgrade-82-83"));
        assert!(!report.fts_rebuild_required);
        drop(db);

        // Reopening a current file runs no hooks and takes no snapshot.
        let recorder2 = RecordingSnapshot::default();
        let engine2 = UpgradeEngine::new(Box::new(recorder2.clone()));
        let db = SynchronizedDb::open_versioned(Some(&path), DB_VERSION, &engine2).unwrap();
        assert!(!db.was_created());
        assert!(engine2.report().is_none());
        assert!(recorder2.taken().is_empty());
    }

    #[test]
    fn ladder_walks_a_v63_file_to_current() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book_catalogue.db");
        {
            let db = SynchronizedDb::open(&path).unwrap();
            for sql in [
                CREATE_AUTHORS,
                CREATE_BOOKSHELF,
                BOOKSHELF_DEFAULT_ROW,
                CREATE_BOOKS_63,
                CREATE_LOAN,
                CREATE_ANTHOLOGY,
                CREATE_SERIES,
                CREATE_BOOK_AUTHOR,
                CREATE_BOOK_BOOKSHELF_WEAK,
                CREATE_BOOK_SERIES_54,
            ] {
                db.exec(sql).unwrap();
            }
            db.exec(
                "Insert Into books (title, isbn, read, signed, pages) \
                 Values ('Dune', '0441013597', 'f', 't', 412)",
            )
            .unwrap();
            db.exec("Insert Into books (title, read, signed) Values ('Hyperion', 'true', 'false')")
                .unwrap();
            db.set_schema_version(63).unwrap();
        }

        let recorder = RecordingSnapshot::default();
        let engine = UpgradeEngine::new(Box::new(recorder.clone()));
        let db = SynchronizedDb::open_versioned(Some(&path), DB_VERSION, &engine).unwrap();

        assert_eq!(db.schema_version().unwrap(), DB_VERSION);
        let info = TableInfo::load(&db, "books").unwrap();
        assert!(info.has_column("date_added"));
        assert!(info.has_column("book_uuid"));
        assert!(info.has_column("language"));

        // Gate 63 normalizes 'f'/'t'; the final gate catches the rest.
        assert_eq!(query_i64(&db, "Select read From books Where title = 'Dune'"), 0);
        assert_eq!(query_i64(&db, "Select signed From books Where title = 'Dune'"), 1);
        assert_eq!(query_i64(&db, "Select read From books Where title = 'Hyperion'"), 1);
        assert_eq!(query_i64(&db, "Select signed From books Where title = 'Hyperion'"), 0);
        assert_eq!(query_i64(&db, "Select pages From books Where title = 'Dune'"), 412);
        assert_eq!(
            query_string(&db, "Select book_uuid From books Where title = 'Dune'").len(),
            32
        );

        assert!(db.table_exists("books_fts").unwrap());
        assert!(db.table_exists("book_list_styles").unwrap());
        assert!(db.table_exists("book_list_node_settings").unwrap());

        let report = engine.report().unwrap();
        assert_eq!(report.from, 63);
        assert_eq!(report.to, DB_VERSION);
        assert!(report.fts_rebuild_required);
        assert!(report.author_series_fixup_required);
        assert!(report.message.contains("goodreads"));
        assert_eq!(recorder.taken(), vec!["DbUpgrade-63-83".to_string()]);
    }

    #[test]
    fn author_and_series_split_builds_link_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book_catalogue.db");
        {
            let db = SynchronizedDb::open(&path).unwrap();
            db.exec(CREATE_AUTHORS).unwrap();
            db.exec(CREATE_BOOKSHELF).unwrap();
            db.exec(BOOKSHELF_DEFAULT_ROW).unwrap();
            // v53 books still carry single author/series columns.
            db.exec(
                "create table books (_id integer primary key autoincrement, \
                 author integer not null REFERENCES authors, title text not null, isbn text, \
                 publisher text, date_published date, rating float not null default 0, \
                 read boolean not null default 'f', series text, pages int, series_num text, \
                 notes text, list_price text, anthology int not null default 0, location text, \
                 read_start date, read_end date, format text, \
                 signed boolean not null default 'f', description text, genre text)",
            )
            .unwrap();
            db.exec(CREATE_LOAN).unwrap();
            db.exec(CREATE_ANTHOLOGY).unwrap();
            db.exec(CREATE_BOOK_BOOKSHELF_WEAK).unwrap();
            db.exec("Insert Into authors (family_name, given_names) Values ('Herbert', 'Frank')")
                .unwrap();
            db.exec(
                "Insert Into books (author, title, series, series_num) \
                 Values (1, 'Dune', 'Dune Saga', '1')",
            )
            .unwrap();
            db.exec(
                "Insert Into books (author, title, series, series_num) \
                 Values (1, 'Dune Messiah', 'dune saga', '2')",
            )
            .unwrap();
            db.set_schema_version(53).unwrap();
        }

        let engine = fresh_engine();
        let db = SynchronizedDb::open_versioned(Some(&path), DB_VERSION, &engine).unwrap();

        // Case-variant series names folded to one canonical row.
        assert_eq!(query_i64(&db, "Select Count(*) From series"), 1);
        assert_eq!(query_i64(&db, "Select Count(*) From book_series"), 2);
        assert_eq!(query_i64(&db, "Select Count(*) From book_author"), 2);
        assert_eq!(
            query_i64(&db, "Select Count(*) From book_author Where author = 1"),
            2
        );
        let info = TableInfo::load(&db, "books").unwrap();
        assert!(!info.has_column("author"));
        assert!(!info.has_column("series"));
        assert!(info.has_column("language"));
        assert_eq!(
            query_string(
                &db,
                "Select series_num From book_series bs Join books b On b._id = bs.book \
                 Where b.title = 'Dune Messiah'"
            ),
            "2"
        );
    }

    #[test]
    fn files_stuck_at_the_nested_gates_keep_their_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book_catalogue.db");
        {
            let db = SynchronizedDb::open(&path).unwrap();
            for sql in [
                CREATE_AUTHORS,
                CREATE_BOOKSHELF,
                BOOKSHELF_DEFAULT_ROW,
                CREATE_BOOKS_63,
                CREATE_LOAN,
                CREATE_ANTHOLOGY,
                CREATE_SERIES,
                CREATE_BOOK_AUTHOR,
                CREATE_BOOK_BOOKSHELF_WEAK,
                CREATE_BOOK_SERIES_54,
            ] {
                db.exec(sql).unwrap();
            }
            db.set_schema_version(54).unwrap();
        }

        let engine = fresh_engine();
        let db = SynchronizedDb::open_versioned(Some(&path), DB_VERSION, &engine).unwrap();

        // Gates 54/55 live inside gate 53's body, so a file opened at 54
        // matches nothing; only the version stamp and the index/trigger
        // rebuild apply.
        assert_eq!(db.schema_version().unwrap(), DB_VERSION);
        let info = TableInfo::load(&db, "books").unwrap();
        assert!(!info.has_column("language"));
        assert!(!info.has_column("book_uuid"));
        let report = engine.report().unwrap();
        assert!(report.message.is_empty());
    }

    #[test]
    fn index_rebuild_restores_dropped_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book_catalogue.db");
        {
            let engine = fresh_engine();
            let db = SynchronizedDb::open_versioned(Some(&path), DB_VERSION, &engine).unwrap();
            db.exec("DROP INDEX books_title").unwrap();
            db.set_schema_version(82).unwrap();
        }

        let engine = fresh_engine();
        let db = SynchronizedDb::open_versioned(Some(&path), DB_VERSION, &engine).unwrap();
        assert_eq!(
            query_i64(
                &db,
                "Select Count(*) From sqlite_master Where type = 'index' And name = 'books_title'"
            ),
            1
        );
        // The auxiliary unique index survives the rebuild too.
        db.exec("Insert Into book_list_node_settings (kind, root_key) Values (1, 'a/b')")
            .unwrap();
        assert!(db
            .exec("Insert Into book_list_node_settings (kind, root_key) Values (1, 'a/b')")
            .is_err());
    }

    #[test]
    fn copy_table_safely_skips_and_defaults() {
        let db = SynchronizedDb::open_in_memory().unwrap();
        db.exec("create table src (a int, b int, c text)").unwrap();
        db.exec("create table dest (a int, c text, d text default 'x')").unwrap();
        db.exec("Insert Into src (a, b, c) Values (1, 2, 'three')").unwrap();
        copy_table_safely(&db, "src", "dest", &["b"]).unwrap();
        assert_eq!(query_i64(&db, "Select a From dest"), 1);
        assert_eq!(query_string(&db, "Select c From dest"), "three");
        assert_eq!(query_string(&db, "Select d From dest"), "x");
    }

    #[test]
    fn recreate_and_reload_handles_reordered_columns() {
        let db = SynchronizedDb::open_in_memory().unwrap();
        db.exec("create table t (a int, b text)").unwrap();
        db.exec("Insert Into t (a, b) Values (7, 'seven')").unwrap();
        recreate_and_reload_table(&db, "t", "create table t (b text, a int, e int default 9)", &[])
            .unwrap();
        assert_eq!(query_i64(&db, "Select a From t"), 7);
        assert_eq!(query_string(&db, "Select b From t"), "seven");
        assert_eq!(query_i64(&db, "Select e From t"), 9);
        assert_eq!(
            query_i64(&db, "Select Count(*) From sqlite_master Where name = 'recreate_tmp'"),
            0
        );
    }
}
