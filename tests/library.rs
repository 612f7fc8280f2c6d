use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use rusqlite::Connection;

use gitabase_manager::domain::GitabaseId;
use gitabase_manager::error::GitabaseError;
use gitabase_manager::library::Library;
use gitabase_manager::store::Store;

fn make_gitabase(dir: &std::path::Path, name: &str) {
    let conn = Connection::open(dir.join(name)).unwrap();
    conn.execute_batch(
        "CREATE TABLE books (id INTEGER PRIMARY KEY, title TEXT);
         CREATE TABLE chapters (id INTEGER PRIMARY KEY, book_id INTEGER,
                                number INTEGER, title TEXT);
         CREATE TABLE texts (id INTEGER PRIMARY KEY, chapter_id INTEGER,
                             number INTEGER, text TEXT);
         INSERT INTO books VALUES (1, 'First Canto');
         INSERT INTO chapters VALUES (10, 1, 1, 'Questions by the Sages');
         INSERT INTO texts VALUES (100, 10, 1, 'om namo bhagavate');
         INSERT INTO texts VALUES (101, 10, 2, 'dharmah projjhita');",
    )
    .unwrap();
}

fn store_at(dir: &std::path::Path) -> Store {
    Store::new_with_root(Utf8PathBuf::from_path_buf(dir.to_path_buf()).unwrap())
}

fn id(stem: &str) -> GitabaseId {
    stem.parse().unwrap()
}

#[test]
fn reads_flow_from_scan_to_rows() {
    let temp = tempfile::tempdir().unwrap();
    make_gitabase(temp.path(), "sb_en.db");

    let library = Library::open(store_at(temp.path())).unwrap();
    let sb = id("sb_en");

    let books = library.books(&sb).unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].title, "First Canto");

    let chapters = library.chapters(&sb, books[0].id).unwrap();
    assert_eq!(chapters.len(), 1);

    let verses = library.verses(&sb, chapters[0].id).unwrap();
    assert_eq!(verses.len(), 2);
    assert_eq!(verses[0].body, "om namo bhagavate");
    library.close();
}

#[test]
fn successful_read_persists_last_opened() {
    let temp = tempfile::tempdir().unwrap();
    make_gitabase(temp.path(), "bg_ru.db");

    let library = Library::open(store_at(temp.path())).unwrap();
    assert!(library.last_opened().unwrap().is_none());
    library.books(&id("bg_ru")).unwrap();
    library.close();

    // A fresh session picks the preference back up from disk.
    let reopened = Library::open(store_at(temp.path())).unwrap();
    assert_eq!(reopened.last_opened().unwrap(), Some(id("bg_ru")));
    reopened.close();
}

#[test]
fn unknown_id_leaves_preference_untouched() {
    let temp = tempfile::tempdir().unwrap();
    make_gitabase(temp.path(), "bg_en.db");

    let library = Library::open(store_at(temp.path())).unwrap();
    let err = library.books(&id("sb_ru")).unwrap_err();
    assert_matches!(err, GitabaseError::UnknownGitabase(_));
    assert!(library.last_opened().unwrap().is_none());
    library.close();
}

#[test]
fn corrupt_files_are_not_readable() {
    let temp = tempfile::tempdir().unwrap();
    make_gitabase(temp.path(), "bg_en.db");
    fs::write(temp.path().join("cc_en.db"), b"not a database").unwrap();

    let library = Library::open(store_at(temp.path())).unwrap();
    // The corrupt file was scanned but never mapped into the cache.
    let err = library.books(&id("cc_en")).unwrap_err();
    assert_matches!(err, GitabaseError::UnknownGitabase(_));
    assert_eq!(library.books(&id("bg_en")).unwrap().len(), 1);
    library.close();
}

#[test]
fn refresh_picks_up_new_files() {
    let temp = tempfile::tempdir().unwrap();
    make_gitabase(temp.path(), "bg_en.db");

    let library = Library::open(store_at(temp.path())).unwrap();
    assert_matches!(
        library.books(&id("sb_en")).unwrap_err(),
        GitabaseError::UnknownGitabase(_)
    );

    make_gitabase(temp.path(), "sb_en.db");
    let entries = library.refresh().unwrap();
    assert_eq!(entries.iter().filter(|e| e.valid).count(), 2);
    assert_eq!(library.books(&id("sb_en")).unwrap().len(), 1);
    library.close();
}
