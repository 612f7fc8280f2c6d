use serde::Serialize;

use crate::cache::ConnectionCache;
use crate::domain::GitabaseId;
use crate::error::GitabaseError;

/// Row mapping over a cached gitabase connection. Every gitabase file ships
/// the same three tables: `books`, `chapters` (keyed to a book) and `texts`
/// (keyed to a chapter).
///
/// Queries run through [`ConnectionCache::run`], so a database that fails
/// mid-query (file vanished, truncated) drops out of the cache and the next
/// call attempts a fresh open.
#[derive(Debug, Clone, Serialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Chapter {
    pub id: i64,
    pub book_id: i64,
    pub number: i64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Verse {
    pub id: i64,
    pub chapter_id: i64,
    pub number: i64,
    pub body: String,
}

pub struct GitabaseReader<'a> {
    cache: &'a ConnectionCache,
}

impl<'a> GitabaseReader<'a> {
    pub fn new(cache: &'a ConnectionCache) -> Self {
        Self { cache }
    }

    pub fn books(&self, id: &GitabaseId) -> Result<Vec<Book>, GitabaseError> {
        self.cache.run(id, |conn| {
            let mut stmt = conn.prepare_cached("SELECT id, title FROM books ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok(Book {
                    id: row.get(0)?,
                    title: row.get(1)?,
                })
            })?;
            rows.collect()
        })
    }

    pub fn chapters(&self, id: &GitabaseId, book_id: i64) -> Result<Vec<Chapter>, GitabaseError> {
        self.cache.run(id, |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, book_id, number, title FROM chapters
                 WHERE book_id = ?1 ORDER BY number",
            )?;
            let rows = stmt.query_map([book_id], |row| {
                Ok(Chapter {
                    id: row.get(0)?,
                    book_id: row.get(1)?,
                    number: row.get(2)?,
                    title: row.get(3)?,
                })
            })?;
            rows.collect()
        })
    }

    pub fn verses(&self, id: &GitabaseId, chapter_id: i64) -> Result<Vec<Verse>, GitabaseError> {
        self.cache.run(id, |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, chapter_id, number, text FROM texts
                 WHERE chapter_id = ?1 ORDER BY number",
            )?;
            let rows = stmt.query_map([chapter_id], |row| {
                Ok(Verse {
                    id: row.get(0)?,
                    chapter_id: row.get(1)?,
                    number: row.get(2)?,
                    body: row.get(3)?,
                })
            })?;
            rows.collect()
        })
    }
}
