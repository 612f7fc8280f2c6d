use crate::cache::ConnectionCache;
use crate::catalog::{CatalogEntry, CatalogScanner};
use crate::domain::GitabaseId;
use crate::error::GitabaseError;
use crate::reader::{Book, Chapter, GitabaseReader, Verse};
use crate::store::Store;

/// Reading surface over the local catalog: one scan feeding a bounded
/// connection cache, with the last-opened gitabase persisted through the
/// store's preference file. This is the composition the binary hands user
/// reads to; the import pipeline stays separate.
pub struct Library {
    store: Store,
    cache: ConnectionCache,
}

impl Library {
    /// Scans the catalog folder and maps every valid entry into the cache.
    pub fn open(store: Store) -> Result<Self, GitabaseError> {
        let library = Self {
            store,
            cache: ConnectionCache::with_default_capacity(),
        };
        library.refresh()?;
        Ok(library)
    }

    /// Rescans the catalog folder and remaps the cache; stale handles are
    /// dropped so the next read reopens at the new path.
    pub fn refresh(&self) -> Result<Vec<CatalogEntry>, GitabaseError> {
        let entries = CatalogScanner::new().scan(self.store.catalog_root())?;
        self.cache.update_catalog(&entries);
        Ok(entries)
    }

    pub fn books(&self, id: &GitabaseId) -> Result<Vec<Book>, GitabaseError> {
        let books = GitabaseReader::new(&self.cache).books(id)?;
        self.remember(id)?;
        Ok(books)
    }

    pub fn chapters(&self, id: &GitabaseId, book_id: i64) -> Result<Vec<Chapter>, GitabaseError> {
        let chapters = GitabaseReader::new(&self.cache).chapters(id, book_id)?;
        self.remember(id)?;
        Ok(chapters)
    }

    pub fn verses(&self, id: &GitabaseId, chapter_id: i64) -> Result<Vec<Verse>, GitabaseError> {
        let verses = GitabaseReader::new(&self.cache).verses(id, chapter_id)?;
        self.remember(id)?;
        Ok(verses)
    }

    pub fn last_opened(&self) -> Result<Option<GitabaseId>, GitabaseError> {
        self.store.last_opened()
    }

    pub fn close(&self) {
        self.cache.close_all();
    }

    /// Only successful reads move the preference; a failed open or query
    /// leaves the previous last-opened id in place.
    fn remember(&self, id: &GitabaseId) -> Result<(), GitabaseError> {
        self.store.save_last_opened(id)
    }
}
