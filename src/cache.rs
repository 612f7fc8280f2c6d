use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::catalog::CatalogEntry;
use crate::domain::GitabaseId;
use crate::error::GitabaseError;

pub const DEFAULT_CAPACITY: usize = 3;

/// A live read-only connection to one gitabase file. Owned by the cache;
/// callers only ever see it through a [`CacheGuard`].
pub struct GitabaseHandle {
    id: GitabaseId,
    path: Utf8PathBuf,
    conn: Mutex<Connection>,
}

impl GitabaseHandle {
    fn open(id: &GitabaseId, path: &Utf8Path) -> Result<Self, GitabaseError> {
        let conn = Connection::open_with_flags(
            path.as_std_path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| GitabaseError::OpenDatabase {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        Ok(Self {
            id: id.clone(),
            path: path.to_owned(),
            conn: Mutex::new(conn),
        })
    }

    pub fn id(&self) -> &GitabaseId {
        &self.id
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Runs a closure against the underlying connection. Statement execution
    /// is serialized per handle; concurrent holders of the same handle queue
    /// here, which is the storage engine's own discipline, not the cache's.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, GitabaseError> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&conn).map_err(|err| GitabaseError::Database(err.to_string()))
    }
}

enum SlotState {
    /// An open is in flight on some thread; waiters block until it resolves.
    Opening,
    Ready(Arc<GitabaseHandle>),
}

struct Slot {
    state: SlotState,
    in_use: usize,
    last_used: u64,
}

struct Inner {
    slots: HashMap<GitabaseId, Slot>,
    paths: HashMap<GitabaseId, Utf8PathBuf>,
    tick: u64,
    opens_total: u64,
    evictions_total: u64,
    closed: bool,
}

/// Bounded cache of open gitabase connections, keyed by [`GitabaseId`].
///
/// At most `capacity` connections are open at any instant, counting in-flight
/// opens. Eviction is least-recently-used among handles with no outstanding
/// guards; when every slot is pinned, `get` for a new id blocks until a guard
/// drops. Concurrent `get`s for the same id perform exactly one open.
pub struct ConnectionCache {
    inner: Mutex<Inner>,
    freed: Condvar,
    capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub open_handles: usize,
    pub opens_total: u64,
    pub evictions_total: u64,
}

impl ConnectionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                paths: HashMap::new(),
                tick: 0,
                opens_total: 0,
                evictions_total: 0,
                closed: false,
            }),
            freed: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Replaces the id-to-file mapping with the valid entries of a scan.
    /// Entries whose backing file moved are invalidated so the next `get`
    /// reopens at the new path.
    pub fn update_catalog(&self, entries: &[CatalogEntry]) {
        let mut inner = self.lock();
        let mut paths = HashMap::new();
        for entry in entries.iter().filter(|entry| entry.valid) {
            paths.insert(entry.id.clone(), entry.file_path.clone());
        }
        let stale: Vec<GitabaseId> = inner
            .slots
            .iter()
            .filter_map(|(id, slot)| {
                let moved = match (&slot.state, paths.get(id)) {
                    (SlotState::Ready(handle), Some(path)) => handle.path() != path,
                    (SlotState::Ready(_), None) => true,
                    (SlotState::Opening, _) => false,
                };
                moved.then(|| id.clone())
            })
            .collect();
        for id in stale {
            debug!(%id, "catalog update invalidated cached handle");
            inner.slots.remove(&id);
        }
        inner.paths = paths;
        self.freed.notify_all();
    }

    /// Resolves `id` to an open handle, opening and caching on miss.
    ///
    /// Blocks while another thread opens the same id, and while the cache is
    /// full of pinned handles. A failed open is not inserted and leaves every
    /// other entry untouched.
    pub fn get(&self, id: &GitabaseId) -> Result<CacheGuard<'_>, GitabaseError> {
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return Err(GitabaseError::CacheClosed);
            }

            inner.tick += 1;
            let tick = inner.tick;
            match inner.slots.get_mut(id) {
                Some(slot) => match &slot.state {
                    SlotState::Ready(handle) => {
                        let handle = Arc::clone(handle);
                        slot.in_use += 1;
                        slot.last_used = tick;
                        return Ok(CacheGuard {
                            cache: self,
                            id: id.clone(),
                            handle,
                        });
                    }
                    SlotState::Opening => {
                        inner = self.wait(inner);
                        continue;
                    }
                },
                None => {}
            }

            // Miss. Resolve the path before touching capacity so an unknown
            // id never triggers an eviction.
            let path = match inner.paths.get(id) {
                Some(path) => path.clone(),
                None => return Err(GitabaseError::UnknownGitabase(id.to_string())),
            };

            if inner.slots.len() >= self.capacity {
                if !Self::evict_lru(&mut inner) {
                    // Every slot pinned by an in-flight query; wait for a
                    // guard to drop and re-examine from the top.
                    inner = self.wait(inner);
                    continue;
                }
            }

            inner.slots.insert(
                id.clone(),
                Slot {
                    state: SlotState::Opening,
                    in_use: 0,
                    last_used: tick,
                },
            );
            drop(inner);

            let opened = GitabaseHandle::open(id, &path);

            inner = self.lock();
            match opened {
                Ok(handle) => {
                    if inner.closed {
                        inner.slots.remove(id);
                        self.freed.notify_all();
                        return Err(GitabaseError::CacheClosed);
                    }
                    let handle = Arc::new(handle);
                    match inner.slots.get_mut(id) {
                        Some(slot) if matches!(slot.state, SlotState::Opening) => {
                            slot.state = SlotState::Ready(Arc::clone(&handle));
                            slot.in_use = 1;
                        }
                        // Invalidated while the open was in flight; hand the
                        // handle to this caller without caching it.
                        _ => {}
                    }
                    inner.opens_total += 1;
                    debug!(%id, path = %path, "opened gitabase connection");
                    self.freed.notify_all();
                    return Ok(CacheGuard {
                        cache: self,
                        id: id.clone(),
                        handle,
                    });
                }
                Err(err) => {
                    inner.slots.remove(id);
                    self.freed.notify_all();
                    return Err(err);
                }
            }
        }
    }

    /// Runs a query through a cached handle. A database-level failure
    /// invalidates the entry so the next `get` retries with a fresh open;
    /// files deleted out from under a cached connection surface here.
    pub fn run<T>(
        &self,
        id: &GitabaseId,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, GitabaseError> {
        let guard = self.get(id)?;
        let result = guard.with_conn(f);
        drop(guard);
        if let Err(GitabaseError::Database(_)) = &result {
            self.invalidate(id);
        }
        result
    }

    /// Closes and removes the handle for `id` if cached. Idempotent. With
    /// guards outstanding the connection closes when the last guard drops.
    pub fn invalidate(&self, id: &GitabaseId) {
        let mut inner = self.lock();
        if inner.slots.remove(id).is_some() {
            debug!(%id, "invalidated cached handle");
        }
        self.freed.notify_all();
    }

    /// Closes every handle and refuses further lookups. Process teardown.
    pub fn close_all(&self) {
        let mut inner = self.lock();
        let count = inner.slots.len();
        inner.slots.clear();
        inner.closed = true;
        self.freed.notify_all();
        info!(closed = count, "connection cache shut down");
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            open_handles: inner.slots.len(),
            opens_total: inner.opens_total,
            evictions_total: inner.evictions_total,
        }
    }

    fn evict_lru(inner: &mut Inner) -> bool {
        let victim = inner
            .slots
            .iter()
            .filter(|(_, slot)| slot.in_use == 0 && matches!(slot.state, SlotState::Ready(_)))
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(id, _)| id.clone());
        match victim {
            Some(id) => {
                // Dropping the only Arc closes the underlying connection.
                inner.slots.remove(&id);
                inner.evictions_total += 1;
                debug!(%id, "evicted least-recently-used handle");
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Inner>) -> MutexGuard<'a, Inner> {
        self.freed
            .wait(guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Pin on a cached handle. While a guard lives, its handle cannot be
/// evicted; the pin releases on drop.
pub struct CacheGuard<'a> {
    cache: &'a ConnectionCache,
    id: GitabaseId,
    handle: Arc<GitabaseHandle>,
}

impl std::fmt::Debug for CacheGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGuard").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Deref for CacheGuard<'_> {
    type Target = GitabaseHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for CacheGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.cache.lock();
        if let Some(slot) = inner.slots.get_mut(&self.id) {
            slot.in_use = slot.in_use.saturating_sub(1);
        }
        self.cache.freed.notify_all();
    }
}
