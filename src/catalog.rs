use std::collections::HashMap;
use std::fs;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::GitabaseId;
use crate::error::GitabaseError;
use crate::store::{DB_EXTENSIONS, Store};

/// One discovered gitabase file. `valid` is false when the filename parsed
/// but the file failed the readability probe, or when a newer file for the
/// same id shadows this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: GitabaseId,
    pub title: String,
    pub file_path: Utf8PathBuf,
    pub last_modified: DateTime<Utc>,
    pub valid: bool,
    #[serde(default)]
    pub invalid_reason: Option<String>,
}

/// Scans the catalog folder for `<kind>_<language>.<ext>` database files.
/// Per-file failures are reported as invalid entries; the scan itself never
/// fails because of one bad file.
pub struct CatalogScanner {
    pattern: Regex,
}

impl Default for CatalogScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogScanner {
    pub fn new() -> Self {
        // Tokens mirror GitabaseId validation; extension list comes from the
        // store layout.
        let pattern = Regex::new(r"^([a-z0-9]+)_([a-z0-9]+)\.([a-z]+)$")
            .expect("catalog filename pattern is a valid regex");
        Self { pattern }
    }

    pub fn scan(&self, folder: &Utf8Path) -> Result<Vec<CatalogEntry>, GitabaseError> {
        if !folder.as_std_path().is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let dir = fs::read_dir(folder.as_std_path())
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        for entry in dir {
            // One unreadable dirent must not take the rest of the catalog
            // down with it.
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.path().is_file() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        // Filename order is the output order.
        names.sort();

        let mut entries = Vec::new();
        for name in names {
            if let Some(entry) = self.scan_file(folder, &name) {
                entries.push(entry);
            }
        }

        dedupe_by_recency(&mut entries);
        debug!(
            total = entries.len(),
            valid = entries.iter().filter(|e| e.valid).count(),
            "catalog scan complete"
        );
        Ok(entries)
    }

    /// Returns None for files that are not catalog candidates at all
    /// (unrecognized names, wrong extension).
    fn scan_file(&self, folder: &Utf8Path, name: &str) -> Option<CatalogEntry> {
        let captures = self.pattern.captures(name)?;
        let ext = captures.get(3)?.as_str();
        if !DB_EXTENSIONS.contains(&ext) {
            return None;
        }

        let stem = format!("{}_{}", &captures[1], &captures[2]);
        let id: GitabaseId = match stem.parse() {
            Ok(id) => id,
            Err(_) => return None,
        };

        let file_path = folder.join(name);
        let last_modified = file_modified(&file_path);
        let title = default_title(&id);

        match probe_readable(&file_path) {
            Ok(()) => Some(CatalogEntry {
                id,
                title,
                file_path,
                last_modified,
                valid: true,
                invalid_reason: None,
            }),
            Err(err) => {
                debug!(file = %file_path, error = %err, "catalog file failed readability probe");
                Some(CatalogEntry {
                    id,
                    title,
                    file_path,
                    last_modified,
                    valid: false,
                    invalid_reason: Some(err.to_string()),
                })
            }
        }
    }
}

/// Opens the file read-only and runs a trivial query. Catches non-SQLite
/// payloads and truncated files before the cache ever sees them.
fn probe_readable(path: &Utf8Path) -> Result<(), GitabaseError> {
    let conn = Connection::open_with_flags(
        path.as_std_path(),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|err| GitabaseError::OpenDatabase {
        path: path.to_string(),
        message: err.to_string(),
    })?;
    conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))
        .map_err(|err| GitabaseError::OpenDatabase {
            path: path.to_string(),
            message: err.to_string(),
        })?;
    Ok(())
}

/// Two files mapping to the same id (e.g. `bg_en.db` and `bg_en.sqlite`)
/// resolve in favor of the most-recently-modified one; the loser stays in
/// the result marked invalid.
fn dedupe_by_recency(entries: &mut [CatalogEntry]) {
    let mut newest: HashMap<GitabaseId, (usize, DateTime<Utc>)> = HashMap::new();
    for (index, entry) in entries.iter().enumerate() {
        if !entry.valid {
            continue;
        }
        match newest.get(&entry.id) {
            Some((_, seen)) if *seen >= entry.last_modified => {}
            _ => {
                newest.insert(entry.id.clone(), (index, entry.last_modified));
            }
        }
    }
    for (index, entry) in entries.iter_mut().enumerate() {
        if !entry.valid {
            continue;
        }
        if newest.get(&entry.id).map(|(winner, _)| *winner) != Some(index) {
            entry.valid = false;
            entry.invalid_reason = Some("shadowed by a newer file for the same id".to_string());
        }
    }
}

fn file_modified(path: &Utf8Path) -> DateTime<Utc> {
    fs::metadata(path.as_std_path())
        .and_then(|meta| meta.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH))
}

fn default_title(id: &GitabaseId) -> String {
    format!("{} ({})", id.kind, id.language)
}

/// Snapshot of the last scan, persisted next to the catalog files so callers
/// can list the library without re-probing every database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogManifest {
    pub scanned_at: DateTime<Utc>,
    pub entries: Vec<CatalogEntry>,
}

impl CatalogManifest {
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self {
            scanned_at: Utc::now(),
            entries,
        }
    }

    pub fn write(&self, store: &Store) -> Result<(), GitabaseError> {
        Store::write_json_atomic(&store.manifest_path(), self)
    }

    pub fn load(store: &Store) -> Result<Option<Self>, GitabaseError> {
        let path = store.manifest_path();
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        let manifest = serde_json::from_str(&content)
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        Ok(Some(manifest))
    }
}
