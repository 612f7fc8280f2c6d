use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::GitabaseId;
use crate::error::GitabaseError;

pub const DB_EXTENSIONS: &[&str] = &["db", "sqlite"];

/// On-disk layout of the local gitabase library: one catalog folder holding
/// `<kind>_<language>.<ext>` database files, a manifest of the last scan and
/// a small JSON preferences file.
#[derive(Debug, Clone)]
pub struct Store {
    catalog_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, GitabaseError> {
        let catalog_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir().join(".local/share").join("gitabase"),
                )
                .ok()
            })
            .ok_or_else(|| {
                GitabaseError::Filesystem("unable to resolve catalog directory".to_string())
            })?;
        Ok(Self { catalog_root })
    }

    pub fn new_with_root(catalog_root: Utf8PathBuf) -> Self {
        Self { catalog_root }
    }

    pub fn catalog_root(&self) -> &Utf8Path {
        &self.catalog_root
    }

    pub fn ensure_catalog_root(&self) -> Result<(), GitabaseError> {
        fs::create_dir_all(self.catalog_root.as_std_path())
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))
    }

    pub fn gitabase_path(&self, id: &GitabaseId, ext: &str) -> Utf8PathBuf {
        self.catalog_root.join(format!("{}.{ext}", id.file_stem()))
    }

    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.catalog_root.join("catalog.json")
    }

    pub fn prefs_path(&self) -> Utf8PathBuf {
        self.catalog_root.join("prefs.json")
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), GitabaseError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn write_json_atomic<T: Serialize>(
        path: &Utf8Path,
        value: &T,
    ) -> Result<(), GitabaseError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn load_prefs(&self) -> Result<Prefs, GitabaseError> {
        let path = self.prefs_path();
        if !path.as_std_path().exists() {
            return Ok(Prefs::default());
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        serde_json::from_str(&content).map_err(|err| GitabaseError::PrefsParse(err.to_string()))
    }

    pub fn save_prefs(&self, prefs: &Prefs) -> Result<(), GitabaseError> {
        Self::write_json_atomic(&self.prefs_path(), prefs)
    }

    pub fn save_last_opened(&self, id: &GitabaseId) -> Result<(), GitabaseError> {
        let mut prefs = self.load_prefs()?;
        prefs.last_opened = Some(id.clone());
        self.save_prefs(&prefs)
    }

    pub fn last_opened(&self) -> Result<Option<GitabaseId>, GitabaseError> {
        Ok(self.load_prefs()?.last_opened)
    }

    pub fn remove_gitabase(&self, id: &GitabaseId) -> Result<bool, GitabaseError> {
        let mut removed = false;
        for ext in DB_EXTENSIONS {
            let path = self.gitabase_path(id, ext);
            if path.as_std_path().exists() {
                fs::remove_file(path.as_std_path())
                    .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
                removed = true;
            }
        }
        Ok(removed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Prefs {
    #[serde(default)]
    pub last_opened: Option<GitabaseId>,
}
