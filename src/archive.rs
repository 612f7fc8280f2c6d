use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipArchive;

use crate::error::GitabaseError;

/// Unzips `zip_path` into `target_dir`, creating directories and overwriting
/// existing files. Overwrite semantics make a retried extraction idempotent;
/// there is no rollback of entries already written when a later one fails.
/// Returns the extracted file paths.
pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>, GitabaseError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| GitabaseError::Archive(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| GitabaseError::Archive(err.to_string()))?;

    fs::create_dir_all(target_dir).map_err(|err| GitabaseError::Filesystem(err.to_string()))?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| GitabaseError::Archive(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(GitabaseError::Archive(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        extracted.push(entry_path);
    }
    debug!(archive = %zip_path.display(), files = extracted.len(), "archive extracted");
    Ok(extracted)
}

/// Full decode pass over the archive without writing anything. Catches a
/// truncated or corrupt download before extraction touches the catalog.
pub fn validate_zip(zip_path: &Path) -> Result<(), GitabaseError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| GitabaseError::Archive(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| GitabaseError::Archive(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| GitabaseError::Archive(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| GitabaseError::Archive(err.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in entries {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn extract_creates_nested_files() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("bundle.zip");
        build_zip(&zip_path, &[("bg_en.db", b"alpha"), ("nested/sb_ru.db", b"beta")]);

        let dest = temp.path().join("out");
        let extracted = extract_zip(&zip_path, &dest).unwrap();
        assert_eq!(extracted.len(), 2);
        assert_eq!(fs::read(dest.join("bg_en.db")).unwrap(), b"alpha");
        assert_eq!(fs::read(dest.join("nested/sb_ru.db")).unwrap(), b"beta");
    }

    #[test]
    fn extract_twice_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("bundle.zip");
        build_zip(&zip_path, &[("bg_en.db", b"alpha")]);

        let dest = temp.path().join("out");
        extract_zip(&zip_path, &dest).unwrap();
        // Scribble over the target to prove the second pass overwrites.
        fs::write(dest.join("bg_en.db"), b"stale").unwrap();
        extract_zip(&zip_path, &dest).unwrap();
        assert_eq!(fs::read(dest.join("bg_en.db")).unwrap(), b"alpha");
    }

    #[test]
    fn validate_rejects_garbage() {
        let temp = tempfile::tempdir().unwrap();
        let not_a_zip = temp.path().join("bundle.zip");
        fs::write(&not_a_zip, b"definitely not a zip archive").unwrap();
        assert!(matches!(
            validate_zip(&not_a_zip),
            Err(GitabaseError::Archive(_))
        ));
    }
}
