use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use camino::Utf8Path;
use tracing::{debug, info};

use crate::archive;
use crate::catalog::{CatalogEntry, CatalogScanner};
use crate::error::{ErrorKind, GitabaseError};
use crate::fetch::{CancelToken, RemoteFetcher};

/// Coarse pipeline state surfaced to progress observers. One run walks
/// `Pending → Downloading → Extracting → Scanning → Succeeded`; any stage
/// failure jumps to `Failed` carrying the stage and the error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Pending,
    Downloading,
    Extracting,
    Scanning,
    Succeeded,
    Failed { stage: ImportStage, kind: ErrorKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    Download,
    Extract,
    Scan,
}

/// Staging name for the in-flight archive inside the destination folder. A
/// rerun overwrites whatever a failed or cancelled attempt left here, and
/// the scanner's filename pattern can never mistake it for a catalog entry.
pub const STAGING_FILE_NAME: &str = "import.zip.partial";

/// Observer for one pipeline run: status transitions plus download byte
/// progress. Implementations must tolerate calls from a worker thread.
pub trait ProgressSink {
    fn status(&self, _status: ImportStatus) {}
    fn bytes(&self, _done: u64, _total: u64) {}
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    /// Valid entries whose files came out of this archive.
    pub imported: Vec<CatalogEntry>,
    /// Full post-import scan of the destination folder.
    pub catalog: Vec<CatalogEntry>,
}

/// Download → extract → scan, as one restartable unit of work. A failed or
/// cancelled run leaves at worst a partial staging file that the next run
/// overwrites; the catalog is only touched after a successful extraction.
pub struct ImportPipeline<F: RemoteFetcher> {
    fetcher: F,
    scanner: CatalogScanner,
}

impl<F: RemoteFetcher> ImportPipeline<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            scanner: CatalogScanner::new(),
        }
    }

    pub fn run(
        &self,
        url: &str,
        destination: &Utf8Path,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<ImportReport, GitabaseError> {
        sink.status(ImportStatus::Pending);
        fs::create_dir_all(destination.as_std_path()).map_err(|err| {
            self.fail(
                sink,
                ImportStage::Download,
                GitabaseError::Filesystem(err.to_string()),
            )
        })?;
        let staging = destination.join(STAGING_FILE_NAME);

        sink.status(ImportStatus::Downloading);
        info!(url, dest = %destination, "import started");
        self.fetcher
            .download(
                url,
                staging.as_std_path(),
                &mut |done, total| sink.bytes(done, total),
                cancel,
            )
            .map_err(|err| self.fail(sink, ImportStage::Download, err))?;

        sink.status(ImportStatus::Extracting);
        archive::validate_zip(staging.as_std_path())
            .map_err(|err| self.fail(sink, ImportStage::Extract, err))?;
        let extracted = archive::extract_zip(staging.as_std_path(), destination.as_std_path())
            .map_err(|err| self.fail(sink, ImportStage::Extract, err))?;

        sink.status(ImportStatus::Scanning);
        let catalog = self
            .scanner
            .scan(destination)
            .map_err(|err| self.fail(sink, ImportStage::Scan, err))?;
        let extracted: HashSet<PathBuf> = extracted.into_iter().collect();
        let imported: Vec<CatalogEntry> = catalog
            .iter()
            .filter(|entry| entry.valid && extracted.contains(entry.file_path.as_std_path()))
            .cloned()
            .collect();
        if imported.is_empty() {
            return Err(self.fail(sink, ImportStage::Scan, GitabaseError::EmptyImport));
        }

        if let Err(err) = fs::remove_file(staging.as_std_path()) {
            debug!(staging = %staging, error = %err, "could not remove staging archive");
        }

        sink.status(ImportStatus::Succeeded);
        info!(url, imported = imported.len(), "import succeeded");
        Ok(ImportReport { imported, catalog })
    }

    fn fail(
        &self,
        sink: &dyn ProgressSink,
        stage: ImportStage,
        err: GitabaseError,
    ) -> GitabaseError {
        sink.status(ImportStatus::Failed {
            stage,
            kind: err.kind(),
        });
        err
    }
}
