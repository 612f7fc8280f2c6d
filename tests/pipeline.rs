use std::fs;
use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::Mutex;
use std::thread;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use rusqlite::Connection;
use zip::write::SimpleFileOptions;

use gitabase_manager::error::{ErrorKind, GitabaseError};
use gitabase_manager::fetch::{CancelToken, HttpFetcher, RemoteFetcher};
use gitabase_manager::pipeline::{
    ImportPipeline, ImportStage, ImportStatus, ProgressSink, STAGING_FILE_NAME,
};

/// Builds an archive of real SQLite payloads, returned as raw zip bytes.
fn build_archive(entries: &[&str]) -> Vec<u8> {
    let temp = tempfile::tempdir().unwrap();
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for name in entries {
        let db_path = temp.path().join(name);
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE books (id INTEGER PRIMARY KEY, title TEXT);
             INSERT INTO books VALUES (1, 'fixture');",
        )
        .unwrap();
        drop(conn);
        writer
            .start_file(name.to_string(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&fs::read(&db_path).unwrap()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Fetcher that "downloads" canned bytes, honoring cancellation between
/// halves the way the HTTP fetcher honors it between chunks.
struct CannedFetcher {
    body: Vec<u8>,
}

impl RemoteFetcher for CannedFetcher {
    fn download(
        &self,
        _url: &str,
        destination: &Path,
        progress: &mut dyn FnMut(u64, u64),
        cancel: &CancelToken,
    ) -> Result<(), GitabaseError> {
        let total = self.body.len() as u64;
        let half = self.body.len() / 2;
        let mut file = fs::File::create(destination)
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        file.write_all(&self.body[..half])
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        progress(half as u64, total);
        if cancel.is_cancelled() {
            return Err(GitabaseError::Cancelled);
        }
        file.write_all(&self.body[half..])
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        progress(total, total);
        Ok(())
    }
}

struct FailingFetcher;

impl RemoteFetcher for FailingFetcher {
    fn download(
        &self,
        _url: &str,
        _destination: &Path,
        _progress: &mut dyn FnMut(u64, u64),
        _cancel: &CancelToken,
    ) -> Result<(), GitabaseError> {
        Err(GitabaseError::HttpStatus {
            status: 404,
            message: "missing archive".to_string(),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    statuses: Mutex<Vec<ImportStatus>>,
    max_bytes: Mutex<u64>,
}

impl RecordingSink {
    fn statuses(&self) -> Vec<ImportStatus> {
        self.statuses.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn status(&self, status: ImportStatus) {
        self.statuses.lock().unwrap().push(status);
    }

    fn bytes(&self, done: u64, _total: u64) {
        let mut max = self.max_bytes.lock().unwrap();
        *max = (*max).max(done);
    }
}

fn dest_dir(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().join("catalog")).unwrap()
}

#[test]
fn full_run_reaches_succeeded() {
    let temp = tempfile::tempdir().unwrap();
    let dest = dest_dir(&temp);
    let pipeline = ImportPipeline::new(CannedFetcher {
        body: build_archive(&["bg_en.db", "sb_ru.db"]),
    });
    let sink = RecordingSink::default();

    let report = pipeline
        .run("mock://archive.zip", &dest, &sink, &CancelToken::new())
        .unwrap();

    assert_eq!(report.imported.len(), 2);
    assert!(report.imported.iter().all(|entry| entry.valid));
    assert_eq!(
        sink.statuses(),
        vec![
            ImportStatus::Pending,
            ImportStatus::Downloading,
            ImportStatus::Extracting,
            ImportStatus::Scanning,
            ImportStatus::Succeeded,
        ]
    );
    // Staging archive is cleaned up after import.
    assert!(!dest.join(STAGING_FILE_NAME).as_std_path().exists());
    assert!(*sink.max_bytes.lock().unwrap() > 0);
}

#[test]
fn end_to_end_over_http() {
    let body = build_archive(&["bg_en.db", "sb_ru.db"]);
    let response = [
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes(),
        body,
    ]
    .concat();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/archive.zip", listener.local_addr().unwrap());
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut head = [0u8; 4096];
        let _ = stream.read(&mut head);
        stream.write_all(&response).unwrap();
    });

    let temp = tempfile::tempdir().unwrap();
    let dest = dest_dir(&temp);
    let pipeline = ImportPipeline::new(HttpFetcher::new().unwrap());
    let sink = RecordingSink::default();

    let report = pipeline
        .run(&url, &dest, &sink, &CancelToken::new())
        .unwrap();
    server.join().unwrap();

    assert_eq!(report.imported.len(), 2);
    let scanned = gitabase_manager::catalog::CatalogScanner::new()
        .scan(&dest)
        .unwrap();
    assert_eq!(scanned.iter().filter(|e| e.valid).count(), 2);
    assert_eq!(
        sink.statuses().last(),
        Some(&ImportStatus::Succeeded)
    );
}

#[test]
fn download_failure_surfaces_failed_state() {
    let temp = tempfile::tempdir().unwrap();
    let dest = dest_dir(&temp);
    let pipeline = ImportPipeline::new(FailingFetcher);
    let sink = RecordingSink::default();

    let err = pipeline
        .run("mock://missing.zip", &dest, &sink, &CancelToken::new())
        .unwrap_err();
    assert_matches!(err, GitabaseError::HttpStatus { status: 404, .. });
    assert_eq!(
        sink.statuses().last(),
        Some(&ImportStatus::Failed {
            stage: ImportStage::Download,
            kind: ErrorKind::Http,
        })
    );
}

#[test]
fn corrupt_archive_fails_at_extract() {
    let temp = tempfile::tempdir().unwrap();
    let dest = dest_dir(&temp);
    let pipeline = ImportPipeline::new(CannedFetcher {
        body: b"not a zip archive".to_vec(),
    });
    let sink = RecordingSink::default();

    let err = pipeline
        .run("mock://garbage.zip", &dest, &sink, &CancelToken::new())
        .unwrap_err();
    assert_matches!(err, GitabaseError::Archive(_));
    assert_eq!(
        sink.statuses().last(),
        Some(&ImportStatus::Failed {
            stage: ImportStage::Extract,
            kind: ErrorKind::Archive,
        })
    );
}

#[test]
fn archive_without_gitabases_fails_at_scan() {
    let temp = tempfile::tempdir().unwrap();
    let dest = dest_dir(&temp);
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("README.txt", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"no databases here").unwrap();
    let body = writer.finish().unwrap().into_inner();

    let pipeline = ImportPipeline::new(CannedFetcher { body });
    let sink = RecordingSink::default();

    let err = pipeline
        .run("mock://empty.zip", &dest, &sink, &CancelToken::new())
        .unwrap_err();
    assert_matches!(err, GitabaseError::EmptyImport);
    assert_eq!(
        sink.statuses().last(),
        Some(&ImportStatus::Failed {
            stage: ImportStage::Scan,
            kind: ErrorKind::EmptyImport,
        })
    );
}

#[test]
fn cancelled_run_retries_from_scratch() {
    let temp = tempfile::tempdir().unwrap();
    let dest = dest_dir(&temp);
    let body = build_archive(&["bg_en.db"]);
    let pipeline = ImportPipeline::new(CannedFetcher { body: body.clone() });

    let cancelled = CancelToken::new();
    cancelled.cancel();
    let sink = RecordingSink::default();
    let err = pipeline
        .run("mock://archive.zip", &dest, &sink, &cancelled)
        .unwrap_err();
    assert_matches!(err, GitabaseError::Cancelled);

    // The aborted run left a partial staging file behind.
    let staging = dest.join(STAGING_FILE_NAME);
    assert!(staging.as_std_path().exists());
    assert!(fs::read(staging.as_std_path()).unwrap().len() < body.len());

    // A fresh run overwrites the partial file and completes.
    let sink = RecordingSink::default();
    let report = pipeline
        .run("mock://archive.zip", &dest, &sink, &CancelToken::new())
        .unwrap();
    assert_eq!(report.imported.len(), 1);
    assert_eq!(sink.statuses().last(), Some(&ImportStatus::Succeeded));
}
