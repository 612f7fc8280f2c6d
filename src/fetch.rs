use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::GitabaseError;

const CHUNK_SIZE: usize = 64 * 1024;

/// Synthetic total used when the server does not report a content length, so
/// progress indicators still advance. Any monotonic fallback would do; the
/// reported position is capped one byte short of this until the stream ends.
pub const FALLBACK_TOTAL_BYTES: u64 = 32 * 1024 * 1024;

/// Shared cancellation flag checked between chunks. Cancelling stops the
/// stream promptly and leaves a partial file for the caller to overwrite.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub trait RemoteFetcher: Send + Sync {
    /// Streams `url` to `destination` in fixed-size chunks, reporting
    /// `(bytes_done, bytes_total)` after each chunk. Partial files are left
    /// in place on failure or cancellation; the caller owns cleanup.
    fn download(
        &self,
        url: &str,
        destination: &Path,
        progress: &mut dyn FnMut(u64, u64),
        cancel: &CancelToken,
    ) -> Result<(), GitabaseError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, GitabaseError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gitabase/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GitabaseError::HttpTransport(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            // Archives can be large; no overall deadline on the body read.
            .timeout(None)
            .build()
            .map_err(|err| GitabaseError::HttpTransport(err.to_string()))?;
        Ok(Self { client })
    }

    fn send_with_retries(&self, url: &str) -> Result<reqwest::blocking::Response, GitabaseError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(GitabaseError::HttpTransport(err.to_string()));
                }
            }
        }
    }
}

impl RemoteFetcher for HttpFetcher {
    fn download(
        &self,
        url: &str,
        destination: &Path,
        progress: &mut dyn FnMut(u64, u64),
        cancel: &CancelToken,
    ) -> Result<(), GitabaseError> {
        let mut response = self.send_with_retries(url)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "download request failed".to_string());
            return Err(GitabaseError::HttpStatus { status, message });
        }

        let total = response.content_length();
        let mut file = File::create(destination)
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut done: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                debug!(url, bytes = done, "download cancelled");
                return Err(GitabaseError::Cancelled);
            }
            let read = response
                .read(&mut buffer)
                .map_err(|err| GitabaseError::HttpTransport(err.to_string()))?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
            done += read as u64;
            let (frame_done, frame_total) = progress_frame(done, total, false);
            progress(frame_done, frame_total);
        }

        file.flush()
            .map_err(|err| GitabaseError::Filesystem(err.to_string()))?;
        let (frame_done, frame_total) = progress_frame(done, total, true);
        progress(frame_done, frame_total);
        debug!(url, bytes = done, "download complete");
        Ok(())
    }
}

/// Maps raw byte counts onto the reported `(done, total)` pair. With a known
/// content length the mapping is identity; without one, progress runs against
/// [`FALLBACK_TOTAL_BYTES`], pinned below completion until the stream ends.
fn progress_frame(done: u64, total: Option<u64>, finished: bool) -> (u64, u64) {
    match total {
        Some(total) => {
            let total = total.max(1);
            (done.min(total), total)
        }
        None => {
            let total = FALLBACK_TOTAL_BYTES.max(done);
            if finished {
                (total, total)
            } else {
                (done.min(total - 1), total)
            }
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
