use std::io::{self, Write};
use std::sync::Mutex;

use serde::Serialize;

use crate::pipeline::{ImportStatus, ProgressSink};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {}

/// Sink that prints coarse stage transitions and a byte counter to stderr,
/// keeping stdout clean for the JSON result.
pub struct StderrProgress {
    last_percent: Mutex<Option<u64>>,
}

impl StderrProgress {
    pub fn new() -> Self {
        Self {
            last_percent: Mutex::new(None),
        }
    }
}

impl Default for StderrProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for StderrProgress {
    fn status(&self, status: ImportStatus) {
        eprintln!("import: {status:?}");
    }

    fn bytes(&self, done: u64, total: u64) {
        let percent = done * 100 / total.max(1);
        let mut last = self
            .last_percent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *last != Some(percent) {
            *last = Some(percent);
            eprintln!("import: downloaded {percent}%");
        }
    }
}
