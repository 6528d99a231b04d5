//! Per-process diagnostic log.
//!
//! Interpreter output that is not a callback is appended to
//! `<log_dir>/<process_id>.log` and the last lines are kept in memory to
//! explain a failed execution.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Number of output lines kept for the failure diagnostic.
pub const TAIL_LINES: usize = 50;

pub struct DiagnosticLog {
    path: Option<PathBuf>,
    file: tokio::sync::Mutex<Option<File>>,
    tail: Mutex<VecDeque<String>>,
}

impl DiagnosticLog {
    /// Open (append) the log file for `process_id` under `log_dir`.
    ///
    /// If the file cannot be opened the log keeps only its in-memory tail.
    pub async fn open(log_dir: &Path, process_id: &str) -> Self {
        let path = log_dir.join(format!("{process_id}.log"));

        let file = match tokio::fs::create_dir_all(log_dir).await {
            Ok(()) => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await,
            Err(e) => Err(e),
        };

        match file {
            Ok(file) => Self {
                path: Some(path),
                file: tokio::sync::Mutex::new(Some(file)),
                tail: Mutex::new(VecDeque::with_capacity(TAIL_LINES)),
            },
            Err(e) => {
                tracing::warn!(
                    process_id = %process_id,
                    path = %path.display(),
                    error = %e,
                    "Cannot open diagnostic log, keeping output in memory only"
                );
                Self::in_memory()
            }
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            file: tokio::sync::Mutex::new(None),
            tail: Mutex::new(VecDeque::with_capacity(TAIL_LINES)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record one line of output.
    pub async fn append(&self, line: &str) {
        {
            let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        }

        let mut file = self.file.lock().await;
        if let Some(f) = file.as_mut() {
            let written = async {
                f.write_all(line.as_bytes()).await?;
                f.write_all(b"\n").await?;
                f.flush().await
            }
            .await;

            if let Err(e) = written {
                tracing::warn!(error = %e, "Failed to write diagnostic log, disabling it");
                *file = None;
            }
        }
    }

    /// The retained tail, oldest line first.
    pub fn tail(&self) -> String {
        let tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
        tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}
