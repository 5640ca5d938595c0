//! Pass/fail status for an external monitor.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::state;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to encode status: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to write status {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Outcome of one sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub host: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub published: usize,
    pub deregistered: usize,
    pub skipped: usize,
    pub errors: usize,
    pub passed: bool,
}

impl RunStatus {
    /// A fresh status stamped with this host and `started`.
    pub fn begin(started: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            host: host_name(),
            started,
            finished: started,
            published: 0,
            deregistered: 0,
            skipped: 0,
            errors: 0,
            passed: true,
        }
    }

    /// Close the run with its totals; any error fails it.
    pub fn finish(
        mut self,
        finished: DateTime<Utc>,
        published: usize,
        deregistered: usize,
        skipped: usize,
        errors: usize,
    ) -> Self {
        self.finished = finished;
        self.published = published;
        self.deregistered = deregistered;
        self.skipped = skipped;
        self.errors = errors;
        self.passed = errors == 0;
        self
    }
}

fn host_name() -> String {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .find_map(|p| fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

pub trait Notifier {
    fn notify(&self, status: &RunStatus) -> Result<(), NotifyError>;
}

/// Writes the status as pretty JSON, replacing the file atomically.
#[derive(Debug, Clone)]
pub struct StatusFileNotifier {
    path: PathBuf,
}

impl StatusFileNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Notifier for StatusFileNotifier {
    fn notify(&self, status: &RunStatus) -> Result<(), NotifyError> {
        let mut json = serde_json::to_vec_pretty(status)?;
        json.push(b'\n');
        state::write_atomic(&self.path, &json).map_err(|source| NotifyError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = StatusFileNotifier::new(dir.path().join("status/run.json"));

        let start = Utc::now();
        let status = RunStatus::begin(start).finish(start, 2, 1, 0, 1);
        assert!(!status.passed);
        notifier.notify(&status).unwrap();

        let text = fs::read_to_string(notifier.path()).unwrap();
        let back: RunStatus = serde_json::from_str(&text).unwrap();
        assert_eq!(back, status);
        assert!(!back.host.is_empty());
    }

    #[test]
    fn clean_run_passes() {
        let status = RunStatus::begin(Utc::now()).finish(Utc::now(), 0, 0, 3, 0);
        assert!(status.passed);
    }
}
