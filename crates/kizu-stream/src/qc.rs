//! Downstream quality-control notifications.
//!
//! Boards whose final decision is FAIL raise a [`QcEvent`] so rework
//! stations and dashboards hear about the rejection without polling
//! the row store. Publishing is best-effort at the call site; the
//! decision row is already persisted when an event goes out.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use kizu_pipeline::Severity;
use serde::{Deserialize, Serialize};

/// Notification for one rejected board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcEvent {
    /// Identifier of the inference event that failed.
    pub event_id: String,
    /// Capture timestamp of the failing event, epoch milliseconds.
    pub ts: i64,
    pub product_code: String,
    pub station_id: String,
    /// Highest severity among the violated rules.
    pub severity: Severity,
    /// The final verdict's reason string.
    pub reason: String,
    pub overlay_url: String,
    pub defect_count: u64,
}

/// Errors raised while publishing notifications.
#[derive(Debug, thiserror::Error)]
pub enum QcError {
    /// The event could not be encoded.
    #[error("qc event encoding failed")]
    Encode(#[from] serde_json::Error),
    /// The broker rejected the event.
    #[error("qc event publish failed: {0}")]
    Publish(String),
    /// The event log could not be written.
    #[error("qc event log write failed")]
    Io(#[from] std::io::Error),
}

/// Destination for failure notifications.
pub trait QcEventSink {
    /// Publish one event.
    ///
    /// # Errors
    ///
    /// Returns a [`QcError`] when the event could not be encoded or
    /// delivered.
    fn publish(&self, event: &QcEvent) -> Result<(), QcError>;
}

/// Sink appending events to a local JSONL file, one object per line.
///
/// Stands in for the notification broker in replay runs and tests.
pub struct JsonlQcEventSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlQcEventSink {
    /// Open a sink writing to `path`, creating missing parent
    /// directories.
    ///
    /// # Errors
    ///
    /// Returns [`QcError::Io`] when a parent directory cannot be
    /// created.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, QcError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }
}

impl QcEventSink for JsonlQcEventSink {
    fn publish(&self, event: &QcEvent) -> Result<(), QcError> {
        let line = serde_json::to_string(event)?;
        // Serialize writers so concurrent events land as whole lines.
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}
