//! Buffered persistence of decision rows.
//!
//! [`BufferedSink`] validates and accumulates rows, handing them to an
//! [`InsertTransport`] as NDJSON batches. A batch goes out when the row
//! threshold is reached, or when rows have been waiting longer than the
//! delay threshold at the next `add`. With both thresholds zero every
//! row is written immediately. A failed write drops its batch; delivery
//! is at-most-once.
//!
//! The sink never logs. Callers decide whether a failed write is fatal.

use std::fs::OpenOptions;
use std::io::Write;
use std::mem;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::record::DecisionRecord;

/// Errors raised while persisting rows.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// An incoming row left a required column empty.
    #[error("row rejected: required column `{field}` is empty")]
    MissingField {
        /// Name of the offending column.
        field: &'static str,
    },
    /// A row could not be encoded into the batch payload.
    #[error("row encoding failed")]
    Encode(#[from] serde_json::Error),
    /// The transport failed at the I/O layer.
    #[error("batch write failed")]
    Io(#[from] std::io::Error),
    /// The transport rejected the batch.
    #[error("insert failed: {0}")]
    Transport(String),
}

/// Destination for decision rows.
pub trait RowSink {
    /// Validate and accept one row.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::MissingField`] when a required column is
    /// empty, or a transport error if accepting the row triggered a
    /// batch write that failed.
    fn add(&self, record: DecisionRecord) -> Result<(), SinkError>;

    /// Write out everything buffered, returning how many rows went out.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the batch write failed.
    fn flush(&self) -> Result<usize, SinkError>;
}

/// Delivers one encoded batch to the row store.
pub trait InsertTransport {
    /// Deliver a payload of `rows` newline-delimited JSON rows.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] or [`SinkError::Transport`] when the
    /// batch could not be delivered.
    fn insert(&self, payload: &str, rows: usize) -> Result<(), SinkError>;
}

impl<T: InsertTransport + ?Sized> InsertTransport for &T {
    fn insert(&self, payload: &str, rows: usize) -> Result<(), SinkError> {
        (**self).insert(payload, rows)
    }
}

struct BufferState {
    rows: Vec<DecisionRecord>,
    last_flush: Instant,
}

/// Row sink that batches writes through an [`InsertTransport`].
pub struct BufferedSink<T: InsertTransport> {
    transport: T,
    max_rows: usize,
    max_delay: Duration,
    state: Mutex<BufferState>,
}

impl<T: InsertTransport> BufferedSink<T> {
    /// Create a sink flushing every `max_rows` rows or after rows have
    /// waited `max_delay`. A zero threshold is disabled; with both at
    /// zero the sink is unbuffered.
    #[must_use]
    pub fn new(transport: T, max_rows: usize, max_delay: Duration) -> Self {
        Self {
            transport,
            max_rows,
            max_delay,
            state: Mutex::new(BufferState {
                rows: Vec::new(),
                last_flush: Instant::now(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BufferState> {
        // Buffered rows stay internally consistent even if a previous
        // holder of the lock panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encode `rows` as one NDJSON payload and hand it to the transport.
    fn write_batch(&self, rows: &[DecisionRecord]) -> Result<(), SinkError> {
        let mut payload = String::new();
        for row in rows {
            payload.push_str(&serde_json::to_string(row)?);
            payload.push('\n');
        }
        self.transport.insert(&payload, rows.len())
    }
}

impl<T: InsertTransport> RowSink for BufferedSink<T> {
    fn add(&self, record: DecisionRecord) -> Result<(), SinkError> {
        if let Some(field) = record.missing_field() {
            return Err(SinkError::MissingField { field });
        }
        let record = record.normalized();

        if self.max_rows == 0 && self.max_delay.is_zero() {
            return self.write_batch(std::slice::from_ref(&record));
        }

        // Swap the buffer out under the lock, write outside it.
        let batch = {
            let mut state = self.lock_state();
            state.rows.push(record);
            let row_threshold = self.max_rows > 0 && state.rows.len() >= self.max_rows;
            let stale = !self.max_delay.is_zero() && state.last_flush.elapsed() >= self.max_delay;
            if row_threshold || stale {
                state.last_flush = Instant::now();
                Some(mem::take(&mut state.rows))
            } else {
                None
            }
        };
        match batch {
            Some(rows) => self.write_batch(&rows),
            None => Ok(()),
        }
    }

    fn flush(&self) -> Result<usize, SinkError> {
        let rows = {
            let mut state = self.lock_state();
            state.last_flush = Instant::now();
            mem::take(&mut state.rows)
        };
        if rows.is_empty() {
            return Ok(0);
        }
        self.write_batch(&rows)?;
        Ok(rows.len())
    }
}

/// Transport appending batches to a local NDJSON file.
///
/// Stands in for the columnar store in replay runs and tests. The file
/// accumulates one JSON row per line across batches, the same shape a
/// row-per-line bulk insert consumes.
#[derive(Debug, Clone)]
pub struct NdjsonFileTransport {
    path: PathBuf,
}

impl NdjsonFileTransport {
    /// Append to (creating if needed) the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl InsertTransport for NdjsonFileTransport {
    fn insert(&self, payload: &str, _rows: usize) -> Result<(), SinkError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(payload.as_bytes())?;
        Ok(())
    }
}
