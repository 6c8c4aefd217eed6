//! The stream consumption loop.
//!
//! A single consumer polls an [`EventSource`], hands each message to
//! the handler, and acknowledges it once handled. Both processed and
//! skipped messages are acked; a message is left unacked only when the
//! handler failed, so redelivery retries exactly the rows that never
//! reached the sink.
//!
//! A buffered sink is additionally flushed on a timer so rows do not
//! sit in the buffer across a quiet stream. The periodic flush is
//! load-bearing and its failure stops the run; the terminal flush on
//! shutdown is best-effort.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Lines};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::handler::{HandlerContext, Outcome, handle_message};
use crate::sink::SinkError;

/// How long one poll waits for a message.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after an empty poll before polling again.
pub const IDLE_BACKOFF: Duration = Duration::from_millis(200);

/// Lower bound on the periodic flush cadence for buffered sinks.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// One raw message delivered by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Source-assigned position, echoed back on acknowledgement.
    pub offset: u64,
}

/// Result of one poll.
#[derive(Debug)]
pub enum Poll {
    /// A message arrived.
    Message(Message),
    /// Nothing arrived within the poll timeout.
    Idle,
    /// The source is exhausted or shut down.
    Closed,
}

/// Errors raised by a message source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The underlying reader failed.
    #[error("event source I/O failed")]
    Io(#[from] io::Error),
}

/// A stream of raw inference-event messages.
pub trait EventSource {
    /// Wait up to `timeout` for the next message.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] when the source breaks; the run stops.
    fn poll(&mut self, timeout: Duration) -> Result<Poll, SourceError>;

    /// Mark a delivered message as handled.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] when the acknowledgement could not be
    /// recorded. The message may be redelivered.
    fn ack(&mut self, message: &Message) -> Result<(), SourceError>;
}

/// Errors that stop a run.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The event source broke.
    #[error("event source failed")]
    Source(#[from] SourceError),
    /// A periodic flush failed; buffered rows are at risk.
    #[error("periodic flush failed")]
    Flush(#[from] SinkError),
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Messages decided and persisted.
    pub processed: u64,
    /// Messages dropped as invalid.
    pub skipped: u64,
    /// Messages whose handling failed; left unacked.
    pub failed: u64,
}

/// Periodic flush cadence for a sink buffering up to `bulk_rows` rows
/// with the given delay threshold.
///
/// Zero when the sink is unbuffered (both thresholds zero), otherwise
/// the delay threshold raised to at least [`MIN_FLUSH_INTERVAL`].
#[must_use]
pub fn flush_interval(bulk_rows: usize, bulk_max_delay: Duration) -> Duration {
    if bulk_rows == 0 && bulk_max_delay.is_zero() {
        Duration::ZERO
    } else {
        bulk_max_delay.max(MIN_FLUSH_INTERVAL)
    }
}

/// Consume `source` until it closes.
///
/// # Errors
///
/// Returns [`ProcessorError::Source`] when polling breaks and
/// [`ProcessorError::Flush`] when a periodic flush fails. Per-message
/// handler failures are counted and logged instead.
pub fn run<S: EventSource>(
    source: &mut S,
    ctx: &HandlerContext<'_>,
    flush_interval: Duration,
) -> Result<ProcessorStats, ProcessorError> {
    let mut stats = ProcessorStats::default();
    let mut last_flush = Instant::now();
    info!(?flush_interval, "stream processor started");

    loop {
        match source.poll(POLL_TIMEOUT)? {
            Poll::Message(message) => match handle_message(&message.payload, ctx) {
                Ok(outcome) => {
                    match outcome {
                        Outcome::Processed => stats.processed += 1,
                        Outcome::Skipped => stats.skipped += 1,
                    }
                    if let Err(error) = source.ack(&message) {
                        warn!(%error, offset = message.offset, "ack failed");
                    }
                }
                Err(error) => {
                    error!(%error, offset = message.offset, "message handling failed");
                    stats.failed += 1;
                }
            },
            Poll::Idle => thread::sleep(IDLE_BACKOFF),
            Poll::Closed => break,
        }

        if !flush_interval.is_zero() && last_flush.elapsed() >= flush_interval {
            ctx.sink.flush()?;
            last_flush = Instant::now();
        }
    }

    if let Err(error) = ctx.sink.flush() {
        warn!(%error, "terminal flush failed");
    }
    info!(
        processed = stats.processed,
        skipped = stats.skipped,
        failed = stats.failed,
        "stream processor stopped"
    );
    Ok(stats)
}

/// Replays messages from a JSONL file, one payload per line.
///
/// Blank lines consume an offset but deliver nothing, so offsets keep
/// matching the file's line numbers. Acknowledgements are counted and
/// otherwise discarded.
pub struct JsonlEventSource {
    lines: Lines<BufReader<File>>,
    next_offset: u64,
    acked: u64,
}

impl JsonlEventSource {
    /// Open a replay source over the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Io`] when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            next_offset: 0,
            acked: 0,
        })
    }

    /// Messages acknowledged so far.
    #[must_use]
    pub const fn acked(&self) -> u64 {
        self.acked
    }
}

impl EventSource for JsonlEventSource {
    fn poll(&mut self, _timeout: Duration) -> Result<Poll, SourceError> {
        for line in self.lines.by_ref() {
            let line = line?;
            let offset = self.next_offset;
            self.next_offset += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Poll::Message(Message {
                payload: line.into_bytes(),
                offset,
            }));
        }
        Ok(Poll::Closed)
    }

    fn ack(&mut self, _message: &Message) -> Result<(), SourceError> {
        self.acked += 1;
        Ok(())
    }
}
