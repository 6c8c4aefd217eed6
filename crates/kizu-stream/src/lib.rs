//! kizu-stream: stream-side ingestion of board inspection events.
//!
//! Everything downstream of the detector lives here. Inference events
//! arrive from a broker one message at a time; each is re-decided
//! against its product's quality spec, the resulting decision row is
//! persisted in batches, and rejected boards raise QC notifications.
//!
//! The broker, the row store, and the notification channel sit behind
//! traits -- [`EventSource`], [`InsertTransport`] and [`QcEventSink`]
//! -- with file-backed implementations for replay runs and tests. The
//! decision engines themselves come from `kizu-pipeline`; this crate
//! only moves data to and from them.

pub mod consumer;
pub mod event;
pub mod handler;
pub mod qc;
pub mod record;
pub mod sink;
pub mod specs;

pub use consumer::{
    EventSource, JsonlEventSource, Message, Poll, ProcessorError, ProcessorStats, SourceError,
    flush_interval, run,
};
pub use event::{ImageUrls, InferenceEvent};
pub use handler::{HandlerContext, Outcome, handle_message};
pub use qc::{JsonlQcEventSink, QcError, QcEvent, QcEventSink};
pub use record::DecisionRecord;
pub use sink::{BufferedSink, InsertTransport, NdjsonFileTransport, RowSink, SinkError};
pub use specs::{SpecError, SpecRepository, SpecSource};
