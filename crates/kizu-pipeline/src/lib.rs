//! kizu-pipeline: tiled board inspection and quality decisions (sans-IO).
//!
//! Turns one board photograph into defects and a verdict through:
//! tiling -> per-tile inference -> tensor decode -> suppression ->
//! cross-tile merge -> quick decision. The slower spec-driven final
//! decision lives here too, so the capture side and the stream side
//! share one definition of every rule.
//!
//! This crate has **no I/O dependencies** -- inference sits behind the
//! [`DetectionBackend`] trait and all broker/storage interaction lives
//! in `kizu-stream`.

pub mod aql;
pub mod decode;
pub mod inspect;
pub mod merge;
pub mod nms;
pub mod quick;
pub mod tiling;
pub mod types;

pub use aql::{AqlVerdict, QualitySpec, apply_aql};
pub use inspect::{DetectionBackend, InspectConfig, Inspection, inspect};
pub use merge::{TileDetections, merge};
pub use nms::NmsMode;
pub use quick::{QuickRules, quick_decision};
pub use tiling::{Tile, TileRect};
pub use types::{
    BoundingBox, Decision, Detection, DetectionCandidate, MeasureThresholds, Measurements,
    PipelineError, RgbImage, Severity,
};
