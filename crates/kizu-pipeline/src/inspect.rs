//! One-shot inspection driver: tile the image, run the detector over
//! every tile in parallel, merge, and attach the quick verdict.
//!
//! The detector itself lives behind [`DetectionBackend`] so the driver
//! stays independent of any particular inference runtime. Tiles are
//! processed with rayon; the first backend error aborts the whole
//! inspection.

use std::time::{Duration, Instant};

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::decode;
use crate::merge::{self, TileDetections};
use crate::nms::{self, NmsMode};
use crate::quick::{self, QuickRules};
use crate::tiling::{self, DEFAULT_OVERLAP, Tile};
use crate::types::{BoundingBox, Decision, Detection, DetectionCandidate, PipelineError, RgbImage};

/// Per-tile suppression threshold applied before the cross-tile merge.
pub const DEFAULT_TILE_IOU: f32 = 0.45;

/// Suppression threshold for the cross-tile merge.
pub const DEFAULT_MERGE_IOU: f32 = 0.5;

/// A detector that maps one tile to a raw prediction tensor.
///
/// Implementations wrap an inference runtime (or a canned fixture in
/// tests). The tensor layout is whatever [`decode`](crate::decode)
/// accepts: predictions by attributes, either orientation.
pub trait DetectionBackend {
    /// Side length of the square input the model expects, in pixels.
    fn tile_size(&self) -> u32;

    /// Class labels, indexed by the model's class channel order.
    fn labels(&self) -> &[String];

    /// Run the model over one tile.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Backend`] when inference fails.
    fn infer(&self, tile: &Tile) -> Result<Array2<f32>, PipelineError>;
}

/// Tunable parameters of [`inspect`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectConfig {
    /// Overlap between adjacent tiles, in pixels.
    pub overlap: u32,
    /// Minimum score a raw prediction must reach to become a candidate.
    pub confidence_threshold: f32,
    /// IoU threshold for the per-tile suppression pass.
    pub tile_iou_threshold: f32,
    /// IoU threshold for the cross-tile merge.
    pub merge_iou_threshold: f32,
    /// Whether suppression compares within classes or across them.
    pub nms_mode: NmsMode,
    /// Rules for the quick verdict; `None` applies the strict defaults.
    pub quick_rules: Option<QuickRules>,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self {
            overlap: DEFAULT_OVERLAP,
            confidence_threshold: decode::DEFAULT_CONFIDENCE,
            tile_iou_threshold: DEFAULT_TILE_IOU,
            merge_iou_threshold: DEFAULT_MERGE_IOU,
            nms_mode: NmsMode::default(),
            quick_rules: None,
        }
    }
}

/// Everything one inspection produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inspection {
    /// Merged image-global detections, descending by score.
    pub defects: Vec<Detection>,
    /// The quick verdict over those detections.
    pub mini_decision: Decision,
    /// How many tiles the image was split into.
    pub tile_count: usize,
    /// Wall time spent in tiling, inference, and merging.
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Inspect one image with the given backend.
///
/// Tiles the image at the backend's input size, infers and decodes
/// every tile in parallel, suppresses within each tile, merges across
/// tiles, and computes the quick verdict. Measurements are never
/// available at capture time, so the verdict considers defects only.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] when the backend reports a
/// zero tile size, and propagates the first [`PipelineError::Backend`]
/// raised by inference.
pub fn inspect<B>(
    image: &RgbImage,
    backend: &B,
    config: &InspectConfig,
) -> Result<Inspection, PipelineError>
where
    B: DetectionBackend + Sync,
{
    let tile_size = backend.tile_size();
    if tile_size == 0 {
        return Err(PipelineError::InvalidConfig(
            "backend reports a zero tile size".to_string(),
        ));
    }

    let started = Instant::now();
    let tiles = tiling::extract(image, tile_size, config.overlap);
    let tile_count = tiles.len();

    let per_tile: Vec<TileDetections> = tiles
        .par_iter()
        .map(|tile| {
            let raw = backend.infer(tile)?;
            let candidates = decode::decode(
                raw.view(),
                backend.labels(),
                config.confidence_threshold,
                tile_size,
            );
            Ok(TileDetections {
                origin_x: tile.rect.x,
                origin_y: tile.rect.y,
                candidates: prune_tile(candidates, config.tile_iou_threshold, config.nms_mode),
            })
        })
        .collect::<Result<_, PipelineError>>()?;

    let defects = merge::merge(per_tile, config.merge_iou_threshold, config.nms_mode);
    let mini_decision = quick::quick_decision(&defects, None, config.quick_rules.as_ref());

    Ok(Inspection {
        defects,
        mini_decision,
        tile_count,
        elapsed: started.elapsed(),
    })
}

/// Suppress overlapping candidates within a single tile.
fn prune_tile(
    candidates: Vec<DetectionCandidate>,
    iou_threshold: f32,
    mode: NmsMode,
) -> Vec<DetectionCandidate> {
    if candidates.len() < 2 {
        return candidates;
    }
    let boxes: Vec<BoundingBox> = candidates.iter().map(|c| c.bbox).collect();
    let scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
    let classes: Vec<&str> = candidates.iter().map(|c| c.class.as_str()).collect();
    let keep = nms::select(&boxes, &scores, &classes, iou_threshold, mode);
    let mut slots: Vec<Option<DetectionCandidate>> = candidates.into_iter().map(Some).collect();
    keep.iter().filter_map(|&index| slots[index].take()).collect()
}
