//! Cross-tile merge: lift tile-local candidates into image-global
//! coordinates and deduplicate across tile boundaries.
//!
//! Tiles overlap, so one physical defect near a boundary is usually
//! detected in two (or four) tiles. Per-tile suppression cannot see
//! those duplicates; only a suppression pass over the *combined* global
//! list removes them. Class labels are grouped in first-seen order, so
//! the merge is deterministic for a fixed tile order.

use crate::nms::{self, NmsMode};
use crate::types::{BoundingBox, Detection, DetectionCandidate};

/// The decoded candidates of one tile, tagged with the tile origin.
#[derive(Debug, Clone)]
pub struct TileDetections {
    /// Tile origin x in image coordinates.
    pub origin_x: u32,
    /// Tile origin y in image coordinates.
    pub origin_y: u32,
    /// Candidates in tile-local coordinates.
    pub candidates: Vec<DetectionCandidate>,
}

/// Merge all tiles' candidates into the image-global defect list.
///
/// Offsets every candidate by its tile origin, then runs one
/// suppression pass across the whole collection. The result is ordered
/// by descending score (equal scores keep tile order).
#[must_use]
pub fn merge(tiles: Vec<TileDetections>, iou_threshold: f32, mode: NmsMode) -> Vec<Detection> {
    let mut global = Vec::new();
    for tile in tiles {
        let (origin_x, origin_y) = (tile.origin_x, tile.origin_y);
        for candidate in tile.candidates {
            global.push(candidate.into_global(origin_x, origin_y));
        }
    }
    if global.is_empty() {
        return global;
    }

    let boxes: Vec<BoundingBox> = global.iter().map(|d| d.bbox).collect();
    let scores: Vec<f32> = global.iter().map(|d| d.score).collect();
    let classes: Vec<&str> = global.iter().map(|d| d.class.as_str()).collect();
    let keep = nms::select(&boxes, &scores, &classes, iou_threshold, mode);

    let mut slots: Vec<Option<Detection>> = global.into_iter().map(Some).collect();
    keep.iter().filter_map(|&index| slots[index].take()).collect()
}
