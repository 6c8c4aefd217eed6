//! Shared types for the kizu inspection pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `RgbImage` so downstream crates can reference tile pixel
/// buffers without depending on `image` directly.
pub use image::RgbImage;

/// Epsilon added to the IoU denominator so degenerate (zero-area) box
/// pairs divide safely.
pub const IOU_EPSILON: f64 = 1e-6;

/// An axis-aligned box in pixel coordinates.
///
/// Coordinates are unsigned: every box produced by the decoder is
/// clamped to its tile extent before construction, and offsetting into
/// image-global space only adds non-negative tile origins. Wire names
/// follow the event schema (`x`, `y`, `w`, `h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge (pixels from image or tile left).
    pub x: u32,
    /// Top edge (pixels from image or tile top).
    pub y: u32,
    /// Box width in pixels.
    #[serde(rename = "w")]
    pub width: u32,
    /// Box height in pixels.
    #[serde(rename = "h")]
    pub height: u32,
}

impl BoundingBox {
    /// Create a new box.
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge (`x + width`).
    #[must_use]
    pub const fn right(self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge (`y + height`).
    #[must_use]
    pub const fn bottom(self) -> u32 {
        self.y + self.height
    }

    /// Box area in square pixels.
    #[must_use]
    pub fn area(self) -> f64 {
        f64::from(self.width) * f64::from(self.height)
    }

    /// Intersection area with another box, zero when disjoint.
    #[must_use]
    pub fn intersection(self, other: Self) -> f64 {
        let iw = self.right().min(other.right()).saturating_sub(self.x.max(other.x));
        let ih = self.bottom().min(other.bottom()).saturating_sub(self.y.max(other.y));
        f64::from(iw) * f64::from(ih)
    }

    /// Intersection-over-union with another box.
    ///
    /// Symmetric; 0.0 when the boxes do not overlap. The denominator
    /// carries [`IOU_EPSILON`], so two degenerate boxes yield 0.0 rather
    /// than dividing by zero (and `iou(a, a)` is 1.0 only to within that
    /// epsilon).
    #[must_use]
    pub fn iou(self, other: Self) -> f64 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        inter / (union + IOU_EPSILON)
    }

    /// The same box shifted by a non-negative offset.
    ///
    /// Used to lift tile-local coordinates into image-global space.
    #[must_use]
    pub const fn translated(self, dx: u32, dy: u32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            width: self.width,
            height: self.height,
        }
    }
}

/// One decoded detection in *tile-local* pixel coordinates.
///
/// Produced by the detection decoder. Coordinates are clamped to the
/// tile extent and `width`/`height` are strictly positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionCandidate {
    /// Defect class label.
    pub class: String,
    /// Detection confidence in `[0, 1]`.
    pub score: f32,
    /// Box in tile-local coordinates.
    pub bbox: BoundingBox,
}

impl DetectionCandidate {
    /// Lift this candidate into image-global coordinates by adding the
    /// owning tile's origin.
    #[must_use]
    pub fn into_global(self, origin_x: u32, origin_y: u32) -> Detection {
        Detection {
            class: self.class,
            score: self.score,
            bbox: self.bbox.translated(origin_x, origin_y),
        }
    }
}

/// One merged detection in *image-global* pixel coordinates.
///
/// A list of these, ordered by descending score, constitutes the
/// defects of one inspected image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Defect class label.
    pub class: String,
    /// Detection confidence in `[0, 1]`.
    pub score: f32,
    /// Box in image-global coordinates.
    pub bbox: BoundingBox,
}

/// A pass/fail verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    /// The board is acceptable.
    Pass,
    /// The board is rejected.
    Fail,
}

impl Decision {
    /// Returns `true` for [`Decision::Fail`].
    #[must_use]
    pub const fn is_fail(self) -> bool {
        matches!(self, Self::Fail)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => f.write_str("PASS"),
            Self::Fail => f.write_str("FAIL"),
        }
    }
}

/// Ordered severity of a failing condition.
///
/// Variant order is the aggregation order: `INFO < MINOR < MAJOR <
/// CRITICAL`. Combining verdicts keeps the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Informational only.
    Info,
    /// Cosmetic or low-impact defect.
    Minor,
    /// Functional defect.
    Major,
    /// Scrap-level defect.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => f.write_str("INFO"),
            Self::Minor => f.write_str("MINOR"),
            Self::Major => f.write_str("MAJOR"),
            Self::Critical => f.write_str("CRITICAL"),
        }
    }
}

/// Optional physical measurements captured alongside an image.
///
/// All fields are micrometres. Absent fields are simply not checked by
/// the decision engines.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Measurements {
    /// Measured minimum copper clearance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clearance_um: Option<f64>,
    /// Measured minimum trace width.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_width_um: Option<f64>,
    /// Measured maximum pad offset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pad_offset_um: Option<f64>,
}

/// Measurement bounds a board must respect.
///
/// Minimums apply to clearance and trace width, a maximum to pad
/// offset. An absent bound is not checked.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MeasureThresholds {
    /// Required minimum clearance in micrometres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clearance_um_min: Option<f64>,
    /// Required minimum trace width in micrometres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_width_um_min: Option<f64>,
    /// Allowed maximum pad offset in micrometres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pad_offset_um_max: Option<f64>,
}

impl MeasureThresholds {
    /// Returns `true` when no bound is configured.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.clearance_um_min.is_none()
            && self.trace_width_um_min.is_none()
            && self.pad_offset_um_max.is_none()
    }
}

/// Errors that can occur while running an inspection.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The inspection configuration or backend geometry is unusable.
    #[error("invalid inspection configuration: {0}")]
    InvalidConfig(String),

    /// The detection backend failed on a tile.
    #[error("detection backend failure: {0}")]
    Backend(String),
}
