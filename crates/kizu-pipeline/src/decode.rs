//! Detection tensor decoding: one tile's raw model output into
//! candidate boxes.
//!
//! The upstream model family is not fixed, so the decoder accepts the
//! two layouts seen in practice for an `N x C` tensor:
//!
//! - `[cx, cy, w, h, objectness, class-scores…]`, where the final score
//!   is `objectness * max(class-scores)`;
//! - `[cx, cy, w, h, class-scores…]`, where the final score is
//!   `max(class-scores)`.
//!
//! Exporters disagree about orientation, so a tensor arriving as
//! `C x N` (more columns than rows) is transposed first. Boxes arrive
//! center-format and leave corner-format, clamped to the tile extent.

use ndarray::ArrayView2;

use crate::types::{BoundingBox, DetectionCandidate};

/// Default confidence threshold below which candidate rows are dropped.
pub const DEFAULT_CONFIDENCE: f32 = 0.25;

/// Decode one tile's raw detection tensor into candidates.
///
/// `labels` maps class-channel index to class label; an empty label set
/// decodes to nothing. Rows scoring below `confidence_threshold` are
/// dropped before box conversion, as are rows whose box rounds to zero
/// width or height after clamping to `[0, tile_size - 1]`.
///
/// The objectness layout is assumed when the tensor has more than
/// `4 + labels.len()` columns, tolerating a few trailing extra channels
/// (some exporters append angle or mask coefficients); class channels
/// beyond the columns actually present are ignored.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn decode(
    raw: ArrayView2<'_, f32>,
    labels: &[String],
    confidence_threshold: f32,
    tile_size: u32,
) -> Vec<DetectionCandidate> {
    let tensor = if raw.nrows() < raw.ncols() {
        raw.reversed_axes()
    } else {
        raw
    };

    let cols = tensor.ncols();
    let class_count = labels.len();
    if cols < 5 || class_count == 0 {
        return Vec::new();
    }

    let has_objectness = cols > 4 + class_count && cols <= 9 + class_count;
    let class_start = if has_objectness { 5 } else { 4 };
    let class_take = class_count.min(cols - class_start);
    if class_take == 0 {
        return Vec::new();
    }

    let limit = tile_size.saturating_sub(1) as f32;
    let mut candidates = Vec::new();

    for row in tensor.rows() {
        let mut best_class = 0usize;
        let mut best_prob = f32::NEG_INFINITY;
        for (index, &prob) in row.iter().skip(class_start).take(class_take).enumerate() {
            if prob > best_prob {
                best_prob = prob;
                best_class = index;
            }
        }

        let score = if has_objectness {
            row[4] * best_prob
        } else {
            best_prob
        };
        if score.is_nan() || score < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        let x1 = (cx - w / 2.0).clamp(0.0, limit);
        let y1 = (cy - h / 2.0).clamp(0.0, limit);
        let x2 = (cx + w / 2.0).clamp(0.0, limit);
        let y2 = (cy + h / 2.0).clamp(0.0, limit);

        let width = to_pixel((x2 - x1).max(0.0));
        let height = to_pixel((y2 - y1).max(0.0));
        if width == 0 || height == 0 {
            continue;
        }

        candidates.push(DetectionCandidate {
            class: labels[best_class].clone(),
            score,
            bbox: BoundingBox::new(to_pixel(x1), to_pixel(y1), width, height),
        });
    }
    candidates
}

/// Round a clamped, non-negative coordinate to whole pixels.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_pixel(value: f32) -> u32 {
    value.round() as u32
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::Array2;

    use super::*;

    const TILE: u32 = 960;

    fn labels() -> Vec<String> {
        vec!["short".to_string(), "bridge".to_string()]
    }

    /// Builds a row-major tensor, padded with zero rows so the
    /// orientation guard never transposes it. Zero rows decode to
    /// nothing.
    fn tensor(rows: &[Vec<f32>]) -> Array2<f32> {
        let cols = rows.first().map_or(0, Vec::len);
        let nrows = rows.len().max(cols);
        let mut flat: Vec<f32> = rows.iter().flatten().copied().collect();
        flat.resize(nrows * cols, 0.0);
        Array2::from_shape_vec((nrows, cols), flat).unwrap()
    }

    // --- layout detection ---

    #[test]
    fn plain_layout_scores_are_the_class_maximum() {
        // 6 columns with 2 labels: no objectness channel.
        let t = tensor(&[vec![100.0, 100.0, 40.0, 40.0, 0.1, 0.8]]);
        let dets = decode(t.view(), &labels(), 0.25, TILE);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class, "bridge");
        assert!((dets[0].score - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn objectness_layout_multiplies_into_the_score() {
        // 7 columns with 2 labels: [cx, cy, w, h, obj, short, bridge].
        let t = tensor(&[vec![100.0, 100.0, 40.0, 40.0, 0.5, 0.9, 0.2]]);
        let dets = decode(t.view(), &labels(), 0.25, TILE);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class, "short");
        assert!((dets[0].score - 0.45).abs() < 1e-6);
    }

    #[test]
    fn transposed_tensor_is_decoded_the_same() {
        let t = tensor(&[
            vec![100.0, 100.0, 40.0, 40.0, 0.1, 0.8],
            vec![500.0, 500.0, 60.0, 60.0, 0.7, 0.2],
            vec![0.0; 6],
            vec![0.0; 6],
            vec![0.0; 6],
            vec![0.0; 6],
            vec![0.0; 6],
        ]);
        let upright = decode(t.view(), &labels(), 0.25, TILE);
        let transposed = decode(t.t(), &labels(), 0.25, TILE);
        assert_eq!(upright, transposed);
        assert_eq!(upright.len(), 2);
    }

    #[test]
    fn single_label_layouts_split_at_five_columns() {
        let one = vec!["short".to_string()];

        // 5 columns with 1 label: the fifth column is the class score.
        let plain = tensor(&[vec![100.0, 100.0, 40.0, 40.0, 0.8]]);
        let dets = decode(plain.view(), &one, 0.25, TILE);
        assert!((dets[0].score - 0.8).abs() < f32::EPSILON);

        // 6 columns with 1 label: the fifth column is objectness.
        let with_obj = tensor(&[vec![100.0, 100.0, 40.0, 40.0, 0.5, 0.8]]);
        let dets = decode(with_obj.view(), &one, 0.25, TILE);
        assert!((dets[0].score - 0.4).abs() < 1e-6);
    }

    #[test]
    fn ties_pick_the_first_class_channel() {
        let t = tensor(&[vec![100.0, 100.0, 40.0, 40.0, 0.6, 0.6]]);
        let dets = decode(t.view(), &labels(), 0.25, TILE);
        assert_eq!(dets[0].class, "short");
    }

    // --- filtering ---

    #[test]
    fn rows_below_the_confidence_threshold_are_dropped() {
        let t = tensor(&[
            vec![100.0, 100.0, 40.0, 40.0, 0.1, 0.2],
            vec![300.0, 300.0, 40.0, 40.0, 0.9, 0.1],
        ]);
        let dets = decode(t.view(), &labels(), 0.25, TILE);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox.x, 280);
    }

    #[test]
    fn empty_labels_decode_to_nothing() {
        let t = tensor(&[vec![100.0, 100.0, 40.0, 40.0, 0.9, 0.9]]);
        assert!(decode(t.view(), &[], 0.25, TILE).is_empty());
    }

    #[test]
    fn narrow_tensor_decodes_to_nothing() {
        // Fewer than 5 columns in either orientation cannot carry a
        // box and a score.
        let t = tensor(&[vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]);
        assert!(decode(t.view(), &labels(), 0.0, TILE).is_empty());
    }

    // --- box conversion ---

    #[test]
    fn center_format_converts_to_corner_format() {
        let t = tensor(&[vec![100.0, 60.0, 40.0, 20.0, 0.9, 0.1]]);
        let dets = decode(t.view(), &labels(), 0.25, TILE);
        assert_eq!(dets[0].bbox, BoundingBox::new(80, 50, 40, 20));
    }

    #[test]
    fn boxes_clamp_to_the_tile_extent() {
        // Box spills past the right edge; x2 clamps to tile_size - 1.
        let t = tensor(&[vec![950.0, 100.0, 40.0, 40.0, 0.9, 0.1]]);
        let dets = decode(t.view(), &labels(), 0.25, TILE);
        assert_eq!(dets[0].bbox.x, 930);
        assert_eq!(dets[0].bbox.right(), 959);
    }

    #[test]
    fn boxes_entirely_outside_the_tile_are_dropped() {
        // Clamping collapses this box to zero width.
        let t = tensor(&[vec![2000.0, 100.0, 40.0, 40.0, 0.9, 0.1]]);
        assert!(decode(t.view(), &labels(), 0.25, TILE).is_empty());
    }

    #[test]
    fn sub_pixel_boxes_are_dropped() {
        let t = tensor(&[vec![100.0, 100.0, 0.4, 40.0, 0.9, 0.1]]);
        assert!(decode(t.view(), &labels(), 0.25, TILE).is_empty());
    }

    #[test]
    fn extra_trailing_channels_still_decode_with_objectness() {
        // 9 columns with 2 labels: objectness plus two slack channels.
        let t = tensor(&[vec![100.0, 100.0, 40.0, 40.0, 0.5, 0.8, 0.1, 9.9, 9.9]]);
        let dets = decode(t.view(), &labels(), 0.25, TILE);
        assert_eq!(dets.len(), 1);
        assert!((dets[0].score - 0.4).abs() < 1e-6);
    }
}
