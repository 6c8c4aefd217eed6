//! Non-maximum suppression: collapse overlapping boxes to the
//! highest-scoring representative.
//!
//! One kernel serves both call sites (the per-tile pass in the
//! inspection driver and the cross-tile pass in the merger), selected
//! per-class or global via [`NmsMode`].
//!
//! # Ordering
//!
//! Output indices are ordered by descending score. Equal scores keep
//! their input order (stable sort); this tie-break is an implementation
//! choice, not a contract of the upstream model. A box whose IoU with a
//! kept box is *exactly* the threshold survives; only strictly greater
//! overlap suppresses.

use serde::{Deserialize, Serialize};

use crate::types::BoundingBox;

/// Scope of one suppression pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NmsMode {
    /// Suppress within each class label independently; boxes of
    /// different classes never suppress each other.
    #[default]
    PerClass,
    /// Suppress across all classes regardless of label.
    Global,
}

/// Greedy score-ordered suppression across all boxes.
///
/// Picks the remaining highest-score box, keeps it, discards every
/// remaining box overlapping it beyond `iou_threshold`, and repeats.
/// Returns kept indices into `boxes`, highest score first.
///
/// `boxes` and `scores` must be the same length.
#[must_use]
pub fn suppress(boxes: &[BoundingBox], scores: &[f32], iou_threshold: f32) -> Vec<usize> {
    debug_assert_eq!(boxes.len(), scores.len());
    let count = boxes.len().min(scores.len());

    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let threshold = f64::from(iou_threshold);
    let mut suppressed = vec![false; count];
    let mut keep = Vec::new();

    for (rank, &index) in order.iter().enumerate() {
        if suppressed[index] {
            continue;
        }
        keep.push(index);
        let kept_box = boxes[index];
        for &later in &order[rank + 1..] {
            if !suppressed[later] && kept_box.iou(boxes[later]) > threshold {
                suppressed[later] = true;
            }
        }
    }
    keep
}

/// Suppression with per-class or global scope.
///
/// In [`NmsMode::PerClass`] the boxes are partitioned by class label in
/// first-seen order, each partition is suppressed independently, and
/// the surviving indices are re-sorted by descending score so the two
/// modes produce identically ordered output.
///
/// All three slices must be the same length.
#[must_use]
pub fn select(
    boxes: &[BoundingBox],
    scores: &[f32],
    classes: &[&str],
    iou_threshold: f32,
    mode: NmsMode,
) -> Vec<usize> {
    debug_assert_eq!(boxes.len(), scores.len());
    debug_assert_eq!(boxes.len(), classes.len());

    match mode {
        NmsMode::Global => suppress(boxes, scores, iou_threshold),
        NmsMode::PerClass => {
            let mut partitions: Vec<(&str, Vec<usize>)> = Vec::new();
            for (index, &class) in classes.iter().enumerate() {
                match partitions.iter_mut().find(|(name, _)| *name == class) {
                    Some((_, members)) => members.push(index),
                    None => partitions.push((class, vec![index])),
                }
            }

            let mut kept = Vec::new();
            for (_, members) in &partitions {
                let class_boxes: Vec<BoundingBox> = members.iter().map(|&i| boxes[i]).collect();
                let class_scores: Vec<f32> = members.iter().map(|&i| scores[i]).collect();
                for local in suppress(&class_boxes, &class_scores, iou_threshold) {
                    kept.push(members[local]);
                }
            }
            kept.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
            kept
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn boxes_and_scores(items: &[(u32, u32, u32, u32, f32)]) -> (Vec<BoundingBox>, Vec<f32>) {
        let boxes = items
            .iter()
            .map(|&(x, y, w, h, _)| BoundingBox::new(x, y, w, h))
            .collect();
        let scores = items.iter().map(|&(.., s)| s).collect();
        (boxes, scores)
    }

    // --- suppress ---

    #[test]
    fn empty_input_keeps_nothing() {
        assert!(suppress(&[], &[], 0.5).is_empty());
    }

    #[test]
    fn single_box_is_kept() {
        let (boxes, scores) = boxes_and_scores(&[(0, 0, 10, 10, 0.7)]);
        assert_eq!(suppress(&boxes, &scores, 0.5), vec![0]);
    }

    #[test]
    fn heavy_overlap_keeps_only_the_higher_score() {
        let (boxes, scores) = boxes_and_scores(&[
            (0, 0, 100, 100, 0.6),
            (5, 5, 100, 100, 0.9), // near-duplicate, higher score
        ]);
        assert_eq!(suppress(&boxes, &scores, 0.5), vec![1]);
    }

    #[test]
    fn light_overlap_keeps_both_in_score_order() {
        // IoU of these is 50/150 = 0.333 < 0.5.
        let (boxes, scores) = boxes_and_scores(&[(0, 0, 10, 10, 0.6), (5, 0, 10, 10, 0.9)]);
        assert_eq!(suppress(&boxes, &scores, 0.5), vec![1, 0]);
    }

    #[test]
    fn threshold_brackets_the_overlap() {
        // IoU here is 1/3 within float tolerance; a threshold just above
        // keeps both boxes, just below removes the weaker one.
        let (boxes, scores) = boxes_and_scores(&[(0, 0, 10, 10, 0.9), (5, 0, 10, 10, 0.6)]);
        assert_eq!(suppress(&boxes, &scores, 0.34).len(), 2);
        assert_eq!(suppress(&boxes, &scores, 0.33).len(), 1);
    }

    #[test]
    fn equal_scores_keep_input_order() {
        let (boxes, scores) = boxes_and_scores(&[
            (0, 0, 10, 10, 0.5),
            (100, 0, 10, 10, 0.5),
            (200, 0, 10, 10, 0.5),
        ]);
        assert_eq!(suppress(&boxes, &scores, 0.5), vec![0, 1, 2]);
    }

    #[test]
    fn suppressed_box_does_not_suppress_others() {
        // A beats B; B overlaps C but was already discarded, so C
        // survives even though it overlaps B beyond the threshold.
        let (boxes, scores) = boxes_and_scores(&[
            (0, 0, 10, 10, 0.9),  // A
            (6, 0, 10, 10, 0.8),  // B: IoU with A = 0.25
            (12, 0, 10, 10, 0.7), // C: IoU with B = 0.25, disjoint from A
        ]);
        assert_eq!(suppress(&boxes, &scores, 0.2), vec![0, 2]);
    }

    // --- select ---

    #[test]
    fn per_class_keeps_overlapping_boxes_of_different_classes() {
        let (boxes, scores) = boxes_and_scores(&[(0, 0, 100, 100, 0.9), (5, 5, 100, 100, 0.8)]);
        let classes = ["short", "bridge"];
        let kept = select(&boxes, &scores, &classes, 0.5, NmsMode::PerClass);
        assert_eq!(kept, vec![0, 1]);
    }

    #[test]
    fn global_merges_overlapping_boxes_across_classes() {
        let (boxes, scores) = boxes_and_scores(&[(0, 0, 100, 100, 0.9), (5, 5, 100, 100, 0.8)]);
        let classes = ["short", "bridge"];
        let kept = select(&boxes, &scores, &classes, 0.5, NmsMode::Global);
        assert_eq!(kept, vec![0]);
    }

    #[test]
    fn per_class_output_is_sorted_by_score_across_classes() {
        let (boxes, scores) = boxes_and_scores(&[
            (0, 0, 10, 10, 0.3),
            (100, 0, 10, 10, 0.9),
            (200, 0, 10, 10, 0.6),
        ]);
        let classes = ["short", "bridge", "short"];
        let kept = select(&boxes, &scores, &classes, 0.5, NmsMode::PerClass);
        assert_eq!(kept, vec![1, 2, 0]);
    }

    #[test]
    fn per_class_suppresses_within_a_class_only() {
        let (boxes, scores) = boxes_and_scores(&[
            (0, 0, 100, 100, 0.9),
            (5, 5, 100, 100, 0.8), // same class, near-duplicate of 0
            (5, 5, 100, 100, 0.7), // different class, survives
        ]);
        let classes = ["short", "short", "missing"];
        let kept = select(&boxes, &scores, &classes, 0.5, NmsMode::PerClass);
        assert_eq!(kept, vec![0, 2]);
    }

    #[test]
    fn default_mode_is_per_class() {
        assert_eq!(NmsMode::default(), NmsMode::PerClass);
    }
}
