//! Quick ("mini") decision: a spec-free pass/fail filter applied at
//! the point of detection.
//!
//! Runs before the product's authoritative specification is known, so
//! it answers only PASS or FAIL, with no reason or severity. The default
//! rule set rejects any defect at all (`max_defects = 0`), which is the
//! safe posture for a station that has not been configured.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{Decision, Detection, MeasureThresholds, Measurements};

/// Rule set for the quick decision.
///
/// Every field defaults to "no restriction" except `max_defects`,
/// which defaults to 0 (any defect fails).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickRules {
    /// Defects scoring below this are ignored entirely.
    pub min_score: f32,
    /// Classes that fail the board outright.
    pub banned_classes: BTreeSet<String>,
    /// Maximum tolerated defect count.
    pub max_defects: usize,
    /// Per-class defect count caps.
    pub max_by_class: BTreeMap<String, usize>,
    /// Bounds on the physical measurements.
    pub measure_thresholds: MeasureThresholds,
}

/// Evaluate the quick rules over a defect list.
///
/// `rules` of `None` uses [`QuickRules::default()`]. The score filter
/// runs first; after it, the first violated check fails the board. A
/// measurement bound is only checked when both the bound and the
/// measurement are present.
#[must_use]
pub fn quick_decision(
    defects: &[Detection],
    measures: Option<&Measurements>,
    rules: Option<&QuickRules>,
) -> Decision {
    let default_rules;
    let rules = match rules {
        Some(r) => r,
        None => {
            default_rules = QuickRules::default();
            &default_rules
        }
    };

    let effective: Vec<&Detection> = defects
        .iter()
        .filter(|d| d.score >= rules.min_score)
        .collect();

    if effective
        .iter()
        .any(|d| rules.banned_classes.contains(&d.class))
    {
        return Decision::Fail;
    }

    if effective.len() > rules.max_defects {
        return Decision::Fail;
    }

    if !rules.max_by_class.is_empty() {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for d in &effective {
            *counts.entry(d.class.as_str()).or_insert(0) += 1;
        }
        for (class, &cap) in &rules.max_by_class {
            if counts.get(class.as_str()).copied().unwrap_or(0) > cap {
                return Decision::Fail;
            }
        }
    }

    if let Some(m) = measures {
        let bounds = &rules.measure_thresholds;
        if let (Some(min), Some(value)) = (bounds.clearance_um_min, m.clearance_um) {
            if value < min {
                return Decision::Fail;
            }
        }
        if let (Some(min), Some(value)) = (bounds.trace_width_um_min, m.trace_width_um) {
            if value < min {
                return Decision::Fail;
            }
        }
        if let (Some(max), Some(value)) = (bounds.pad_offset_um_max, m.pad_offset_um) {
            if value > max {
                return Decision::Fail;
            }
        }
    }

    Decision::Pass
}
