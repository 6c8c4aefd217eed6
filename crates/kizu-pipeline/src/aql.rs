//! Final ("AQL") decision: the authoritative, spec-driven verdict.
//!
//! Runs downstream of detection, once the product's [`QualitySpec`] is
//! available. Unlike the quick pass it explains itself: the verdict
//! carries a reason string built from one segment per violated rule,
//! and an aggregate severity which is the maximum over all violations.
//!
//! Reason segments, joined by `"; "`:
//!
//! - `banned:<class>,…` for banned classes present, sorted;
//! - `too_many_defects(total=<n>><max>)`;
//! - `exceed_by_class(<class>:<n>><cap>,…)` for per-class cap
//!   violations, sorted by class;
//! - `thresholds:<detail>,…` for measurement bound violations, e.g.
//!   `clearance<100`, `trace_width<80`, `pad_offset>25`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{Decision, Detection, MeasureThresholds, Measurements, Severity};

/// `max_defects` value of the permissive default spec: effectively
/// unbounded.
pub const DEFAULT_MAX_DEFECTS: usize = 999_999;

/// Per-product rule set governing the final decision.
///
/// Parsed from the spec store; every field is optional in the document
/// and absent fields take the permissive defaults, so `{}` parses to
/// [`QualitySpec::default()`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySpec {
    /// Classes whose presence fails the board outright.
    pub banned_classes: BTreeSet<String>,
    /// Maximum tolerated defect count.
    pub max_defects: usize,
    /// Per-class defect count caps.
    pub max_by_class: BTreeMap<String, usize>,
    /// Bounds on the physical measurements.
    pub thresholds: MeasureThresholds,
    /// Severity assigned to violations involving a given class.
    ///
    /// An unrecognized severity name in the document downgrades to
    /// MINOR rather than rejecting the whole spec.
    #[serde(deserialize_with = "lenient_severity_map")]
    pub severity_by_class: BTreeMap<String, Severity>,
}

impl Default for QualitySpec {
    /// The permissive default: no bans, effectively unbounded counts,
    /// no thresholds.
    fn default() -> Self {
        Self {
            banned_classes: BTreeSet::new(),
            max_defects: DEFAULT_MAX_DEFECTS,
            max_by_class: BTreeMap::new(),
            thresholds: MeasureThresholds::default(),
            severity_by_class: BTreeMap::new(),
        }
    }
}

/// The outcome of one AQL evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AqlVerdict {
    /// PASS or FAIL.
    pub decision: Decision,
    /// `"ok"` on PASS; the joined violation segments on FAIL.
    pub reason: String,
    /// Maximum severity over all violations; `None` on PASS.
    pub severity: Option<Severity>,
}

/// Evaluate a quality spec over a defect list and measurements.
///
/// Never fails: with nothing to object to, the verdict degrades to
/// `(PASS, "ok", None)`. All defects count here; the quick pass's
/// score filter does not apply.
#[must_use]
pub fn apply_aql(
    defects: &[Detection],
    measures: Option<&Measurements>,
    spec: &QualitySpec,
) -> AqlVerdict {
    let mut reasons: Vec<String> = Vec::new();
    let mut severity: Option<Severity> = None;

    // Banned classes present, in sorted order.
    let present: BTreeSet<&str> = defects.iter().map(|d| d.class.as_str()).collect();
    let banned_present: Vec<&str> = present
        .iter()
        .copied()
        .filter(|class| spec.banned_classes.contains(*class))
        .collect();
    if !banned_present.is_empty() {
        reasons.push(format!("banned:{}", banned_present.join(",")));
        for class in &banned_present {
            raise(&mut severity, class_severity(spec, class, Severity::Major));
        }
    }

    // Total count cap.
    if defects.len() > spec.max_defects {
        reasons.push(format!(
            "too_many_defects(total={}>{})",
            defects.len(),
            spec.max_defects,
        ));
        raise(&mut severity, Severity::Major);
    }

    // Per-class count caps.
    if !spec.max_by_class.is_empty() {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for defect in defects {
            *counts.entry(defect.class.as_str()).or_insert(0) += 1;
        }
        let mut exceeded: Vec<String> = Vec::new();
        for (class, &cap) in &spec.max_by_class {
            let count = counts.get(class.as_str()).copied().unwrap_or(0);
            if count > cap {
                exceeded.push(format!("{class}:{count}>{cap}"));
                raise(&mut severity, class_severity(spec, class, Severity::Minor));
            }
        }
        if !exceeded.is_empty() {
            reasons.push(format!("exceed_by_class({})", exceeded.join(",")));
        }
    }

    // Measurement bounds; a bound is only checked when the measurement
    // was provided.
    let mut violations: Vec<String> = Vec::new();
    if let Some(m) = measures {
        if let (Some(min), Some(value)) = (spec.thresholds.clearance_um_min, m.clearance_um) {
            if value < min {
                violations.push(format!("clearance<{min}"));
                raise(&mut severity, Severity::Major);
            }
        }
        if let (Some(min), Some(value)) = (spec.thresholds.trace_width_um_min, m.trace_width_um) {
            if value < min {
                violations.push(format!("trace_width<{min}"));
                raise(&mut severity, Severity::Major);
            }
        }
        if let (Some(max), Some(value)) = (spec.thresholds.pad_offset_um_max, m.pad_offset_um) {
            if value > max {
                violations.push(format!("pad_offset>{max}"));
                raise(&mut severity, Severity::Minor);
            }
        }
    }
    if !violations.is_empty() {
        reasons.push(format!("thresholds:{}", violations.join(",")));
    }

    if reasons.is_empty() {
        AqlVerdict {
            decision: Decision::Pass,
            reason: "ok".to_string(),
            severity: None,
        }
    } else {
        AqlVerdict {
            decision: Decision::Fail,
            reason: reasons.join("; "),
            severity,
        }
    }
}

/// Raise the aggregate severity to at least `floor`.
fn raise(current: &mut Option<Severity>, floor: Severity) {
    *current = Some(current.map_or(floor, |held| held.max(floor)));
}

/// The configured severity for a class, or `fallback` when unlisted.
fn class_severity(spec: &QualitySpec, class: &str, fallback: Severity) -> Severity {
    spec.severity_by_class.get(class).copied().unwrap_or(fallback)
}

/// Severity map values parse leniently: a name that is not one of
/// INFO/MINOR/MAJOR/CRITICAL becomes MINOR instead of failing the
/// whole document.
fn lenient_severity_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, Severity>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(class, name)| (class, severity_or_minor(&name)))
        .collect())
}

fn severity_or_minor(name: &str) -> Severity {
    match name {
        "INFO" => Severity::Info,
        "MAJOR" => Severity::Major,
        "CRITICAL" => Severity::Critical,
        _ => Severity::Minor,
    }
}
