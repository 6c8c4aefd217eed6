//! Per-message handling: parse, decide, persist, notify.
//!
//! One inference event flows through four steps. The payload is parsed
//! (parsing *is* the validation), the product's quality spec is
//! resolved, the final verdict is computed, and the decision row goes
//! to the sink. Rejected boards additionally raise a QC notification,
//! best-effort.
//!
//! Only the sink can fail a message. Malformed payloads are dropped
//! with a warning so one bad producer cannot wedge the stream, and a
//! failed QC publish never un-persists an already written row.

use kizu_pipeline::{Severity, apply_aql};
use tracing::{info, warn};

use crate::event::InferenceEvent;
use crate::qc::{QcEvent, QcEventSink};
use crate::record::DecisionRecord;
use crate::sink::{RowSink, SinkError};
use crate::specs::SpecRepository;

/// What became of one raw message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The event was decided and its row accepted by the sink.
    Processed,
    /// The payload was not a valid inference event and was dropped.
    Skipped,
}

/// Collaborators shared across all messages of one run.
pub struct HandlerContext<'a> {
    /// Per-product quality specs.
    pub specs: &'a SpecRepository,
    /// Destination for decision rows.
    pub sink: &'a dyn RowSink,
    /// Optional destination for failure notifications.
    pub qc: Option<&'a dyn QcEventSink>,
}

/// Handle one raw message end to end.
///
/// # Errors
///
/// Returns the sink's error when the decision row could not be
/// encoded or accepted. Everything else is handled in place.
pub fn handle_message(raw: &[u8], ctx: &HandlerContext<'_>) -> Result<Outcome, SinkError> {
    let event: InferenceEvent = match serde_json::from_slice(raw) {
        Ok(event) => event,
        Err(error) => {
            warn!(%error, "invalid payload, skipping");
            return Ok(Outcome::Skipped);
        }
    };

    let spec = ctx.specs.load(&event.product_code);
    let verdict = apply_aql(&event.defects, event.measures.as_ref(), &spec);

    let record = DecisionRecord::from_event(&event, &verdict)?;
    ctx.sink.add(record)?;

    if verdict.decision.is_fail()
        && let Some(qc) = ctx.qc
    {
        let notification = QcEvent {
            event_id: event.event_id.clone(),
            ts: event.ts,
            product_code: event.product_code.clone(),
            station_id: event.station_id.clone(),
            severity: verdict.severity.unwrap_or(Severity::Major),
            reason: verdict.reason.clone(),
            overlay_url: event.image_urls.overlay_url.clone(),
            defect_count: event.defects.len() as u64,
        };
        if let Err(error) = qc.publish(&notification) {
            warn!(%error, event_id = %event.event_id, "qc event publish failed");
        }
    }

    let severity = verdict
        .severity
        .map_or_else(|| "-".to_string(), |s| s.to_string());
    info!(
        event_id = %event.event_id,
        product = %event.product_code,
        station = %event.station_id,
        defects = event.defects.len(),
        decision = %verdict.decision,
        severity = %severity,
        "event ingested"
    );
    Ok(Outcome::Processed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use kizu_pipeline::Decision;

    use crate::qc::QcError;

    use super::*;

    #[derive(Default)]
    struct MemorySink {
        rows: Mutex<Vec<DecisionRecord>>,
        refuse: bool,
    }

    impl MemorySink {
        fn refusing() -> Self {
            Self {
                rows: Mutex::new(Vec::new()),
                refuse: true,
            }
        }

        fn rows(&self) -> Vec<DecisionRecord> {
            self.rows.lock().unwrap().clone()
        }
    }

    impl RowSink for MemorySink {
        fn add(&self, record: DecisionRecord) -> Result<(), SinkError> {
            if self.refuse {
                return Err(SinkError::Transport("store down".to_string()));
            }
            self.rows.lock().unwrap().push(record);
            Ok(())
        }

        fn flush(&self) -> Result<usize, SinkError> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct MemoryQc {
        events: Mutex<Vec<QcEvent>>,
        refuse: bool,
    }

    impl MemoryQc {
        fn refusing() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                refuse: true,
            }
        }

        fn events(&self) -> Vec<QcEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl QcEventSink for MemoryQc {
        fn publish(&self, event: &QcEvent) -> Result<(), QcError> {
            if self.refuse {
                return Err(QcError::Publish("broker down".to_string()));
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn payload(product: &str, classes: &[&str]) -> Vec<u8> {
        let defects: Vec<serde_json::Value> = classes
            .iter()
            .map(|class| {
                serde_json::json!({
                    "class": class,
                    "score": 0.9,
                    "bbox": {"x": 10, "y": 20, "w": 8, "h": 8},
                })
            })
            .collect();
        serde_json::to_vec(&serde_json::json!({
            "event_id": "ev-0001",
            "ts": 1_766_000_000_000_i64,
            "product_code": product,
            "station_id": "aoi-3",
            "model_family": "yolo",
            "model_version": "v8n-2024.11",
            "latency_ms": 84,
            "mini_decision": if classes.is_empty() { "PASS" } else { "FAIL" },
            "defects": defects,
            "image_urls": {"overlay_url": "s3://aoi/overlays/ev-0001.jpg"},
        }))
        .unwrap()
    }

    fn spec_dir(specs: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (product, body) in specs {
            std::fs::write(dir.path().join(format!("{product}.json")), body).unwrap();
        }
        dir
    }

    // --- happy paths ---

    #[test]
    fn clean_event_is_processed_and_passes() {
        let dir = spec_dir(&[]);
        let repo = SpecRepository::local(dir.path());
        let sink = MemorySink::default();
        let qc = MemoryQc::default();
        let ctx = HandlerContext {
            specs: &repo,
            sink: &sink,
            qc: Some(&qc),
        };

        let outcome = handle_message(&payload("PCB-A1", &[]), &ctx).unwrap();
        assert_eq!(outcome, Outcome::Processed);

        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].final_decision, Decision::Pass);
        assert_eq!(rows[0].fail_reason, None);
        assert!(qc.events().is_empty());
    }

    #[test]
    fn banned_class_fails_and_notifies() {
        let dir = spec_dir(&[("PCB-A1", r#"{"banned_classes": ["short"]}"#)]);
        let repo = SpecRepository::local(dir.path());
        let sink = MemorySink::default();
        let qc = MemoryQc::default();
        let ctx = HandlerContext {
            specs: &repo,
            sink: &sink,
            qc: Some(&qc),
        };

        let outcome = handle_message(&payload("PCB-A1", &["short"]), &ctx).unwrap();
        assert_eq!(outcome, Outcome::Processed);

        let rows = sink.rows();
        assert_eq!(rows[0].final_decision, Decision::Fail);
        assert_eq!(rows[0].fail_reason.as_deref(), Some("banned:short"));

        let events = qc.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "ev-0001");
        assert_eq!(events[0].severity, Severity::Major);
        assert_eq!(events[0].reason, "banned:short");
        assert_eq!(events[0].defect_count, 1);
    }

    #[test]
    fn notification_severity_follows_the_class_map() {
        let dir = spec_dir(&[(
            "PCB-A1",
            r#"{"banned_classes": ["burr"], "severity_by_class": {"burr": "CRITICAL"}}"#,
        )]);
        let repo = SpecRepository::local(dir.path());
        let sink = MemorySink::default();
        let qc = MemoryQc::default();
        let ctx = HandlerContext {
            specs: &repo,
            sink: &sink,
            qc: Some(&qc),
        };

        handle_message(&payload("PCB-A1", &["burr"]), &ctx).unwrap();
        assert_eq!(qc.events()[0].severity, Severity::Critical);
    }

    // --- degraded paths ---

    #[test]
    fn malformed_payload_is_skipped() {
        let dir = spec_dir(&[]);
        let repo = SpecRepository::local(dir.path());
        let sink = MemorySink::default();
        let ctx = HandlerContext {
            specs: &repo,
            sink: &sink,
            qc: None,
        };

        let outcome = handle_message(b"not json at all", &ctx).unwrap();
        assert_eq!(outcome, Outcome::Skipped);
        assert!(sink.rows().is_empty());
    }

    #[test]
    fn event_missing_a_required_field_is_skipped() {
        let dir = spec_dir(&[]);
        let repo = SpecRepository::local(dir.path());
        let sink = MemorySink::default();
        let ctx = HandlerContext {
            specs: &repo,
            sink: &sink,
            qc: None,
        };

        let mut event: serde_json::Value =
            serde_json::from_slice(&payload("PCB-A1", &[])).unwrap();
        event.as_object_mut().unwrap().remove("product_code");
        let raw = serde_json::to_vec(&event).unwrap();

        let outcome = handle_message(&raw, &ctx).unwrap();
        assert_eq!(outcome, Outcome::Skipped);
        assert!(sink.rows().is_empty());
    }

    #[test]
    fn sink_failure_propagates() {
        let dir = spec_dir(&[]);
        let repo = SpecRepository::local(dir.path());
        let sink = MemorySink::refusing();
        let ctx = HandlerContext {
            specs: &repo,
            sink: &sink,
            qc: None,
        };

        let err = handle_message(&payload("PCB-A1", &[]), &ctx).unwrap_err();
        assert!(matches!(err, SinkError::Transport(_)));
    }

    #[test]
    fn qc_publish_failure_does_not_fail_the_message() {
        let dir = spec_dir(&[("PCB-A1", r#"{"banned_classes": ["short"]}"#)]);
        let repo = SpecRepository::local(dir.path());
        let sink = MemorySink::default();
        let qc = MemoryQc::refusing();
        let ctx = HandlerContext {
            specs: &repo,
            sink: &sink,
            qc: Some(&qc),
        };

        let outcome = handle_message(&payload("PCB-A1", &["short"]), &ctx).unwrap();
        assert_eq!(outcome, Outcome::Processed);
        assert_eq!(sink.rows().len(), 1);
    }

    #[test]
    fn failing_event_without_a_qc_sink_still_processes() {
        let dir = spec_dir(&[("PCB-A1", r#"{"banned_classes": ["short"]}"#)]);
        let repo = SpecRepository::local(dir.path());
        let sink = MemorySink::default();
        let ctx = HandlerContext {
            specs: &repo,
            sink: &sink,
            qc: None,
        };

        let outcome = handle_message(&payload("PCB-A1", &["short"]), &ctx).unwrap();
        assert_eq!(outcome, Outcome::Processed);
        assert_eq!(sink.rows()[0].final_decision, Decision::Fail);
    }
}
