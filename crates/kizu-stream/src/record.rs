//! The normalized row written to the columnar store.
//!
//! One row per inspected board, carrying both verdicts. The column set
//! is fixed; serialization emits every column, with `null` for absent
//! optionals, so batch payloads line up with the store's schema.

use kizu_pipeline::{AqlVerdict, Decision};
use serde::{Deserialize, Serialize};

use crate::event::InferenceEvent;

/// One store row. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Capture timestamp, epoch milliseconds.
    pub ts: i64,
    pub event_id: String,
    pub product_code: String,
    pub station_id: String,
    pub board_serial: Option<String>,
    pub model_family: String,
    pub model_version: String,
    pub latency_ms: u32,
    /// Verdict computed at capture time; immutable once recorded.
    pub mini_decision: Decision,
    /// Verdict computed downstream from the same defects and the
    /// resolved spec; may disagree with the mini decision.
    pub final_decision: Decision,
    /// The final verdict's reason; absent on PASS.
    pub fail_reason: Option<String>,
    pub defect_count: u64,
    /// The defect list re-serialized as JSON text.
    pub defects: String,
    pub overlay_url: String,
    pub raw_url: String,
}

impl DecisionRecord {
    /// Build the row for one handled event.
    ///
    /// `raw_url` falls back to the overlay when the station uploaded
    /// only one image.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if the defect list cannot be
    /// re-serialized.
    pub fn from_event(
        event: &InferenceEvent,
        verdict: &AqlVerdict,
    ) -> Result<Self, serde_json::Error> {
        let overlay_url = event.image_urls.overlay_url.clone();
        let raw_url = event
            .image_urls
            .raw_url
            .clone()
            .unwrap_or_else(|| overlay_url.clone());
        Ok(Self {
            ts: event.ts,
            event_id: event.event_id.clone(),
            product_code: event.product_code.clone(),
            station_id: event.station_id.clone(),
            board_serial: event.board_serial.clone(),
            model_family: event.model_family.clone(),
            model_version: event.model_version.clone(),
            latency_ms: event.latency_ms,
            mini_decision: event.mini_decision,
            final_decision: verdict.decision,
            fail_reason: verdict.decision.is_fail().then(|| verdict.reason.clone()),
            defect_count: event.defects.len() as u64,
            defects: serde_json::to_string(&event.defects)?,
            overlay_url,
            raw_url,
        })
    }

    /// Collapse placeholder optionals: empty and literal `"null"`
    /// values become absent.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.board_serial = self.board_serial.filter(|value| is_present(value));
        self.fail_reason = self.fail_reason.filter(|value| is_present(value));
        self
    }

    /// The first required column that is empty, if any.
    #[must_use]
    pub fn missing_field(&self) -> Option<&'static str> {
        let required = [
            ("event_id", &self.event_id),
            ("product_code", &self.product_code),
            ("station_id", &self.station_id),
            ("model_family", &self.model_family),
            ("model_version", &self.model_version),
            ("overlay_url", &self.overlay_url),
        ];
        required
            .into_iter()
            .find(|(_, value)| value.is_empty())
            .map(|(name, _)| name)
    }
}

fn is_present(value: &str) -> bool {
    !(value.is_empty() || value == "null")
}
