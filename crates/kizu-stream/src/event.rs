//! Inbound wire shape: one inference result per inspected board.
//!
//! Parsing is the validation: a message missing a required field or
//! carrying the wrong shape fails the typed parse and is skipped by
//! the handler. Unknown fields are ignored so producers can add
//! fields without breaking older processors.

use kizu_pipeline::{Decision, Detection, Measurements};
use serde::{Deserialize, Serialize};

/// Media locators attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrls {
    /// Rendered overlay with detection boxes burned in.
    pub overlay_url: String,
    /// The unmodified capture; absent when the station uploads only
    /// the overlay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_url: Option<String>,
}

/// One inference result, as published by a capture station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceEvent {
    /// Unique id assigned at capture time.
    pub event_id: String,
    /// Capture timestamp, epoch milliseconds.
    pub ts: i64,
    pub product_code: String,
    pub station_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_serial: Option<String>,
    pub model_family: String,
    pub model_version: String,
    /// End-to-end inference latency at the station, milliseconds.
    pub latency_ms: u32,
    /// The verdict computed at capture time.
    pub mini_decision: Decision,
    /// Merged image-global detections.
    pub defects: Vec<Detection>,
    /// Physical measurements, when a measuring station contributed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measures: Option<Measurements>,
    pub image_urls: ImageUrls,
}
