//! Wire model for the detection backend.
//!
//! Inbound messages are JSON objects discriminated by a `type` field:
//! `plate_detection` and `capacity_update`. Outbound messages are frame
//! pushes (`{ "data": <base64>, ..metadata }`) and fire-and-forget
//! control messages (`{ "type": "reset" }`, `{ "type": "stats" }`).

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Maximum body excerpt length attached to deserialization errors.
const ERROR_BODY_EXCERPT: usize = 256;

// ── Inbound events ───────────────────────────────────────────────────

/// A parsed event from the detection stream.
///
/// Uses `#[serde(flatten)]` on each variant to capture all fields
/// beyond the core set, so nothing from the backend is silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// License plate detections for one processed video frame.
    PlateDetection(PlateDetection),
    /// Occupancy snapshot for the monitored parking slots.
    CapacityUpdate(CapacityUpdate),
}

impl InboundEvent {
    /// Parse an inbound text frame.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: excerpt(text),
        })
    }
}

/// Plate detections reported for a single frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateDetection {
    /// Backend timestamp (epoch seconds).
    pub timestamp: f64,

    /// Capture-side frame counter.
    pub frame_number: u64,

    /// Backend-side frame counter, if the backend resamples.
    #[serde(default)]
    pub processed_frame_number: Option<u64>,

    /// Plates found in this frame.
    #[serde(default)]
    pub plates: Vec<PlateHit>,

    /// Backend processing latency for this frame.
    #[serde(default)]
    pub processing_time_ms: Option<f64>,

    /// All remaining fields the backend sends.
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// A single recognized plate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateHit {
    pub plate_number: String,

    pub confidence: f64,

    /// Bounding box `[x, y, width, height]` in frame coordinates.
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,

    /// Whether the backend considers this a new sighting (not a
    /// duplicate within its suppression window).
    #[serde(default)]
    pub is_new: bool,
}

/// Occupancy snapshot for the monitored lot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityUpdate {
    pub total_slots: u32,

    pub occupied: u32,

    pub empty: u32,

    #[serde(default)]
    pub occupancy_rate: f64,

    /// Per-slot readings.
    #[serde(default)]
    pub slots: Vec<SlotReading>,

    /// Present only when a slot changed state since the last update.
    /// Shape varies by backend version, so it is kept as raw JSON.
    #[serde(default)]
    pub state_change: Option<serde_json::Value>,

    #[serde(default)]
    pub processing_time_ms: Option<f64>,

    /// All remaining fields the backend sends.
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// One parking slot's classified state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotReading {
    pub slot_id: u32,

    pub status: SlotStatus,

    #[serde(default)]
    pub confidence: f64,

    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Occupied,
    Empty,
    /// Forward-compat: statuses introduced by newer backends.
    #[serde(other)]
    Unknown,
}

// ── Outbound messages ────────────────────────────────────────────────

/// A video frame pushed to the detection backend.
///
/// Serializes to `{ "data": <base64>, ..metadata }` — metadata fields
/// are flattened into the top-level object.
#[derive(Debug, Clone, Serialize)]
pub struct FramePush {
    /// Base64-encoded image data.
    pub data: String,

    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Fire-and-forget control messages.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Ask the backend to reset its per-connection detection state.
    Reset,
    /// Ask the backend to emit a stats report.
    Stats,
}

fn excerpt(text: &str) -> String {
    if text.len() <= ERROR_BODY_EXCERPT {
        text.to_owned()
    } else {
        let mut end = ERROR_BODY_EXCERPT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_owned()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
