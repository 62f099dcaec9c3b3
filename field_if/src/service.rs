//! # Coordination Service Records
//!
//! JSON records exchanged with the remote coordination service. Encoding
//! policy: floats are rounded to 2 decimal places before serialization, and
//! timestamps are formatted as `YYYY-MM-DDTHH:MM:SS`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// The timestamp format used by the service.
pub const SERVICE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// One entry from `GET /assignments/{vehicle_id}/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentEntry {
    pub entry_num: u64,
    pub vehicle_id: String,
    pub assignment: Assignment,
}

/// An ordered list of steps to execute against a given map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub map_id: String,
    pub steps: Vec<AssignmentStep>,
}

/// A single step of an assignment.
///
/// The command set is open-ended on the wire, the pilot's action engine maps
/// command strings to action kinds and rejects unknown ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentStep {
    pub command: String,

    #[serde(default)]
    pub params: serde_json::Value,
}

/// Body for `POST /assignment/{vehicle_id}/{entry_num}/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentComplete {
    pub complete: bool,
}

/// Response carrying the service-assigned entry number of a new record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryNumResponse {
    pub entry_num: u64,
}

/// Body for `POST /position_log/{vehicle_id}/{session_id}/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLogRecord {
    pub session_id: String,
    pub vehicle_id: String,
    pub occurred: String,
    pub position_x: f64,
    pub position_y: f64,
    pub heading: f64,
    pub navmap_id: String,
    pub basis: FixBasis,
}

/// Structured record of how a position fix was derived, shipped for audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixBasis {
    /// Observed inter-landmark angles, degrees.
    pub angles: Vec<f64>,

    /// Observer to landmark distances, inches.
    pub distances: Vec<f64>,

    /// Identifiers of the landmarks used.
    pub landmarks: Vec<String>,
}

/// Body for `POST /position_view/{vehicle_id}/{entry_num}/{camera_id}/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionView {
    pub image: EncodedImage,
}

/// Body for `POST /lidar/{vehicle_id}/{session_id}/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LidarRecord {
    pub session_id: String,
    pub vehicle_id: String,
    pub occurred: String,

    /// (angle degrees, distance inches) samples.
    pub measurements: Vec<(f64, f64)>,
}

/// Body for `POST /new_search_hit/{vehicle_id}/{session_id}/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHitRecord {
    pub session_id: String,
    pub vehicle_id: String,
    pub occurred: String,
    pub object_type: String,
    pub position_x: f64,
    pub position_y: f64,
    pub distance: f64,
    pub confidence: f64,
    pub is_lidar: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EncodedImage>,
}

/// Response from `GET /recognition_model/{model_id}/{type}/{format}/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionModel {
    pub model_format: String,

    /// Base64 of the model binary.
    pub encoded_model: String,

    pub additional_params: ModelParams,
}

/// Per-model detection parameters shipped with the model binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    /// Maps model output classes to `(type, pattern)` pairs.
    pub object_mappings: serde_json::Value,

    pub object_type: String,
}

/// A base64-encoded image payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedImage(pub String);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl EncodedImage {
    /// Encode raw image bytes (already in their container format, e.g. PNG).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(base64::encode(bytes))
    }

    /// Decode back into raw bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::decode(&self.0)
    }
}

impl PositionLogRecord {
    pub fn new(
        session_id: &str,
        vehicle_id: &str,
        navmap_id: &str,
        occurred: DateTime<Utc>,
        x: f64,
        y: f64,
        heading: f64,
        basis: FixBasis,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            vehicle_id: vehicle_id.into(),
            occurred: format_timestamp(occurred),
            position_x: round2(x),
            position_y: round2(y),
            heading: round2(heading),
            navmap_id: navmap_id.into(),
            basis: basis.rounded(),
        }
    }
}

impl FixBasis {
    /// Apply the 2 dp encoding policy to all numeric fields.
    pub fn rounded(mut self) -> Self {
        for a in self.angles.iter_mut() {
            *a = round2(*a);
        }
        for d in self.distances.iter_mut() {
            *d = round2(*d);
        }
        self
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Round a float to the service's 2 decimal place policy.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Format a timestamp per the service's encoding policy.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(SERVICE_TIMESTAMP_FORMAT).to_string()
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.006), 1.01);
        assert_eq!(round2(-221.4449), -221.44);
        assert_eq!(round2(31.0), 31.0);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = Utc.ymd(2026, 3, 14).and_hms(15, 9, 26);
        assert_eq!(format_timestamp(ts), "2026-03-14T15:09:26");
    }

    #[test]
    fn test_assignment_roundtrip() {
        let json = r#"{
            "entry_num": 7,
            "vehicle_id": "rover-1",
            "assignment": {
                "map_id": "back_garden",
                "steps": [
                    {"command": "go_to_position", "params": {"x": 10.0, "y": -20.0}},
                    {"command": "log_position"}
                ]
            }
        }"#;

        let entry: AssignmentEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.entry_num, 7);
        assert_eq!(entry.assignment.steps.len(), 2);
        assert_eq!(entry.assignment.steps[0].command, "go_to_position");
        assert!(entry.assignment.steps[1].params.is_null());
    }

    #[test]
    fn test_position_log_rounding() {
        let rec = PositionLogRecord::new(
            "s1",
            "rover-1",
            "m1",
            Utc.ymd(2026, 1, 1).and_hms(0, 0, 0),
            31.00712,
            -221.4449,
            11.239,
            FixBasis {
                angles: vec![23.4567],
                distances: vec![100.129],
                landmarks: vec!["n1".into()],
            },
        );

        assert_eq!(rec.position_x, 31.01);
        assert_eq!(rec.position_y, -221.44);
        assert_eq!(rec.heading, 11.24);
        assert_eq!(rec.basis.angles[0], 23.46);
        assert_eq!(rec.basis.distances[0], 100.13);
    }
}
