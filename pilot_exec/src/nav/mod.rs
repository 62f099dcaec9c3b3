//! # Navigation Core
//!
//! Everything between raw camera detections and a position fix: geometry,
//! the field map, lidar lookups, sighting aggregation, the triangle length
//! solver, the position estimator, and the path finder.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod aggregator;
pub mod emitters;
pub mod estimator;
pub mod field_map;
pub mod length_solver;
pub mod lidar_map;
pub mod path_finder;
pub mod trig;
pub mod visual;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use field_if::service::FixBasis;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One detection of a landmark in one camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub landmark_id: String,

    /// Bounding box, pixels, `x1 <= x2` and `y1 <= y2` after `normalized`.
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,

    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,

    /// When the frame was captured.
    pub timestamp: DateTime<Utc>,

    /// Heading of the camera relative to the vehicle base, degrees.
    pub camera_heading: f64,

    /// Distortion-corrected visible height, pixels, when the finder applied
    /// a correction.
    pub corrected_height: Option<f64>,
}

/// Per-sighting angular record, including the observed offsets to every
/// other landmark visible in the same time bucket.
#[derive(Debug, Clone)]
pub struct ViewAngles {
    pub landmark_id: String,
    pub center_x: f64,
    pub center_y: f64,
    pub height_px: f64,
    pub height_deg: f64,
    pub width_px: f64,
    pub width_deg: f64,
    pub confidence: f64,

    /// Heading of the camera this was seen through.
    pub image_heading: f64,

    /// Signed degrees of the landmark centre from the view centre, right
    /// positive.
    pub image_relative_deg: f64,

    /// Observed angular offset from this landmark to each other visible
    /// landmark, degrees (positive = other is to the right).
    pub relative_deg: HashMap<String, f64>,

    /// Same offsets in pixels.
    pub relative_px: HashMap<String, f64>,
}

/// Distances from the observer to one landmark.
#[derive(Debug, Clone, Copy)]
pub struct DistanceRecord {
    /// Ground-plane distance, inches. Lidar-substituted when `is_lidar`.
    pub ground: f64,

    /// Slant distance to the landmark's top, inches.
    pub top: f64,

    /// Slant distance to the landmark's bottom, inches.
    pub bottom: f64,

    /// The purely visual ground distance, kept when lidar substituted it.
    pub visual_ground: Option<f64>,

    /// Raw lidar reading, inches, when one was taken.
    pub lidar: Option<f64>,

    pub is_lidar: bool,
}

/// A localization result.
#[derive(Debug, Clone)]
pub struct PositionFix {
    pub x: f64,
    pub y: f64,
    pub heading_deg: f64,
    pub confidence: Confidence,
    pub basis: FixBasis,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

/// How much a position fix can be trusted. Ordered, `Fact` highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    VeryLow,
    Low,
    Medium,
    High,

    /// Externally supplied ground truth, never produced by the estimator.
    Fact,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Sighting {
    /// Reorder the box corners so `x1 <= x2` and `y1 <= y2`.
    pub fn normalized(mut self) -> Self {
        if self.x1 > self.x2 {
            std::mem::swap(&mut self.x1, &mut self.x2);
        }
        if self.y1 > self.y2 {
            std::mem::swap(&mut self.y1, &mut self.y2);
        }
        self
    }

    pub fn center_x(&self) -> f64 {
        (self.x1 + self.x2) / 2.0
    }

    pub fn center_y(&self) -> f64 {
        (self.y1 + self.y2) / 2.0
    }

    pub fn width_px(&self) -> f64 {
        self.x2 - self.x1
    }

    /// Visible height, preferring the distortion-corrected value.
    pub fn height_px(&self) -> f64 {
        self.corrected_height.unwrap_or(self.y2 - self.y1)
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Confidence::VeryLow => write!(f, "VERY_LOW"),
            Confidence::Low => write!(f, "LOW"),
            Confidence::Medium => write!(f, "MEDIUM"),
            Confidence::High => write!(f, "HIGH"),
            Confidence::Fact => write!(f, "FACT"),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
