//! # Lidar Map
//!
//! A single 2D lidar sweep as an angle-indexed distance lookup. Raw frames
//! arrive as a flat array of millimetre readings at fixed angular granularity
//! plus a mounting offset; the map keeps only angles which returned a
//! reading, in inches, sorted by angle.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use util::maths::rem_euclid;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Millimetres per inch, the one place the unit boundary is crossed.
const MM_PER_INCH: f64 = 25.4;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One lidar sweep. Samples are `(angle_degrees, distance_inches)` with
/// angles strictly in `[0, 360)`, sorted ascending by angle.
#[derive(Debug, Clone, Default)]
pub struct LidarMap {
    samples: Vec<(f64, f64)>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl LidarMap {
    /// Build a map from a raw frame.
    ///
    /// The angle of element `i` is `i * granularity + offset (mod 360)`.
    /// Non-positive readings mean "no return" and are dropped.
    pub fn from_raw(offset_deg: f64, granularity_deg: f64, raw_mm: &[f64]) -> Self {
        let mut samples: Vec<(f64, f64)> = raw_mm
            .iter()
            .enumerate()
            .filter(|(_, dist)| **dist > 0.0)
            .map(|(i, dist)| {
                (
                    rem_euclid(i as f64 * granularity_deg + offset_deg, 360.0),
                    mm_to_in(*dist),
                )
            })
            .collect();

        samples.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        Self { samples }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// All samples, sorted by angle.
    pub fn samples(&self) -> &[(f64, f64)] {
        &self.samples
    }

    /// The present angle nearest to `desired_deg`, treating the angular axis
    /// as linear (no wrap). `None` on an empty map.
    ///
    /// Binary search over the sorted angles, then the nearer of the two
    /// bracketing samples, clamped at the ends.
    pub fn closest_available(&self, desired_deg: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }

        let idx = self
            .samples
            .partition_point(|(angle, _)| *angle < desired_deg);

        let angle = if idx == 0 {
            self.samples[0].0
        } else if idx == self.samples.len() {
            self.samples[self.samples.len() - 1].0
        } else {
            let below = self.samples[idx - 1].0;
            let above = self.samples[idx].0;
            if (desired_deg - below) <= (above - desired_deg) {
                below
            } else {
                above
            }
        };

        Some(angle)
    }

    /// The distance (inches) at the sample nearest `desired_deg`, if one
    /// exists within `max_drift_deg` of it. Handles wrap at 0/360 by also
    /// testing the candidate on the far side of the seam when the drift
    /// window crosses it.
    pub fn get_measurement(&self, desired_deg: f64, max_drift_deg: f64) -> Option<f64> {
        let desired = rem_euclid(desired_deg, 360.0);

        let mut candidates = vec![desired];
        if desired - max_drift_deg < 0.0 {
            candidates.push(desired + 360.0);
        }
        if desired + max_drift_deg >= 360.0 {
            candidates.push(desired - 360.0);
        }

        for cand in candidates {
            if let Some(angle) = self.closest_available(cand) {
                if (angle - cand).abs() <= max_drift_deg {
                    return self.distance_at(angle);
                }
            }
        }

        None
    }

    fn distance_at(&self, angle_deg: f64) -> Option<f64> {
        self.samples
            .iter()
            .find(|(angle, _)| *angle == angle_deg)
            .map(|(_, dist)| *dist)
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a millimetre reading to inches.
pub fn mm_to_in(mm: f64) -> f64 {
    mm / MM_PER_INCH
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
