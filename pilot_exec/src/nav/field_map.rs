//! # Field Map
//!
//! The mapped 2D field the robot operates in: landmarks with known positions
//! and vertical extents, rectangular obstacles, inner/outer boundary
//! rectangles, and the table of searchable object types.
//!
//! Maps are immutable after load. Pairwise landmark distances are computed
//! once at load time.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An axis-aligned rectangle, the only shape the map format supports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

/// A mapped landmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Landmark {
    /// Position of the landmark's centre, inches.
    pub position: (f64, f64),

    /// Altitude of the landmark's vertical centre, inches.
    pub altitude: f64,

    /// Vertical extent, inches.
    pub height: f64,

    /// Horizontal extent, inches.
    pub width: f64,

    /// Recognition model which detects this landmark.
    pub model: String,

    /// Model output type, e.g. "light" or "tree".
    #[serde(rename = "type")]
    pub object_type: String,

    /// Pattern discriminator within the type, e.g. "square" for lights.
    pub pattern: String,

    /// Minimum detection confidence to accept a sighting.
    pub confidence: f64,

    /// Whether the landmark reflects lidar usably.
    pub lidar_visible: bool,

    /// Relative priority when choosing landmarks (higher wins).
    pub priority: i32,

    /// Grouping tier.
    pub tier: i32,

    /// Optional preferred minimum apparent angle, degrees.
    #[serde(default)]
    pub min_visual_angle: Option<f64>,

    /// Optional preferred maximum apparent angle, degrees.
    #[serde(default)]
    pub max_visual_angle: Option<f64>,
}

/// A searchable (unmapped position) object type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchObject {
    pub height: f64,
    pub width: f64,
    pub lidar_visible: bool,
    pub confidence: f64,
}

/// The full field map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMap {
    pub shape: String,

    /// Inner rectangle: positions inside are in bounds.
    pub boundaries: Rect,

    /// Outer rectangle: tolerated drift zone around the boundary.
    pub near_boundaries: Rect,

    pub landmarks: HashMap<String, Landmark>,

    pub obstacles: HashMap<String, Rect>,

    #[serde(default)]
    pub search: HashMap<String, SearchObject>,

    /// Pairwise landmark distance table, keyed `"{a}|{b}"`. Computed at
    /// load, not part of the file format.
    #[serde(skip)]
    distances: HashMap<String, f64>,
}

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum MapError {
    #[error("Could not parse the map file: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Unsupported map shape {0:?}, only \"rectangle\" is supported")]
    UnsupportedShape(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Rect {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.xmin && x <= self.xmax && y >= self.ymin && y <= self.ymax
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// True if the segment from `(x1, y1)` to `(x2, y2)` intersects this
    /// rectangle.
    pub fn intersects_segment(&self, x1: f64, y1: f64, x2: f64, y2: f64) -> bool {
        // Either endpoint inside is an immediate hit
        if self.contains(x1, y1) || self.contains(x2, y2) {
            return true;
        }

        // Otherwise test against each edge
        let corners = [
            (self.xmin, self.ymin),
            (self.xmax, self.ymin),
            (self.xmax, self.ymax),
            (self.xmin, self.ymax),
        ];

        for i in 0..4 {
            let (ex1, ey1) = corners[i];
            let (ex2, ey2) = corners[(i + 1) % 4];
            if segments_intersect((x1, y1), (x2, y2), (ex1, ey1), (ex2, ey2)) {
                return true;
            }
        }

        false
    }
}

impl FieldMap {
    /// Parse a map from its JSON file content and build the distance table.
    pub fn from_json(json: &str) -> Result<Self, MapError> {
        let mut map: FieldMap = serde_json::from_str(json)?;

        if map.shape != "rectangle" {
            return Err(MapError::UnsupportedShape(map.shape));
        }

        map.build_distance_table();
        Ok(map)
    }

    /// Rebuild the pairwise landmark distance table. O(n^2) in memory,
    /// computed once.
    fn build_distance_table(&mut self) {
        self.distances.clear();
        for (id_a, lm_a) in self.landmarks.iter() {
            for (id_b, lm_b) in self.landmarks.iter() {
                if id_a == id_b {
                    continue;
                }
                let dist = ((lm_a.position.0 - lm_b.position.0).powi(2)
                    + (lm_a.position.1 - lm_b.position.1).powi(2))
                .sqrt();
                self.distances.insert(format!("{}|{}", id_a, id_b), dist);
            }
        }
    }

    /// The cached distance between two landmarks, `None` if either is
    /// unknown.
    pub fn landmark_distance(&self, id_a: &str, id_b: &str) -> Option<f64> {
        self.distances.get(&format!("{}|{}", id_a, id_b)).copied()
    }

    pub fn is_in_bounds(&self, x: f64, y: f64) -> bool {
        self.boundaries.contains(x, y)
    }

    pub fn is_near_bounds(&self, x: f64, y: f64) -> bool {
        self.near_boundaries.contains(x, y)
    }

    /// Whether the point is inside an obstacle, and which one.
    pub fn is_blocked(&self, x: f64, y: f64) -> (bool, Option<&str>) {
        for (id, rect) in self.obstacles.iter() {
            if rect.contains(x, y) {
                return (true, Some(id.as_str()));
            }
        }
        (false, None)
    }

    /// Whether a straight path between two points crosses any obstacle.
    ///
    /// When `width > 0` five parallel segments are tested, offset by
    /// `+/- width / 2` along both x and y. This is an approximation of a
    /// swept rectangle, adequate for the obstacle sizes in play.
    pub fn is_path_blocked(&self, x1: f64, y1: f64, x2: f64, y2: f64, width: f64) -> bool {
        let mut offsets = vec![(0.0, 0.0)];
        if width > 0.0 {
            let w = width / 2.0;
            offsets.push((w, 0.0));
            offsets.push((-w, 0.0));
            offsets.push((0.0, w));
            offsets.push((0.0, -w));
        }

        for (ox, oy) in offsets {
            for rect in self.obstacles.values() {
                if rect.intersects_segment(x1 + ox, y1 + oy, x2 + ox, y2 + oy) {
                    return true;
                }
            }
        }

        false
    }

    /// Look up a landmark id by its recognition key.
    pub fn landmark_for(&self, model: &str, object_type: &str, pattern: &str) -> Option<&str> {
        self.landmarks
            .iter()
            .find(|(_, lm)| {
                lm.model == model && lm.object_type == object_type && lm.pattern == pattern
            })
            .map(|(id, _)| id.as_str())
    }

    pub fn landmark(&self, id: &str) -> Option<&Landmark> {
        self.landmarks.get(id)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Orientation of the ordered triplet (p, q, r): 0 collinear, 1 clockwise,
/// 2 anticlockwise.
fn orientation(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> u8 {
    let val = (q.1 - p.1) * (r.0 - q.0) - (q.0 - p.0) * (r.1 - q.1);
    if val.abs() < 1e-12 {
        0
    } else if val > 0.0 {
        1
    } else {
        2
    }
}

/// True if collinear point q lies on segment pr.
fn on_segment(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> bool {
    q.0 <= p.0.max(r.0) && q.0 >= p.0.min(r.0) && q.1 <= p.1.max(r.1) && q.1 >= p.1.min(r.1)
}

/// Standard 3-point orientation segment intersection test with explicit
/// collinear handling.
fn segments_intersect(p1: (f64, f64), q1: (f64, f64), p2: (f64, f64), q2: (f64, f64)) -> bool {
    let o1 = orientation(p1, q1, p2);
    let o2 = orientation(p1, q1, q2);
    let o3 = orientation(p2, q2, p1);
    let o4 = orientation(p2, q2, q1);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    // Collinear special cases
    (o1 == 0 && on_segment(p1, p2, q1))
        || (o2 == 0 && on_segment(p1, q2, q1))
        || (o3 == 0 && on_segment(p2, p1, q2))
        || (o4 == 0 && on_segment(p2, q1, q2))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
