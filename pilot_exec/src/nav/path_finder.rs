//! # Path Finder
//!
//! Plans drivable paths across the field: the direct line when nothing is in
//! the way, otherwise pairs of legs through a waypoint swept across an
//! angular/fractional grid, each validated against the map's obstacles and
//! the live lidar sweep.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use ordered_float::OrderedFloat;
use serde::Deserialize;

use util::maths::rem_euclid;

use super::field_map::FieldMap;
use super::lidar_map::LidarMap;
use super::trig;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Angular drift tolerated when matching a lidar sample to a ray.
const LIDAR_RAY_DRIFT_DEG: f64 = 0.5;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Path search tuning, from the vehicle shape config.
#[derive(Debug, Clone, Deserialize)]
pub struct PathFinderParams {
    pub vehicle_width: f64,
    pub vehicle_length: f64,

    /// Stop the alternate-path sweep after this many hits.
    pub desired_paths: usize,
}

/// One drivable segment ending at `(x, y)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leg {
    pub heading_deg: f64,
    pub distance: f64,
    pub x: f64,
    pub y: f64,
}

/// An ordered list of legs from source to target.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub legs: Vec<Leg>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for PathFinderParams {
    fn default() -> Self {
        Self {
            vehicle_width: 12.0,
            vehicle_length: 16.0,
            desired_paths: 2,
        }
    }
}

impl Path {
    pub fn total_distance(&self) -> f64 {
        self.legs.iter().map(|l| l.distance).sum()
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// The heading and distance of the straight line from `(sx, sy)` to
/// `(ex, ey)`.
pub fn find_direct_path(sx: f64, sy: f64, ex: f64, ey: f64) -> (f64, f64) {
    let distance = ((ex - sx).powi(2) + (ey - sy).powi(2)).sqrt();
    (trig::bearing(sx, sy, ex, ey), distance)
}

/// Whether the lidar shows the given relative ray free out to `distance`.
/// Clear when there is no reading at all, or the reading is farther than the
/// travel.
pub fn is_path_clear(relative_heading_deg: f64, distance: f64, lidar: &LidarMap) -> bool {
    let angle = rem_euclid(relative_heading_deg, 360.0);
    match lidar.get_measurement(angle, LIDAR_RAY_DRIFT_DEG) {
        Some(reading) => reading > distance,
        None => true,
    }
}

/// Clearance check widened to the vehicle: the nominal ray plus the two
/// rays grazing the vehicle's sides at the travel distance.
pub fn is_path_clear_with_width(
    heading_deg: f64,
    distance: f64,
    lidar: &LidarMap,
    current_heading_deg: f64,
    vehicle_width: f64,
) -> bool {
    if distance <= 0.0 {
        return true;
    }

    let relative = heading_deg - current_heading_deg;
    let spread = (vehicle_width / 2.0 / distance).atan().to_degrees();

    is_path_clear(relative, distance, lidar)
        && is_path_clear(relative + spread, distance, lidar)
        && is_path_clear(relative - spread, distance, lidar)
}

/// Whether the map alone permits driving the segment, sweeping the larger of
/// the vehicle's width and length.
pub fn is_path_map_plausible(
    map: &FieldMap,
    sx: f64,
    sy: f64,
    ex: f64,
    ey: f64,
    params: &PathFinderParams,
) -> bool {
    let width = params.vehicle_width.max(params.vehicle_length);
    !map.is_path_blocked(sx, sy, ex, ey, width)
}

/// Plan paths from `(sx, sy)` to `(ex, ey)`.
///
/// The direct path wins outright when it is both map-plausible and
/// lidar-clear. Otherwise a two-leg sweep runs: the first-leg fraction walks
/// from 0.99 down to 0.30 in steps of 0.10, the heading offset from 0.5 up
/// to 45 degrees in steps of 0.5, trying both sides at each offset; a
/// waypoint is accepted when it is in bounds, both legs are map-plausible,
/// and the first leg is lidar-clear. Results are sorted by total distance.
pub fn find_potential_paths(
    map: &FieldMap,
    sx: f64,
    sy: f64,
    ex: f64,
    ey: f64,
    lidar: &LidarMap,
    current_heading_deg: f64,
    params: &PathFinderParams,
) -> Vec<Path> {
    let (direct_heading, direct_distance) = find_direct_path(sx, sy, ex, ey);

    if direct_distance == 0.0 {
        return vec![Path { legs: Vec::new() }];
    }

    let direct_ok = is_path_map_plausible(map, sx, sy, ex, ey, params)
        && is_path_clear_with_width(
            direct_heading,
            direct_distance,
            lidar,
            current_heading_deg,
            params.vehicle_width,
        );

    if direct_ok {
        return vec![Path {
            legs: vec![Leg {
                heading_deg: direct_heading,
                distance: direct_distance,
                x: ex,
                y: ey,
            }],
        }];
    }

    let mut paths = Vec::new();

    let mut fraction = 0.99;
    'sweep: while fraction >= 0.30 {
        let mut offset = 0.5;
        while offset <= 45.0 {
            for side in [1.0, -1.0] {
                let heading = trig::normalize_heading(direct_heading + side * offset);
                let leg1_dist = fraction * direct_distance;
                let (wx, wy) = trig::translate(sx, sy, heading, leg1_dist, true);

                if !map.is_in_bounds(wx, wy) {
                    continue;
                }
                if !is_path_map_plausible(map, sx, sy, wx, wy, params)
                    || !is_path_map_plausible(map, wx, wy, ex, ey, params)
                {
                    continue;
                }
                if !is_path_clear_with_width(
                    heading,
                    leg1_dist,
                    lidar,
                    current_heading_deg,
                    params.vehicle_width,
                ) {
                    continue;
                }

                let (leg2_heading, leg2_dist) = find_direct_path(wx, wy, ex, ey);
                paths.push(Path {
                    legs: vec![
                        Leg {
                            heading_deg: heading,
                            distance: leg1_dist,
                            x: wx,
                            y: wy,
                        },
                        Leg {
                            heading_deg: leg2_heading,
                            distance: leg2_dist,
                            x: ex,
                            y: ey,
                        },
                    ],
                });

                if paths.len() >= params.desired_paths {
                    break 'sweep;
                }
            }
            offset += 0.5;
        }
        fraction -= 0.10;
    }

    paths.sort_by_key(|p| OrderedFloat(p.total_distance()));
    paths
}

/// The signed minimal rotation from one heading to another.
pub fn find_rotation(current_deg: f64, target_deg: f64) -> f64 {
    trig::normalize_heading(target_deg - current_deg)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
