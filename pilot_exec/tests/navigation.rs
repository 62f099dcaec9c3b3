//! End-to-end navigation checks through the library surface.

use pilot_lib::nav::field_map::FieldMap;
use pilot_lib::nav::lidar_map::LidarMap;
use pilot_lib::nav::path_finder::{self, PathFinderParams};

const MM_PER_INCH: f64 = 25.4;

fn open_map() -> FieldMap {
    FieldMap::from_json(
        r#"{
            "shape": "rectangle",
            "boundaries": {"xmin": -300, "ymin": -300, "xmax": 300, "ymax": 300},
            "near_boundaries": {"xmin": -310, "ymin": -310, "xmax": 310, "ymax": 310},
            "landmarks": {},
            "obstacles": {},
            "search": {}
        }"#,
    )
    .unwrap()
}

fn params() -> PathFinderParams {
    PathFinderParams {
        vehicle_width: 12.0,
        vehicle_length: 16.0,
        desired_paths: 2,
    }
}

/// Raw lidar frame with every sample at `clear_in` inches except the listed
/// `(index, inches)` overrides.
fn lidar_frame(clear_in: f64, overrides: &[(usize, f64)]) -> LidarMap {
    let mut raw = vec![clear_in * MM_PER_INCH; 360];
    for &(idx, inches) in overrides {
        raw[idx] = inches * MM_PER_INCH;
    }
    LidarMap::from_raw(0.0, 1.0, &raw)
}

#[test]
fn test_clear_diagonal_drive_is_one_leg() {
    let map = open_map();
    let lidar = lidar_frame(500.0, &[]);

    let paths =
        path_finder::find_potential_paths(&map, 0.0, 0.0, 50.0, 50.0, &lidar, 0.0, &params());

    assert!(!paths.is_empty());
    let best = &paths[0];
    assert_eq!(best.legs.len(), 1);
    assert!((best.legs[0].heading_deg - 45.0).abs() < 1e-9);
    assert!((best.legs[0].distance - 70.710678).abs() < 1e-3);
}

#[test]
fn test_blocked_direct_route_goes_around() {
    let map = open_map();

    // Facing 90; the target bears 45, which is relative 315 on the sweep.
    // Block a wedge around it so the direct leg cannot clear.
    let mut overrides = Vec::new();
    for deg in 300..=330 {
        overrides.push((deg, 30.0));
    }
    let lidar = lidar_frame(500.0, &overrides);

    let paths =
        path_finder::find_potential_paths(&map, 0.0, 0.0, 50.0, 50.0, &lidar, 90.0, &params());

    assert!(paths.len() >= 2);
    for path in &paths {
        assert_eq!(path.legs.len(), 2);
        // Both legs together still end at the target
        let last = path.legs.last().unwrap();
        assert!((last.x - 50.0).abs() < 1e-6);
        assert!((last.y - 50.0).abs() < 1e-6);
        // A detour is never shorter than the straight line
        assert!(path.total_distance() >= 70.710678 - 1e-6);
    }
}

#[test]
fn test_rotation_prefers_the_short_way() {
    for (current, target, expected) in [
        (0.0, 90.0, 90.0),
        (90.0, 0.0, -90.0),
        (170.0, -170.0, 20.0),
        (-170.0, 170.0, -20.0),
        (-150.0, 150.0, -60.0),
        (45.0, 45.0, 0.0),
    ] {
        let rotation = path_finder::find_rotation(current, target);
        assert!(
            (rotation - expected).abs() < 1e-9,
            "find_rotation({}, {}) = {}, want {}",
            current,
            target,
            rotation,
            expected
        );
    }
}

#[test]
fn test_lidar_nearest_sample_selection() {
    // Sparse sweep: only a handful of angles return a distance
    let mut raw = vec![0.0; 360];
    for &(deg, dist_in) in &[
        (0usize, 40.0),
        (10usize, 35.0),
        (11usize, 34.0),
        (12usize, 33.0),
        (100usize, 60.0),
        (200usize, 80.0),
        (250usize, 90.0),
        (251usize, 91.0),
    ] {
        raw[deg] = dist_in * MM_PER_INCH;
    }
    let lidar = LidarMap::from_raw(0.0, 1.0, &raw);

    // Wraps below zero to the sample at 0
    assert_eq!(lidar.closest_available(-1.0), Some(0.0));
    // Wraps past the seam to the highest sample
    assert_eq!(lidar.closest_available(265.0), Some(251.0));
    // Plain nearest
    assert_eq!(lidar.closest_available(13.0), Some(12.0));
    assert_eq!(lidar.closest_available(150.0), Some(100.0));
}

#[test]
fn test_lidar_units_are_inches() {
    let raw = vec![254.0; 360];
    let lidar = LidarMap::from_raw(0.0, 1.0, &raw);

    let reading = lidar.get_measurement(90.0, 1.0).unwrap();
    assert!((reading - 10.0).abs() < 1e-9);
}
