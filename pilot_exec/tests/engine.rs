//! Action engine integration tests against a scripted vehicle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;

use field_if::service::{Assignment, AssignmentStep};
use field_if::wire::{CameraRange, ConfigKey, ShownObject};
use pilot_lib::actions::{
    ActionCtx, ActionEngine, AssignmentResult, DrivingParams, SearchLidarParams,
};
use pilot_lib::detector::NullDetector;
use pilot_lib::nav::estimator::{Estimator, EstimatorParams};
use pilot_lib::nav::field_map::FieldMap;
use pilot_lib::nav::path_finder::PathFinderParams;
use pilot_lib::pilot_nav::{CameraConfig, CameraSlot, NavParams, PilotNav};
use pilot_lib::nav::emitters::EmitterParams;
use pilot_lib::nav::visual::VisualGeometry;
use pilot_lib::vehicle::{Vehicle, VehicleError};

/// Records every command; answers queries with canned data.
#[derive(Default)]
struct MockVehicle {
    commands: Vec<String>,
}

impl Vehicle for MockVehicle {
    fn rotate(&mut self, degrees: f64) -> Result<(), VehicleError> {
        self.commands.push(format!("rotate {:.1}", degrees));
        Ok(())
    }

    fn go(&mut self, speed: f64, millis: u64) -> Result<(), VehicleError> {
        self.commands.push(format!("go {:.2} {}", speed, millis));
        Ok(())
    }

    fn forward(&mut self, distance_in: f64, speed: f64) -> Result<(), VehicleError> {
        self.commands
            .push(format!("forward {:.1} {:.2}", distance_in, speed));
        Ok(())
    }

    fn reverse(&mut self, distance_in: f64, speed: f64) -> Result<(), VehicleError> {
        self.commands
            .push(format!("reverse {:.1} {:.2}", distance_in, speed));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), VehicleError> {
        self.commands.push("stop".into());
        Ok(())
    }

    fn look(&mut self, positions: &[(f64, f64)]) -> Result<(), VehicleError> {
        self.commands.push(format!("look {}", positions.len()));
        Ok(())
    }

    fn get_lidar(&mut self, _max_age_ms: u64) -> Result<Vec<f64>, VehicleError> {
        Ok(vec![0.0; 360])
    }

    fn measure(
        &mut self,
        angle_deg: f64,
        _tolerance_deg: f64,
    ) -> Result<(f64, f64), VehicleError> {
        Ok((angle_deg, 0.0))
    }

    fn find_measurement(
        &mut self,
        _angle_deg: f64,
        _tolerance_deg: f64,
        _expected_mm: f64,
        _distance_tolerance_mm: f64,
        _max_age_ms: u64,
    ) -> Result<(f64, f64), VehicleError> {
        Err(VehicleError::Timeout)
    }

    fn get_config(&mut self, key: ConfigKey) -> Result<String, VehicleError> {
        Ok(match key {
            ConfigKey::LidarHeading => "0".into(),
            ConfigKey::LidarGranularity => "1.0".into(),
        })
    }

    fn get_cameras(&mut self) -> Result<Vec<CameraRange>, VehicleError> {
        Ok(Vec::new())
    }

    fn display_mode(&mut self, _text: &str) -> Result<(), VehicleError> {
        Ok(())
    }

    fn display_status(&mut self, text: &str) -> Result<(), VehicleError> {
        self.commands.push(format!("status {}", text));
        Ok(())
    }

    fn display_command(&mut self, _text: &str) -> Result<(), VehicleError> {
        Ok(())
    }

    fn display_position(&mut self, _x: f64, _y: f64, _heading: f64) -> Result<(), VehicleError> {
        Ok(())
    }

    fn display_objects(&mut self, _objects: &[ShownObject]) -> Result<(), VehicleError> {
        Ok(())
    }
}

fn test_nav() -> PilotNav {
    let map = Arc::new(
        FieldMap::from_json(
            r#"{
                "shape": "rectangle",
                "boundaries": {"xmin": -200, "ymin": -200, "xmax": 200, "ymax": 200},
                "near_boundaries": {"xmin": -210, "ymin": -210, "xmax": 210, "ymax": 210},
                "landmarks": {},
                "obstacles": {},
                "search": {}
            }"#,
        )
        .unwrap(),
    );

    let estimator = Estimator::new(map.clone(), EstimatorParams::default());
    let cameras = vec![CameraSlot {
        id: "front".into(),
        config: CameraConfig {
            geometry: VisualGeometry {
                fov_h_deg: 44.0,
                fov_v_deg: 27.333,
                view_w_px: 1280.0,
                view_h_px: 720.0,
            },
            vehicle_base_id: 0,
            default_heading: 0.0,
            alternate_headings: vec![],
            emitter: EmitterParams::default(),
        },
        current_heading: 0.0,
    }];

    PilotNav::new(
        map,
        "test_map",
        estimator,
        cameras,
        Box::new(NullDetector),
        NavParams {
            max_location_attempts: 1,
            smoothing_cycles_per_image: 1,
            ..NavParams::default()
        },
        None,
    )
}

fn step(command: &str, params: serde_json::Value) -> AssignmentStep {
    AssignmentStep {
        command: command.into(),
        params,
    }
}

fn run(steps: Vec<AssignmentStep>, vehicle: &mut MockVehicle) -> AssignmentResult {
    let cancel = Arc::new(AtomicBool::new(false));
    let engine = ActionEngine::new(cancel.clone());
    let driving = DrivingParams::default();
    let path_params = PathFinderParams {
        vehicle_width: 12.0,
        vehicle_length: 16.0,
        desired_paths: 2,
    };
    let mut nav = test_nav();

    let mut ctx = ActionCtx {
        vehicle,
        nav: &mut nav,
        client: None,
        driving: &driving,
        search_lidar: SearchLidarParams::default(),
        path_params: &path_params,
        cancel: cancel.as_ref(),
        control: None,
    };

    engine.run_assignment(
        &Assignment {
            map_id: "test_map".into(),
            steps,
        },
        &mut ctx,
    )
}

#[test]
fn test_trivial_assignment_completes() {
    let mut vehicle = MockVehicle::default();
    let result = run(
        vec![
            step("do_nothing", json!(null)),
            step("sleep", json!({"seconds": 0.05})),
        ],
        &mut vehicle,
    );

    assert_eq!(result, AssignmentResult::Completed);
    assert!(vehicle.commands.is_empty());
}

#[test]
fn test_shutdown_halts_the_assignment() {
    let mut vehicle = MockVehicle::default();
    let result = run(
        vec![
            step("do_nothing", json!(null)),
            step("shutdown", json!(null)),
            step("sleep", json!({"seconds": 60.0})),
        ],
        &mut vehicle,
    );

    // The sleep after shutdown must never run
    assert_eq!(result, AssignmentResult::Shutdown);
}

#[test]
fn test_unknown_command_fails_the_assignment() {
    let mut vehicle = MockVehicle::default();
    let result = run(vec![step("levitate", json!(null))], &mut vehicle);

    assert!(matches!(result, AssignmentResult::Failed { step: 0, .. }));
}

#[test]
fn test_motion_without_vision_fails() {
    // The null detector never sees a landmark, so localization (and with it
    // any motion step) must fail rather than drive blind.
    let mut vehicle = MockVehicle::default();
    let result = run(
        vec![step("face_heading", json!({"heading": 90.0}))],
        &mut vehicle,
    );

    assert!(matches!(result, AssignmentResult::Failed { step: 0, .. }));

    // The random adjustments it tried on the way are real motion
    assert!(vehicle
        .commands
        .iter()
        .any(|c| c.starts_with("go") || c.starts_with("rotate")));
}

#[test]
fn test_cancellation_between_steps() {
    let cancel = Arc::new(AtomicBool::new(false));
    let engine = ActionEngine::new(cancel.clone());
    let driving = DrivingParams::default();
    let path_params = PathFinderParams {
        vehicle_width: 12.0,
        vehicle_length: 16.0,
        desired_paths: 2,
    };
    let mut nav = test_nav();
    let mut vehicle = MockVehicle::default();

    cancel.store(true, Ordering::Relaxed);

    let mut ctx = ActionCtx {
        vehicle: &mut vehicle,
        nav: &mut nav,
        client: None,
        driving: &driving,
        search_lidar: SearchLidarParams::default(),
        path_params: &path_params,
        cancel: cancel.as_ref(),
        control: None,
    };

    let result = engine.run_assignment(
        &Assignment {
            map_id: "test_map".into(),
            steps: vec![step("sleep", json!({"seconds": 60.0}))],
        },
        &mut ctx,
    );

    assert_eq!(result, AssignmentResult::Cancelled);
}
