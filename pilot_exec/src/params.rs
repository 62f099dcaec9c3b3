//! # Pilot Configuration
//!
//! The single JSON config file for the executable, plus the built-in camera
//! capability table that `Cameras.<id>.Config` values reference.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::actions::{DrivingParams, SearchLidarParams};
use crate::nav::emitters::EmitterParams;
use crate::nav::estimator::{EstimatorMode, EstimatorParams};
use crate::nav::visual::VisualGeometry;
use crate::pilot_nav::{CameraConfig, CameraSlot, NavParams};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The whole pilot config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PilotParams {
    /// Vehicle identity used with the coordination service.
    pub vehicle: String,

    /// Candidate coordination service base URLs, probed in order.
    pub nav_service_urls: Vec<String>,

    pub cache_locations: CacheLocations,

    /// Camera altitude above the ground plane, inches.
    pub altitude: f64,

    pub lidar_enabled_positioning: bool,
    pub lidar_max_drift_degrees: f64,
    pub lidar_max_visual_dist_variance_pct: f64,

    pub lidar: LidarParams,

    pub min_object_confidence: f64,
    pub smoothing_cycles_per_image: usize,
    pub estimator_mode: EstimatorMode,

    pub save_positioning_images: bool,
    pub save_empty_positioning_images: bool,

    pub multithreaded_positioning: bool,

    pub vehicle_shape: VehicleShape,

    pub cameras: HashMap<String, CameraParams>,

    pub driving: DrivingParams,

    /// Candidate serial ports for the vehicle, tried in order.
    #[serde(default = "default_serial_ports")]
    pub serial_ports: Vec<String>,

    #[serde(default = "default_serial_baud")]
    pub serial_baud: u32,

    /// Command line of the external detector process; empty disables
    /// detection.
    #[serde(default)]
    pub detector_command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheLocations {
    pub maps: String,
    pub models: String,
    pub images: String,
}

/// The `Lidar` table: settings for the search action, distinct from the
/// positioning lidar settings at the top level.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LidarParams {
    pub enabled_search: bool,

    /// Maximum lidar frame age accepted from the vehicle, milliseconds.
    pub max_age: u64,

    pub max_drift_degrees: f64,
    pub max_visual_dist_variance_pct: f64,
}

/// Physical vehicle envelope, inches.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VehicleShape {
    pub height: f64,
    pub width: f64,
    pub length: f64,
}

/// One `Cameras.<id>` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CameraParams {
    pub enabled: bool,

    /// Capability table entry name, see [`camera_capability`].
    pub config: String,

    pub vehicle_base_id: usize,
    pub default_heading: f64,

    #[serde(default)]
    pub alternate_headings: Vec<f64>,
}

/// A pre-built optics entry referenced by `Cameras.<id>.Config`.
#[derive(Debug, Clone)]
pub struct CameraCapability {
    pub sensor: &'static str,
    pub geometry: VisualGeometry,
    pub flip: bool,

    /// Default focus distance, metres (1 / dioptres).
    pub focus_m: f64,

    pub barrel_distortion_at_edge: f64,
    pub emitter: EmitterParams,
}

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error(transparent)]
    Load(#[from] util::params::LoadError),

    #[error("Camera {camera} references unknown capability entry {config:?}")]
    UnknownCameraConfig { camera: String, config: String },

    #[error("No enabled cameras in the config")]
    NoCamerasEnabled,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PilotParams {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ParamsError> {
        Ok(util::params::load(path)?)
    }

    /// Camera slots for the navigator: every enabled camera joined with its
    /// capability entry, sorted by id for a stable turret order.
    pub fn camera_slots(&self) -> Result<Vec<CameraSlot>, ParamsError> {
        let mut slots = Vec::new();

        for (id, cam) in &self.cameras {
            if !cam.enabled {
                continue;
            }

            let capability = camera_capability(&cam.config).ok_or_else(|| {
                ParamsError::UnknownCameraConfig {
                    camera: id.clone(),
                    config: cam.config.clone(),
                }
            })?;

            slots.push(CameraSlot {
                id: id.clone(),
                config: CameraConfig {
                    geometry: capability.geometry,
                    vehicle_base_id: cam.vehicle_base_id,
                    default_heading: cam.default_heading,
                    alternate_headings: cam.alternate_headings.clone(),
                    emitter: capability.emitter,
                },
                current_heading: cam.default_heading,
            });
        }

        if slots.is_empty() {
            return Err(ParamsError::NoCamerasEnabled);
        }

        slots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(slots)
    }

    pub fn nav_params(&self) -> NavParams {
        NavParams {
            min_object_confidence: self.min_object_confidence,
            smoothing_cycles_per_image: self.smoothing_cycles_per_image,
            lidar_max_age_ms: self.lidar.max_age,
            save_positioning_images: self.save_positioning_images,
            save_empty_positioning_images: self.save_empty_positioning_images,
            preferred_confidence: self.driving.preferred_position_confidence,
            ..NavParams::default()
        }
    }

    pub fn estimator_params(&self) -> EstimatorParams {
        EstimatorParams {
            observer_altitude: self.altitude,
            lidar_enabled: self.lidar_enabled_positioning,
            max_lidar_drift_deg: self.lidar_max_drift_degrees,
            max_visual_variance: self.lidar_max_visual_dist_variance_pct,
            mode: self.estimator_mode,
            multithreaded: self.multithreaded_positioning,
            ..EstimatorParams::default()
        }
    }

    pub fn search_lidar_params(&self) -> SearchLidarParams {
        SearchLidarParams {
            enabled_search: self.lidar.enabled_search,
            max_drift_degrees: self.lidar.max_drift_degrees,
            max_visual_dist_variance_pct: self.lidar.max_visual_dist_variance_pct,
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn default_serial_ports() -> Vec<String> {
    vec![
        "/dev/ttyUSB0".to_string(),
        "/dev/ttyACM0".to_string(),
        "/dev/ttyAMA0".to_string(),
    ]
}

fn default_serial_baud() -> u32 {
    115_200
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// The built-in optics table. Entries pair a sensor with its field of view,
/// resolution, and the detection tuning that suits its distortion profile.
pub fn camera_capability(config: &str) -> Option<CameraCapability> {
    let standard_emitter = EmitterParams::default();
    let wide_emitter = EmitterParams {
        horizontal_leeway: 0.03,
        vertical_leeway: 0.1,
        barrel_distortion_at_edge: 0.18,
        ..EmitterParams::default()
    };

    match config {
        "standard" | "standard_flipped" => Some(CameraCapability {
            sensor: "imx219",
            geometry: VisualGeometry {
                fov_h_deg: 44.0,
                fov_v_deg: 27.333,
                view_w_px: 1280.0,
                view_h_px: 720.0,
            },
            flip: config.ends_with("_flipped"),
            focus_m: 4.0,
            barrel_distortion_at_edge: 0.1,
            emitter: EmitterParams {
                barrel_distortion_at_edge: 0.1,
                ..standard_emitter
            },
        }),
        "wide" | "wide_flipped" => Some(CameraCapability {
            sensor: "imx219_wide",
            geometry: VisualGeometry {
                fov_h_deg: 62.2,
                fov_v_deg: 48.8,
                view_w_px: 1640.0,
                view_h_px: 1232.0,
            },
            flip: config.ends_with("_flipped"),
            focus_m: 2.5,
            barrel_distortion_at_edge: 0.18,
            emitter: wide_emitter,
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn full_config() -> &'static str {
        r#"{
            "Vehicle": "rover_1",
            "NavServiceUrls": ["http://192.168.1.10:8146", "http://localhost:8146"],
            "CacheLocations": {
                "Maps": "/var/lib/pilot/maps",
                "Models": "/var/lib/pilot/models",
                "Images": "/var/lib/pilot/images"
            },
            "Altitude": 41.75,
            "LidarEnabledPositioning": true,
            "LidarMaxDriftDegrees": 1.5,
            "LidarMaxVisualDistVariancePct": 0.33,
            "Lidar": {
                "EnabledSearch": true,
                "MaxAge": 1000,
                "MaxDriftDegrees": 2.0,
                "MaxVisualDistVariancePct": 0.4
            },
            "MinObjectConfidence": 0.3,
            "SmoothingCyclesPerImage": 3,
            "EstimatorMode": "fast",
            "SavePositioningImages": false,
            "SaveEmptyPositioningImages": false,
            "MultithreadedPositioning": true,
            "VehicleShape": {"Height": 14.0, "Width": 12.0, "Length": 16.0},
            "Cameras": {
                "front": {
                    "Enabled": true,
                    "Config": "standard",
                    "VehicleBaseId": 0,
                    "DefaultHeading": 0.0,
                    "AlternateHeadings": [90.0, -90.0, 180.0]
                },
                "rear": {
                    "Enabled": false,
                    "Config": "wide",
                    "VehicleBaseId": 1,
                    "DefaultHeading": 180.0
                }
            },
            "Driving": {
                "GoSpeed": 0.5,
                "GoMaxLegs": 10,
                "GoCloseEnough": 6.0,
                "MaxDistancePerLeg": 0.25,
                "MaxLegAttempts": 3,
                "RecheckAfterRotation": true,
                "RotationDegreeAllowance": 4.0,
                "RotationMaxAttempts": 4,
                "MaxPositioningAdjustments": 3,
                "PreferredPositionConfidence": "medium"
            }
        }"#
    }

    #[test]
    fn test_full_config_parses() {
        let params: PilotParams = serde_json::from_str(full_config()).unwrap();

        assert_eq!(params.vehicle, "rover_1");
        assert_eq!(params.nav_service_urls.len(), 2);
        assert_eq!(params.estimator_mode, EstimatorMode::Fast);
        assert_eq!(params.lidar.max_age, 1000);
        assert!((params.driving.go_close_enough - 6.0).abs() < f64::EPSILON);
        assert_eq!(params.driving.go_max_legs, 10);

        // Keys absent from the file fall back to their defaults
        assert_eq!(params.serial_baud, 115_200);
        assert_eq!(params.serial_ports.len(), 3);
        assert!(params.detector_command.is_empty());
    }

    #[test]
    fn test_camera_slots_skip_disabled() {
        let params: PilotParams = serde_json::from_str(full_config()).unwrap();
        let slots = params.camera_slots().unwrap();

        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].id, "front");
        assert_eq!(slots[0].config.alternate_headings.len(), 3);
        assert!((slots[0].config.geometry.fov_h_deg - 44.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_camera_config_rejected() {
        let mut params: PilotParams = serde_json::from_str(full_config()).unwrap();
        if let Some(cam) = params.cameras.get_mut("front") {
            cam.config = "fisheye".into();
        }

        assert!(matches!(
            params.camera_slots(),
            Err(ParamsError::UnknownCameraConfig { .. })
        ));
    }

    #[test]
    fn test_capability_table() {
        let standard = camera_capability("standard").unwrap();
        assert!(!standard.flip);
        assert!((standard.geometry.view_w_px - 1280.0).abs() < f64::EPSILON);

        let flipped = camera_capability("wide_flipped").unwrap();
        assert!(flipped.flip);
        assert!(flipped.barrel_distortion_at_edge > standard.barrel_distortion_at_edge);

        assert!(camera_capability("telephoto").is_none());
    }
}
