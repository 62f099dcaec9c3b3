//! # Vehicle Interface
//!
//! The contract between the pilot and the embedded motion controller, plus
//! the serial transport that speaks it. Everything above this module talks
//! to the [`Vehicle`] trait only.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod serial;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use thiserror::Error;

use field_if::wire::{CameraRange, ConfigKey, ShownObject, WireError};

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum VehicleError {
    #[error("Serial I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not open any serial port (tried {0:?})")]
    NoPort(Vec<String>),

    #[error("Timed out waiting for the vehicle")]
    Timeout,

    #[error("Vehicle rejected the command with code {0}")]
    CommandFailed(i32),

    #[error("Unexpected message from the vehicle: {0}")]
    UnexpectedMessage(String),

    #[error(transparent)]
    Wire(#[from] WireError),
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Command-level view of the vehicle. Every call blocks until the vehicle
/// acknowledges or the transport times out.
pub trait Vehicle {
    /// Rotate the vehicle in place, right positive, degrees.
    fn rotate(&mut self, degrees: f64) -> Result<(), VehicleError>;

    /// Raw timed drive at a signed speed.
    fn go(&mut self, speed: f64, millis: u64) -> Result<(), VehicleError>;

    /// Drive forward a measured distance, inches.
    fn forward(&mut self, distance_in: f64, speed: f64) -> Result<(), VehicleError>;

    /// Drive backward a measured distance, inches.
    fn reverse(&mut self, distance_in: f64, speed: f64) -> Result<(), VehicleError>;

    fn stop(&mut self) -> Result<(), VehicleError>;

    /// Point the camera turret(s): `(rotation, tilt)` per camera base.
    fn look(&mut self, positions: &[(f64, f64)]) -> Result<(), VehicleError>;

    /// A full lidar frame no older than `max_age_ms`, raw millimetres.
    fn get_lidar(&mut self, max_age_ms: u64) -> Result<Vec<f64>, VehicleError>;

    /// One lidar measurement near a relative angle:
    /// `(angle_deg, distance_mm)`.
    fn measure(&mut self, angle_deg: f64, tolerance_deg: f64)
        -> Result<(f64, f64), VehicleError>;

    /// Search for a measurement near an expected distance.
    fn find_measurement(
        &mut self,
        angle_deg: f64,
        tolerance_deg: f64,
        expected_mm: f64,
        distance_tolerance_mm: f64,
        max_age_ms: u64,
    ) -> Result<(f64, f64), VehicleError>;

    fn get_config(&mut self, key: ConfigKey) -> Result<String, VehicleError>;

    fn get_cameras(&mut self) -> Result<Vec<CameraRange>, VehicleError>;

    // Display surface, all best-effort status output
    fn display_mode(&mut self, text: &str) -> Result<(), VehicleError>;
    fn display_status(&mut self, text: &str) -> Result<(), VehicleError>;
    fn display_command(&mut self, text: &str) -> Result<(), VehicleError>;
    fn display_position(&mut self, x: f64, y: f64, heading: f64) -> Result<(), VehicleError>;
    fn display_objects(&mut self, objects: &[ShownObject]) -> Result<(), VehicleError>;
}
