//! # Pilot Library
//!
//! Navigation core for the autonomous ground vehicle: geometry and maps,
//! the landmark sighting pipeline, position estimation, path planning, the
//! action engine that turns assignments into motion, and the transports to
//! the vehicle and the coordination service.
//!
//! The `pilot_exec` binary wires these together; everything here is usable
//! (and tested) without hardware.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod actions;
pub mod detector;
pub mod nav;
pub mod params;
pub mod pilot_nav;
pub mod resources;
pub mod vehicle;
