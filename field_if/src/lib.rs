//! # Field Interfaces Crate
//!
//! This crate defines the two external interfaces of the pilot software:
//!
//! - [`wire`] - the line-oriented ASCII protocol spoken by the vehicle's
//!   embedded motion controller.
//! - [`service`] - the JSON records exchanged with the remote coordination
//!   service (assignments, maps, models, telemetry).

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod service;
pub mod wire;
