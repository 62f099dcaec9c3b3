//! Pilot executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise session, logging, config, transports
//!     - Main loop:
//!         - Poll the coordination service for assignments
//!         - For each assignment:
//!             - Resolve the map (cache or service)
//!             - Localize if any step needs a position
//!             - Run the steps through the action engine
//!             - Report completion
//!         - Idle between polls
//!
//! Ctrl-C raises the cancellation flag; the engine observes it between
//! steps and retries, and the loop exits cleanly.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{error, info, warn};

// Internal
use pilot_lib::{
    actions::{Action, ActionCtx, ActionEngine, AssignmentResult},
    detector::{ChildDetector, NullDetector, SharedDetector},
    nav::estimator::{worker, Estimator},
    nav::field_map::FieldMap,
    nav::path_finder::PathFinderParams,
    params::PilotParams,
    pilot_nav::PilotNav,
    resources::{ResourceCache, ServiceClient},
    vehicle::serial::SerialVehicle,
    vehicle::Vehicle,
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Wait between assignment polls when the queue is empty.
const IDLE_POLL_PERIOD: Duration = Duration::from_secs(3);

/// Timestamp format for the service session id.
const SESSION_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    color_eyre::install()?;

    let session = Session::new("pilot_exec", "sessions")
        .wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Debug, &session)
        .wrap_err("Failed to initialise logging")?;

    info!("Field Pilot Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- CANCELLATION ----

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            cancel.store(true, Ordering::Relaxed);
        })
        .wrap_err("Failed to install the interrupt handler")?;
    }

    // ---- LOAD PARAMETERS ----

    let params_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| String::from("pilot_params.json"));

    let params = PilotParams::load(&params_path)
        .wrap_err_with(|| format!("Could not load pilot params from {:?}", params_path))?;

    info!("Pilot parameters loaded from {:?}", params_path);

    // ---- RUN ----

    let result = run(&params, &cancel);

    worker::shutdown_global();
    session.exit();

    result
}

/// Everything after initialisation; split out so the session and worker
/// pool always wind down.
fn run(params: &PilotParams, cancel: &Arc<AtomicBool>) -> Result<(), Report> {
    // ---- TRANSPORTS ----

    let session_id = util::session::get_epoch()
        .format(SESSION_ID_FORMAT)
        .to_string();

    let client = ServiceClient::discover(&params.nav_service_urls, &params.vehicle, &session_id)
        .wrap_err("No coordination service reachable")?;

    let cache = ResourceCache::new(
        &params.cache_locations.maps,
        &params.cache_locations.models,
        &params.cache_locations.images,
    )
    .wrap_err("Could not set up the resource cache")?;

    let mut vehicle = SerialVehicle::connect(&params.serial_ports, params.serial_baud)
        .wrap_err("Could not reach the vehicle")?;

    let detector = if params.detector_command.is_empty() {
        warn!("No detector configured, running without vision");
        SharedDetector::new(Box::new(NullDetector))
    } else {
        ChildDetector::spawn(&params.detector_command)
            .wrap_err("Could not start the detector")?
            .into_shared()
    };

    // ---- ENGINE ----

    let engine = ActionEngine::new(cancel.clone());
    let driving = params.driving.clone();
    let search_lidar = params.search_lidar_params();
    let path_params = PathFinderParams {
        vehicle_width: params.vehicle_shape.width,
        vehicle_length: params.vehicle_shape.length,
        desired_paths: 2,
    };

    let camera_slots = params.camera_slots().wrap_err("Bad camera config")?;
    info!("{} camera(s) enabled", camera_slots.len());

    let _ = vehicle.display_mode("AUTONOMOUS");

    // Navigator for the map of the current assignment, rebuilt on map change
    let mut nav: Option<PilotNav> = None;

    // ---- MAIN LOOP ----

    'outer: while !cancel.load(Ordering::Relaxed) {
        let entries = match client.fetch_assignments() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Assignment poll failed: {}", e);
                idle_wait(cancel, IDLE_POLL_PERIOD);
                continue;
            }
        };

        if entries.is_empty() {
            idle_wait(cancel, IDLE_POLL_PERIOD);
            continue;
        }

        for entry in entries {
            if cancel.load(Ordering::Relaxed) {
                break 'outer;
            }

            info!(
                "Assignment {} on map {:?}: {} step(s)",
                entry.entry_num,
                entry.assignment.map_id,
                entry.assignment.steps.len()
            );

            // Rebuild the navigator when the assignment is on a new map
            let rebuild = !matches!(&nav, Some(n) if n.map_id() == entry.assignment.map_id);
            if rebuild {
                match build_nav(params, &cache, &client, &detector, &camera_slots, &entry.assignment.map_id) {
                    Ok(n) => nav = Some(n),
                    Err(e) => {
                        error!(
                            "Could not prepare map {:?}: {}",
                            entry.assignment.map_id, e
                        );
                        continue;
                    }
                }
            }
            let nav = match nav.as_mut() {
                Some(nav) => nav,
                None => continue,
            };

            let mut ctx = ActionCtx {
                vehicle: &mut vehicle,
                nav,
                client: Some(&client),
                driving: &driving,
                search_lidar,
                path_params: &path_params,
                cancel: cancel.as_ref(),
                control: None,
            };

            // Warm up a fix when any step will need one
            let needs_position = entry
                .assignment
                .steps
                .iter()
                .filter_map(|s| Action::from_step(s).ok())
                .any(|a| a.needs_position());
            if needs_position {
                if let Err(e) = ctx.nav.get_position(&mut *ctx.vehicle, 2, true, true) {
                    warn!("Initial localization failed: {}", e);
                }
            }

            match engine.run_assignment(&entry.assignment, &mut ctx) {
                AssignmentResult::Completed => {
                    info!("Assignment {} completed", entry.entry_num);
                    if let Err(e) = client.mark_complete(entry.entry_num) {
                        warn!("Could not mark assignment complete: {}", e);
                    }
                }
                AssignmentResult::Failed { step, reason } => {
                    warn!(
                        "Assignment {} failed at step {}: {}",
                        entry.entry_num, step, reason
                    );
                    if let Err(e) = client.mark_complete(entry.entry_num) {
                        warn!("Could not mark assignment complete: {}", e);
                    }
                }
                AssignmentResult::Cancelled => break 'outer,
                AssignmentResult::Shutdown => {
                    info!("Shutdown requested by assignment {}", entry.entry_num);
                    if let Err(e) = client.mark_complete(entry.entry_num) {
                        warn!("Could not mark assignment complete: {}", e);
                    }
                    let _ = vehicle.stop();
                    let _ = vehicle.display_status("SHUTDOWN");
                    power_off()?;
                    return Ok(());
                }
            }
        }
    }

    info!("Pilot stopping");
    let _ = vehicle.stop();
    Ok(())
}

/// Build the navigator for one map: resolve the map JSON through the cache,
/// then wire the estimator, cameras, detector, and telemetry sink together.
fn build_nav(
    params: &PilotParams,
    cache: &ResourceCache,
    client: &ServiceClient,
    detector: &SharedDetector,
    camera_slots: &[pilot_lib::pilot_nav::CameraSlot],
    map_id: &str,
) -> Result<PilotNav, Report> {
    let map_json = cache
        .map_json(map_id, Some(client))
        .wrap_err_with(|| format!("Map {:?} unavailable", map_id))?;
    let map = Arc::new(
        FieldMap::from_json(&map_json)
            .map_err(|e| eyre!("Map {:?} did not parse: {}", map_id, e))?,
    );

    let estimator = Estimator::new(map.clone(), params.estimator_params());

    Ok(PilotNav::new(
        map,
        map_id,
        estimator,
        camera_slots.to_vec(),
        Box::new(detector.clone()),
        params.nav_params(),
        Some(Box::new(client.clone())),
    ))
}

/// Sleep in short slices so cancellation stays responsive.
fn idle_wait(cancel: &Arc<AtomicBool>, period: Duration) {
    let deadline = Instant::now() + period;
    while Instant::now() < deadline && !cancel.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }
}

/// Ask the OS to power down. Failure is reported, not fatal; the loop has
/// already stopped.
fn power_off() -> Result<(), Report> {
    info!("Powering off");
    match std::process::Command::new("poweroff").status() {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => {
            warn!("poweroff exited with {}", status);
            Ok(())
        }
        Err(e) => {
            warn!("Could not invoke poweroff: {}", e);
            Ok(())
        }
    }
}
