//! # Motion Actions
//!
//! Drive-to-position and the two facing actions. All motion goes leg by
//! leg: localize, plan, turn, drive, invalidate, repeat.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::atomic::Ordering;

use log::{debug, info, warn};

use crate::nav::lidar_map::LidarMap;
use crate::nav::path_finder;
use crate::nav::trig;

use super::{localized_position, ActionCtx, ActionError, ActionOutcome};

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Drive to `(x, y)` on the map, one planned leg at a time, re-localizing
/// after every leg. Fails with "No Path" when the planner finds nothing.
pub fn go_to_position(ctx: &mut ActionCtx, x: f64, y: f64) -> ActionOutcome {
    run_go_to_position(ctx, x, y).into()
}

/// Rotate in place until the vehicle heading is within the configured
/// allowance of `heading`.
pub fn face_heading(ctx: &mut ActionCtx, heading: f64) -> ActionOutcome {
    run_face_heading(ctx, heading).into()
}

/// Face the bearing from the current position to `(x, y)`.
pub fn face_position(ctx: &mut ActionCtx, x: f64, y: f64) -> ActionOutcome {
    run_face_position(ctx, x, y).into()
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn run_go_to_position(ctx: &mut ActionCtx, x: f64, y: f64) -> Result<(), ActionError> {
    let map_width = {
        let b = &ctx.nav.map().boundaries;
        b.xmax - b.xmin
    };
    let leg_cap = ctx.driving.max_distance_per_leg * map_width;

    for leg_num in 1..=ctx.driving.go_max_legs {
        if ctx.cancel.load(Ordering::Relaxed) {
            return Err(ActionError::Cancelled);
        }

        let pose = localized_position(ctx)?;
        let (_, direct_distance) = path_finder::find_direct_path(pose.x, pose.y, x, y);
        if direct_distance <= ctx.driving.go_close_enough {
            info!(
                "Arrived at ({:.1}, {:.1}), {:.1}in from target",
                pose.x, pose.y, direct_distance
            );
            return Ok(());
        }

        let lidar = ctx
            .nav
            .lidar_snapshot(&mut *ctx.vehicle)
            .cloned()
            .unwrap_or_else(|| LidarMap::from_raw(0.0, 1.0, &[]));

        let paths = path_finder::find_potential_paths(
            ctx.nav.map(),
            pose.x,
            pose.y,
            x,
            y,
            &lidar,
            pose.heading_deg,
            ctx.path_params,
        );

        let path = match paths.first() {
            Some(path) => path,
            None => return Err(ActionError::AttemptsExhausted("No Path".into())),
        };
        let first = &path.legs[0];
        let distance = first.distance.min(leg_cap);

        util::session::save_with_timestamp(
            "paths/path.json",
            serde_json::json!({
                "from": {"x": pose.x, "y": pose.y, "heading": pose.heading_deg},
                "target": {"x": x, "y": y},
                "legs": path
                    .legs
                    .iter()
                    .map(|l| serde_json::json!({
                        "heading": l.heading_deg,
                        "distance": l.distance,
                        "x": l.x,
                        "y": l.y,
                    }))
                    .collect::<Vec<_>>(),
            }),
        );

        info!(
            "Leg {} of {}: heading {:.1} for {:.1}in ({} leg path)",
            leg_num,
            ctx.driving.go_max_legs,
            first.heading_deg,
            distance,
            path.legs.len()
        );

        drive_leg(ctx, first.heading_deg, distance)?;
    }

    // Ran out of legs without getting close enough
    let pose = localized_position(ctx)?;
    let (_, remaining) = path_finder::find_direct_path(pose.x, pose.y, x, y);
    if remaining <= ctx.driving.go_close_enough {
        return Ok(());
    }

    Err(ActionError::AttemptsExhausted(format!(
        "Still {:.1}in from target after {} legs",
        remaining, ctx.driving.go_max_legs
    )))
}

/// Turn to the leg heading and drive its distance, retrying vehicle errors
/// up to the per-leg attempt cap.
fn drive_leg(ctx: &mut ActionCtx, heading: f64, distance: f64) -> Result<(), ActionError> {
    let mut attempt = 0;

    loop {
        attempt += 1;
        if ctx.cancel.load(Ordering::Relaxed) {
            return Err(ActionError::Cancelled);
        }

        let result = run_face_heading(ctx, heading).and_then(|_| {
            ctx.vehicle.forward(distance, ctx.driving.go_speed)?;
            ctx.nav.invalidate_position();
            Ok(())
        });

        match result {
            Ok(()) => return Ok(()),
            Err(ActionError::Cancelled) => return Err(ActionError::Cancelled),
            Err(e) if attempt < ctx.driving.max_leg_attempts => {
                warn!(
                    "Leg attempt {} of {} failed: {}",
                    attempt, ctx.driving.max_leg_attempts, e
                );
                // The vehicle may have part-moved, so nothing cached holds
                ctx.nav.invalidate_position();
            }
            Err(e) => return Err(e),
        }
    }
}

fn run_face_heading(ctx: &mut ActionCtx, target: f64) -> Result<(), ActionError> {
    for attempt in 1..=ctx.driving.rotation_max_attempts {
        if ctx.cancel.load(Ordering::Relaxed) {
            return Err(ActionError::Cancelled);
        }

        let pose = localized_position(ctx)?;
        let rotation = path_finder::find_rotation(pose.heading_deg, target);

        if rotation.abs() <= ctx.driving.rotation_degree_allowance {
            debug!(
                "Facing {:.1} (off by {:.1}) after {} attempts",
                target,
                rotation,
                attempt - 1
            );
            return Ok(());
        }

        ctx.vehicle.rotate(rotation)?;
        ctx.nav.invalidate_position();

        if !ctx.driving.recheck_after_rotation {
            return Ok(());
        }
    }

    Err(ActionError::AttemptsExhausted(format!(
        "Heading {:.1} not reached in {} rotations",
        target, ctx.driving.rotation_max_attempts
    )))
}

fn run_face_position(ctx: &mut ActionCtx, x: f64, y: f64) -> Result<(), ActionError> {
    let pose = localized_position(ctx)?;
    let bearing = trig::bearing(pose.x, pose.y, x, y);
    run_face_heading(ctx, bearing)
}
