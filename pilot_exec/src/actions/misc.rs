//! # Housekeeping Actions
//!
//! Random adjustment, controlled mode, and sleep.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use log::{info, warn};
use rand::Rng;

use super::{ActionCtx, ActionError, ActionOutcome, ControlEvent};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Poll interval while sleeping or waiting for control input.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Shift the vehicle a small random amount, to change the view after a
/// failed localization.
pub fn adjust_randomly(ctx: &mut ActionCtx) -> ActionOutcome {
    run_adjust_randomly(ctx).into()
}

/// Hand the vehicle to an external control source until it signals exit.
pub fn enter_controlled_mode(ctx: &mut ActionCtx) -> ActionOutcome {
    run_controlled_mode(ctx).into()
}

/// Wait the given number of seconds, staying responsive to cancellation.
pub fn sleep(ctx: &mut ActionCtx, seconds: f64) -> ActionOutcome {
    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));

    while Instant::now() < deadline {
        if ctx.cancel.load(Ordering::Relaxed) {
            return ActionOutcome::Cancelled;
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - Instant::now()));
    }

    ActionOutcome::Done
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn run_adjust_randomly(ctx: &mut ActionCtx) -> Result<(), ActionError> {
    let (direction, millis, rotation) = {
        let mut rng = rand::thread_rng();
        (
            if rng.gen_bool(0.5) { 1.0 } else { -1.0 },
            rng.gen_range(200..600u64),
            rng.gen_range(-20.0..20.0f64),
        )
    };

    info!(
        "Random adjustment: drive {}ms {} then rotate {:.1}",
        millis,
        if direction > 0.0 { "forward" } else { "backward" },
        rotation
    );

    ctx.vehicle.go(direction * ctx.driving.go_speed, millis)?;
    ctx.vehicle.rotate(rotation)?;
    ctx.nav.invalidate_position();
    Ok(())
}

fn run_controlled_mode(ctx: &mut ActionCtx) -> Result<(), ActionError> {
    let control = match ctx.control.as_deref_mut() {
        Some(control) => control,
        None => {
            return Err(ActionError::AttemptsExhausted(
                "No control input configured".into(),
            ))
        }
    };

    info!("Entering controlled mode");
    if let Err(e) = ctx.vehicle.display_mode("CONTROLLED") {
        warn!("Could not display mode: {}", e);
    }

    let result = loop {
        if ctx.cancel.load(Ordering::Relaxed) {
            let _ = ctx.vehicle.stop();
            break Err(ActionError::Cancelled);
        }

        match control.poll() {
            ControlEvent::Idle => std::thread::sleep(POLL_INTERVAL),
            ControlEvent::Drive { speed, millis } => ctx.vehicle.go(speed, millis)?,
            ControlEvent::Rotate { degrees } => ctx.vehicle.rotate(degrees)?,
            ControlEvent::Exit => break Ok(()),
        }
    };

    // Whatever happened in there, the pose is gone
    ctx.nav.invalidate_position();
    info!("Leaving controlled mode");
    if let Err(e) = ctx.vehicle.display_mode("AUTONOMOUS") {
        warn!("Could not display mode: {}", e);
    }

    result
}
