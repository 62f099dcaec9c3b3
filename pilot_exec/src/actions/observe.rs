//! # Observation Actions
//!
//! Telemetry-producing actions: log a fresh position, log the lidar sweep,
//! and search for unmapped objects.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};

use field_if::wire::ShownObject;

use super::{localized_position, ActionCtx, ActionError, ActionOutcome};

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Force a fresh localization; the navigator ships the resulting fix to the
/// coordination service itself.
pub fn log_position(ctx: &mut ActionCtx) -> ActionOutcome {
    run_log_position(ctx).into()
}

/// Ship the current lidar sweep to the coordination service.
pub fn log_lidar(ctx: &mut ActionCtx) -> ActionOutcome {
    run_log_lidar(ctx).into()
}

/// Locate unmapped objects of the named types and report every hit.
pub fn search(ctx: &mut ActionCtx, objects: &[String], refresh_position: bool) -> ActionOutcome {
    run_search(ctx, objects, refresh_position).into()
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn run_log_position(ctx: &mut ActionCtx) -> Result<(), ActionError> {
    // A stale cached fix is not worth logging, so start over
    ctx.nav.invalidate_position();
    let fix = localized_position(ctx)?;
    info!(
        "Logged position ({:.1}, {:.1}) heading {:.1}",
        fix.x, fix.y, fix.heading_deg
    );
    Ok(())
}

fn run_log_lidar(ctx: &mut ActionCtx) -> Result<(), ActionError> {
    let client = ctx
        .client
        .ok_or_else(|| ActionError::AttemptsExhausted("No coordination service".into()))?;

    let samples = ctx
        .nav
        .lidar_snapshot(&mut *ctx.vehicle)
        .map(|map| map.samples().to_vec())
        .ok_or_else(|| ActionError::AttemptsExhausted("No lidar sweep available".into()))?;

    client.post_lidar(samples)?;
    Ok(())
}

fn run_search(
    ctx: &mut ActionCtx,
    objects: &[String],
    refresh_position: bool,
) -> Result<(), ActionError> {
    if refresh_position || ctx.nav.last_fix().is_none() {
        ctx.nav.invalidate_position();
        localized_position(ctx)?;
    }

    let hits = ctx.nav.search_objects(
        &mut *ctx.vehicle,
        objects,
        ctx.search_lidar.enabled_search,
        ctx.search_lidar.max_drift_degrees,
        ctx.search_lidar.max_visual_dist_variance_pct,
    )?;

    info!("Search found {} object(s) of {:?}", hits.len(), objects);

    if !hits.is_empty() {
        util::session::save_with_timestamp(
            "search/hits.json",
            hits.iter()
                .map(|h| {
                    serde_json::json!({
                        "type": h.object_type,
                        "x": h.x,
                        "y": h.y,
                        "distance": h.distance,
                        "confidence": h.confidence,
                        "is_lidar": h.is_lidar,
                    })
                })
                .collect::<Vec<_>>(),
        );
    }

    let shown: Vec<ShownObject> = hits
        .iter()
        .map(|hit| ShownObject {
            name: hit.object_type.clone(),
            dist_in: hit.distance,
            is_lidar: hit.is_lidar,
        })
        .collect();
    if let Err(e) = ctx.vehicle.display_objects(&shown) {
        warn!("Could not display search results: {}", e);
    }

    if let Some(client) = ctx.client {
        for hit in &hits {
            if let Err(e) = client.post_search_hit(hit) {
                // A lost record should not end the assignment
                warn!("Search hit upload failed: {}", e);
            }
        }
    }

    Ok(())
}
