//! # Action Engine
//!
//! Assignment steps become [`Action`]s, each a small state machine over the
//! vehicle and the navigator. The engine sequences them, observing the
//! cancellation flag between steps and between retries; the states
//! themselves live inside each action's implementation.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod go_to;
pub mod misc;
pub mod observe;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use serde::Deserialize;
use thiserror::Error;

use field_if::service::{Assignment, AssignmentStep};

use crate::nav::path_finder::PathFinderParams;
use crate::nav::{Confidence, PositionFix};
use crate::pilot_nav::{NavError, PilotNav};
use crate::resources::{ServiceClient, ServiceError};
use crate::vehicle::{Vehicle, VehicleError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Driving limits and retry caps, from the `Driving` config table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DrivingParams {
    pub go_speed: f64,
    pub go_max_legs: usize,

    /// Distance to the target below which a GoToPosition is done, inches.
    pub go_close_enough: f64,

    /// Cap on a single leg, as a fraction of the map width.
    pub max_distance_per_leg: f64,

    pub max_leg_attempts: usize,
    pub recheck_after_rotation: bool,
    pub rotation_degree_allowance: f64,
    pub rotation_max_attempts: usize,
    pub max_positioning_adjustments: usize,
    pub preferred_position_confidence: Confidence,
}

/// Lidar settings for the search action, from the `Lidar` config table.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchLidarParams {
    pub enabled_search: bool,
    pub max_drift_degrees: f64,
    pub max_visual_dist_variance_pct: f64,
}

/// Everything an action may touch while it runs.
pub struct ActionCtx<'a> {
    pub vehicle: &'a mut dyn Vehicle,
    pub nav: &'a mut PilotNav,
    pub client: Option<&'a ServiceClient>,
    pub driving: &'a DrivingParams,
    pub search_lidar: SearchLidarParams,
    pub path_params: &'a PathFinderParams,
    pub cancel: &'a AtomicBool,
    pub control: Option<&'a mut dyn ControlInput>,
}

/// Sequences one assignment's steps.
pub struct ActionEngine {
    cancel: Arc<AtomicBool>,
}

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

/// The vehicle-independent action kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    GoToPosition { x: f64, y: f64 },
    FaceHeading { heading: f64 },
    FacePosition { x: f64, y: f64 },
    LogPosition,
    LogLidar,
    Search { objects: Vec<String>, refresh_position: bool },
    AdjustRandomly,
    EnterControlledMode,
    Sleep { seconds: f64 },
    Shutdown,
    DoNothing,
}

/// What one action execution came to.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Done,
    Failed(String),
    Cancelled,

    /// The vehicle must power off; the loop marks the assignment complete
    /// first.
    Shutdown,
}

/// What a whole assignment came to.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentResult {
    Completed,
    Failed { step: usize, reason: String },
    Cancelled,
    Shutdown,
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Unknown assignment command {0:?}")]
    UnknownCommand(String),

    #[error("Bad parameters for {command}: {reason}")]
    BadParams { command: String, reason: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Attempts exhausted: {0}")]
    AttemptsExhausted(String),

    #[error(transparent)]
    Vehicle(#[from] VehicleError),

    #[error(transparent)]
    Nav(#[from] NavError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// External input source for controlled mode.
pub trait ControlInput {
    fn poll(&mut self) -> ControlEvent;
}

/// One event from the control source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    Idle,
    Drive { speed: f64, millis: u64 },
    Rotate { degrees: f64 },
    Exit,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Action {
    /// Map an assignment step onto an action kind; unknown commands are
    /// rejected rather than skipped.
    pub fn from_step(step: &AssignmentStep) -> Result<Self, ActionError> {
        let p = &step.params;
        let bad = |reason: &str| ActionError::BadParams {
            command: step.command.clone(),
            reason: reason.into(),
        };

        match step.command.as_str() {
            "go_to_position" => Ok(Action::GoToPosition {
                x: num_param(p, "x").ok_or_else(|| bad("missing x"))?,
                y: num_param(p, "y").ok_or_else(|| bad("missing y"))?,
            }),
            "face_heading" => Ok(Action::FaceHeading {
                heading: num_param(p, "heading").ok_or_else(|| bad("missing heading"))?,
            }),
            "face_position" => Ok(Action::FacePosition {
                x: num_param(p, "x").ok_or_else(|| bad("missing x"))?,
                y: num_param(p, "y").ok_or_else(|| bad("missing y"))?,
            }),
            "log_position" => Ok(Action::LogPosition),
            "log_lidar" => Ok(Action::LogLidar),
            "search" => {
                let objects = p
                    .get("objects")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| bad("missing objects list"))?
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect();
                Ok(Action::Search {
                    objects,
                    refresh_position: p
                        .get("refresh_position")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                })
            }
            "adjust_randomly" => Ok(Action::AdjustRandomly),
            "enter_controlled_mode" => Ok(Action::EnterControlledMode),
            "sleep" => Ok(Action::Sleep {
                seconds: num_param(p, "seconds").ok_or_else(|| bad("missing seconds"))?,
            }),
            "shutdown" => Ok(Action::Shutdown),
            "do_nothing" => Ok(Action::DoNothing),
            other => Err(ActionError::UnknownCommand(other.into())),
        }
    }

    /// Whether running this action needs an initial position fix.
    pub fn needs_position(&self) -> bool {
        matches!(
            self,
            Action::GoToPosition { .. } | Action::FacePosition { .. }
        )
    }

    /// Short name for displays and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::GoToPosition { .. } => "GoToPosition",
            Action::FaceHeading { .. } => "FaceHeading",
            Action::FacePosition { .. } => "FacePosition",
            Action::LogPosition => "LogPosition",
            Action::LogLidar => "LogLidar",
            Action::Search { .. } => "Search",
            Action::AdjustRandomly => "AdjustRandomly",
            Action::EnterControlledMode => "EnterControlledMode",
            Action::Sleep { .. } => "Sleep",
            Action::Shutdown => "Shutdown",
            Action::DoNothing => "DoNothing",
        }
    }
}

impl From<Result<(), ActionError>> for ActionOutcome {
    fn from(result: Result<(), ActionError>) -> Self {
        match result {
            Ok(()) => ActionOutcome::Done,
            Err(ActionError::Cancelled) => ActionOutcome::Cancelled,
            Err(e) => ActionOutcome::Failed(e.to_string()),
        }
    }
}

impl Default for DrivingParams {
    fn default() -> Self {
        Self {
            go_speed: 0.5,
            go_max_legs: 10,
            go_close_enough: 6.0,
            max_distance_per_leg: 0.25,
            max_leg_attempts: 3,
            recheck_after_rotation: true,
            rotation_degree_allowance: 4.0,
            rotation_max_attempts: 4,
            max_positioning_adjustments: 3,
            preferred_position_confidence: Confidence::Medium,
        }
    }
}

impl Default for SearchLidarParams {
    fn default() -> Self {
        Self {
            enabled_search: true,
            max_drift_degrees: 1.5,
            max_visual_dist_variance_pct: 0.33,
        }
    }
}

impl ActionEngine {
    pub fn new(cancel: Arc<AtomicBool>) -> Self {
        Self { cancel }
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run one action to completion.
    pub fn execute(&self, action: &Action, ctx: &mut ActionCtx) -> ActionOutcome {
        if self.cancel.load(Ordering::Relaxed) {
            return ActionOutcome::Cancelled;
        }

        let _ = ctx.vehicle.display_command(action.name());

        match action {
            Action::GoToPosition { x, y } => go_to::go_to_position(ctx, *x, *y),
            Action::FaceHeading { heading } => go_to::face_heading(ctx, *heading),
            Action::FacePosition { x, y } => go_to::face_position(ctx, *x, *y),
            Action::LogPosition => observe::log_position(ctx),
            Action::LogLidar => observe::log_lidar(ctx),
            Action::Search {
                objects,
                refresh_position,
            } => observe::search(ctx, objects, *refresh_position),
            Action::AdjustRandomly => misc::adjust_randomly(ctx),
            Action::EnterControlledMode => misc::enter_controlled_mode(ctx),
            Action::Sleep { seconds } => misc::sleep(ctx, *seconds),
            Action::Shutdown => ActionOutcome::Shutdown,
            Action::DoNothing => ActionOutcome::Done,
        }
    }

    /// Run every step of an assignment in order. A step failure ends the
    /// assignment; the caller reports the result and moves on.
    pub fn run_assignment(&self, assignment: &Assignment, ctx: &mut ActionCtx) -> AssignmentResult {
        for (idx, step) in assignment.steps.iter().enumerate() {
            if self.cancel.load(Ordering::Relaxed) {
                return AssignmentResult::Cancelled;
            }

            let action = match Action::from_step(step) {
                Ok(action) => action,
                Err(e) => {
                    warn!("Step {} rejected: {}", idx, e);
                    return AssignmentResult::Failed {
                        step: idx,
                        reason: e.to_string(),
                    };
                }
            };

            info!("Step {}: {}", idx, action.name());
            match self.execute(&action, ctx) {
                ActionOutcome::Done => {}
                ActionOutcome::Failed(reason) => {
                    let _ = ctx.vehicle.display_status(&reason);
                    return AssignmentResult::Failed { step: idx, reason };
                }
                ActionOutcome::Cancelled => return AssignmentResult::Cancelled,
                ActionOutcome::Shutdown => return AssignmentResult::Shutdown,
            }
        }

        AssignmentResult::Completed
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Localize with the adjust-and-retry ladder: when the navigator cannot
/// produce a fix, jiggle the vehicle and try again up to the configured
/// adjustment cap.
pub fn localized_position(ctx: &mut ActionCtx) -> Result<PositionFix, ActionError> {
    let mut adjustments = 0;

    loop {
        if ctx.cancel.load(Ordering::Relaxed) {
            return Err(ActionError::Cancelled);
        }

        match ctx.nav.get_position(ctx.vehicle, 2, true, true) {
            Ok(fix) => return Ok(fix),
            Err(NavError::NoPosition) if adjustments < ctx.driving.max_positioning_adjustments =>
            {
                adjustments += 1;
                warn!(
                    "Localization failed, random adjustment {} of {}",
                    adjustments, ctx.driving.max_positioning_adjustments
                );
                if let ActionOutcome::Failed(reason) = misc::adjust_randomly(ctx) {
                    warn!("Adjustment failed: {}", reason);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn num_param(params: &serde_json::Value, key: &str) -> Option<f64> {
    params.get(key).and_then(|v| v.as_f64())
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn step(command: &str, params: serde_json::Value) -> AssignmentStep {
        AssignmentStep {
            command: command.into(),
            params,
        }
    }

    #[test]
    fn test_step_parsing() {
        assert_eq!(
            Action::from_step(&step("go_to_position", json!({"x": 10.0, "y": -5.0}))).unwrap(),
            Action::GoToPosition { x: 10.0, y: -5.0 }
        );
        assert_eq!(
            Action::from_step(&step("face_heading", json!({"heading": 90}))).unwrap(),
            Action::FaceHeading { heading: 90.0 }
        );
        assert_eq!(
            Action::from_step(&step("log_position", json!(null))).unwrap(),
            Action::LogPosition
        );
        assert_eq!(
            Action::from_step(&step(
                "search",
                json!({"objects": ["cone", "ball"], "refresh_position": true})
            ))
            .unwrap(),
            Action::Search {
                objects: vec!["cone".into(), "ball".into()],
                refresh_position: true
            }
        );
        assert_eq!(
            Action::from_step(&step("sleep", json!({"seconds": 2.5}))).unwrap(),
            Action::Sleep { seconds: 2.5 }
        );
    }

    #[test]
    fn test_step_parsing_rejects_bad_input() {
        assert!(matches!(
            Action::from_step(&step("warp", json!(null))),
            Err(ActionError::UnknownCommand(_))
        ));
        assert!(matches!(
            Action::from_step(&step("go_to_position", json!({"x": 1.0}))),
            Err(ActionError::BadParams { .. })
        ));
        assert!(matches!(
            Action::from_step(&step("search", json!(null))),
            Err(ActionError::BadParams { .. })
        ));
    }

    #[test]
    fn test_needs_position() {
        assert!(Action::GoToPosition { x: 0.0, y: 0.0 }.needs_position());
        assert!(Action::FacePosition { x: 0.0, y: 0.0 }.needs_position());
        assert!(!Action::FaceHeading { heading: 0.0 }.needs_position());
        assert!(!Action::LogPosition.needs_position());
        assert!(!Action::Shutdown.needs_position());
    }
}
