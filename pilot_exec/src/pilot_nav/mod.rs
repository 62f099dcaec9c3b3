//! # Pilot Navigation
//!
//! Owns the cameras, the detector, the per-camera aggregation pipelines, the
//! lidar snapshot, and the last-fix cache, and orchestrates them into
//! position fixes. The action engine talks to this module and to the vehicle
//! trait, never to the estimator directly.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::nav::aggregator::{Aggregator, AggregatorParams};
use crate::nav::emitters::{self, EmitterBox, EmitterParams};
use crate::nav::estimator::{Estimator, SightingGroup};
use crate::nav::field_map::FieldMap;
use crate::nav::lidar_map::LidarMap;
use crate::nav::visual::VisualGeometry;
use crate::nav::{trig, Confidence, PositionFix, Sighting};
use crate::vehicle::{Vehicle, VehicleError};

use field_if::wire::ConfigKey;
use util::time::duration_to_seconds;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One detection from the recognition model.
#[derive(Debug, Clone)]
pub struct Detection {
    pub model: String,
    pub object_type: String,
    pub pattern: String,
    pub confidence: f64,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// Everything one detector invocation produced.
#[derive(Debug, Clone)]
pub struct DetectionFrame {
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<Detection>,

    /// The captured frame, PNG bytes, when image capture is enabled.
    pub image_png: Option<Vec<u8>>,
}

/// A camera slot in the arena: fixed config plus where it points now.
#[derive(Debug, Clone)]
pub struct CameraSlot {
    pub id: String,
    pub config: CameraConfig,
    pub current_heading: f64,
}

/// Per-camera configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub geometry: VisualGeometry,

    /// Index of the vehicle turret this camera rides on.
    pub vehicle_base_id: usize,

    pub default_heading: f64,
    pub alternate_headings: Vec<f64>,

    pub emitter: EmitterParams,
}

/// Navigation tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct NavParams {
    pub max_location_attempts: usize,

    /// Fixes below MEDIUM confidence needed before one is accepted anyway.
    pub min_location_success: usize,

    pub min_object_confidence: f64,

    /// Detection cycles fed to the aggregator per camera position.
    pub smoothing_cycles_per_image: usize,

    pub lidar_max_age_ms: u64,

    /// Lidar snapshot lifetime while stationary, seconds.
    pub lidar_ttl_s: f64,

    pub save_positioning_images: bool,
    pub save_empty_positioning_images: bool,

    /// Confidence at which a fix is accepted without corroboration.
    pub preferred_confidence: Confidence,
}

/// An unmapped object located by the search action.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub object_type: String,
    pub x: f64,
    pub y: f64,
    pub distance: f64,
    pub confidence: f64,
    pub is_lidar: bool,
    pub image_png: Option<Vec<u8>>,
}

/// Lidar mounting parameters, read from the vehicle once.
#[derive(Debug, Clone, Copy)]
struct LidarConfig {
    offset_deg: f64,
    granularity_deg: f64,
}

/// The navigator.
pub struct PilotNav {
    map: Arc<FieldMap>,
    map_id: String,
    estimator: Estimator,
    cameras: Vec<CameraSlot>,
    detector: Box<dyn Detector>,
    aggregators: HashMap<String, Aggregator>,
    params: NavParams,
    sink: Option<Box<dyn PositionSink>>,

    lidar_config: Option<LidarConfig>,
    lidar_snapshot: Option<(LidarMap, DateTime<Utc>)>,
    last_fix: Option<PositionFix>,
}

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum NavError {
    #[error("Could not determine a position")]
    NoPosition,

    #[error("A position is required but none is available")]
    PositionRequired,

    #[error(transparent)]
    Vehicle(#[from] VehicleError),
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// The object-detection seam. One call captures one frame on the named
/// camera and runs the recognition models over it.
pub trait Detector {
    fn detect(&mut self, camera_id: &str) -> color_eyre::eyre::Result<DetectionFrame>;
}

/// Where successful fixes are shipped. Implementations must not block
/// control flow on failure; the navigator logs and swallows errors.
pub trait PositionSink {
    fn push_fix(
        &self,
        map_id: &str,
        fix: &PositionFix,
        images: &[(String, Vec<u8>)],
    ) -> color_eyre::eyre::Result<()>;
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for NavParams {
    fn default() -> Self {
        Self {
            max_location_attempts: 3,
            min_location_success: 2,
            min_object_confidence: 0.3,
            smoothing_cycles_per_image: 3,
            lidar_max_age_ms: 1000,
            lidar_ttl_s: 600.0,
            save_positioning_images: false,
            save_empty_positioning_images: false,
            preferred_confidence: Confidence::Medium,
        }
    }
}

impl PilotNav {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        map: Arc<FieldMap>,
        map_id: &str,
        estimator: Estimator,
        cameras: Vec<CameraSlot>,
        detector: Box<dyn Detector>,
        params: NavParams,
        sink: Option<Box<dyn PositionSink>>,
    ) -> Self {
        let aggregators = cameras
            .iter()
            .map(|c| (c.id.clone(), Aggregator::new(AggregatorParams::default())))
            .collect();

        Self {
            map,
            map_id: map_id.to_string(),
            estimator,
            cameras,
            detector,
            aggregators,
            params,
            sink,
            lidar_config: None,
            lidar_snapshot: None,
            last_fix: None,
        }
    }

    pub fn map(&self) -> &Arc<FieldMap> {
        &self.map
    }

    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    pub fn last_fix(&self) -> Option<&PositionFix> {
        self.last_fix.as_ref()
    }

    /// Drop everything position-dependent. Must be called after any
    /// physical movement.
    pub fn invalidate_position(&mut self) {
        self.lidar_snapshot = None;
        self.last_fix = None;
        for aggregator in self.aggregators.values_mut() {
            aggregator.clear();
        }
    }

    /// The cached lidar sweep, refreshed from the vehicle when missing or
    /// older than the TTL. `None` when the vehicle cannot produce one.
    pub fn lidar_snapshot(&mut self, vehicle: &mut dyn Vehicle) -> Option<&LidarMap> {
        let now = Utc::now();

        let stale = match &self.lidar_snapshot {
            Some((_, taken)) => duration_to_seconds(now - *taken)
                .map(|age| age > self.params.lidar_ttl_s)
                .unwrap_or(true),
            None => true,
        };

        if stale {
            match self.fetch_lidar(vehicle) {
                Ok(map) => self.lidar_snapshot = Some((map, now)),
                Err(e) => {
                    warn!("Lidar refresh failed: {}", e);
                    self.lidar_snapshot = None;
                }
            }
        }

        self.lidar_snapshot.as_ref().map(|(map, _)| map)
    }

    fn fetch_lidar(&mut self, vehicle: &mut dyn Vehicle) -> Result<LidarMap, VehicleError> {
        let config = match self.lidar_config {
            Some(c) => c,
            None => {
                let offset_deg = vehicle
                    .get_config(ConfigKey::LidarHeading)?
                    .trim()
                    .parse::<f64>()
                    .unwrap_or(0.0);
                let granularity_deg = vehicle
                    .get_config(ConfigKey::LidarGranularity)?
                    .trim()
                    .parse::<f64>()
                    .unwrap_or(1.0);
                let config = LidarConfig {
                    offset_deg,
                    granularity_deg,
                };
                self.lidar_config = Some(config);
                config
            }
        };

        let raw = vehicle.get_lidar(self.params.lidar_max_age_ms)?;
        Ok(LidarMap::from_raw(
            config.offset_deg,
            config.granularity_deg,
            &raw,
        ))
    }

    /// Localize the vehicle.
    ///
    /// Cameras sweep their default and alternate headings until the mode's
    /// preferred number of distinct landmarks is in view (or positions run
    /// out), then the estimator runs over everything collected. A fix at
    /// MEDIUM confidence or better wins immediately; weaker fixes are
    /// accepted once enough of them agree in sequence.
    pub fn get_position(
        &mut self,
        vehicle: &mut dyn Vehicle,
        min_landmarks: usize,
        allow_camera_reposition: bool,
        start_at_default: bool,
    ) -> Result<PositionFix, NavError> {
        let preferred = self
            .estimator
            .params()
            .mode
            .preferred_landmarks()
            .max(min_landmarks);

        if start_at_default {
            self.point_cameras(vehicle, 0)?;
        }

        let mut weak_fixes = 0usize;
        let mut latest: Option<PositionFix> = None;
        let mut images: Vec<(String, Vec<u8>)> = Vec::new();

        for attempt in 1..=self.params.max_location_attempts {
            let mut groups: Vec<SightingGroup> = Vec::new();
            let mut seen: Vec<String> = Vec::new();
            images.clear();

            let mut position_idx = 0;
            loop {
                for cam_idx in 0..self.cameras.len() {
                    let (group, image) = self.detect_on_camera(cam_idx);
                    for s in &group.sightings {
                        if !seen.contains(&s.landmark_id) {
                            seen.push(s.landmark_id.clone());
                        }
                    }
                    if !group.sightings.is_empty() || self.params.save_empty_positioning_images
                    {
                        if let Some(png) = image {
                            images.push((self.cameras[cam_idx].id.clone(), png));
                        }
                    }
                    groups.push(group);
                }

                if seen.len() >= preferred {
                    break;
                }
                if !allow_camera_reposition || position_idx + 1 >= self.position_count() {
                    break;
                }
                position_idx += 1;
                self.point_cameras(vehicle, position_idx)?;
            }

            if seen.len() < min_landmarks {
                debug!(
                    "Attempt {}: only {} landmarks in view",
                    attempt,
                    seen.len()
                );
                continue;
            }

            let lidar = self.lidar_snapshot(vehicle).cloned();
            let fix = self
                .estimator
                .estimate(&groups, lidar.as_ref(), Utc::now());

            if let Some(fix) = fix {
                info!(
                    "Fix attempt {}: ({:.1}, {:.1}) heading {:.1} confidence {}",
                    attempt, fix.x, fix.y, fix.heading_deg, fix.confidence
                );

                let good = fix.confidence >= self.params.preferred_confidence;
                weak_fixes += 1;
                latest = Some(fix);

                if good || weak_fixes >= self.params.min_location_success {
                    break;
                }
            }
        }

        let fix = latest.ok_or(NavError::NoPosition)?;
        self.last_fix = Some(fix.clone());
        let images = std::mem::take(&mut images);
        self.publish_fix(vehicle, &fix, &images);
        Ok(fix)
    }

    /// Locate unmapped objects of the named types from the current pose.
    pub fn search_objects(
        &mut self,
        vehicle: &mut dyn Vehicle,
        object_types: &[String],
        lidar_enabled: bool,
        max_lidar_drift_deg: f64,
        max_visual_variance: f64,
    ) -> Result<Vec<SearchHit>, NavError> {
        let pose = self.last_fix.clone().ok_or(NavError::PositionRequired)?;
        let altitude = self.estimator.params().observer_altitude;
        let base_front = self.estimator.params().base_front;

        let lidar = if lidar_enabled {
            self.lidar_snapshot(vehicle).cloned()
        } else {
            None
        };

        let mut hits = Vec::new();

        for cam_idx in 0..self.cameras.len() {
            let camera = self.cameras[cam_idx].clone();
            let frame = match self.detector.detect(&camera.id) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Search detection on {} failed: {}", camera.id, e);
                    continue;
                }
            };

            for det in &frame.detections {
                if !object_types.contains(&det.object_type) {
                    continue;
                }
                let search = match self.map.search.get(&det.object_type) {
                    Some(s) => s,
                    None => continue,
                };
                if det.confidence < search.confidence.max(self.params.min_object_confidence)
                {
                    continue;
                }

                let g = &camera.config.geometry;
                let cx = (det.x1 + det.x2) / 2.0;
                let height_deg = g.px_to_deg_v((det.y2 - det.y1).abs());

                // Ground objects stand on the field, centre at half height
                let triple = match g.height_distances(
                    height_deg,
                    search.height,
                    search.height / 2.0,
                    altitude,
                ) {
                    Ok(t) => t,
                    Err(e) => {
                        debug!("Unusable search detection: {}", e);
                        continue;
                    }
                };

                let rel = camera.current_heading - base_front + g.relative_degrees(cx);

                let mut distance = triple.ground;
                let mut is_lidar = false;
                if search.lidar_visible {
                    if let Some(lidar) = &lidar {
                        let angle = util::maths::rem_euclid(rel, 360.0);
                        if let Some(reading) = lidar.get_measurement(angle, max_lidar_drift_deg)
                        {
                            if (reading - triple.ground).abs() / reading <= max_visual_variance
                            {
                                distance = reading;
                                is_lidar = true;
                            }
                        }
                    }
                }

                let direction = trig::normalize_heading(pose.heading_deg + rel);
                let (x, y) = trig::translate(pose.x, pose.y, direction, distance, true);

                hits.push(SearchHit {
                    object_type: det.object_type.clone(),
                    x,
                    y,
                    distance,
                    confidence: det.confidence,
                    is_lidar,
                    image_png: frame.image_png.clone(),
                });
            }
        }

        Ok(hits)
    }

    /// One camera's aggregated sightings for the current position, running
    /// the configured number of detection cycles through its pipeline.
    fn detect_on_camera(&mut self, cam_idx: usize) -> (SightingGroup, Option<Vec<u8>>) {
        let camera = self.cameras[cam_idx].clone();
        let mut smoothed = Vec::new();
        let mut image = None;

        for _ in 0..self.params.smoothing_cycles_per_image.max(1) {
            let frame = match self.detector.detect(&camera.id) {
                Ok(frame) => frame,
                Err(e) => {
                    // One bad frame is survivable, the cache rides it out
                    warn!("Detection on {} failed: {}", camera.id, e);
                    continue;
                }
            };

            if self.params.save_positioning_images && frame.image_png.is_some() {
                image = frame.image_png.clone();
            }

            let raw = frame_to_sightings(
                &frame,
                camera.current_heading,
                &camera.config,
                &self.map,
                self.params.min_object_confidence,
            );

            if let Some(aggregator) = self.aggregators.get_mut(&camera.id) {
                smoothed = aggregator.aggregate(raw, frame.timestamp);
            }
        }

        (
            SightingGroup {
                geometry: camera.config.geometry,
                sightings: smoothed,
            },
            image,
        )
    }

    /// Rotate every camera to its heading for the given position index
    /// (0 = default, 1.. = alternates) with one Look command.
    fn point_cameras(
        &mut self,
        vehicle: &mut dyn Vehicle,
        position_idx: usize,
    ) -> Result<(), VehicleError> {
        let mut positions: Vec<(f64, f64)> = Vec::new();

        for camera in self.cameras.iter_mut() {
            let heading = if position_idx == 0 {
                camera.config.default_heading
            } else {
                *camera
                    .config
                    .alternate_headings
                    .get(position_idx - 1)
                    .unwrap_or(&camera.config.default_heading)
            };
            camera.current_heading = heading;
            positions.push((heading, 0.0));
        }

        vehicle.look(&positions)
    }

    /// Camera positions available: default plus the longest alternate list.
    fn position_count(&self) -> usize {
        1 + self
            .cameras
            .iter()
            .map(|c| c.config.alternate_headings.len())
            .max()
            .unwrap_or(0)
    }

    /// Best-effort telemetry and display of a fix; failures are logged and
    /// swallowed.
    fn publish_fix(
        &mut self,
        vehicle: &mut dyn Vehicle,
        fix: &PositionFix,
        images: &[(String, Vec<u8>)],
    ) {
        if let Err(e) = vehicle.display_position(fix.x, fix.y, fix.heading_deg) {
            debug!("Could not display position: {}", e);
        }

        util::session::save_with_timestamp(
            "fixes/fix.json",
            serde_json::json!({
                "x": fix.x,
                "y": fix.y,
                "heading": fix.heading_deg,
                "confidence": fix.confidence.to_string(),
                "occurred": field_if::service::format_timestamp(fix.timestamp),
                "basis": fix.basis,
            }),
        );

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.push_fix(&self.map_id, fix, images) {
                warn!("Position telemetry failed: {}", e);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert one detection frame into landmark sightings: plain detections map
/// straight through the `(model, type, pattern)` table, emitter detections
/// are first grouped into light patterns.
pub fn frame_to_sightings(
    frame: &DetectionFrame,
    camera_heading: f64,
    config: &CameraConfig,
    map: &FieldMap,
    min_confidence: f64,
) -> Vec<Sighting> {
    let mut sightings = Vec::new();
    let mut emitters_by_model: HashMap<&str, Vec<EmitterBox>> = HashMap::new();

    for det in &frame.detections {
        if det.object_type == "emitter" {
            emitters_by_model
                .entry(det.model.as_str())
                .or_insert_with(Vec::new)
                .push(EmitterBox {
                    x1: det.x1,
                    y1: det.y1,
                    x2: det.x2,
                    y2: det.y2,
                    confidence: det.confidence,
                });
            continue;
        }

        if let Some(sighting) = lookup_sighting(
            map,
            &det.model,
            &det.object_type,
            &det.pattern,
            det.x1,
            det.y1,
            det.x2,
            det.y2,
            det.confidence,
            None,
            frame.timestamp,
            camera_heading,
            min_confidence,
        ) {
            sightings.push(sighting);
        }
    }

    for (model, boxes) in emitters_by_model {
        let groups = emitters::find_groups(
            &boxes,
            &config.emitter,
            config.geometry.view_w_px,
            config.geometry.view_h_px,
        );

        for group in groups {
            if let Some(sighting) = lookup_sighting(
                map,
                model,
                "light",
                &group.pattern.code(),
                group.x1,
                group.y1,
                group.x2,
                group.y2,
                group.confidence,
                Some(group.corrected_height),
                frame.timestamp,
                camera_heading,
                min_confidence,
            ) {
                sightings.push(sighting);
            }
        }
    }

    sightings
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn lookup_sighting(
    map: &FieldMap,
    model: &str,
    object_type: &str,
    pattern: &str,
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    confidence: f64,
    corrected_height: Option<f64>,
    timestamp: DateTime<Utc>,
    camera_heading: f64,
    min_confidence: f64,
) -> Option<Sighting> {
    let id = map.landmark_for(model, object_type, pattern)?;
    let lm = map.landmark(id)?;

    if confidence < lm.confidence.max(min_confidence) {
        return None;
    }

    Some(
        Sighting {
            landmark_id: id.to_string(),
            x1,
            y1,
            x2,
            y2,
            confidence,
            timestamp,
            camera_heading,
            corrected_height,
        }
        .normalized(),
    )
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn test_map() -> FieldMap {
        FieldMap::from_json(
            r#"{
                "shape": "rectangle",
                "boundaries": {"xmin": -1000, "ymin": -1000, "xmax": 1000, "ymax": 1000},
                "near_boundaries": {"xmin": -1050, "ymin": -1050, "xmax": 1050, "ymax": 1050},
                "landmarks": {
                    "n1": {
                        "position": [-40.0, 38.0], "altitude": 22.75, "height": 24.0,
                        "width": 18.0, "model": "lights", "type": "light",
                        "pattern": "square", "confidence": 0.3, "lidar_visible": true,
                        "priority": 1, "tier": 1
                    },
                    "t1": {
                        "position": [100.0, 50.0], "altitude": 60.0, "height": 120.0,
                        "width": 40.0, "model": "yard", "type": "tree",
                        "pattern": "", "confidence": 0.5, "lidar_visible": false,
                        "priority": 1, "tier": 1
                    }
                },
                "obstacles": {},
                "search": {}
            }"#,
        )
        .unwrap()
    }

    fn camera_config() -> CameraConfig {
        CameraConfig {
            geometry: VisualGeometry {
                fov_h_deg: 44.0,
                fov_v_deg: 27.333,
                view_w_px: 1280.0,
                view_h_px: 720.0,
            },
            vehicle_base_id: 0,
            default_heading: 0.0,
            alternate_headings: vec![90.0, -90.0],
            emitter: EmitterParams::default(),
        }
    }

    fn frame(detections: Vec<Detection>) -> DetectionFrame {
        DetectionFrame {
            timestamp: Utc.ymd(2026, 1, 1).and_hms(12, 0, 0),
            detections,
            image_png: None,
        }
    }

    #[test]
    fn test_plain_detection_mapped() {
        let map = test_map();
        let sightings = frame_to_sightings(
            &frame(vec![Detection {
                model: "yard".into(),
                object_type: "tree".into(),
                pattern: "".into(),
                confidence: 0.8,
                x1: 100.0,
                y1: 50.0,
                x2: 180.0,
                y2: 400.0,
            }]),
            15.0,
            &camera_config(),
            &map,
            0.3,
        );

        assert_eq!(sightings.len(), 1);
        assert_eq!(sightings[0].landmark_id, "t1");
        assert_eq!(sightings[0].camera_heading, 15.0);
    }

    #[test]
    fn test_low_confidence_dropped() {
        let map = test_map();
        let sightings = frame_to_sightings(
            &frame(vec![Detection {
                model: "yard".into(),
                object_type: "tree".into(),
                pattern: "".into(),
                // Below the landmark's own 0.5 threshold
                confidence: 0.4,
                x1: 100.0,
                y1: 50.0,
                x2: 180.0,
                y2: 400.0,
            }]),
            0.0,
            &camera_config(),
            &map,
            0.3,
        );

        assert!(sightings.is_empty());
    }

    #[test]
    fn test_unknown_detection_dropped() {
        let map = test_map();
        let sightings = frame_to_sightings(
            &frame(vec![Detection {
                model: "yard".into(),
                object_type: "gnome".into(),
                pattern: "".into(),
                confidence: 0.9,
                x1: 0.0,
                y1: 0.0,
                x2: 10.0,
                y2: 10.0,
            }]),
            0.0,
            &camera_config(),
            &map,
            0.3,
        );

        assert!(sightings.is_empty());
    }

    #[test]
    fn test_emitters_grouped_into_landmark() {
        let map = test_map();

        // Two vertical lines of three emitters each: a square
        let mut detections = Vec::new();
        for cx in [300.0, 380.0] {
            for cy in [200.0, 250.0, 300.0] {
                detections.push(Detection {
                    model: "lights".into(),
                    object_type: "emitter".into(),
                    pattern: "".into(),
                    confidence: 0.9,
                    x1: cx - 5.0,
                    y1: cy - 5.0,
                    x2: cx + 5.0,
                    y2: cy + 5.0,
                });
            }
        }

        let sightings =
            frame_to_sightings(&frame(detections), 0.0, &camera_config(), &map, 0.3);

        assert_eq!(sightings.len(), 1);
        assert_eq!(sightings[0].landmark_id, "n1");
        assert!(sightings[0].corrected_height.is_some());
    }
}
