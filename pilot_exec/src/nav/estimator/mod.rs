//! # Position Estimator
//!
//! Derives (x, y, heading, confidence) from smoothed landmark sightings.
//! Each visible landmark pair spans a triangle with the observer; the length
//! solver proposes side pairs, candidate points are constructed around each
//! landmark, implausible ones are filtered geometrically, the survivors are
//! clustered, and the centroid with the mean heading is reported.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod worker;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Deserialize;

use field_if::service::FixBasis;
use util::maths::{self, rem_euclid};

use super::field_map::FieldMap;
use super::length_solver::{self, SideEstimate, SolverParams};
use super::lidar_map::LidarMap;
use super::trig;
use super::visual::{self, VisualGeometry};
use super::{Confidence, DistanceRecord, PositionFix, Sighting, ViewAngles};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One camera's smoothed sightings plus the optics they were seen through.
#[derive(Debug, Clone)]
pub struct SightingGroup {
    pub geometry: VisualGeometry,
    pub sightings: Vec<Sighting>,
}

/// Estimator tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct EstimatorParams {
    /// Camera altitude above the ground plane, inches.
    pub observer_altitude: f64,

    /// Heading of the vehicle's nose relative to the camera turret zero.
    pub base_front: f64,

    /// Maximum `sum(|expected - observed| pair angles) / sum(observed)` for
    /// a candidate to pass.
    pub allowed_variance: f64,

    /// Maximum heading spread at a candidate, as a fraction of 360.
    pub allowed_heading_variance: f64,

    pub lidar_enabled: bool,
    pub max_lidar_drift_deg: f64,

    /// Maximum `|lidar - visual| / lidar` for a lidar substitution.
    pub max_visual_variance: f64,

    pub mode: EstimatorMode,

    /// Drop candidates outside the near boundary.
    pub enforce_bounds: bool,

    pub multithreaded: bool,
}

/// Everything one pair evaluation needs, copied so it can run on a worker.
#[derive(Clone)]
struct PairJob {
    id_a: String,
    id_b: String,
    pos_a: (f64, f64),
    pos_b: (f64, f64),
    dist_a: DistanceRecord,
    dist_b: DistanceRecord,
    viz_angle: f64,
    far_side: f64,
    solver: SolverParams,
    view: Arc<HashMap<String, ViewAngles>>,
    map: Arc<FieldMap>,
    params: EstimatorParams,
}

/// Result of evaluating one pair.
struct PairOutcome {
    viz_angle: f64,
    candidates: Vec<(f64, f64)>,
}

/// The estimator itself; immutable map plus tuning.
#[derive(Clone)]
pub struct Estimator {
    map: Arc<FieldMap>,
    params: EstimatorParams,
}

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

/// Solver accuracy / landmark appetite presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorMode {
    Fast,
    Precise,
    VeryPrecise,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl EstimatorMode {
    pub fn target_accuracy(&self) -> f64 {
        match self {
            EstimatorMode::Fast => 0.04,
            EstimatorMode::Precise => 0.002,
            EstimatorMode::VeryPrecise => 0.001,
        }
    }

    pub fn solver_time(&self) -> Duration {
        match self {
            EstimatorMode::Fast => Duration::from_millis(200),
            _ => Duration::from_millis(500),
        }
    }

    /// How many distinct landmarks the navigator tries to collect before
    /// settling.
    pub fn preferred_landmarks(&self) -> usize {
        match self {
            EstimatorMode::Fast => 2,
            EstimatorMode::Precise => 3,
            EstimatorMode::VeryPrecise => 4,
        }
    }
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            observer_altitude: 41.75,
            base_front: 0.0,
            allowed_variance: 0.2,
            allowed_heading_variance: 0.05,
            lidar_enabled: true,
            max_lidar_drift_deg: 1.5,
            max_visual_variance: 0.33,
            mode: EstimatorMode::Fast,
            enforce_bounds: true,
            multithreaded: true,
        }
    }
}

impl Estimator {
    pub fn new(map: Arc<FieldMap>, params: EstimatorParams) -> Self {
        Self { map, params }
    }

    pub fn params(&self) -> &EstimatorParams {
        &self.params
    }

    /// Run the full pipeline. `None` when no sighting pair produced a
    /// plausible candidate.
    pub fn estimate(
        &self,
        groups: &[SightingGroup],
        lidar: Option<&LidarMap>,
        now: DateTime<Utc>,
    ) -> Option<PositionFix> {
        let (view, geoms) = extract_view_angles(groups);
        if view.len() < 2 {
            debug!("Estimator needs two landmarks, saw {}", view.len());
            return None;
        }

        let distances = extract_distances(&view, &geoms, &self.map, lidar, &self.params);

        let view = Arc::new(view);
        let jobs = self.build_pair_jobs(&view, &distances);
        if jobs.is_empty() {
            return None;
        }

        let outcomes = self.evaluate_pairs(jobs);

        let mut candidates: Vec<(f64, f64)> = Vec::new();
        let mut pair_angles = Vec::new();
        for outcome in &outcomes {
            if !outcome.candidates.is_empty() {
                pair_angles.push(outcome.viz_angle);
            }
            candidates.extend(outcome.candidates.iter().copied());
        }

        if candidates.is_empty() {
            debug!("No plausible position candidates");
            return None;
        }

        // Prune stray candidates, then stray headings
        let origin_dists: Vec<f64> = candidates
            .iter()
            .map(|(x, y)| (x.powi(2) + y.powi(2)).sqrt())
            .collect();
        let keep = cluster_keep_larger(&origin_dists);
        let candidates: Vec<(f64, f64)> =
            keep.iter().map(|&i| candidates[i]).collect();

        let mut headings = Vec::new();
        for (x, y) in &candidates {
            headings.extend(headings_at(
                *x,
                *y,
                &view,
                &self.map,
                self.params.base_front,
            ));
        }
        let keep = cluster_keep_larger(&headings);
        let headings: Vec<f64> = keep.iter().map(|&i| headings[i]).collect();
        if headings.is_empty() {
            return None;
        }

        let n = candidates.len() as f64;
        let x = candidates.iter().map(|(x, _)| x).sum::<f64>() / n;
        let y = candidates.iter().map(|(_, y)| y).sum::<f64>() / n;
        let heading = trig::normalize_heading(maths::mean(&headings)?);

        let lidar_hits = distances.values().filter(|d| d.is_lidar).count();
        let confidence = confidence_for(view.len(), lidar_hits);

        let mut landmarks: Vec<String> = view.keys().cloned().collect();
        landmarks.sort();

        Some(PositionFix {
            x,
            y,
            heading_deg: heading,
            confidence,
            basis: FixBasis {
                angles: pair_angles,
                distances: landmarks
                    .iter()
                    .filter_map(|id| distances.get(id).map(|d| d.ground))
                    .collect(),
                landmarks,
            },
            timestamp: now,
        })
    }

    /// One job per unordered landmark pair, preferring pairs whose landmarks
    /// sit inside their configured visual-angle comfort zone.
    fn build_pair_jobs(
        &self,
        view: &Arc<HashMap<String, ViewAngles>>,
        distances: &HashMap<String, DistanceRecord>,
    ) -> Vec<PairJob> {
        let mut ids: Vec<&String> = view.keys().collect();
        ids.sort();

        let solver = SolverParams::with_accuracy(
            self.params.mode.target_accuracy(),
            self.params.mode.solver_time(),
        );

        let mut preferred = Vec::new();
        let mut rest = Vec::new();

        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (id_a, id_b) = (ids[i], ids[j]);

                let viz_angle = match view[id_a].relative_deg.get(id_b) {
                    Some(rel) => rel.abs(),
                    None => continue,
                };
                if viz_angle <= 0.0 {
                    continue;
                }

                let far_side = match self.map.landmark_distance(id_a, id_b) {
                    Some(d) => d,
                    None => continue,
                };
                let (dist_a, dist_b) = match (distances.get(id_a), distances.get(id_b)) {
                    (Some(a), Some(b)) => (*a, *b),
                    _ => continue,
                };
                let (pos_a, pos_b) = match (self.map.landmark(id_a), self.map.landmark(id_b))
                {
                    (Some(a), Some(b)) => (a.position, b.position),
                    _ => continue,
                };

                let job = PairJob {
                    id_a: id_a.clone(),
                    id_b: id_b.clone(),
                    pos_a,
                    pos_b,
                    dist_a,
                    dist_b,
                    viz_angle,
                    far_side,
                    solver: solver.clone(),
                    view: Arc::clone(view),
                    map: Arc::clone(&self.map),
                    params: self.params.clone(),
                };

                if self.pair_in_comfort_zone(id_a, id_b, view) {
                    preferred.push(job);
                } else {
                    rest.push(job);
                }
            }
        }

        if preferred.is_empty() {
            rest
        } else {
            preferred
        }
    }

    /// Both landmarks within their optional min/max apparent-angle bounds.
    fn pair_in_comfort_zone(
        &self,
        id_a: &str,
        id_b: &str,
        view: &HashMap<String, ViewAngles>,
    ) -> bool {
        [id_a, id_b].iter().all(|id| {
            let lm = match self.map.landmark(id) {
                Some(lm) => lm,
                None => return false,
            };
            let angle = view[*id].height_deg;
            lm.min_visual_angle.map_or(true, |min| angle >= min)
                && lm.max_visual_angle.map_or(true, |max| angle <= max)
        })
    }

    fn evaluate_pairs(&self, jobs: Vec<PairJob>) -> Vec<PairOutcome> {
        if self.params.multithreaded && jobs.len() > 1 {
            let timeout =
                self.params.mode.solver_time() * jobs.len() as u32 + Duration::from_millis(500);
            let work: Vec<_> = jobs
                .into_iter()
                .map(|job| move || evaluate_pair(job))
                .collect();
            worker::global().run_all(work, timeout)
        } else {
            jobs.into_iter().map(evaluate_pair).collect()
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Turn each camera's smoothed sightings into angular records, including the
/// observed offsets between every ordered landmark pair (adjusted for the
/// cameras' differing headings). Returns the records plus the optics each
/// landmark was seen through.
pub fn extract_view_angles(
    groups: &[SightingGroup],
) -> (HashMap<String, ViewAngles>, HashMap<String, VisualGeometry>) {
    let mut view: HashMap<String, ViewAngles> = HashMap::new();
    let mut geoms: HashMap<String, VisualGeometry> = HashMap::new();

    for group in groups {
        for sighting in &group.sightings {
            let g = &group.geometry;
            let record = ViewAngles {
                landmark_id: sighting.landmark_id.clone(),
                center_x: sighting.center_x(),
                center_y: sighting.center_y(),
                height_px: sighting.height_px(),
                height_deg: g.px_to_deg_v(sighting.height_px()),
                width_px: sighting.width_px(),
                width_deg: g.px_to_deg_h(sighting.width_px()),
                confidence: sighting.confidence,
                image_heading: sighting.camera_heading,
                image_relative_deg: g.relative_degrees(sighting.center_x()),
                relative_deg: HashMap::new(),
                relative_px: HashMap::new(),
            };
            geoms.insert(sighting.landmark_id.clone(), *g);
            view.insert(sighting.landmark_id.clone(), record);
        }
    }

    // Pairwise offsets: each landmark's absolute view direction is its
    // camera heading plus its in-image offset
    let ids: Vec<String> = view.keys().cloned().collect();
    for id_a in &ids {
        for id_b in &ids {
            if id_a == id_b {
                continue;
            }
            let dir_a = view[id_a].image_heading + view[id_a].image_relative_deg;
            let dir_b = view[id_b].image_heading + view[id_b].image_relative_deg;
            let rel = trig::normalize_heading(dir_b - dir_a);
            let rel_px = geoms[id_a].deg_to_px_h(rel);

            if let Some(record) = view.get_mut(id_a) {
                record.relative_deg.insert(id_b.clone(), rel);
                record.relative_px.insert(id_b.clone(), rel_px);
            }
        }
    }

    (view, geoms)
}

/// Height-based distances per landmark, with lidar substitution when the
/// reading is close enough to the visual estimate.
pub fn extract_distances(
    view: &HashMap<String, ViewAngles>,
    geoms: &HashMap<String, VisualGeometry>,
    map: &FieldMap,
    lidar: Option<&LidarMap>,
    params: &EstimatorParams,
) -> HashMap<String, DistanceRecord> {
    let mut out = HashMap::new();

    for (id, record) in view {
        let lm = match map.landmark(id) {
            Some(lm) => lm,
            None => continue,
        };

        let triple = match geoms[id].height_distances(
            record.height_deg,
            lm.height,
            lm.altitude,
            params.observer_altitude,
        ) {
            Ok(t) => t,
            Err(e) => {
                debug!("Dropping {}: {}", id, e);
                continue;
            }
        };

        let mut distance = DistanceRecord {
            ground: triple.ground,
            top: triple.top,
            bottom: triple.bottom,
            visual_ground: None,
            lidar: None,
            is_lidar: false,
        };

        if params.lidar_enabled && lm.lidar_visible {
            if let Some(lidar) = lidar {
                let angle = rem_euclid(
                    record.image_heading - params.base_front + record.image_relative_deg,
                    360.0,
                );
                if let Some(reading) = lidar.get_measurement(angle, params.max_lidar_drift_deg)
                {
                    distance.lidar = Some(reading);
                    let variance = (reading - triple.ground).abs() / reading;
                    if variance <= params.max_visual_variance {
                        distance.visual_ground = Some(triple.ground);
                        distance.ground = reading;
                        distance.is_lidar = true;
                    } else {
                        debug!(
                            "Lidar {} for {} too far from visual {}",
                            reading, id, triple.ground
                        );
                    }
                }
            }
        }

        out.insert(id.clone(), distance);
    }

    out
}

/// Every per-landmark heading estimate at a hypothetical position: what the
/// vehicle heading would have to be for each landmark to appear where it
/// does.
pub fn headings_at(
    x: f64,
    y: f64,
    view: &HashMap<String, ViewAngles>,
    map: &FieldMap,
    base_front: f64,
) -> Vec<f64> {
    let mut headings = Vec::new();

    for (id, record) in view {
        let lm = match map.landmark(id) {
            Some(lm) => lm,
            None => continue,
        };

        let rel_north = visual::relative_north(x, y, lm.position.0, lm.position.1);
        let vis_rel = record.image_heading - base_front + record.image_relative_deg;
        headings.push(trig::normalize_heading(-(vis_rel + rel_north)));
    }

    headings
}

/// Geometric plausibility of a candidate point: reconstructed pair angles
/// agree with observation, and the per-landmark heading estimates agree with
/// each other.
pub fn is_possible(
    x: f64,
    y: f64,
    view: &HashMap<String, ViewAngles>,
    map: &FieldMap,
    params: &EstimatorParams,
) -> bool {
    let mut ids: Vec<&String> = view.keys().collect();
    ids.sort();

    let mut degrees_diff = 0.0;
    let mut total_degrees = 0.0;

    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            let (id_a, id_b) = (ids[i], ids[j]);
            let observed = match view[id_a].relative_deg.get(id_b) {
                Some(rel) => rel.abs(),
                None => continue,
            };
            let far_side = match map.landmark_distance(id_a, id_b) {
                Some(d) => d,
                None => continue,
            };

            let (pa, pb) = match (map.landmark(id_a), map.landmark(id_b)) {
                (Some(a), Some(b)) => (a.position, b.position),
                _ => continue,
            };
            let da = ((x - pa.0).powi(2) + (y - pa.1).powi(2)).sqrt();
            let db = ((x - pb.0).powi(2) + (y - pb.1).powi(2)).sqrt();

            let expected = match trig::far_angle(far_side, da, db) {
                Ok(angle) => angle,
                Err(_) => return false,
            };

            degrees_diff += (expected - observed).abs();
            total_degrees += observed;
        }
    }

    if total_degrees <= 0.0 || degrees_diff / total_degrees > params.allowed_variance {
        return false;
    }

    let headings = headings_at(x, y, view, map, params.base_front);
    if headings.is_empty() {
        return false;
    }
    let mean = match maths::mean(&headings) {
        Some(mean) => mean,
        None => return false,
    };
    let allowed = params.allowed_heading_variance * 360.0;
    headings
        .iter()
        .all(|h| heading_gap(*h, mean).abs() <= allowed)
}

/// Keep the indices of the larger k-means (k=2) cluster when the values are
/// spread out; otherwise keep everything.
pub fn cluster_keep_larger(values: &[f64]) -> Vec<usize> {
    let all: Vec<usize> = (0..values.len()).collect();
    let spread = match maths::stdev(values) {
        Some(spread) => spread,
        None => return all,
    };
    if values.len() < 3 || spread <= 2.0 {
        return all;
    }

    let (lo, hi) = values.iter().fold((f64::MAX, f64::MIN), |(lo, hi), v| {
        (lo.min(*v), hi.max(*v))
    });
    if lo == hi {
        return all;
    }

    let mut centers = (lo, hi);
    let mut assignment = vec![0usize; values.len()];

    for _ in 0..20 {
        let mut changed = false;
        for (i, v) in values.iter().enumerate() {
            let cluster = if (v - centers.0).abs() <= (v - centers.1).abs() {
                0
            } else {
                1
            };
            if assignment[i] != cluster {
                assignment[i] = cluster;
                changed = true;
            }
        }

        for cluster in 0..2 {
            let members: Vec<f64> = values
                .iter()
                .zip(&assignment)
                .filter(|(_, a)| **a == cluster)
                .map(|(v, _)| *v)
                .collect();
            if let Some(mean) = maths::mean(&members) {
                if cluster == 0 {
                    centers.0 = mean;
                } else {
                    centers.1 = mean;
                }
            }
        }

        if !changed {
            break;
        }
    }

    let zero_count = assignment.iter().filter(|a| **a == 0).count();
    let winner = if zero_count * 2 >= values.len() { 0 } else { 1 };

    all.into_iter()
        .filter(|&i| assignment[i] == winner)
        .collect()
}

/// The confidence ladder over landmark count and lidar corroboration.
pub fn confidence_for(num_landmarks: usize, num_lidar: usize) -> Confidence {
    if num_landmarks >= 4 || (num_landmarks >= 3 && num_lidar >= 2) {
        Confidence::High
    } else if num_landmarks >= 3 || (num_landmarks >= 2 && num_lidar >= 1) {
        Confidence::Medium
    } else if num_landmarks >= 2 {
        Confidence::Low
    } else {
        Confidence::VeryLow
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Full evaluation of one landmark pair: solve for the side lengths, build
/// candidate points around both landmarks, filter them.
fn evaluate_pair(job: PairJob) -> PairOutcome {
    let mut rng = rand::thread_rng();

    let (conf_a, conf_b) = length_solver::side_confidences(
        job.dist_a.ground,
        job.dist_a.is_lidar,
        job.dist_b.ground,
        job.dist_b.is_lidar,
    );

    let est_a = SideEstimate {
        length: job.dist_a.ground,
        confidence: conf_a,
    };
    let est_b = SideEstimate {
        length: job.dist_b.ground,
        confidence: conf_b,
    };

    let mut candidates = Vec::new();

    // Both orientation assumptions: a on the base then b on the base
    for (anchor, other, est_base, est_top) in [
        (job.pos_a, job.pos_b, est_a, est_b),
        (job.pos_b, job.pos_a, est_b, est_a),
    ] {
        let solutions = length_solver::solve(
            job.viz_angle,
            job.far_side,
            est_base,
            est_top,
            &job.solver,
            &mut rng,
        );

        for solution in solutions {
            candidates.extend(candidate_points(
                anchor,
                other,
                solution.base,
                solution.top,
                job.far_side,
            ));
        }
    }

    candidates.retain(|(x, y)| {
        if job.params.enforce_bounds && !job.map.is_near_bounds(*x, *y) {
            return false;
        }
        is_possible(*x, *y, &job.view, &job.map, &job.params)
    });

    if candidates.is_empty() {
        warn!(
            "Pair ({}, {}) produced no plausible candidates",
            job.id_a, job.id_b
        );
    }

    PairOutcome {
        viz_angle: job.viz_angle,
        candidates,
    }
}

/// The four sign variants of walking `base_len` from the anchor landmark at
/// the triangle's anchor angle off the anchor->other direction.
fn candidate_points(
    anchor: (f64, f64),
    other: (f64, f64),
    base_len: f64,
    top_len: f64,
    far_side: f64,
) -> Vec<(f64, f64)> {
    // Angle at the anchor vertex, between anchor->other and anchor->observer
    let anchor_angle = match trig::far_angle(top_len, base_len, far_side) {
        Ok(angle) => angle,
        Err(_) => return Vec::new(),
    };

    let dir_ab = (other.1 - anchor.1)
        .atan2(other.0 - anchor.0)
        .to_degrees();

    let mut points = Vec::with_capacity(4);
    for slope_sign in [1.0, -1.0] {
        let angle = (dir_ab + slope_sign * anchor_angle).to_radians();
        for step in [1.0, -1.0] {
            points.push((
                anchor.0 + step * base_len * angle.cos(),
                anchor.1 + step * base_len * angle.sin(),
            ));
        }
    }
    points
}

/// Signed shortest gap between two headings.
fn heading_gap(a: f64, b: f64) -> f64 {
    trig::normalize_heading(a - b)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn geometry() -> VisualGeometry {
        VisualGeometry {
            fov_h_deg: 44.0,
            fov_v_deg: 27.333,
            view_w_px: 1280.0,
            view_h_px: 720.0,
        }
    }

    fn test_map() -> Arc<FieldMap> {
        Arc::new(
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
                        "n2": {
                            "position": [-106.0, -79.0], "altitude": 40.5, "height": 44.0,
                            "width": 18.0, "model": "lights", "type": "light",
                            "pattern": "3", "confidence": 0.3, "lidar_visible": true,
                            "priority": 1, "tier": 1
                        }
                    },
                    "obstacles": {},
                    "search": {}
                }"#,
            )
            .unwrap(),
        )
    }

    fn sighting(id: &str, cx: f64, cy: f64, h: f64, camera_heading: f64) -> Sighting {
        Sighting {
            landmark_id: id.into(),
            x1: cx - 20.0,
            y1: cy - h / 2.0,
            x2: cx + 20.0,
            y2: cy + h / 2.0,
            confidence: 0.8,
            timestamp: Utc.ymd(2026, 1, 1).and_hms(12, 0, 0),
            camera_heading,
            corrected_height: None,
        }
    }

    #[test]
    fn test_view_angle_pair_offsets_same_camera() {
        let groups = [SightingGroup {
            geometry: geometry(),
            sightings: vec![
                sighting("n1", 400.0, 300.0, 60.0, 0.0),
                sighting("n2", 900.0, 320.0, 80.0, 0.0),
            ],
        }];

        let (view, _) = extract_view_angles(&groups);

        // n2 is 500 px right of n1
        let expected = geometry().px_to_deg_h(500.0);
        assert!((view["n1"].relative_deg["n2"] - expected).abs() < 1e-9);
        assert!((view["n2"].relative_deg["n1"] + expected).abs() < 1e-9);
        assert!((view["n1"].relative_px["n2"] - 500.0).abs() < 1e-6);
    }

    #[test]
    fn test_view_angle_pair_offsets_across_cameras() {
        // Same pixel position, cameras 30 degrees apart
        let groups = [
            SightingGroup {
                geometry: geometry(),
                sightings: vec![sighting("n1", 640.0, 300.0, 60.0, 0.0)],
            },
            SightingGroup {
                geometry: geometry(),
                sightings: vec![sighting("n2", 640.0, 300.0, 60.0, 30.0)],
            },
        ];

        let (view, _) = extract_view_angles(&groups);
        assert!((view["n1"].relative_deg["n2"] - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_lidar_substitution() {
        let map = test_map();
        let params = EstimatorParams::default();

        let groups = [SightingGroup {
            geometry: geometry(),
            // Apparent height ~3 degrees puts n1 a few hundred inches out
            sightings: vec![sighting("n1", 640.0, 300.0, 79.0, 0.0)],
        }];
        let (view, geoms) = extract_view_angles(&groups);

        let visual_only = extract_distances(&view, &geoms, &map, None, &params);
        let visual_ground = visual_only["n1"].ground;
        assert!(!visual_only["n1"].is_lidar);

        // A lidar return straight ahead, close to the visual estimate
        let mut raw = vec![0.0; 720];
        raw[0] = visual_ground * 0.9 * 25.4;
        let lidar = LidarMap::from_raw(0.0, 0.5, &raw);

        let with_lidar = extract_distances(&view, &geoms, &map, Some(&lidar), &params);
        assert!(with_lidar["n1"].is_lidar);
        assert!((with_lidar["n1"].ground - visual_ground * 0.9).abs() < 1e-6);
        assert_eq!(with_lidar["n1"].visual_ground, Some(visual_ground));

        // A reading far off the visual estimate is not substituted
        let mut raw = vec![0.0; 720];
        raw[0] = visual_ground * 3.0 * 25.4;
        let lidar = LidarMap::from_raw(0.0, 0.5, &raw);
        let rejected = extract_distances(&view, &geoms, &map, Some(&lidar), &params);
        assert!(!rejected["n1"].is_lidar);
        assert!((rejected["n1"].ground - visual_ground).abs() < 1e-9);
    }

    #[test]
    fn test_headings_facing_north_west_are_negative() {
        // Observer at (5, -62) facing roughly north-west; both landmarks lie
        // to the north and appear right of the camera centre.
        let map = test_map();

        let groups = [SightingGroup {
            geometry: geometry(),
            sightings: vec![
                sighting("n1", 800.0, 300.0, 60.0, 0.0),
                sighting("n2", 1100.0, 320.0, 80.0, 0.0),
            ],
        }];
        let (view, _) = extract_view_angles(&groups);

        for h in headings_at(5.0, -62.0, &view, &map, 0.0) {
            assert!(h < 0.0, "expected negative heading, got {}", h);
        }
    }

    #[test]
    fn test_candidate_points_contains_truth() {
        // Observer at origin, anchor at (0, 100), other at (80, 100)
        let anchor = (0.0, 100.0);
        let other = (80.0, 100.0);
        let base = 100.0;
        let top = ((80.0f64).powi(2) + (100.0f64).powi(2)).sqrt();
        let far_side = 80.0;

        let points = candidate_points(anchor, other, base, top, far_side);
        assert_eq!(points.len(), 4);

        let hit = points
            .iter()
            .any(|(x, y)| (x.powi(2) + y.powi(2)).sqrt() < 1.0);
        assert!(hit, "no candidate near the true origin: {:?}", points);
    }

    #[test]
    fn test_cluster_keeps_larger_group() {
        // Tight group near 100 plus two strays
        let values = vec![100.0, 101.0, 99.5, 100.4, 340.0, 350.0];
        let kept = cluster_keep_larger(&values);
        assert_eq!(kept, vec![0, 1, 2, 3]);

        // Low spread: untouched
        let values = vec![100.0, 100.5, 101.0];
        assert_eq!(cluster_keep_larger(&values).len(), 3);

        // Too few values: untouched
        let values = vec![1.0, 500.0];
        assert_eq!(cluster_keep_larger(&values).len(), 2);

        // Nothing to cluster
        assert!(cluster_keep_larger(&[]).is_empty());
    }

    #[test]
    fn test_confidence_ladder() {
        assert_eq!(confidence_for(4, 0), Confidence::High);
        assert_eq!(confidence_for(3, 2), Confidence::High);
        assert_eq!(confidence_for(3, 0), Confidence::Medium);
        assert_eq!(confidence_for(2, 1), Confidence::Medium);
        assert_eq!(confidence_for(2, 0), Confidence::Low);
        assert_eq!(confidence_for(1, 0), Confidence::VeryLow);
        assert_eq!(confidence_for(0, 0), Confidence::VeryLow);

        // Monotonicity: more landmarks or lidar never lowers confidence
        for n in 0..5 {
            for l in 0..3 {
                assert!(confidence_for(n + 1, l) >= confidence_for(n, l));
                assert!(confidence_for(n, l + 1) >= confidence_for(n, l));
            }
        }
    }

    #[test]
    fn test_estimate_needs_two_landmarks() {
        let est = Estimator::new(test_map(), EstimatorParams::default());
        let groups = [SightingGroup {
            geometry: geometry(),
            sightings: vec![sighting("n1", 640.0, 300.0, 60.0, 0.0)],
        }];

        assert!(est
            .estimate(&groups, None, Utc.ymd(2026, 1, 1).and_hms(12, 0, 0))
            .is_none());
    }
}
