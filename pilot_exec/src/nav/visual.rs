//! Visual geometry: pixel to degree conversion, distance from apparent size,
//! and relative-north calculation.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

use super::trig::GeometryError;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Fixed optical geometry of one camera.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct VisualGeometry {
    /// Horizontal field of view, degrees.
    pub fov_h_deg: f64,

    /// Vertical field of view, degrees.
    pub fov_v_deg: f64,

    /// View width, pixels.
    pub view_w_px: f64,

    /// View height, pixels.
    pub view_h_px: f64,
}

/// Ground, top, and bottom distances from the observer to an object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceTriple {
    /// Horizontal distance along the ground plane, inches.
    pub ground: f64,

    /// Slant distance to the top of the object, inches.
    pub top: f64,

    /// Slant distance to the bottom of the object, inches.
    pub bottom: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl VisualGeometry {
    pub fn degrees_per_pixel_h(&self) -> f64 {
        self.fov_h_deg / self.view_w_px
    }

    pub fn degrees_per_pixel_v(&self) -> f64 {
        self.fov_v_deg / self.view_h_px
    }

    /// Convert a horizontal pixel count into degrees.
    pub fn px_to_deg_h(&self, px: f64) -> f64 {
        px * self.degrees_per_pixel_h()
    }

    /// Convert a vertical pixel count into degrees.
    pub fn px_to_deg_v(&self, px: f64) -> f64 {
        px * self.degrees_per_pixel_v()
    }

    /// Convert horizontal degrees into pixels.
    pub fn deg_to_px_h(&self, deg: f64) -> f64 {
        deg / self.degrees_per_pixel_h()
    }

    /// Signed degrees of a horizontal pixel position from the view centre,
    /// right positive.
    pub fn relative_degrees(&self, center_x_px: f64) -> f64 {
        self.px_to_deg_h(center_x_px - self.view_w_px / 2.0)
    }

    /// Compute the ground/top/bottom distances to an object of known height
    /// from its apparent (angular) height.
    ///
    /// `object_alt` is the altitude of the object's vertical centre;
    /// `observer_alt` is the camera altitude. Two decompositions are used:
    ///
    /// - "beside": the observer's horizontal plane cuts the object, so the
    ///   apparent angle is split into the two sub-triangles above and below
    ///   that plane.
    /// - "above/below": the whole object is on one side of the plane, so the
    ///   far side is extended to the plane in proportion to the apparent
    ///   degrees and ground distance recovered via Pythagoras.
    pub fn height_distances(
        &self,
        apparent_height_deg: f64,
        object_height: f64,
        object_alt: f64,
        observer_alt: f64,
    ) -> Result<DistanceTriple, GeometryError> {
        if apparent_height_deg <= 0.0 || object_height <= 0.0 {
            return Err(GeometryError::Degenerate);
        }

        let object_top = object_alt + object_height / 2.0;
        let object_bottom = object_alt - object_height / 2.0;

        let ground = if observer_alt > object_bottom && observer_alt < object_top {
            // Beside: split the apparent angle at the observer plane in
            // proportion to the physical extents above and below it
            let above = object_top - observer_alt;
            let below = observer_alt - object_bottom;
            let angle_above_deg = apparent_height_deg * above / (above + below);

            above / angle_above_deg.to_radians().tan()
        } else {
            // Above/below: extend the object's far side to the observer's
            // horizontal plane and scale the apparent degrees to match
            let extension = if observer_alt >= object_top {
                observer_alt - object_top
            } else {
                object_bottom - observer_alt
            };

            let extended_height = object_height + extension;
            let extended_deg = apparent_height_deg * extended_height / object_height;

            // Slant side to the near edge of the extended triangle, then
            // Pythagoras back to the ground distance
            let slant = extended_height / extended_deg.to_radians().sin();
            let ground_sq = slant.powi(2) - extended_height.powi(2);
            if ground_sq <= 0.0 {
                return Err(GeometryError::Degenerate);
            }
            ground_sq.sqrt()
        };

        Ok(DistanceTriple {
            ground,
            top: (ground.powi(2) + (object_top - observer_alt).powi(2)).sqrt(),
            bottom: (ground.powi(2) + (object_bottom - observer_alt).powi(2)).sqrt(),
        })
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// The signed angle one would rotate at the observer, having faced the point,
/// to face north (+y). Right positive.
///
/// Built from the right triangle with vertical side `|py - oy|` and
/// hypotenuse `distance(o, p)`; the sign and quadrant follow from which side
/// of the observer the point lies on.
pub fn relative_north(ox: f64, oy: f64, px: f64, py: f64) -> f64 {
    let dx = px - ox;
    let dy = py - oy;
    let dist = (dx.powi(2) + dy.powi(2)).sqrt();

    if dist == 0.0 {
        return 0.0;
    }

    // Acute angle between the sight line and the north-south axis
    let axis_angle = (dy.abs() / dist).min(1.0).acos().to_degrees();

    // Quadrant rule: facing a point east of us we rotate left (negative) to
    // reach north, west of us right (positive); southern points go the long
    // way round through the supplementary angle.
    match (dx >= 0.0, dy >= 0.0) {
        (true, true) => -axis_angle,
        (true, false) => -(180.0 - axis_angle),
        (false, true) => axis_angle,
        (false, false) => 180.0 - axis_angle,
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn test_geom() -> VisualGeometry {
        VisualGeometry {
            fov_h_deg: 44.0,
            fov_v_deg: 27.333,
            view_w_px: 1280.0,
            view_h_px: 720.0,
        }
    }

    #[test]
    fn test_pixel_degree_conversions() {
        let g = test_geom();
        assert!((g.degrees_per_pixel_h() - 44.0 / 1280.0).abs() < 1e-12);
        assert!((g.px_to_deg_h(640.0) - 22.0).abs() < 1e-9);
        assert!((g.deg_to_px_h(g.px_to_deg_h(100.0)) - 100.0).abs() < 1e-9);

        // Centre of view is zero relative degrees, right is positive
        assert_eq!(g.relative_degrees(640.0), 0.0);
        assert!(g.relative_degrees(1000.0) > 0.0);
        assert!(g.relative_degrees(100.0) < 0.0);
    }

    #[test]
    fn test_height_distance_beside() {
        let g = test_geom();

        // Object centred at observer altitude: symmetric split. Object is
        // 20 inches tall at 100 inches ground distance, apparent angle is
        // 2 * atan(10/100).
        let apparent = 2.0 * (10.0f64 / 100.0).atan().to_degrees();
        let d = g.height_distances(apparent, 20.0, 50.0, 50.0).unwrap();

        assert!((d.ground - 100.0).abs() < 1.0, "ground = {}", d.ground);
        assert!(d.top > d.ground && d.bottom > d.ground);
        assert!((d.top - d.bottom).abs() < 1e-6);
    }

    #[test]
    fn test_height_distance_above() {
        let g = test_geom();

        // Observer well above the object: ground distance must still be
        // positive and top distance shorter than bottom distance
        let d = g.height_distances(3.0, 24.0, 22.75, 80.0).unwrap();
        assert!(d.ground > 0.0);
        assert!(d.top < d.bottom);
    }

    #[test]
    fn test_height_distance_rejects_degenerate() {
        let g = test_geom();
        assert!(g.height_distances(0.0, 24.0, 22.0, 40.0).is_err());
        assert!(g.height_distances(3.0, 0.0, 22.0, 40.0).is_err());
    }

    #[test]
    fn test_relative_north_quadrants() {
        // Point due north: already facing north
        assert_eq!(relative_north(0.0, 0.0, 0.0, 10.0), 0.0);

        // Due east: rotate -90 (left) to face north
        assert!((relative_north(0.0, 0.0, 10.0, 0.0) + 90.0).abs() < 1e-9);

        // Due west: rotate +90 (right)
        assert!((relative_north(0.0, 0.0, -10.0, 0.0) - 90.0).abs() < 1e-9);

        // North-east at 45: rotate -45
        assert!((relative_north(0.0, 0.0, 10.0, 10.0) + 45.0).abs() < 1e-9);

        // South-east: supplementary, -135
        assert!((relative_north(0.0, 0.0, 10.0, -10.0) + 135.0).abs() < 1e-9);

        // South-west: +135
        assert!((relative_north(0.0, 0.0, -10.0, -10.0) - 135.0).abs() < 1e-9);
    }
}
