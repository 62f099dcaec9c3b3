//! Triangle and heading maths used throughout the navigation core.
//!
//! All angles are degrees. Headings are "0 = north, right positive" signed
//! into `(-180, 180]`; cartesian degrees are anticlockwise from +x in
//! `[0, 360)`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use util::maths::rem_euclid;

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

/// Errors raised when triangle inputs are geometrically impossible.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GeometryError {
    #[error("Sides ({0}, {1}, {2}) violate the triangle inequality")]
    TriangleInequality(f64, f64, f64),

    #[error("Arcsine/arccosine input {0} outside [-1, 1]")]
    TrigDomain(f64),

    #[error("Degenerate triangle (zero length side)")]
    Degenerate,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Normalize an unbounded heading into `(-180, 180]`.
pub fn normalize_heading(heading_deg: f64) -> f64 {
    let wrapped = rem_euclid(heading_deg, 360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Convert a heading (0 = north, right positive) to cartesian degrees
/// (anticlockwise from +x, in `[0, 360)`).
pub fn heading_to_cartesian(heading_deg: f64) -> f64 {
    rem_euclid(90.0 - heading_deg, 360.0)
}

/// Convert cartesian degrees back into a heading in `(-180, 180]`.
pub fn cartesian_to_heading(cartesian_deg: f64) -> f64 {
    normalize_heading(90.0 - cartesian_deg)
}

/// Law of cosines: the side opposite `far_angle_deg` given the two adjacent
/// sides.
pub fn far_side(far_angle_deg: f64, side_a: f64, side_b: f64) -> f64 {
    (side_a.powi(2) + side_b.powi(2)
        - 2.0 * side_a * side_b * far_angle_deg.to_radians().cos())
    .sqrt()
}

/// Law of cosines: the angle opposite `far` in a triangle with sides
/// (`far`, `side_a`, `side_b`).
pub fn far_angle(far: f64, side_a: f64, side_b: f64) -> Result<f64, GeometryError> {
    if far <= 0.0 || side_a <= 0.0 || side_b <= 0.0 {
        return Err(GeometryError::Degenerate);
    }

    let cos_angle =
        (side_a.powi(2) + side_b.powi(2) - far.powi(2)) / (2.0 * side_a * side_b);

    if !(-1.0..=1.0).contains(&cos_angle) {
        return Err(GeometryError::TriangleInequality(far, side_a, side_b));
    }

    Ok(cos_angle.acos().to_degrees())
}

/// All three angles of a triangle with the given sides, each opposite the
/// side in the same argument position.
pub fn triangle_angles(
    side_a: f64,
    side_b: f64,
    side_c: f64,
) -> Result<(f64, f64, f64), GeometryError> {
    let angle_a = far_angle(side_a, side_b, side_c)?;
    let angle_b = far_angle(side_b, side_a, side_c)?;

    // Third angle from the sum rather than a third acos, keeps them consistent
    Ok((angle_a, angle_b, 180.0 - angle_a - angle_b))
}

/// Solve for the third side of a triangle given the far angle, the far side
/// (opposite that angle) and one adjacent side.
///
/// By the law of sines the angle opposite `known_side` is
/// `asin(known_side * sin(far_angle) / far_side)`, which has a supplementary
/// second solution. Both resulting third sides are returned, primary first.
pub fn solve_third_side(
    far_angle_deg: f64,
    far_side: f64,
    known_side: f64,
) -> Result<(f64, f64), GeometryError> {
    if far_side <= 0.0 || known_side <= 0.0 {
        return Err(GeometryError::Degenerate);
    }

    let sin_far = far_angle_deg.to_radians().sin();
    let sin_known = known_side * sin_far / far_side;

    if !(-1.0..=1.0).contains(&sin_known) {
        return Err(GeometryError::TrigDomain(sin_known));
    }

    let known_angle_deg = sin_known.asin().to_degrees();

    // Primary solution
    let third_angle = 180.0 - far_angle_deg - known_angle_deg;
    let primary = far_side * third_angle.to_radians().sin() / sin_far;

    // Supplementary solution
    let supp_angle = 180.0 - far_angle_deg - (180.0 - known_angle_deg);
    let secondary = if supp_angle > 0.0 {
        far_side * supp_angle.to_radians().sin() / sin_far
    } else {
        primary
    };

    Ok((primary, secondary))
}

/// Translate a point along a heading by a distance. `forward = false` walks
/// the opposite way.
pub fn translate(
    x: f64,
    y: f64,
    heading_deg: f64,
    distance: f64,
    forward: bool,
) -> (f64, f64) {
    let cart_rad = heading_to_cartesian(heading_deg).to_radians();
    let sign = if forward { 1.0 } else { -1.0 };

    (
        x + sign * distance * cart_rad.cos(),
        y + sign * distance * cart_rad.sin(),
    )
}

/// The heading (0 = north, right positive) of the vector from `(x1, y1)` to
/// `(x2, y2)`.
pub fn bearing(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    let dx = x2 - x1;
    let dy = y2 - y1;
    normalize_heading(dx.atan2(dy).to_degrees())
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalize_heading() {
        assert_eq!(normalize_heading(0.0), 0.0);
        assert_eq!(normalize_heading(180.0), 180.0);
        assert_eq!(normalize_heading(-180.0), 180.0);
        assert_eq!(normalize_heading(190.0), -170.0);
        assert_eq!(normalize_heading(-190.0), 170.0);
        assert_eq!(normalize_heading(720.0), 0.0);
        assert_eq!(normalize_heading(-540.0), 180.0);

        // All outputs in (-180, 180]
        let mut h = -1000.0;
        while h < 1000.0 {
            let n = normalize_heading(h);
            assert!(n > -180.0 && n <= 180.0, "normalize({}) = {}", h, n);
            h += 7.3;
        }
    }

    #[test]
    fn test_heading_cartesian_roundtrip() {
        assert_eq!(heading_to_cartesian(0.0), 90.0);
        assert_eq!(heading_to_cartesian(90.0), 0.0);
        assert_eq!(heading_to_cartesian(-90.0), 180.0);
        assert_eq!(heading_to_cartesian(180.0), 270.0);

        let mut h = -179.0;
        while h <= 180.0 {
            let c = heading_to_cartesian(h);
            assert!((0.0..360.0).contains(&c));
            assert!((cartesian_to_heading(c) - h).abs() < 1e-9);
            h += 1.0;
        }
    }

    #[test]
    fn test_far_side_far_angle_consistent() {
        // Triangle law: far_side reconstructed from far_angle and sides
        let cases = [(60.0, 3.0, 4.0), (90.0, 5.0, 12.0), (120.0, 10.0, 10.0)];
        for (angle, a, b) in cases.iter() {
            let far = far_side(*angle, *a, *b);
            let recovered = far_angle(far, *a, *b).unwrap();
            assert!(
                (recovered - angle).abs() < 1e-6,
                "angle {} recovered as {}",
                angle,
                recovered
            );
        }
    }

    #[test]
    fn test_far_angle_domain_error() {
        // 1, 2, 10 cannot form a triangle
        assert!(far_angle(10.0, 1.0, 2.0).is_err());
        assert!(far_angle(0.0, 1.0, 2.0).is_err());
    }

    #[test]
    fn test_triangle_angles_sum() {
        let (a, b, c) = triangle_angles(3.0, 4.0, 5.0).unwrap();
        assert!((a + b + c - 180.0).abs() < 1e-9);
        // Angle opposite the hypotenuse of a 3-4-5 is 90
        assert!((c - 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_solve_third_side() {
        // Equilateral: far angle 60, far side 1, known side 1 -> third side 1
        let (p, _) = solve_third_side(60.0, 1.0, 1.0).unwrap();
        assert!((p - 1.0).abs() < 1e-9);

        // 3-4-5: far angle 90 opposite 5, known side 3 -> third side 4
        let (p, _) = solve_third_side(90.0, 5.0, 3.0).unwrap();
        assert!((p - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_translate_quadrants() {
        let (x, y) = translate(0.0, 0.0, 0.0, 10.0, true);
        assert!(x.abs() < 1e-9 && (y - 10.0).abs() < 1e-9);

        let (x, y) = translate(0.0, 0.0, 90.0, 10.0, true);
        assert!((x - 10.0).abs() < 1e-9 && y.abs() < 1e-9);

        let (x, y) = translate(0.0, 0.0, -90.0, 10.0, true);
        assert!((x + 10.0).abs() < 1e-9 && y.abs() < 1e-9);

        let (x, y) = translate(0.0, 0.0, 45.0, 2.0f64.sqrt(), true);
        assert!((x - 1.0).abs() < 1e-9 && (y - 1.0).abs() < 1e-9);

        // Reverse walks the other way
        let (x, y) = translate(5.0, 5.0, 0.0, 10.0, false);
        assert!((x - 5.0).abs() < 1e-9 && (y + 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_bearing() {
        assert_eq!(bearing(0.0, 0.0, 0.0, 10.0), 0.0);
        assert_eq!(bearing(0.0, 0.0, 10.0, 0.0), 90.0);
        assert_eq!(bearing(0.0, 0.0, -10.0, 0.0), -90.0);
        assert!((bearing(0.0, 0.0, 10.0, 10.0) - 45.0).abs() < 1e-9);
        assert_eq!(bearing(0.0, 0.0, 0.0, -10.0), 180.0);
    }
}
