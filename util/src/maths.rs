//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float,
{
    target_range.0
        + ((value - source_range.0) * (target_range.1 - target_range.0)
            / (source_range.1 - source_range.0))
}

/// Return the euclidian norm (distance between) of two points.
///
/// If the points do not have the same number of dimentions then `None` is
/// returned.
pub fn norm<T>(point_0: &[T], point_1: &[T]) -> Option<T>
where
    T: Float + std::ops::AddAssign,
{
    // Check that the dimentions match
    if point_0.len() != point_1.len() {
        return None;
    }

    // Sum all elements of the points
    let mut sum = T::from(0).unwrap();

    for i in 0..point_0.len() {
        sum += (point_0[i] - point_1[i]).powi(2);
    }

    // Return the squareroot of the sum
    Some(sum.sqrt())
}

pub fn clamp<T>(value: &T, min: &T, max: &T) -> T
where
    T: Float,
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Arithmetic mean of a slice. `None` for an empty slice.
pub fn mean<T>(values: &[T]) -> Option<T>
where
    T: Float + std::ops::AddAssign,
{
    if values.is_empty() {
        return None;
    }

    let mut sum = T::from(0).unwrap();
    for v in values {
        sum += *v;
    }

    Some(sum / T::from(values.len()).unwrap())
}

/// Population standard deviation of a slice. `None` for an empty slice.
pub fn stdev<T>(values: &[T]) -> Option<T>
where
    T: Float + std::ops::AddAssign,
{
    let mean = mean(values)?;

    let mut sum = T::from(0).unwrap();
    for v in values {
        sum += (*v - mean).powi(2);
    }

    Some((sum / T::from(values.len()).unwrap()).sqrt())
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float + std::ops::Mul + std::ops::Add + std::ops::Sub + std::ops::Rem,
{
    let r = lhs % rhs;
    if r < T::from(0.0).unwrap() {
        r + rhs.abs()
    } else {
        r
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mean_stdev() {
        let vals = [2.0f64, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&vals).unwrap() - 5.0).abs() < 1e-12);
        assert!((stdev(&vals).unwrap() - 2.0).abs() < 1e-12);

        let empty: [f64; 0] = [];
        assert!(mean(&empty).is_none());
        assert!(stdev(&empty).is_none());
    }

    #[test]
    fn test_rem_euclid() {
        assert_eq!(rem_euclid(-90.0f64, 360.0), 270.0);
        assert_eq!(rem_euclid(370.0f64, 360.0), 10.0);
    }
}
