use glam::{DMat3, DVec3};
use nalgebra::Matrix3;

use igt_types::Transform;

/// Fewest point pairs that determine a rotation and a translation.
pub const MIN_RIGID_POINTS: usize = 3;

/// Fewest point pairs that determine a translation.
pub const MIN_TRANSLATION_POINTS: usize = 1;

/// A successful fit from [`register_points`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LandmarkResult {
    /// Maps source points onto target points.
    pub target_from_source: Transform,

    /// Root mean square distance between mapped source points and their targets.
    pub rms_error: f64,
}

/// The rigid transform minimizing the squared distances from `source[i]` to `target[i]`.
///
/// With `translation_only` the rotation is fixed to identity and only the centroids are matched.
///
/// Returns `None` if there are fewer pairs than needed, the two slices differ in length, or
/// the solution is not finite. `None` means "do nothing", never "use identity".
pub fn register_points(
    source: &[DVec3],
    target: &[DVec3],
    translation_only: bool,
) -> Option<LandmarkResult> {
    puffin::profile_function!();

    if source.len() != target.len() {
        igt_log::warn!(
            "Cannot register {} source points against {} target points",
            source.len(),
            target.len()
        );
        return None;
    }

    let needed = if translation_only {
        MIN_TRANSLATION_POINTS
    } else {
        MIN_RIGID_POINTS
    };
    if source.len() < needed {
        igt_log::debug!("Need at least {needed} point pairs, got {}", source.len());
        return None;
    }

    if !source.iter().chain(target).all(|p| p.is_finite()) {
        igt_log::warn!("Cannot register non-finite points");
        return None;
    }

    let source_centroid = centroid(source);
    let target_centroid = centroid(target);

    let target_from_source = if translation_only {
        Transform::from_translation(target_centroid - source_centroid)
    } else {
        let rotation = optimal_rotation(source, source_centroid, target, target_centroid)?;
        let translation = target_centroid - rotation * source_centroid;
        Transform::from_mat3_translation(rotation, translation)
    };

    if !target_from_source.is_finite() {
        igt_log::warn!("Point registration produced a non-finite transform");
        return None;
    }

    let squared_error: f64 = source
        .iter()
        .zip(target)
        .map(|(s, t)| target_from_source.transform_point(*s).distance_squared(*t))
        .sum();
    let rms_error = (squared_error / source.len() as f64).sqrt();

    Some(LandmarkResult {
        target_from_source,
        rms_error,
    })
}

fn centroid(points: &[DVec3]) -> DVec3 {
    points.iter().copied().sum::<DVec3>() / points.len() as f64
}

/// Kabsch: the rotation maximizing the correlation of the centered point sets.
fn optimal_rotation(
    source: &[DVec3],
    source_centroid: DVec3,
    target: &[DVec3],
    target_centroid: DVec3,
) -> Option<DMat3> {
    let mut covariance = Matrix3::<f64>::zeros();
    for (s, t) in source.iter().zip(target) {
        let s = to_na(*s - source_centroid);
        let t = to_na(*t - target_centroid);
        covariance += t * s.transpose();
    }

    let svd = covariance.svd(true, true);
    let mut u = svd.u?;
    let v_t = svd.v_t?;

    let mut rotation = u * v_t;

    // A reflection fits better than any rotation: flip the axis of least variance.
    if rotation.determinant() < 0.0 {
        let weakest = svd.singular_values.imin();
        let flipped = u.column(weakest) * -1.0;
        u.set_column(weakest, &flipped);
        rotation = u * v_t;
    }

    Some(DMat3::from_cols_array(&[
        rotation[(0, 0)],
        rotation[(1, 0)],
        rotation[(2, 0)],
        rotation[(0, 1)],
        rotation[(1, 1)],
        rotation[(2, 1)],
        rotation[(0, 2)],
        rotation[(1, 2)],
        rotation[(2, 2)],
    ]))
}

#[inline]
fn to_na(v: DVec3) -> nalgebra::Vector3<f64> {
    nalgebra::Vector3::new(v.x, v.y, v.z)
}

#[cfg(test)]
mod tests {
    use glam::DQuat;

    use super::*;

    fn triangle() -> Vec<DVec3> {
        vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(10.0, 0.0, 0.0),
            DVec3::new(0.0, 20.0, 0.0),
        ]
    }

    #[test]
    fn recovers_a_rigid_transform() {
        let known = Transform::from_rotation_translation(
            DQuat::from_euler(glam::EulerRot::XYZ, 0.4, -1.2, 2.5),
            DVec3::new(12.0, -3.0, 40.0),
        );
        let source = triangle();
        let target: Vec<DVec3> = source.iter().map(|p| known.transform_point(*p)).collect();

        let result = register_points(&source, &target, false).unwrap();
        assert!(result.target_from_source.approx_eq(&known, 1e-3));
        assert!(result.target_from_source.is_rigid(1e-9));
        assert!(result.rms_error < 1e-9);
    }

    #[test]
    fn mirrored_points_still_give_a_rotation() {
        let source = vec![
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(1.0, 1.0, 1.0),
        ];
        let target: Vec<DVec3> = source.iter().map(|p| DVec3::new(-p.x, p.y, p.z)).collect();

        let result = register_points(&source, &target, false).unwrap();
        assert!(result.target_from_source.is_rigid(1e-9));
        assert!(result.target_from_source.linear().determinant() > 0.0);
        assert!(result.rms_error > 0.1);
    }

    #[test]
    fn translation_only_matches_centroids() {
        let source = triangle();
        let shift = DVec3::new(1.0, 2.0, 3.0);
        let rotated = Transform::from_axis_angle(DVec3::Z, 0.3);
        let target: Vec<DVec3> = source
            .iter()
            .map(|p| rotated.transform_point(*p) + shift)
            .collect();

        let result = register_points(&source, &target, true).unwrap();
        assert_eq!(result.target_from_source.linear(), DMat3::IDENTITY);
        let expected = centroid(&target) - centroid(&source);
        assert!(result.target_from_source.translation().abs_diff_eq(expected, 1e-12));

        // A single pair is enough for a translation.
        let single = register_points(&[DVec3::ZERO], &[shift], true).unwrap();
        assert_eq!(single.target_from_source, Transform::from_translation(shift));
    }

    #[test]
    fn insufficient_points() {
        let source = &triangle()[..2];
        assert_eq!(register_points(source, source, false), None);
        assert_eq!(register_points(&[], &[], true), None);
    }

    #[test]
    fn mismatched_or_non_finite_points() {
        let source = triangle();
        assert_eq!(register_points(&source, &source[..2], false), None);

        let mut target = triangle();
        target[1].x = f64::NAN;
        assert_eq!(register_points(&source, &target, false), None);
        assert_eq!(register_points(&source, &target, true), None);
    }
}
