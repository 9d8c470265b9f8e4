use glam::{DAffine3, DMat3, DMat4, DQuat, DVec3};

use crate::ParseError;

/// A rigid or general affine transform, i.e. a 4×4 matrix with bottom row `0 0 0 1`.
///
/// Naming convention: a transform called `a_from_b` (or `aMb`) maps points given in
/// `b` coordinates into `a` coordinates, so `a_from_b.compose(&b_from_c)` is `a_from_c`.
///
/// This is an immutable value type, all operations return new transforms.
#[derive(Clone, Copy, PartialEq)]
pub struct Transform(DAffine3);

impl Default for Transform {
    #[inline]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self(DAffine3::IDENTITY);

    #[inline]
    pub fn from_affine(affine: DAffine3) -> Self {
        Self(affine)
    }

    #[inline]
    pub fn from_translation(translation: DVec3) -> Self {
        Self(DAffine3::from_translation(translation))
    }

    #[inline]
    pub fn from_rotation_translation(rotation: DQuat, translation: DVec3) -> Self {
        Self(DAffine3::from_rotation_translation(rotation, translation))
    }

    /// Rotation of `angle` radians around `axis` (must be normalized) through the origin.
    #[inline]
    pub fn from_axis_angle(axis: DVec3, angle: f64) -> Self {
        Self(DAffine3::from_axis_angle(axis, angle))
    }

    #[inline]
    pub fn from_mat3_translation(linear: DMat3, translation: DVec3) -> Self {
        Self(DAffine3::from_mat3_translation(linear, translation))
    }

    /// Builds a transform from a row-major 4×4 matrix.
    ///
    /// Fails on non-finite entries, or if the bottom row isn't `0 0 0 1`.
    pub fn from_rows(rows: [[f64; 4]; 4]) -> Result<Self, ParseError> {
        if let Some(value) = rows.as_flattened().iter().find(|value| !value.is_finite()) {
            return Err(ParseError::InvalidNumber(value.to_string()));
        }

        let bottom = rows[3];
        let expected = [0.0, 0.0, 0.0, 1.0];
        if bottom
            .iter()
            .zip(expected)
            .any(|(value, expected)| (value - expected).abs() > 1e-9)
        {
            return Err(ParseError::NotAffine(format!("{bottom:?}")));
        }

        let mat4 = DMat4::from_cols_array_2d(&rows).transpose();
        Ok(Self(DAffine3::from_mat4(mat4)))
    }

    /// Row-major 4×4 matrix.
    pub fn to_rows(&self) -> [[f64; 4]; 4] {
        DMat4::from(self.0).transpose().to_cols_array_2d()
    }

    #[inline]
    pub fn as_affine(&self) -> &DAffine3 {
        &self.0
    }

    #[inline]
    pub fn linear(&self) -> DMat3 {
        self.0.matrix3
    }

    #[inline]
    pub fn translation(&self) -> DVec3 {
        self.0.translation
    }

    /// The same linear part without any translation.
    #[inline]
    pub fn rotation_part(&self) -> Self {
        Self::from_mat3_translation(self.0.matrix3, DVec3::ZERO)
    }

    /// `self ∘ other`: first apply `other`, then `self`.
    #[inline]
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        Self(self.0 * other.0)
    }

    /// The inverse transform.
    ///
    /// A singular matrix yields non-finite values, check with [`Self::is_finite`].
    #[inline]
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self(self.0.inverse())
    }

    #[inline]
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.0.transform_point3(point)
    }

    /// Applies only the linear part, i.e. ignores translation.
    #[inline]
    pub fn transform_vector(&self, vector: DVec3) -> DVec3 {
        self.0.transform_vector3(vector)
    }

    /// True if every matrix element differs by at most `tolerance`.
    #[inline]
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.0.abs_diff_eq(other.0, tolerance)
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.0.is_finite()
    }

    /// True if the linear part is a proper rotation (orthonormal, determinant +1).
    pub fn is_rigid(&self, tolerance: f64) -> bool {
        let m = self.0.matrix3;
        (m.transpose() * m).abs_diff_eq(DMat3::IDENTITY, tolerance)
            && (m.determinant() - 1.0).abs() <= tolerance
    }

    /// Whitespace delimited, row-major numbers, one matrix row per line.
    ///
    /// Numbers are printed with full round-trip precision.
    pub fn to_matrix_text(&self) -> String {
        self.to_rows()
            .iter()
            .map(|row| {
                row.iter()
                    .map(|value| value.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parses the output of [`Self::to_matrix_text`]. Any whitespace is accepted as delimiter.
    pub fn from_matrix_text(text: &str) -> Result<Self, ParseError> {
        let numbers = text
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f64>()
                    .ok()
                    .filter(|value| value.is_finite())
                    .ok_or_else(|| ParseError::InvalidNumber(token.to_owned()))
            })
            .collect::<Result<Vec<f64>, _>>()?;

        if numbers.len() != 16 {
            return Err(ParseError::MatrixLength(numbers.len()));
        }

        let mut rows = [[0.0; 4]; 4];
        for (i, value) in numbers.into_iter().enumerate() {
            rows[i / 4][i % 4] = value;
        }
        Self::from_rows(rows)
    }
}

impl std::ops::Mul for Transform {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self.compose(&rhs)
    }
}

impl From<DAffine3> for Transform {
    #[inline]
    fn from(affine: DAffine3) -> Self {
        Self(affine)
    }
}

impl From<Transform> for DAffine3 {
    #[inline]
    fn from(transform: Transform) -> Self {
        transform.0
    }
}

impl std::str::FromStr for Transform {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_matrix_text(s)
    }
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rows = self.to_rows();
        f.debug_struct("Transform")
            .field("row0", &rows[0])
            .field("row1", &rows[1])
            .field("row2", &rows[2])
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use super::*;

    #[test]
    fn compose_applies_right_hand_side_first() {
        let translate = Transform::from_translation(DVec3::new(1.0, 0.0, 0.0));
        let rotate = Transform::from_axis_angle(DVec3::Z, FRAC_PI_2);

        let p = rotate.compose(&translate).transform_point(DVec3::ZERO);
        assert!(p.abs_diff_eq(DVec3::new(0.0, 1.0, 0.0), 1e-12));

        let p = translate.compose(&rotate).transform_point(DVec3::ZERO);
        assert!(p.abs_diff_eq(DVec3::new(1.0, 0.0, 0.0), 1e-12));
    }

    #[test]
    fn vectors_ignore_translation() {
        let t = Transform::from_translation(DVec3::new(5.0, 6.0, 7.0));
        assert_eq!(t.transform_vector(DVec3::X), DVec3::X);
        assert_eq!(t.transform_point(DVec3::X), DVec3::new(6.0, 6.0, 7.0));
    }

    #[test]
    fn inverse_undoes() {
        let t = Transform::from_rotation_translation(
            DQuat::from_euler(glam::EulerRot::ZYX, 0.3, -0.2, 1.1),
            DVec3::new(10.0, -4.0, 2.5),
        );
        assert!(t.compose(&t.inverse()).approx_eq(&Transform::IDENTITY, 1e-12));
        assert!(t.is_rigid(1e-9));
    }

    #[test]
    fn singular_inverse_is_not_finite() {
        let flat = Transform::from_mat3_translation(DMat3::ZERO, DVec3::ZERO);
        assert!(!flat.inverse().is_finite());
        assert!(!flat.is_rigid(1e-9));
    }

    #[test]
    fn matrix_text_is_exact() {
        let t = Transform::from_rotation_translation(
            DQuat::from_axis_angle(DVec3::new(1.0, 2.0, 3.0).normalize(), 0.7),
            DVec3::new(0.1, 1e-7, -123.456),
        );
        let text = t.to_matrix_text();
        assert_eq!(text.lines().count(), 4);
        assert_eq!(Transform::from_matrix_text(&text), Ok(t));

        // Any whitespace works:
        let single_line = text.replace('\n', "\t ");
        assert_eq!(single_line.parse::<Transform>(), Ok(t));
    }

    #[test]
    fn matrix_text_rejects_garbage() {
        assert_eq!(
            Transform::from_matrix_text("1 2 3"),
            Err(ParseError::MatrixLength(3))
        );
        assert!(matches!(
            Transform::from_matrix_text("1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 x"),
            Err(ParseError::InvalidNumber(_))
        ));
        assert!(matches!(
            Transform::from_matrix_text("1 0 0 0 0 1 0 0 0 0 1 0 0 0 2 1"),
            Err(ParseError::NotAffine(_))
        ));
    }

    #[test]
    fn rows_must_be_finite() {
        let mut rows = Transform::IDENTITY.to_rows();
        rows[3][1] = f64::NAN;
        assert!(matches!(
            Transform::from_rows(rows),
            Err(ParseError::InvalidNumber(_))
        ));

        let mut rows = Transform::IDENTITY.to_rows();
        rows[0][3] = f64::INFINITY;
        assert!(matches!(
            Transform::from_rows(rows),
            Err(ParseError::InvalidNumber(_))
        ));
    }
}
