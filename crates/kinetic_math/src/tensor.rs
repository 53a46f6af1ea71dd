//! Tensor and rotation helpers used throughout the simulation.

use nalgebra::{Matrix3, Rotation3, Vector3};

/// Constructs the skew-symmetric matrix `[v]×` such that `[v]× · w = v × w`
/// for any vector `w`.
#[inline]
pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// Constructs the square of the skew-symmetric matrix of `v`, which is the
/// symmetric matrix `[v]×² = v·vᵀ − |v|²·I`.
///
/// This is the matrix that appears in the parallel axis theorem for inertia
/// tensors.
#[inline]
pub fn skew_symmetric_squared(v: &Vector3<f64>) -> Matrix3<f64> {
    let norm_squared = v.norm_squared();
    v * v.transpose() - Matrix3::from_diagonal_element(norm_squared)
}

/// Conjugates the given symmetric matrix with the given rotation, computing
/// `R·S·Rᵀ`.
///
/// When `S` is an inertia tensor expressed in one basis, the result is the
/// same tensor expressed in the rotated basis.
#[inline]
pub fn transform_basis(symmetric: &Matrix3<f64>, rotation: &Rotation3<f64>) -> Matrix3<f64> {
    let rotation_matrix = rotation.matrix();
    rotation_matrix * symmetric * rotation_matrix.transpose()
}

/// Computes the rotation `exp([ω]×)` corresponding to the given rotation
/// vector, whose direction is the axis of rotation and whose magnitude is the
/// rotation angle in radians.
#[inline]
pub fn rotation_from_vector(rotation_vector: &Vector3<f64>) -> Rotation3<f64> {
    Rotation3::from_scaled_axis(*rotation_vector)
}
