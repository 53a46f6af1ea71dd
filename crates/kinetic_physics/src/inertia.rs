//! Computation and representation of inertia-related properties.

use crate::fph;
use crate::quantities::Position;
use kinetic_geometry::Shape;
use kinetic_math::skew_symmetric_squared;
use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// The regularization added to the diagonal of an inertia tensor that cannot
/// be inverted.
pub const INERTIA_REGULARIZATION: fph = 1e-9;

/// The inertia-related properties of a rigid body: its mass, its center of
/// mass and its inertia tensor defined with respect to the center of mass.
#[derive(Clone, Debug, PartialEq)]
pub struct InertialProperties {
    mass: fph,
    center_of_mass: Position,
    inertia_tensor: Matrix3<fph>,
}

impl InertialProperties {
    /// Creates a new set of inertial properties.
    ///
    /// # Panics
    /// If the given mass does not exceed zero.
    pub fn new(mass: fph, center_of_mass: Position, inertia_tensor: Matrix3<fph>) -> Self {
        assert!(
            mass > 0.0,
            "Tried creating body with mass not exceeding zero"
        );
        Self {
            mass,
            center_of_mass,
            inertia_tensor,
        }
    }

    /// Computes the inertial properties of the given uniformly dense shape.
    pub fn of_shape(shape: &Shape, mass_density: fph) -> Self {
        Self::new(
            shape.volume() * mass_density,
            shape.local_center_of_mass(),
            shape.unit_density_inertia() * mass_density,
        )
    }

    /// Returns the mass of the body.
    pub fn mass(&self) -> fph {
        self.mass
    }

    /// Returns the center of mass of the body (in the body's local frame).
    pub fn center_of_mass(&self) -> &Position {
        &self.center_of_mass
    }

    /// Returns the inertia tensor of the body, defined with respect to the
    /// center of mass.
    pub fn inertia_tensor(&self) -> &Matrix3<fph> {
        &self.inertia_tensor
    }
}

/// Computes the inertia tensor corresponding to rotating the body with the
/// given rotation quaternion.
pub fn rotated_inertia_tensor(
    inertia_tensor: &Matrix3<fph>,
    rotation: &UnitQuaternion<fph>,
) -> Matrix3<fph> {
    let rotation_matrix = rotation.to_rotation_matrix();
    rotation_matrix * inertia_tensor * rotation_matrix.transpose()
}

/// Uses the parallel axis theorem to compute the matrix that must be added to
/// an inertia tensor defined with respect to the center of mass for it to be
/// defined with respect to the point at the given displacement from the
/// center of mass.
pub fn parallel_axis_shift(mass: fph, displacement_from_com: &Vector3<fph>) -> Matrix3<fph> {
    -mass * skew_symmetric_squared(displacement_from_com)
}

/// Inverts the given inertia tensor, regularizing the diagonal if the tensor
/// is too close to singular to invert.
///
/// Returns the inverse together with whether regularization was needed.
pub fn invert_inertia_tensor(inertia_tensor: &Matrix3<fph>) -> (Matrix3<fph>, bool) {
    if let Some(inverse) = inertia_tensor.try_inverse() {
        (inverse, false)
    } else {
        let regularized =
            inertia_tensor + Matrix3::from_diagonal_element(INERTIA_REGULARIZATION);
        let inverse = regularized
            .try_inverse()
            .expect("Regularized inertia tensor is singular");
        (inverse, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use kinetic_geometry::{ConvexPolyhedron, Shape, ShapeClass};
    use nalgebra::vector;

    #[test]
    fn box_shape_properties_should_match_analytic_formula() {
        let properties = InertialProperties::of_shape(&Shape::cuboid(1.0, 2.0, 3.0), 2.0);
        assert_abs_diff_eq!(properties.mass(), 12.0, epsilon = 1e-12);
        assert_abs_diff_eq!(*properties.center_of_mass(), Position::origin(), epsilon = 1e-12);
        assert_abs_diff_eq!(
            properties.inertia_tensor()[(0, 0)],
            12.0 / 12.0 * (4.0 + 9.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn triangulated_box_inertia_should_approach_analytic_inertia() {
        let analytic = InertialProperties::of_shape(&Shape::cuboid(1.0, 2.0, 3.0), 1.0);
        let class = ShapeClass::convex(ConvexPolyhedron::unit_box());
        let meshed = InertialProperties::of_shape(&Shape::new(class, 1.0, 2.0, 3.0), 1.0);
        assert_abs_diff_eq!(meshed.mass(), analytic.mass(), epsilon = 1e-9);
        assert_abs_diff_eq!(
            *meshed.inertia_tensor(),
            *analytic.inertia_tensor(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn parallel_axis_shift_should_match_point_mass_formula() {
        let shift = parallel_axis_shift(2.0, &vector![0.0, 3.0, 0.0]);
        // A point mass displaced along y contributes m·d² about x and z
        assert_abs_diff_eq!(shift[(0, 0)], 18.0, epsilon = 1e-12);
        assert_abs_diff_eq!(shift[(1, 1)], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(shift[(2, 2)], 18.0, epsilon = 1e-12);
    }

    #[test]
    fn rotating_inertia_tensor_should_preserve_trace() {
        let inertia = Matrix3::from_diagonal(&vector![1.0, 2.0, 3.0]);
        let rotation = UnitQuaternion::from_scaled_axis(vector![0.3, -0.8, 0.5]);
        let rotated = rotated_inertia_tensor(&inertia, &rotation);
        assert_abs_diff_eq!(rotated.trace(), inertia.trace(), epsilon = 1e-9);
    }

    #[test]
    fn singular_inertia_should_be_regularized() {
        let singular = Matrix3::zeros();
        let (inverse, regularized) = invert_inertia_tensor(&singular);
        assert!(regularized);
        assert!(inverse[(0, 0)].is_finite());
    }
}
