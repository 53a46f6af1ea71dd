//! Rigid body parts.

use crate::inertia::InertialProperties;
use crate::material::PartProperties;
use crate::quantities::Position;
use crate::fph;
use kinetic_geometry::{Aabb, GlobalCFrame, Shape};
use nalgebra::{Matrix3, Vector3};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier for a [`Part`], unique within the process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartId(u64);

static PART_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

impl PartId {
    fn next() -> Self {
        Self(PART_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value of the identifier.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// The smallest rigid primitive: a convex shape placed in the world with a
/// set of material properties.
///
/// A part is owned by the physical it is attached to, or by the world when it
/// serves as terrain; parts move only through operations on their owner.
#[derive(Clone, Debug)]
pub struct Part {
    id: PartId,
    shape: Shape,
    cframe: GlobalCFrame,
    properties: PartProperties,
    inertial: InertialProperties,
}

impl Part {
    /// Creates a new part with the given shape, placement and material
    /// properties.
    pub fn new(shape: Shape, cframe: GlobalCFrame, properties: PartProperties) -> Self {
        let inertial = InertialProperties::of_shape(&shape, properties.density);
        Self {
            id: PartId::next(),
            shape,
            cframe,
            properties,
            inertial,
        }
    }

    /// Returns the identifier of the part.
    pub fn id(&self) -> PartId {
        self.id
    }

    /// Returns the shape of the part.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the world frame of the part.
    pub fn cframe(&self) -> &GlobalCFrame {
        &self.cframe
    }

    /// Places the part at the given world frame.
    pub(crate) fn set_cframe(&mut self, cframe: GlobalCFrame) {
        self.cframe = cframe;
    }

    /// Returns the material properties of the part.
    pub fn properties(&self) -> &PartProperties {
        &self.properties
    }

    /// Returns the mass of the part.
    pub fn mass(&self) -> fph {
        self.inertial.mass()
    }

    /// Returns the center of mass of the part in its local frame.
    pub fn local_center_of_mass(&self) -> &Position {
        self.inertial.center_of_mass()
    }

    /// Returns the inertia tensor of the part around its center of mass, in
    /// its local frame.
    pub fn local_inertia(&self) -> &Matrix3<fph> {
        self.inertial.inertia_tensor()
    }

    /// Returns the center of mass of the part in world space.
    pub fn world_center_of_mass(&self) -> Position {
        self.cframe.local_to_global(self.inertial.center_of_mass())
    }

    /// Finds the point on the part lying farthest in the given world-space
    /// direction.
    pub fn furthest_in_direction(&self, direction: &Vector3<fph>) -> Position {
        let local_direction = self.cframe.relative_to_local(direction);
        self.cframe
            .local_to_global(&self.shape.support_point(&local_direction))
    }

    /// Whether the given world-space point lies inside the part.
    pub fn contains_point(&self, point: &Position) -> bool {
        self.shape.contains_point(&self.cframe.global_to_local(point))
    }

    /// Computes the axis-aligned box bounding the part in world space, from
    /// the support point of the oriented shape along each world axis.
    pub fn world_bounds(&self) -> Aabb {
        let mut lower = Position::origin();
        let mut upper = Position::origin();
        for axis in 0..3 {
            let mut direction = Vector3::zeros();
            direction[axis] = 1.0;
            upper[axis] = self.furthest_in_direction(&direction)[axis];
            lower[axis] = self.furthest_in_direction(&(-direction))[axis];
        }
        Aabb::new(lower, upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector, UnitQuaternion};

    fn unit_cube_part(cframe: GlobalCFrame) -> Part {
        Part::new(
            Shape::cuboid(1.0, 1.0, 1.0),
            cframe,
            PartProperties::new(1.0, 0.5, 0.0),
        )
    }

    #[test]
    fn part_ids_should_be_unique() {
        let part_a = unit_cube_part(GlobalCFrame::identity());
        let part_b = unit_cube_part(GlobalCFrame::identity());
        assert_ne!(part_a.id(), part_b.id());
    }

    #[test]
    fn world_bounds_of_axis_aligned_cube_should_be_tight() {
        let part = unit_cube_part(GlobalCFrame::at_position(point![2.0, 0.0, 0.0]));
        let bounds = part.world_bounds();
        assert_abs_diff_eq!(*bounds.lower_corner(), point![1.5, -0.5, -0.5], epsilon = 1e-12);
        assert_abs_diff_eq!(*bounds.upper_corner(), point![2.5, 0.5, 0.5], epsilon = 1e-12);
    }

    #[test]
    fn world_bounds_should_grow_under_rotation() {
        let rotation =
            UnitQuaternion::from_scaled_axis(vector![0.0, 0.0, std::f64::consts::FRAC_PI_4]);
        let part = unit_cube_part(GlobalCFrame::new(point![0.0, 0.0, 0.0], rotation));
        let bounds = part.world_bounds();
        let expected_half_extent = std::f64::consts::SQRT_2 / 2.0;
        assert_abs_diff_eq!(
            bounds.upper_corner().x,
            expected_half_extent,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(bounds.upper_corner().z, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn should_contain_world_points_inside_the_placed_shape() {
        let part = unit_cube_part(GlobalCFrame::at_position(point![5.0, 5.0, 5.0]));
        assert!(part.contains_point(&point![5.2, 5.2, 4.8]));
        assert!(!part.contains_point(&point![6.0, 5.0, 5.0]));
    }
}
