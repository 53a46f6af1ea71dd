//! Narrow-phase collision detection for convex shapes.
//!
//! Intersections are found with GJK on the Minkowski difference of the two
//! shapes, and penetration depth and witness points are recovered with EPA.

mod epa;
mod gjk;

use crate::fph;
use crate::part::Part;
use crate::quantities::{Direction, Position};
use bytemuck::{Pod, Zeroable};
use kinetic_geometry::{CFrame, Shape};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A point of contact between two overlapping bodies A and B.
#[derive(Clone, Debug)]
pub struct Contact {
    /// The world-space point of A that penetrates deepest into B.
    pub position_on_a: Position,
    /// The world-space point of B that penetrates deepest into A.
    pub position_on_b: Position,
    /// The unit direction, pointing from B toward A, along which A must move
    /// to exit B.
    pub normal: Direction,
    /// The distance between the two witness points along the normal. Always
    /// non-negative for overlapping bodies.
    pub depth: fph,
}

/// Counters for the collision pipeline, accumulated over the lifetime of a
/// world and read by observers for diagnostics. Stale reads are acceptable.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod, Serialize, Deserialize)]
pub struct TickTelemetry {
    /// Narrow-phase queries in which GJK found an intersection.
    pub gjk_collisions: u64,
    /// Narrow-phase queries in which GJK proved the shapes disjoint.
    pub gjk_misses: u64,
    /// Penetration-depth computations performed with EPA.
    pub epa_runs: u64,
    /// GJK runs abandoned at the iteration cap; the pair is treated as
    /// non-colliding for the tick.
    pub gjk_divergences: u64,
    /// EPA runs abandoned at the iteration cap; the pair is treated as
    /// non-colliding for the tick.
    pub epa_divergences: u64,
}

/// A support point of the Minkowski difference A ⊖ B, carrying the
/// contributing points of both shapes (in A's local frame).
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct SupportPoint {
    pub minkowski: Vector3<fph>,
    pub on_a: Vector3<fph>,
    pub on_b: Vector3<fph>,
}

/// The support function of the Minkowski difference of two placed shapes,
/// evaluated in A's local frame.
pub(crate) struct MinkowskiSupport<'a> {
    shape_a: &'a Shape,
    shape_b: &'a Shape,
    b_to_a: CFrame,
}

impl<'a> MinkowskiSupport<'a> {
    pub(crate) fn new(shape_a: &'a Shape, shape_b: &'a Shape, b_to_a: CFrame) -> Self {
        Self {
            shape_a,
            shape_b,
            b_to_a,
        }
    }

    pub(crate) fn support(&self, direction: &Vector3<fph>) -> SupportPoint {
        let on_a = self.shape_a.support_point(direction);
        let direction_in_b = self.b_to_a.relative_to_local(&-direction);
        let on_b = self
            .b_to_a
            .local_to_global(&self.shape_b.support_point(&direction_in_b));
        SupportPoint {
            minkowski: on_a.coords - on_b.coords,
            on_a: on_a.coords,
            on_b: on_b.coords,
        }
    }
}

/// Tests the two placed parts for overlap, producing a contact when they
/// intersect.
///
/// Non-convergence of GJK or EPA within their iteration caps is counted in
/// the telemetry and treated as no collision for this query.
pub fn intersect_parts(
    part_a: &Part,
    part_b: &Part,
    telemetry: &mut TickTelemetry,
) -> Option<Contact> {
    let b_to_a = part_a.cframe().global_to_local_frame(part_b.cframe());

    let center_a = part_a.shape().local_center_of_mass();
    let center_b = b_to_a.local_to_global(&part_b.shape().local_center_of_mass());
    let mut initial_direction = center_a - center_b;
    if initial_direction.norm_squared() < 1e-12 {
        initial_direction = Vector3::x();
    }

    let support = MinkowskiSupport::new(part_a.shape(), part_b.shape(), b_to_a);

    let simplex = match gjk::run_gjk(&support, initial_direction) {
        gjk::GjkResult::Disjoint => {
            telemetry.gjk_misses += 1;
            return None;
        }
        gjk::GjkResult::OutOfIterations => {
            telemetry.gjk_divergences += 1;
            return None;
        }
        gjk::GjkResult::Intersecting(simplex) => {
            telemetry.gjk_collisions += 1;
            simplex
        }
    };

    telemetry.epa_runs += 1;
    let Some(penetration) = epa::run_epa(&support, simplex) else {
        telemetry.epa_divergences += 1;
        return None;
    };

    // EPA works in A's local frame; express the contact in world space. The
    // outward hull normal is the direction A must move against, so the
    // contact normal from B toward A is its negation.
    let cframe_a = part_a.cframe();
    Some(Contact {
        position_on_a: cframe_a.local_to_global(&Position::from(penetration.on_a)),
        position_on_b: cframe_a.local_to_global(&Position::from(penetration.on_b)),
        normal: Direction::new_normalize(
            cframe_a.local_to_relative(&-penetration.hull_normal),
        ),
        depth: penetration.depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::PartProperties;
    use approx::assert_abs_diff_eq;
    use kinetic_geometry::GlobalCFrame;
    use nalgebra::{point, vector, UnitQuaternion};

    fn part_with(shape: Shape, position: Position) -> Part {
        Part::new(
            shape,
            GlobalCFrame::at_position(position),
            PartProperties::new(1.0, 0.5, 0.0),
        )
    }

    #[test]
    fn separated_cubes_should_not_collide() {
        let part_a = part_with(Shape::cuboid(1.0, 1.0, 1.0), point![0.0, 0.0, 0.0]);
        let part_b = part_with(Shape::cuboid(1.0, 1.0, 1.0), point![3.0, 0.0, 0.0]);
        let mut telemetry = TickTelemetry::default();
        assert!(intersect_parts(&part_a, &part_b, &mut telemetry).is_none());
        assert_eq!(telemetry.gjk_misses, 1);
        assert_eq!(telemetry.gjk_collisions, 0);
    }

    #[test]
    fn overlapping_spheres_should_produce_expected_contact() {
        let part_a = part_with(Shape::sphere(2.0), point![0.5, 0.0, 0.0]);
        let part_b = part_with(Shape::sphere(2.0), point![0.0, 0.0, 0.0]);
        let mut telemetry = TickTelemetry::default();
        let contact = intersect_parts(&part_a, &part_b, &mut telemetry)
            .expect("Overlapping spheres did not collide");

        assert_eq!(telemetry.gjk_collisions, 1);
        assert_eq!(telemetry.epa_runs, 1);

        // A sits at +x of B, so A exits B along +x. The curved hull is
        // expanded to the face tolerance, so the witness data is only
        // accurate to the size of the final face
        assert_abs_diff_eq!(*contact.normal.as_ref(), vector![1.0, 0.0, 0.0], epsilon = 1e-3);
        assert_abs_diff_eq!(contact.depth, 1.5, epsilon = 1e-5);
        assert_abs_diff_eq!(
            contact.position_on_a,
            point![-0.5, 0.0, 0.0],
            epsilon = 1e-3
        );
        assert_abs_diff_eq!(contact.position_on_b, point![1.0, 0.0, 0.0], epsilon = 1e-3);
    }

    #[test]
    fn overlapping_cubes_should_report_axis_aligned_exit() {
        let part_a = part_with(Shape::cuboid(1.0, 1.0, 1.0), point![0.8, 0.0, 0.0]);
        let part_b = part_with(Shape::cuboid(1.0, 1.0, 1.0), point![0.0, 0.0, 0.0]);
        let mut telemetry = TickTelemetry::default();
        let contact = intersect_parts(&part_a, &part_b, &mut telemetry)
            .expect("Overlapping cubes did not collide");

        assert_abs_diff_eq!(*contact.normal.as_ref(), vector![1.0, 0.0, 0.0], epsilon = 1e-6);
        assert_abs_diff_eq!(contact.depth, 0.2, epsilon = 1e-6);
    }

    #[test]
    fn rotated_cube_should_still_collide_with_ground_box() {
        let rotation = UnitQuaternion::from_scaled_axis(vector![
            std::f64::consts::FRAC_PI_4,
            0.0,
            0.0
        ]);
        let part_a = Part::new(
            Shape::cuboid(1.0, 1.0, 1.0),
            GlobalCFrame::new(point![0.0, 0.9, 0.0], rotation),
            PartProperties::new(1.0, 0.5, 0.0),
        );
        let ground = part_with(Shape::cuboid(10.0, 1.0, 10.0), point![0.0, 0.0, 0.0]);
        let mut telemetry = TickTelemetry::default();
        let contact = intersect_parts(&part_a, &ground, &mut telemetry)
            .expect("Rotated cube resting in ground did not collide");
        // The cube exits the ground upward
        assert!(contact.normal.y > 0.9);
    }

    #[test]
    fn deep_containment_should_still_converge() {
        let part_a = part_with(Shape::sphere(0.5), point![0.0, 0.05, 0.0]);
        let part_b = part_with(Shape::cuboid(4.0, 4.0, 4.0), point![0.0, 0.0, 0.0]);
        let mut telemetry = TickTelemetry::default();
        let contact = intersect_parts(&part_a, &part_b, &mut telemetry);
        assert!(contact.is_some());
    }
}
