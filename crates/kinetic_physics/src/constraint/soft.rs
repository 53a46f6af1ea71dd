//! Joints enforced by impulse each tick.

use crate::fph;
use crate::physical::MotorizedPhysical;
use crate::quantities::Position;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A ball-and-socket joint between two physicals, defined by an attach point
/// on each body (expressed in the respective root main frame).
///
/// The joint is enforced by applying equal and opposite impulses at the two
/// attach points each tick, driving their world-space velocities together,
/// followed by a positional correction that closes any remaining gap between
/// them.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BallConstraint {
    pub attach_a: Position,
    pub attach_b: Position,
}

/// A joint between two physicals enforced by impulse.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SoftConstraint {
    Ball(BallConstraint),
}

/// A soft constraint between two physicals, identified by their indices in
/// the world's physical list.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysicalConstraint {
    pub physical_a: usize,
    pub physical_b: usize,
    pub constraint: SoftConstraint,
}

/// A set of soft constraints solved together once per tick.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConstraintGroup {
    pub constraints: Vec<PhysicalConstraint>,
}

/// Configuration parameters for solving soft constraints.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintSolverConfig {
    /// The number of impulse iterations to perform over each group.
    pub n_iterations: u32,
    /// The fraction of the current positional error to correct each tick.
    pub positional_correction_factor: fph,
}

impl Default for ConstraintSolverConfig {
    fn default() -> Self {
        Self {
            n_iterations: 8,
            positional_correction_factor: 0.8,
        }
    }
}

impl ConstraintGroup {
    /// Creates a new group containing the given constraints.
    pub fn new(constraints: Vec<PhysicalConstraint>) -> Self {
        Self { constraints }
    }

    /// Solves the group once: every constraint computes and applies its
    /// impulses for the configured number of iterations, then the positional
    /// errors are corrected.
    ///
    /// # Panics
    /// If a constraint connects a physical to itself or refers to a physical
    /// index that does not exist.
    pub fn solve(&self, physicals: &mut [MotorizedPhysical], config: &ConstraintSolverConfig) {
        for _ in 0..config.n_iterations {
            for constraint in &self.constraints {
                apply_constraint_impulses(constraint, physicals);
            }
        }
        for constraint in &self.constraints {
            apply_positional_correction(constraint, physicals, config.positional_correction_factor);
        }
    }
}

fn bodies_of_constraint<'a>(
    constraint: &PhysicalConstraint,
    physicals: &'a mut [MotorizedPhysical],
) -> [&'a mut MotorizedPhysical; 2] {
    assert_ne!(
        constraint.physical_a, constraint.physical_b,
        "Tried solving a soft constraint connecting a physical to itself"
    );
    physicals
        .get_disjoint_mut([constraint.physical_a, constraint.physical_b])
        .expect("Soft constraint refers to missing physical")
}

fn apply_constraint_impulses(
    constraint: &PhysicalConstraint,
    physicals: &mut [MotorizedPhysical],
) {
    let [body_a, body_b] = bodies_of_constraint(constraint, physicals);
    let SoftConstraint::Ball(ball) = &constraint.constraint;

    let point_a = body_a.cframe().local_to_global(&ball.attach_a);
    let point_b = body_b.cframe().local_to_global(&ball.attach_b);

    let offset_a = point_a - body_a.world_center_of_mass();
    let offset_b = point_b - body_b.world_center_of_mass();

    let velocity_a = body_a.motion().velocity_of_point(&offset_a);
    let velocity_b = body_b.motion().velocity_of_point(&offset_b);
    let relative_velocity = velocity_a - velocity_b;

    // The impulse that drives the two attach point velocities together
    // follows from the combined point acceleration matrices
    let response_a = world_point_acceleration_matrix(body_a, &offset_a);
    let response_b = world_point_acceleration_matrix(body_b, &offset_b);
    let Some(inverse_response) = (response_a + response_b).try_inverse() else {
        return;
    };
    let impulse = inverse_response * (-relative_velocity);

    body_a.apply_impulse(offset_a, impulse);
    body_b.apply_impulse(offset_b, -impulse);
}

fn apply_positional_correction(
    constraint: &PhysicalConstraint,
    physicals: &mut [MotorizedPhysical],
    correction_factor: fph,
) {
    let [body_a, body_b] = bodies_of_constraint(constraint, physicals);
    let SoftConstraint::Ball(ball) = &constraint.constraint;

    let point_a = body_a.cframe().local_to_global(&ball.attach_a);
    let point_b = body_b.cframe().local_to_global(&ball.attach_b);
    let separation = point_b - point_a;

    let inverse_mass_a = 1.0 / body_a.total_mass();
    let inverse_mass_b = 1.0 / body_b.total_mass();
    let total_inverse_mass = inverse_mass_a + inverse_mass_b;

    let correction = separation * correction_factor;
    body_a.translate(&(correction * (inverse_mass_a / total_inverse_mass)));
    body_b.translate(&(-correction * (inverse_mass_b / total_inverse_mass)));
}

fn world_point_acceleration_matrix(
    body: &MotorizedPhysical,
    world_offset: &Vector3<fph>,
) -> nalgebra::Matrix3<fph> {
    let rotation = body.cframe().rotation().to_rotation_matrix();
    let local_offset = body.cframe().relative_to_local(world_offset);
    let local_matrix = body.point_acceleration_matrix(&local_offset);
    rotation * local_matrix * rotation.transpose()
}
