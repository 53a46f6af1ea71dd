//! Physical quantities.

use crate::fph;
use approx::AbsDiffEq;
use nalgebra::{Point3, UnitVector3, Vector3};
use serde::{Deserialize, Serialize};

/// A position in 3D space.
pub type Position = Point3<fph>;

/// A velocity in 3D space.
pub type Velocity = Vector3<fph>;

/// An angular velocity vector, whose direction is the axis of rotation and
/// whose magnitude is the angular speed.
pub type AngularVelocity = Vector3<fph>;

/// An acceleration in 3D space.
pub type Acceleration = Vector3<fph>;

/// An angular acceleration in 3D space.
pub type AngularAcceleration = Vector3<fph>;

/// A 3D force.
pub type Force = Vector3<fph>;

/// A 3D moment (torque).
pub type Moment = Vector3<fph>;

/// An impulse in 3D space.
pub type Impulse = Vector3<fph>;

/// An angular momentum in 3D space.
pub type AngularMomentum = Vector3<fph>;

/// A unit vector in 3D space.
pub type Direction = UnitVector3<fph>;

/// The linear and angular motion of a body, optionally with the
/// accelerations from the most recent step.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Motion {
    pub velocity: Velocity,
    pub angular_velocity: AngularVelocity,
    pub acceleration: Acceleration,
    pub angular_acceleration: AngularAcceleration,
}

impl Motion {
    /// Creates a new motion with the given linear and angular velocity and no
    /// recorded accelerations.
    pub fn new(velocity: Velocity, angular_velocity: AngularVelocity) -> Self {
        Self {
            velocity,
            angular_velocity,
            acceleration: Acceleration::zeros(),
            angular_acceleration: AngularAcceleration::zeros(),
        }
    }

    /// Motion with the given linear velocity and zero angular velocity.
    pub fn linear(velocity: Velocity) -> Self {
        Self::new(velocity, AngularVelocity::zeros())
    }

    /// Motion with the given angular velocity and zero linear velocity.
    pub fn angular(angular_velocity: AngularVelocity) -> Self {
        Self::new(Velocity::zeros(), angular_velocity)
    }

    /// No linear or angular motion.
    pub fn stationary() -> Self {
        Self::linear(Velocity::zeros())
    }

    /// Computes the velocity of the point at the given displacement from the
    /// center of mass when considered fixed to the moving body.
    pub fn velocity_of_point(&self, displacement: &Vector3<fph>) -> Velocity {
        self.velocity + self.angular_velocity.cross(displacement)
    }
}

impl AbsDiffEq for Motion {
    type Epsilon = <fph as AbsDiffEq>::Epsilon;

    fn default_epsilon() -> Self::Epsilon {
        fph::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        Velocity::abs_diff_eq(&self.velocity, &other.velocity, epsilon)
            && AngularVelocity::abs_diff_eq(
                &self.angular_velocity,
                &other.angular_velocity,
                epsilon,
            )
    }
}

/// A value together with its first and second time derivatives.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Taylor<T> {
    pub value: T,
    pub first_derivative: T,
    pub second_derivative: T,
}
