//! Kinematic joints enforced by construction.

use crate::fph;
use crate::quantities::{AngularAcceleration, AngularVelocity, Acceleration, Velocity};
use kinetic_geometry::CFrame;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// The motion a hard constraint imposes on its child attach frame relative to
/// its parent attach frame, up to second order in time.
///
/// All vectors are expressed in the parent attach frame.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RelativeMotion {
    /// The frame of the child attach relative to the parent attach.
    pub cframe: CFrame,
    /// The first time derivative of the relative position.
    pub velocity: Velocity,
    /// The second time derivative of the relative position.
    pub acceleration: Acceleration,
    /// The relative angular velocity.
    pub angular_velocity: AngularVelocity,
    /// The relative angular acceleration.
    pub angular_acceleration: AngularAcceleration,
}

impl RelativeMotion {
    /// The identity relative motion: coincident frames with zero derivatives.
    pub fn stationary() -> Self {
        Self {
            cframe: CFrame::identity(),
            velocity: Velocity::zeros(),
            acceleration: Acceleration::zeros(),
            angular_velocity: AngularVelocity::zeros(),
            angular_acceleration: AngularAcceleration::zeros(),
        }
    }
}

/// A kinematic joint connecting a child physical to its parent. The joint
/// fully determines the relative placement of the two attach frames; its
/// internal state advances with simulation time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum HardConstraint {
    Fixed(FixedConstraint),
    SinusoidalPiston(SinusoidalPistonConstraint),
    ConstantSpeedMotor(ConstantSpeedMotorConstraint),
}

/// A rigid weld: the attach frames coincide at all times.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FixedConstraint;

/// A one-degree-of-freedom linear joint translating the child attach frame
/// along its z-axis, sweeping sinusoidally between a minimum and maximum
/// stroke over a fixed period.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SinusoidalPistonConstraint {
    pub min_length: fph,
    pub max_length: fph,
    pub period: fph,
    current_step_in_period: fph,
}

/// A one-degree-of-freedom revolute joint rotating the child attach frame
/// about its z-axis at a constant angular speed.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstantSpeedMotorConstraint {
    pub speed: fph,
    current_angle: fph,
}

impl HardConstraint {
    /// Advances the internal state of the constraint by the given duration.
    pub fn update(&mut self, dt: fph) {
        match self {
            Self::Fixed(_) => {}
            Self::SinusoidalPiston(piston) => piston.update(dt),
            Self::ConstantSpeedMotor(motor) => motor.update(dt),
        }
    }

    /// Returns the relative motion of the child attach frame with respect to
    /// the parent attach frame at the current state.
    pub fn relative_motion(&self) -> RelativeMotion {
        match self {
            Self::Fixed(_) => RelativeMotion::stationary(),
            Self::SinusoidalPiston(piston) => piston.relative_motion(),
            Self::ConstantSpeedMotor(motor) => motor.relative_motion(),
        }
    }
}

impl SinusoidalPistonConstraint {
    /// Creates a new piston sweeping between the given stroke lengths over
    /// the given period, starting at the minimum.
    ///
    /// # Panics
    /// If the period does not exceed zero.
    pub fn new(min_length: fph, max_length: fph, period: fph) -> Self {
        assert!(
            period > 0.0,
            "Tried creating piston constraint with period not exceeding zero"
        );
        Self {
            min_length,
            max_length,
            period,
            current_step_in_period: 0.0,
        }
    }

    /// Returns the phase of the piston within its period.
    pub fn current_step_in_period(&self) -> fph {
        self.current_step_in_period
    }

    fn update(&mut self, dt: fph) {
        self.current_step_in_period = (self.current_step_in_period + dt) % self.period;
    }

    fn relative_motion(&self) -> RelativeMotion {
        let angular_frequency = std::f64::consts::TAU / self.period;
        let phase_angle = angular_frequency * self.current_step_in_period;
        let stroke = self.max_length - self.min_length;

        let length = self.min_length + stroke * 0.5 * (1.0 - phase_angle.cos());
        let speed = stroke * 0.5 * phase_angle.sin() * angular_frequency;
        let acceleration =
            stroke * 0.5 * phase_angle.cos() * angular_frequency * angular_frequency;

        RelativeMotion {
            cframe: CFrame::from_translation(Vector3::new(0.0, 0.0, length)),
            velocity: Velocity::new(0.0, 0.0, speed),
            acceleration: Acceleration::new(0.0, 0.0, acceleration),
            angular_velocity: AngularVelocity::zeros(),
            angular_acceleration: AngularAcceleration::zeros(),
        }
    }
}

impl ConstantSpeedMotorConstraint {
    /// Creates a new motor rotating at the given angular speed, starting at
    /// angle zero.
    pub fn new(speed: fph) -> Self {
        Self {
            speed,
            current_angle: 0.0,
        }
    }

    /// Returns the current rotation angle of the motor.
    pub fn current_angle(&self) -> fph {
        self.current_angle
    }

    fn update(&mut self, dt: fph) {
        self.current_angle = (self.current_angle + self.speed * dt) % std::f64::consts::TAU;
    }

    fn relative_motion(&self) -> RelativeMotion {
        RelativeMotion {
            cframe: CFrame::from_rotation(UnitQuaternion::from_scaled_axis(Vector3::new(
                0.0,
                0.0,
                self.current_angle,
            ))),
            velocity: Velocity::zeros(),
            acceleration: Acceleration::zeros(),
            angular_velocity: AngularVelocity::new(0.0, 0.0, self.speed),
            angular_acceleration: AngularAcceleration::zeros(),
        }
    }
}
