//! Hard (kinematic) and soft (impulse-based) constraints between bodies.

pub mod hard;
pub mod soft;

pub use hard::{
    ConstantSpeedMotorConstraint, FixedConstraint, HardConstraint, RelativeMotion,
    SinusoidalPistonConstraint,
};
pub use soft::{
    BallConstraint, ConstraintGroup, ConstraintSolverConfig, PhysicalConstraint, SoftConstraint,
};
