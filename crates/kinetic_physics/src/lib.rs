//! Rigid-body dynamics, constraints and collision for the Kinetic physics
//! engine.

pub mod collision;
pub mod constraint;
pub mod force;
pub mod inertia;
pub mod material;
pub mod part;
pub mod physical;
pub mod quantities;
pub mod snapshot;
pub mod world;

/// Floating point type used for physics simulation.
#[allow(non_camel_case_types)]
pub type fph = f64;
