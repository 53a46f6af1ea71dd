//! An interactive 3D rigid-body physics engine.
//!
//! The engine simulates articulated multi-part bodies, resolves collisions
//! between them and with static terrain, and exposes forces, impulses and
//! constraints for a host application to drive. [`Simulation`] owns the
//! shared [`World`](kinetic_physics::world::World) and provides the gates
//! through which observers read and mutate it; [`Ticker`] steps it at a
//! fixed rate on a background thread.

pub mod simulation;
pub mod ticker;

pub use kinetic_geometry as geometry;
pub use kinetic_math as math;
pub use kinetic_physics as physics;

pub use simulation::Simulation;
pub use ticker::{Ticker, TickerConfig};
