//! Shared ownership of a world between the simulation thread and observers.

use kinetic_physics::world::World;
use parking_lot::RwLock;
use std::sync::Arc;

/// A handle to a simulated world, shared between the thread stepping the
/// simulation and any number of observer threads (typically a renderer).
///
/// A tick holds the world exclusively, so the closures passed to the access
/// gates run strictly between ticks and always observe a consistent world.
/// Observers must not retain references to parts across gate calls; parts
/// are re-validated by ID on the next access.
#[derive(Clone, Debug)]
pub struct Simulation {
    world: Arc<RwLock<World>>,
}

impl Simulation {
    /// Creates a new simulation owning the given world.
    pub fn new(world: World) -> Self {
        Self {
            world: Arc::new(RwLock::new(world)),
        }
    }

    /// Runs the given closure with mutable access to the world, between
    /// ticks. This is the only mutation path available to observers.
    pub fn async_modification<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        f(&mut self.world.write())
    }

    /// Runs the given closure with read access to the world, between ticks.
    pub fn async_read_only_operation<R>(&self, f: impl FnOnce(&World) -> R) -> R {
        f(&self.world.read())
    }

    pub(crate) fn world(&self) -> &Arc<RwLock<World>> {
        &self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinetic_physics::force::ExternalForce;
    use nalgebra::vector;

    #[test]
    fn modification_gate_should_expose_mutable_world() {
        let simulation = Simulation::new(World::new());
        simulation.async_modification(|world| {
            world.add_external_force(ExternalForce::DirectionalGravity {
                gravity: vector![0.0, -10.0, 0.0],
            });
        });
        let force_count =
            simulation.async_read_only_operation(|world| world.external_forces().len());
        assert_eq!(force_count, 1);
    }

    #[test]
    fn clones_should_share_the_same_world() {
        let simulation = Simulation::new(World::new());
        let observer = simulation.clone();
        simulation.async_modification(|world| {
            world.tick(1.0 / 120.0);
        });
        assert_eq!(observer.async_read_only_operation(|world| world.age()), 1);
    }
}
