//! End-to-end tests of the assembled engine.

use approx::assert_abs_diff_eq;
use kinetic::geometry::{GlobalCFrame, Shape};
use kinetic::physics::force::ExternalForce;
use kinetic::physics::material::PartProperties;
use kinetic::physics::part::Part;
use kinetic::physics::world::World;
use kinetic::{Simulation, Ticker, TickerConfig};
use nalgebra::{point, vector};

fn falling_cube_world() -> World {
    let mut world = World::new();
    world.add_part(Part::new(
        Shape::cuboid(1.0, 1.0, 1.0),
        GlobalCFrame::at_position(point![0.0, 10.0, 0.0]),
        PartProperties::new(1.0, 0.5, 0.0),
    ));
    world.add_external_force(ExternalForce::DirectionalGravity {
        gravity: vector![0.0, -10.0, 0.0],
    });
    world
}

#[test]
fn single_stepping_should_reproduce_free_fall() {
    let simulation = Simulation::new(falling_cube_world());
    let ticker = Ticker::new(simulation.clone(), TickerConfig::default()).unwrap();
    ticker.set_speed(0.0);

    for _ in 0..120 {
        ticker.run_tick();
    }

    simulation.async_read_only_operation(|world| {
        assert_eq!(world.age(), 120);
        let body = &world.physicals()[0];
        assert_abs_diff_eq!(body.cframe().position().y, 5.0, epsilon = 0.01);
        assert_abs_diff_eq!(body.motion().velocity.y, -10.0, epsilon = 1e-9);
    });
}

#[test]
fn observers_should_see_consistent_state_while_the_ticker_runs() {
    let simulation = Simulation::new(falling_cube_world());
    let config = TickerConfig {
        ticks_per_second: 480.0,
        ..TickerConfig::default()
    };
    let mut ticker = Ticker::new(simulation.clone(), config).unwrap();
    ticker.start();

    let mut last_age = 0;
    for _ in 0..50 {
        simulation.async_read_only_operation(|world| {
            assert!(world.age() >= last_age);
            assert!(world.is_valid());
            last_age = world.age();
        });
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    // Mutation through the gate composes with the running loop
    simulation.async_modification(|world| {
        world.add_part(Part::new(
            Shape::sphere(1.0),
            GlobalCFrame::at_position(point![5.0, 10.0, 0.0]),
            PartProperties::new(1.0, 0.5, 0.0),
        ));
    });
    simulation.async_read_only_operation(|world| {
        assert_eq!(world.physicals().len(), 2);
        assert!(world.is_valid());
    });

    ticker.stop();
}
