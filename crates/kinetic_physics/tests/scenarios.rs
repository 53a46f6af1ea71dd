//! End-to-end simulation scenarios.

use approx::assert_abs_diff_eq;
use kinetic_geometry::{CFrame, GlobalCFrame, Shape};
use kinetic_physics::constraint::{
    BallConstraint, ConstantSpeedMotorConstraint, ConstraintGroup, HardConstraint,
    PhysicalConstraint, SinusoidalPistonConstraint, SoftConstraint,
};
use kinetic_physics::force::ExternalForce;
use kinetic_physics::material::PartProperties;
use kinetic_physics::part::Part;
use kinetic_physics::world::World;
use nalgebra::{point, vector, Point3, Vector3};

const TICK_RATE: f64 = 120.0;
const DT: f64 = 1.0 / TICK_RATE;

fn part(shape: Shape, position: Point3<f64>, properties: PartProperties) -> Part {
    Part::new(shape, GlobalCFrame::at_position(position), properties)
}

fn downward_gravity() -> ExternalForce {
    ExternalForce::DirectionalGravity {
        gravity: vector![0.0, -10.0, 0.0],
    }
}

#[test]
fn free_fall_should_match_constant_acceleration_kinematics() {
    let mut world = World::new();
    world.add_part(part(
        Shape::cuboid(1.0, 1.0, 1.0),
        point![0.0, 10.0, 0.0],
        PartProperties::new(1.0, 0.5, 0.0),
    ));
    world.add_external_force(downward_gravity());

    for _ in 0..TICK_RATE as usize {
        world.tick(DT);
    }

    let body = &world.physicals()[0];
    assert_abs_diff_eq!(body.cframe().position().y, 5.0, epsilon = 0.01);
    assert_abs_diff_eq!(body.motion().velocity.y, -10.0, epsilon = 1e-9);
    assert!(world.is_valid());
}

#[test]
fn free_fall_should_conserve_total_energy() {
    let mut world = World::new();
    world.add_part(part(
        Shape::cuboid(1.0, 1.0, 1.0),
        point![0.0, 100.0, 0.0],
        PartProperties::new(1.0, 0.5, 0.0),
    ));
    world.add_external_force(downward_gravity());

    let initial_energy = world.total_energy();
    for _ in 0..240 {
        world.tick(DT);
    }

    assert_abs_diff_eq!(world.total_energy(), initial_energy, epsilon = 1e-6);
}

#[test]
fn tick_momentum_change_should_equal_applied_external_impulse() {
    let mut world = World::new();
    world.add_part(part(
        Shape::cuboid(1.0, 2.0, 1.0),
        point![0.0, 10.0, 0.0],
        PartProperties::new(3.0, 0.5, 0.0),
    ));
    world.add_external_force(downward_gravity());

    let mass = world.physicals()[0].total_mass();
    let ticks = 60;
    for _ in 0..ticks {
        world.tick(DT);
    }

    let momentum = world.physicals()[0].motion().velocity * mass;
    let applied_impulse = vector![0.0, -10.0, 0.0] * mass * (f64::from(ticks) * DT);
    assert_abs_diff_eq!(momentum, applied_impulse, epsilon = 1e-6 * mass);
}

#[test]
fn motor_should_spin_child_at_set_speed_in_steady_state() {
    let cylinder = || {
        Part::new(
            Shape::cylinder(1.0, 1.0),
            GlobalCFrame::identity(),
            PartProperties::new(1.0, 0.5, 0.0),
        )
    };

    let mut world = World::new();
    let main_id = world.add_part(cylinder());
    world
        .attach_part_with_constraint(
            main_id,
            cylinder(),
            HardConstraint::ConstantSpeedMotor(ConstantSpeedMotorConstraint::new(1.0)),
            CFrame::identity(),
            CFrame::identity(),
        )
        .unwrap();

    let dt = 0.05;
    let steps = 40;
    for _ in 0..steps {
        world.tick(dt);
    }

    let body = &world.physicals()[0];
    let connection = &body.root().children()[0];

    // The joint coordinate advances at exactly the commanded rate
    let motion = connection.constraint.relative_motion();
    assert_abs_diff_eq!(
        motion.angular_velocity,
        vector![0.0, 0.0, 1.0],
        epsilon = 1e-12
    );
    let expected_angle =
        (f64::from(steps) * dt * 1.0) % std::f64::consts::TAU;
    assert_abs_diff_eq!(
        connection.connection_frame().rotation().angle(),
        expected_angle,
        epsilon = 1e-9
    );

    // The internal angular momentum is the child's inertia times its
    // relative angular velocity
    let mut scratch = kinetic_physics::physical::InternalMotionScratch::new();
    let internal = body.compute_internal_motion(&mut scratch);
    let child_inertia = Shape::cylinder(1.0, 1.0).unit_density_inertia();
    assert_abs_diff_eq!(
        internal.internal_angular_momentum,
        child_inertia * vector![0.0, 0.0, 1.0],
        epsilon = 1e-9
    );
}

#[test]
fn elastic_head_on_collision_should_exchange_velocities_within_one_tick() {
    let elastic = PartProperties::new(1.0, 0.0, 1.0);
    let mut world = World::new();
    world.add_part(part(
        Shape::cuboid(1.0, 1.0, 1.0),
        point![-5.0, 0.0, 0.0],
        elastic,
    ));
    world.add_part(part(
        Shape::cuboid(1.0, 1.0, 1.0),
        point![5.0, 0.0, 0.0],
        elastic,
    ));
    world.physicals_mut()[0].motion_mut().velocity = vector![1.0, 0.0, 0.0];
    world.physicals_mut()[1].motion_mut().velocity = vector![-1.0, 0.0, 0.0];

    let mut collision_tick = None;
    for tick in 0..1200 {
        world.tick(DT);
        if world.telemetry().gjk_collisions > 0 {
            collision_tick = Some(tick);
            break;
        }
    }
    assert!(collision_tick.is_some(), "The boxes never touched");

    // One further tick leaves the exchanged velocities in place
    world.tick(DT);
    assert_abs_diff_eq!(
        world.physicals()[0].motion().velocity,
        vector![-1.0, 0.0, 0.0],
        epsilon = 1e-6
    );
    assert_abs_diff_eq!(
        world.physicals()[1].motion().velocity,
        vector![1.0, 0.0, 0.0],
        epsilon = 1e-6
    );

    // Total momentum is unchanged by the exchange
    let total_momentum: Vector3<f64> = world
        .physicals()
        .iter()
        .map(|body| body.motion().velocity * body.total_mass())
        .sum();
    assert_abs_diff_eq!(total_momentum, Vector3::zeros(), epsilon = 1e-9);
}

#[test]
fn ball_constraint_rope_should_keep_attach_points_together() {
    let mut world = World::new();
    for idx in 0..3 {
        world.add_part(part(
            Shape::cuboid(1.0, 1.0, 1.0),
            point![0.0, 0.0, 4.0 * f64::from(idx)],
            PartProperties::new(1.0, 0.5, 0.0),
        ));
    }

    let rope_joint = |a: usize, b: usize| PhysicalConstraint {
        physical_a: a,
        physical_b: b,
        constraint: SoftConstraint::Ball(BallConstraint {
            attach_a: point![0.0, 0.0, 2.0],
            attach_b: point![0.0, 0.0, -2.0],
        }),
    };
    world
        .add_constraint_group(ConstraintGroup::new(vec![rope_joint(0, 1), rope_joint(1, 2)]))
        .unwrap();

    // Swing the far end to set the chain oscillating
    world.physicals_mut()[2].motion_mut().velocity = vector![0.0, 1.0, 0.0];

    for _ in 0..1000 {
        world.tick(DT);

        for (a, b) in [(0, 1), (1, 2)] {
            let point_a = world.physicals()[a]
                .cframe()
                .local_to_global(&point![0.0, 0.0, 2.0]);
            let point_b = world.physicals()[b]
                .cframe()
                .local_to_global(&point![0.0, 0.0, -2.0]);
            assert_abs_diff_eq!((point_b - point_a).norm(), 0.0, epsilon = 1e-3);
        }
    }
}

#[test]
fn piston_should_trace_its_stroke_against_simulation_time() {
    let mut world = World::new();
    let main_id = world.add_part(part(
        Shape::cuboid(1.0, 1.0, 1.0),
        point![0.0, 0.0, 0.0],
        PartProperties::new(1.0, 0.5, 0.0),
    ));
    world
        .attach_part_with_constraint(
            main_id,
            part(
                Shape::cuboid(1.0, 1.0, 1.0),
                point![0.0, 0.0, 0.0],
                PartProperties::new(1.0, 0.5, 0.0),
            ),
            HardConstraint::SinusoidalPiston(SinusoidalPistonConstraint::new(0.0, 1.0, 1.0)),
            CFrame::identity(),
            CFrame::identity(),
        )
        .unwrap();

    let mut time = 0.0;
    for _ in 0..(10.0 * TICK_RATE) as usize {
        let connection = &world.physicals()[0].root().children()[0];
        let expected = 0.5 * (1.0 - (std::f64::consts::TAU * (time % 1.0)).cos());
        assert_abs_diff_eq!(
            connection.connection_frame().position().z,
            expected,
            epsilon = 1e-6
        );
        world.tick(DT);
        time += DT;
    }
}

#[test]
fn body_resting_on_terrain_should_stop_falling() {
    let mut world = World::new();
    world.add_terrain_part(part(
        Shape::cuboid(20.0, 1.0, 20.0),
        point![0.0, 0.0, 0.0],
        PartProperties::new(1.0, 0.5, 0.0),
    ));
    world.add_part(part(
        Shape::cuboid(1.0, 1.0, 1.0),
        point![0.0, 3.0, 0.0],
        PartProperties::new(1.0, 0.5, 0.0),
    ));
    world.add_external_force(downward_gravity());

    for _ in 0..600 {
        world.tick(DT);
    }

    let body = &world.physicals()[0];
    // The cube has landed: it sits on top of the slab and no longer falls
    assert!(body.motion().velocity.y.abs() < 0.2);
    assert!(body.cframe().position().y > 0.5);
    assert!(world.is_valid());
}
