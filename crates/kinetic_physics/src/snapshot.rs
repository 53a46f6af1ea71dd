//! Versioned binary snapshots of a world.
//!
//! A snapshot stores a registry of the distinct shape classes in use,
//! followed by every physical (with its full tree structure and constraint
//! state), the terrain parts and the soft constraint groups. Parts reference
//! their shape class by registry index, so classes shared between parts stay
//! shared after loading. A snapshot with an unknown version or an unknown
//! type tag fails to load.

use crate::constraint::{ConstraintGroup, HardConstraint};
use crate::force::ExternalForce;
use crate::fph;
use crate::material::PartProperties;
use crate::part::{Part, PartId};
use crate::physical::{ConnectedPhysical, MotorizedPhysical, Physical};
use crate::quantities::Motion;
use crate::world::{World, WorldConfig};
use anyhow::{bail, Context, Result};
use kinetic_geometry::{CFrame, ConvexPolyhedron, GlobalCFrame, Shape, ShapeClass};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

/// The version written into new snapshots.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct WorldSnapshot {
    version: u32,
    external_forces: Vec<ExternalForce>,
    age: u64,
    shape_classes: Vec<ShapeClassRecord>,
    physicals: Vec<MotorizedPhysicalRecord>,
    terrain: Vec<PartRecord>,
    constraint_groups: Vec<ConstraintGroup>,
    config: WorldConfig,
}

#[derive(Serialize, Deserialize)]
enum ShapeClassRecord {
    Box,
    Sphere,
    Cylinder,
    Convex(ConvexPolyhedron),
}

#[derive(Serialize, Deserialize)]
struct ShapeRecord {
    class: u32,
    scale: [fph; 3],
}

#[derive(Serialize, Deserialize)]
struct PartRecord {
    cframe: GlobalCFrame,
    shape: ShapeRecord,
    properties: PartProperties,
}

#[derive(Serialize, Deserialize)]
struct RigidBodyRecord {
    main_part: PartRecord,
    attached_parts: Vec<(CFrame, PartRecord)>,
}

#[derive(Serialize, Deserialize)]
struct PhysicalRecord {
    rigid_body: RigidBodyRecord,
    children: Vec<ConnectionRecord>,
}

#[derive(Serialize, Deserialize)]
struct ConnectionRecord {
    attach_on_child: CFrame,
    attach_on_parent: CFrame,
    constraint: HardConstraint,
    physical: PhysicalRecord,
}

#[derive(Serialize, Deserialize)]
struct MotorizedPhysicalRecord {
    motion: Motion,
    cframe: GlobalCFrame,
    root: PhysicalRecord,
}

/// Writes a snapshot of the given world to the given writer.
pub fn save_world(world: &World, writer: impl Write) -> Result<()> {
    let mut registry = ShapeClassRegistry::new();

    let physicals = world
        .physicals()
        .iter()
        .map(|physical| MotorizedPhysicalRecord {
            motion: *physical.motion(),
            cframe: *physical.cframe(),
            root: record_physical(physical.root(), &mut registry),
        })
        .collect();

    let terrain = world
        .terrain_parts()
        .iter()
        .map(|part| record_part(part, &mut registry))
        .collect();

    let snapshot = WorldSnapshot {
        version: SNAPSHOT_VERSION,
        external_forces: world.external_forces().to_vec(),
        age: world.age(),
        shape_classes: registry.records,
        physicals,
        terrain,
        constraint_groups: world.constraint_groups().to_vec(),
        config: *world.config(),
    };

    bincode::serialize_into(writer, &snapshot).context("Failed writing world snapshot")
}

/// Reads a world back from a snapshot produced by [`save_world`].
///
/// # Errors
/// If the stream is malformed, carries an unknown version or refers to an
/// unknown shape class.
pub fn load_world(reader: impl Read) -> Result<World> {
    let snapshot: WorldSnapshot =
        bincode::deserialize_from(reader).context("Failed reading world snapshot")?;

    if snapshot.version != SNAPSHOT_VERSION {
        bail!("Unsupported world snapshot version: {}", snapshot.version);
    }

    let classes: Vec<ShapeClass> = snapshot
        .shape_classes
        .into_iter()
        .map(|record| match record {
            ShapeClassRecord::Box => ShapeClass::Box,
            ShapeClassRecord::Sphere => ShapeClass::Sphere,
            ShapeClassRecord::Cylinder => ShapeClass::Cylinder,
            ShapeClassRecord::Convex(polyhedron) => ShapeClass::Convex(Arc::new(polyhedron)),
        })
        .collect();

    let mut world = World::with_config(snapshot.config);

    for force in snapshot.external_forces {
        world.add_external_force(force);
    }

    for record in snapshot.physicals {
        let mut physical =
            MotorizedPhysical::new(restore_part(&record.root.rigid_body.main_part, &classes)?);
        restore_node_contents(&mut physical, &record.root, &classes)?;
        *physical.motion_mut() = record.motion;
        physical.set_cframe(record.cframe);
        world.add_physical(physical);
    }

    for record in snapshot.terrain {
        world.add_terrain_part(restore_part(&record, &classes)?);
    }

    for group in snapshot.constraint_groups {
        world.add_constraint_group(group)?;
    }

    world.set_age(snapshot.age);

    Ok(world)
}

/// Maps shape classes to registry indices while recording each distinct
/// class once. The built-in classes always occupy the first three slots.
struct ShapeClassRegistry {
    records: Vec<ShapeClassRecord>,
    convex_indices: HashMap<usize, u32>,
}

impl ShapeClassRegistry {
    fn new() -> Self {
        Self {
            records: vec![
                ShapeClassRecord::Box,
                ShapeClassRecord::Sphere,
                ShapeClassRecord::Cylinder,
            ],
            convex_indices: HashMap::new(),
        }
    }

    fn index_of(&mut self, class: &ShapeClass) -> u32 {
        match class {
            ShapeClass::Box => 0,
            ShapeClass::Sphere => 1,
            ShapeClass::Cylinder => 2,
            ShapeClass::Convex(polyhedron) => {
                let key = Arc::as_ptr(polyhedron) as usize;
                if let Some(&idx) = self.convex_indices.get(&key) {
                    return idx;
                }
                let idx = self.records.len() as u32;
                self.records
                    .push(ShapeClassRecord::Convex((**polyhedron).clone()));
                self.convex_indices.insert(key, idx);
                idx
            }
        }
    }
}

fn record_part(part: &Part, registry: &mut ShapeClassRegistry) -> PartRecord {
    PartRecord {
        cframe: *part.cframe(),
        shape: ShapeRecord {
            class: registry.index_of(part.shape().class()),
            scale: [
                part.shape().width(),
                part.shape().height(),
                part.shape().depth(),
            ],
        },
        properties: *part.properties(),
    }
}

fn record_physical(physical: &Physical, registry: &mut ShapeClassRegistry) -> PhysicalRecord {
    PhysicalRecord {
        rigid_body: RigidBodyRecord {
            main_part: record_part(physical.rigid_body().main_part(), registry),
            attached_parts: physical
                .rigid_body()
                .attached_parts()
                .iter()
                .map(|attached| (attached.attachment, record_part(&attached.part, registry)))
                .collect(),
        },
        children: physical
            .children()
            .iter()
            .map(|child| record_connection(child, registry))
            .collect(),
    }
}

fn record_connection(
    connection: &ConnectedPhysical,
    registry: &mut ShapeClassRegistry,
) -> ConnectionRecord {
    ConnectionRecord {
        attach_on_child: connection.attach_on_child,
        attach_on_parent: connection.attach_on_parent,
        constraint: connection.constraint.clone(),
        physical: record_physical(&connection.physical, registry),
    }
}

fn restore_part(record: &PartRecord, classes: &[ShapeClass]) -> Result<Part> {
    let Some(class) = classes.get(record.shape.class as usize) else {
        bail!(
            "World snapshot refers to unknown shape class {}",
            record.shape.class
        );
    };
    let [width, height, depth] = record.shape.scale;
    Ok(Part::new(
        Shape::new(class.clone(), width, height, depth),
        record.cframe,
        record.properties,
    ))
}

/// Rebuilds the welded parts and constrained children of the given node
/// record, whose main part is already present in the physical.
fn restore_node_contents(
    physical: &mut MotorizedPhysical,
    record: &PhysicalRecord,
    classes: &[ShapeClass],
) -> Result<()> {
    // Walk breadth-first, always attaching onto the node's main part
    let mut pending: Vec<(PartId, &PhysicalRecord)> = Vec::new();
    let root_main_id = physical.root().rigid_body().main_part().id();
    pending.push((root_main_id, record));

    while let Some((main_id, node)) = pending.pop() {
        for (attachment, part_record) in &node.rigid_body.attached_parts {
            let part = restore_part(part_record, classes)?;
            physical
                .attach_part_to(main_id, part, *attachment)
                .ok()
                .expect("Snapshot restore lost track of a main part");
        }
        for connection in &node.children {
            let child_main = restore_part(&connection.physical.rigid_body.main_part, classes)?;
            let child_main_id = child_main.id();
            physical
                .attach_part_with_constraint(
                    main_id,
                    child_main,
                    connection.constraint.clone(),
                    connection.attach_on_child,
                    connection.attach_on_parent,
                )
                .ok()
                .expect("Snapshot restore lost track of a main part");
            pending.push((child_main_id, &connection.physical));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{
        BallConstraint, ConstantSpeedMotorConstraint, PhysicalConstraint,
        SinusoidalPistonConstraint, SoftConstraint,
    };
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector};

    fn example_world() -> World {
        let mut world = World::new();
        world.add_external_force(ExternalForce::DirectionalGravity {
            gravity: vector![0.0, -10.0, 0.0],
        });

        let shared_class = ShapeClass::convex(ConvexPolyhedron::unit_box());
        world.add_terrain_part(Part::new(
            Shape::new(shared_class.clone(), 10.0, 1.0, 10.0),
            GlobalCFrame::at_position(point![0.0, -2.0, 0.0]),
            PartProperties::new(1.0, 0.7, 0.1),
        ));
        world.add_terrain_part(Part::new(
            Shape::new(shared_class, 10.0, 1.0, 10.0),
            GlobalCFrame::at_position(point![12.0, -2.0, 0.0]),
            PartProperties::new(1.0, 0.7, 0.1).with_conveyor_effect(vector![1.0, 0.0, 0.0]),
        ));

        let main_id = world.add_part(Part::new(
            Shape::cylinder(1.0, 1.0),
            GlobalCFrame::at_position(point![0.0, 3.0, 0.0]),
            PartProperties::new(2.0, 0.5, 0.3),
        ));
        world
            .attach_part(
                main_id,
                Part::new(
                    Shape::sphere(0.5),
                    GlobalCFrame::identity(),
                    PartProperties::new(1.0, 0.5, 0.3),
                ),
                CFrame::from_translation(vector![0.0, 1.0, 0.0]),
            )
            .unwrap();
        world
            .attach_part_with_constraint(
                main_id,
                Part::new(
                    Shape::cuboid(0.5, 0.5, 2.0),
                    GlobalCFrame::identity(),
                    PartProperties::new(1.0, 0.5, 0.3),
                ),
                HardConstraint::ConstantSpeedMotor(ConstantSpeedMotorConstraint::new(0.5)),
                CFrame::identity(),
                CFrame::from_translation(vector![0.0, 0.0, 1.0]),
            )
            .unwrap();

        world.add_part(Part::new(
            Shape::cuboid(1.0, 1.0, 1.0),
            GlobalCFrame::at_position(point![3.0, 3.0, 0.0]),
            PartProperties::new(1.0, 0.5, 0.3),
        ));
        world
            .add_constraint_group(ConstraintGroup::new(vec![PhysicalConstraint {
                physical_a: 0,
                physical_b: 1,
                constraint: SoftConstraint::Ball(BallConstraint {
                    attach_a: point![1.0, 0.0, 0.0],
                    attach_b: point![-1.0, 0.0, 0.0],
                }),
            }]))
            .unwrap();

        world
    }

    fn save_and_load(world: &World) -> World {
        let mut buffer = Vec::new();
        save_world(world, &mut buffer).unwrap();
        load_world(buffer.as_slice()).unwrap()
    }

    #[test]
    fn round_trip_should_preserve_structure() {
        let world = example_world();
        let restored = save_and_load(&world);

        assert_eq!(restored.age(), world.age());
        assert_eq!(restored.physicals().len(), world.physicals().len());
        assert_eq!(restored.terrain_parts().len(), world.terrain_parts().len());
        assert_eq!(
            restored.constraint_groups().len(),
            world.constraint_groups().len()
        );
        assert_eq!(
            restored.bounds_tree().len(),
            world.bounds_tree().len()
        );
        assert!(restored.is_valid());

        for (original, restored) in world.physicals().iter().zip(restored.physicals()) {
            assert_abs_diff_eq!(
                original.total_mass(),
                restored.total_mass(),
                epsilon = 1e-12
            );
            assert_abs_diff_eq!(
                *original.cframe().position(),
                *restored.cframe().position(),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn round_trip_should_preserve_shape_class_sharing() {
        let world = example_world();
        let restored = save_and_load(&world);

        // Both terrain slabs referenced one polyhedron class before saving
        let classes: Vec<&ShapeClass> = restored
            .terrain_parts()
            .iter()
            .map(|part| part.shape().class())
            .collect();
        assert_eq!(classes[0], classes[1]);
    }

    #[test]
    fn simulation_should_continue_identically_after_round_trip() {
        let mut world = example_world();
        let mut restored = save_and_load(&world);

        let dt = 1.0 / 120.0;
        for _ in 0..60 {
            world.tick(dt);
            restored.tick(dt);
        }

        for (original, restored) in world.physicals().iter().zip(restored.physicals()) {
            assert_abs_diff_eq!(
                *original.cframe().position(),
                *restored.cframe().position(),
                epsilon = 1e-6
            );
            assert_abs_diff_eq!(
                original.motion().velocity,
                restored.motion().velocity,
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn unknown_version_should_fail_to_load() {
        let world = example_world();
        let mut buffer = Vec::new();
        save_world(&world, &mut buffer).unwrap();
        // The version is the first little-endian u32 of the stream
        buffer[0] = 0xFF;
        assert!(load_world(buffer.as_slice()).is_err());
    }

    #[test]
    fn truncated_stream_should_fail_to_load() {
        let world = example_world();
        let mut buffer = Vec::new();
        save_world(&world, &mut buffer).unwrap();
        buffer.truncate(buffer.len() / 2);
        assert!(load_world(buffer.as_slice()).is_err());
    }

    #[test]
    fn piston_phase_should_survive_round_trip() {
        let mut world = World::new();
        let main_id = world.add_part(Part::new(
            Shape::cuboid(1.0, 1.0, 1.0),
            GlobalCFrame::at_position(point![0.0, 0.0, 0.0]),
            PartProperties::default(),
        ));
        world
            .attach_part_with_constraint(
                main_id,
                Part::new(
                    Shape::cuboid(1.0, 1.0, 1.0),
                    GlobalCFrame::identity(),
                    PartProperties::default(),
                ),
                HardConstraint::SinusoidalPiston(SinusoidalPistonConstraint::new(0.0, 1.0, 2.0)),
                CFrame::identity(),
                CFrame::from_translation(vector![0.0, 0.0, 2.0]),
            )
            .unwrap();

        let dt = 1.0 / 120.0;
        for _ in 0..37 {
            world.tick(dt);
        }

        let restored = save_and_load(&world);
        let original_child = &world.physicals()[0].root().children()[0];
        let restored_child = &restored.physicals()[0].root().children()[0];
        assert_eq!(original_child.constraint, restored_child.constraint);
    }
}
