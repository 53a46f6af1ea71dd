//! The simulation world.

use crate::collision::{intersect_parts, Contact, TickTelemetry};
use crate::constraint::{ConstraintGroup, ConstraintSolverConfig, HardConstraint};
use crate::force::ExternalForce;
use crate::fph;
use crate::part::{Part, PartId};
use crate::physical::{InternalMotionScratch, MotorizedPhysical, RemovePartOutcome};
use crate::quantities::{Position, Velocity};
use anyhow::{bail, Result};
use kinetic_geometry::{Aabb, BoundsTree, CFrame};
use nalgebra::Vector3;
use std::collections::HashMap;

/// How many ticks pass between opportunistic rebalancing passes over the
/// bounds tree.
const STRUCTURE_IMPROVEMENT_INTERVAL: u64 = 16;

/// Where a part lives in the world.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BodyRef {
    Physical(usize),
    Terrain(usize),
}

/// Configuration parameters for a [`World`].
#[derive(Copy, Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Configuration for solving soft constraints.
    pub constraint_solver: ConstraintSolverConfig,
}

/// The simulation world: the set of simulated physicals and static terrain
/// parts, the spatial index over all their parts, the external forces acting
/// on them, and the soft constraint groups coupling them.
#[derive(Debug)]
pub struct World {
    physicals: Vec<MotorizedPhysical>,
    terrain: Vec<Part>,
    bounds_tree: BoundsTree<PartId>,
    external_forces: Vec<ExternalForce>,
    constraint_groups: Vec<ConstraintGroup>,
    config: WorldConfig,
    age: u64,
    telemetry: TickTelemetry,
    motion_scratch: InternalMotionScratch,
    bounds_scratch: HashMap<PartId, Aabb>,
    pair_scratch: Vec<(PartId, PartId)>,
}

impl World {
    /// Creates a new empty world with default configuration.
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Creates a new empty world with the given configuration.
    pub fn with_config(config: WorldConfig) -> Self {
        Self {
            physicals: Vec::new(),
            terrain: Vec::new(),
            bounds_tree: BoundsTree::new(),
            external_forces: Vec::new(),
            constraint_groups: Vec::new(),
            config,
            age: 0,
            telemetry: TickTelemetry::default(),
            motion_scratch: InternalMotionScratch::new(),
            bounds_scratch: HashMap::new(),
            pair_scratch: Vec::new(),
        }
    }

    /// Returns the number of completed ticks.
    pub fn age(&self) -> u64 {
        self.age
    }

    pub(crate) fn set_age(&mut self, age: u64) {
        self.age = age;
    }

    /// Returns the simulated physicals.
    pub fn physicals(&self) -> &[MotorizedPhysical] {
        &self.physicals
    }

    /// Returns the simulated physicals for modification.
    pub fn physicals_mut(&mut self) -> &mut [MotorizedPhysical] {
        &mut self.physicals
    }

    /// Returns the static terrain parts.
    pub fn terrain_parts(&self) -> &[Part] {
        &self.terrain
    }

    /// Returns the external force contributors.
    pub fn external_forces(&self) -> &[ExternalForce] {
        &self.external_forces
    }

    /// Returns the soft constraint groups.
    pub fn constraint_groups(&self) -> &[ConstraintGroup] {
        &self.constraint_groups
    }

    /// Returns the collision pipeline counters.
    pub fn telemetry(&self) -> &TickTelemetry {
        &self.telemetry
    }

    /// Returns the configuration of the world.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Returns the spatial index over all parts.
    pub fn bounds_tree(&self) -> &BoundsTree<PartId> {
        &self.bounds_tree
    }

    /// Registers the given external force contributor.
    pub fn add_external_force(&mut self, force: ExternalForce) {
        self.external_forces.push(force);
    }

    /// Registers the given soft constraint group.
    ///
    /// # Errors
    /// If a constraint connects a physical to itself or refers to a physical
    /// index that does not exist.
    pub fn add_constraint_group(&mut self, group: ConstraintGroup) -> Result<()> {
        for constraint in &group.constraints {
            if constraint.physical_a == constraint.physical_b {
                bail!("Soft constraint connects a physical to itself");
            }
            if constraint.physical_a >= self.physicals.len()
                || constraint.physical_b >= self.physicals.len()
            {
                bail!("Soft constraint refers to a physical that is not in the world");
            }
        }
        self.constraint_groups.push(group);
        Ok(())
    }

    /// Adds the given part to the world as a new single-part physical.
    ///
    /// Returns the ID of the added part.
    pub fn add_part(&mut self, part: Part) -> PartId {
        let id = part.id();
        self.assert_part_unknown(id);
        let bounds = part.world_bounds();
        self.physicals.push(MotorizedPhysical::new(part));
        self.bounds_tree.add(id, bounds);
        id
    }

    /// Adds the given physical, with all its parts, to the world.
    ///
    /// Returns the index of the physical.
    pub fn add_physical(&mut self, physical: MotorizedPhysical) -> usize {
        let mut entries = Vec::new();
        physical.for_each_part(|part| entries.push((part.id(), part.world_bounds())));
        for (id, bounds) in entries {
            self.assert_part_unknown(id);
            self.bounds_tree.add(id, bounds);
        }
        self.physicals.push(physical);
        self.physicals.len() - 1
    }

    /// Adds the given part to the world as a non-simulated collider with
    /// effectively infinite mass.
    ///
    /// Returns the ID of the added part.
    pub fn add_terrain_part(&mut self, part: Part) -> PartId {
        let id = part.id();
        self.assert_part_unknown(id);
        self.bounds_tree.add(id, part.world_bounds());
        self.terrain.push(part);
        id
    }

    /// Welds a new part onto the part with the given ID.
    ///
    /// # Errors
    /// If the parent part is not part of a simulated physical.
    pub fn attach_part(
        &mut self,
        parent_part: PartId,
        part: Part,
        attachment: CFrame,
    ) -> Result<PartId> {
        let id = part.id();
        self.assert_part_unknown(id);
        let Some(BodyRef::Physical(idx)) = self.locate_part(parent_part) else {
            bail!("Parent part is not part of a simulated physical");
        };
        self.physicals[idx]
            .attach_part_to(parent_part, part, attachment)
            .ok()
            .expect("Located parent part missing from its physical");
        let bounds = self.physicals[idx]
            .find_part(id)
            .expect("Attached part missing from its physical")
            .world_bounds();
        self.bounds_tree.add(id, bounds);
        Ok(id)
    }

    /// Connects a new part to the part with the given ID through a hard
    /// constraint, creating a new articulated child.
    ///
    /// # Errors
    /// If the parent part is not part of a simulated physical.
    pub fn attach_part_with_constraint(
        &mut self,
        parent_part: PartId,
        part: Part,
        constraint: HardConstraint,
        attach_on_child: CFrame,
        attach_on_parent: CFrame,
    ) -> Result<PartId> {
        let id = part.id();
        self.assert_part_unknown(id);
        let Some(BodyRef::Physical(idx)) = self.locate_part(parent_part) else {
            bail!("Parent part is not part of a simulated physical");
        };
        self.physicals[idx]
            .attach_part_with_constraint(
                parent_part,
                part,
                constraint,
                attach_on_child,
                attach_on_parent,
            )
            .ok()
            .expect("Located parent part missing from its physical");
        let bounds = self.physicals[idx]
            .find_part(id)
            .expect("Attached part missing from its physical")
            .world_bounds();
        self.bounds_tree.add(id, bounds);
        Ok(id)
    }

    /// Removes the part with the given ID from the world, detaching it from
    /// its physical. If the removal dissolves a node of the physical, the
    /// disconnected subtrees continue as independent physicals.
    ///
    /// # Errors
    /// If no part with the given ID is in the world.
    pub fn remove_part(&mut self, id: PartId) -> Result<Part> {
        match self.locate_part(id) {
            None => bail!("Part to remove is not in the world"),
            Some(BodyRef::Terrain(idx)) => {
                let part = self.terrain.swap_remove(idx);
                self.remove_from_bounds_tree(&part);
                Ok(part)
            }
            Some(BodyRef::Physical(idx)) => match self.physicals[idx].remove_part(id) {
                RemovePartOutcome::NotFound => {
                    unreachable!("Located part missing from its physical")
                }
                RemovePartOutcome::Removed { part, split_off } => {
                    self.remove_from_bounds_tree(&part);
                    self.physicals.extend(split_off);
                    Ok(part)
                }
                RemovePartOutcome::Dissolved { removed, orphans } => {
                    self.remove_from_bounds_tree(&removed);
                    self.remove_physical_at(idx);
                    self.physicals.extend(orphans);
                    Ok(removed)
                }
            },
        }
    }

    /// Returns a reference to the part with the given ID, if it is in the
    /// world.
    pub fn part(&self, id: PartId) -> Option<&Part> {
        match self.locate_part(id)? {
            BodyRef::Terrain(idx) => Some(&self.terrain[idx]),
            BodyRef::Physical(idx) => self.physicals[idx].find_part(id),
        }
    }

    /// Returns the index of the physical containing the part with the given
    /// ID, if any.
    pub fn physical_of_part(&self, id: PartId) -> Option<usize> {
        match self.locate_part(id)? {
            BodyRef::Physical(idx) => Some(idx),
            BodyRef::Terrain(_) => None,
        }
    }

    /// Advances the simulation by one step of the given duration.
    pub fn tick(&mut self, dt: fph) {
        self.age += 1;

        for force in &self.external_forces {
            force.apply(&mut self.physicals);
        }

        self.handle_collisions();

        for group in &self.constraint_groups {
            group.solve(&mut self.physicals, &self.config.constraint_solver);
        }

        for physical in &mut self.physicals {
            physical.update(dt, &mut self.motion_scratch);
        }

        self.refresh_bounds_tree();
    }

    /// Computes the total kinetic energy of all simulated physicals plus
    /// their potential energy in all registered force fields.
    pub fn total_energy(&self) -> fph {
        let kinetic: fph = self
            .physicals
            .iter()
            .map(MotorizedPhysical::kinetic_energy)
            .sum();
        let potential: fph = self
            .physicals
            .iter()
            .flat_map(|physical| {
                self.external_forces
                    .iter()
                    .map(move |force| force.potential_energy(physical))
            })
            .sum();
        kinetic + potential
    }

    /// Whether the structural invariants of the world hold: every reachable
    /// part appears exactly once in the bounds tree, no part is both terrain
    /// and simulated, and every physical is internally consistent.
    pub fn is_valid(&self) -> bool {
        let mut part_ids = Vec::new();
        for physical in &self.physicals {
            if !physical.is_valid() {
                return false;
            }
            physical.for_each_part(|part| part_ids.push(part.id()));
        }
        for part in &self.terrain {
            part_ids.push(part.id());
        }

        let total_parts = part_ids.len();
        part_ids.sort_unstable();
        part_ids.dedup();
        if part_ids.len() != total_parts {
            return false;
        }

        if self.bounds_tree.len() != total_parts {
            return false;
        }
        let mut all_in_tree = true;
        self.bounds_tree.for_each_leaf(|id, _| {
            if part_ids.binary_search(id).is_err() {
                all_in_tree = false;
            }
        });
        all_in_tree && self.bounds_tree.bounds_are_consistent()
    }

    fn assert_part_unknown(&self, id: PartId) {
        assert!(
            self.locate_part(id).is_none(),
            "Tried adding a part that is already in the world"
        );
    }

    fn locate_part(&self, id: PartId) -> Option<BodyRef> {
        if let Some(idx) = self
            .physicals
            .iter()
            .position(|physical| physical.contains_part(id))
        {
            return Some(BodyRef::Physical(idx));
        }
        self.terrain
            .iter()
            .position(|part| part.id() == id)
            .map(BodyRef::Terrain)
    }

    fn remove_from_bounds_tree(&mut self, part: &Part) {
        let removed = self
            .bounds_tree
            .remove(&part.id(), &part.world_bounds());
        assert!(removed, "Part to remove missing from the bounds tree");
    }

    /// Removes the physical at the given index, dropping soft constraints
    /// that referenced it and remapping constraints referencing the
    /// swapped-in last physical.
    fn remove_physical_at(&mut self, idx: usize) {
        self.physicals.swap_remove(idx);
        let moved_idx = self.physicals.len();

        for group in &mut self.constraint_groups {
            group.constraints.retain(|constraint| {
                constraint.physical_a != idx && constraint.physical_b != idx
            });
            for constraint in &mut group.constraints {
                if constraint.physical_a == moved_idx {
                    constraint.physical_a = idx;
                }
                if constraint.physical_b == moved_idx {
                    constraint.physical_b = idx;
                }
            }
        }
        self.constraint_groups.retain(|group| !group.constraints.is_empty());
    }

    fn handle_collisions(&mut self) {
        let mut pairs = std::mem::take(&mut self.pair_scratch);
        pairs.clear();
        self.bounds_tree
            .for_each_overlapping_leaf_pair(|&a, &b| pairs.push((a, b)));

        for (id_a, id_b) in pairs.drain(..) {
            let (Some(body_a), Some(body_b)) = (self.locate_part(id_a), self.locate_part(id_b))
            else {
                continue;
            };

            // Parts of the same physical are attached and do not collide;
            // terrain never collides with terrain
            match (body_a, body_b) {
                (BodyRef::Physical(a), BodyRef::Physical(b)) if a == b => continue,
                (BodyRef::Terrain(_), BodyRef::Terrain(_)) => continue,
                _ => {}
            }

            let part_a = part_of(&self.physicals, &self.terrain, body_a, id_a);
            let part_b = part_of(&self.physicals, &self.terrain, body_b, id_b);

            let Some(contact) = intersect_parts(part_a, part_b, &mut self.telemetry) else {
                continue;
            };

            self.resolve_contact(body_a, body_b, id_a, id_b, &contact);
        }

        self.pair_scratch = pairs;
    }

    /// Resolves one contact by applying a restitution impulse along the
    /// contact normal and a Coulomb friction impulse along the tangent.
    fn resolve_contact(
        &mut self,
        body_a: BodyRef,
        body_b: BodyRef,
        id_a: PartId,
        id_b: PartId,
        contact: &Contact,
    ) {
        let contact_point =
            Position::from(0.5 * (contact.position_on_a.coords + contact.position_on_b.coords));
        let normal = contact.normal.into_inner();

        let part_a = part_of(&self.physicals, &self.terrain, body_a, id_a);
        let part_b = part_of(&self.physicals, &self.terrain, body_b, id_b);

        let bounciness = part_a.properties().combined_bounciness(part_b.properties());
        let friction = part_a.properties().combined_friction(part_b.properties());

        let velocity_a =
            contact_point_velocity(&self.physicals, body_a, part_a, &contact_point);
        let velocity_b =
            contact_point_velocity(&self.physicals, body_b, part_b, &contact_point);
        let relative_velocity = velocity_a - velocity_b;

        let normal_speed = relative_velocity.dot(&normal);
        if normal_speed >= 0.0 {
            return;
        }

        let inverse_inertia_along = |direction: &Vector3<fph>| {
            inverse_point_inertia(&self.physicals, body_a, &contact_point, direction)
                + inverse_point_inertia(&self.physicals, body_b, &contact_point, direction)
        };

        let normal_impulse = -(1.0 + bounciness) * normal_speed / inverse_inertia_along(&normal);

        let tangential_velocity = relative_velocity - normal_speed * normal;
        let tangential_speed = tangential_velocity.norm();
        let friction_impulse = if tangential_speed > 1e-12 {
            let tangent = tangential_velocity / tangential_speed;
            let stopping_impulse = tangential_speed / inverse_inertia_along(&tangent);
            -fph::min(stopping_impulse, friction * normal_impulse) * tangent
        } else {
            Vector3::zeros()
        };

        let total_impulse = normal_impulse * normal + friction_impulse;

        if let BodyRef::Physical(idx) = body_a {
            let offset = contact_point - self.physicals[idx].world_center_of_mass();
            self.physicals[idx].apply_impulse(offset, total_impulse);
        }
        if let BodyRef::Physical(idx) = body_b {
            let offset = contact_point - self.physicals[idx].world_center_of_mass();
            self.physicals[idx].apply_impulse(offset, -total_impulse);
        }
    }

    fn refresh_bounds_tree(&mut self) {
        let bounds_scratch = &mut self.bounds_scratch;
        bounds_scratch.clear();
        for physical in &self.physicals {
            physical.for_each_part(|part| {
                bounds_scratch.insert(part.id(), part.world_bounds());
            });
        }
        for part in &self.terrain {
            bounds_scratch.insert(part.id(), part.world_bounds());
        }

        let bounds_scratch = &self.bounds_scratch;
        self.bounds_tree.recalculate_bounds(|id| {
            *bounds_scratch
                .get(id)
                .expect("Bounds tree contains a part that is not in the world")
        });

        if self.age % STRUCTURE_IMPROVEMENT_INTERVAL == 0 {
            self.bounds_tree.improve_structure();
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

fn part_of<'a>(
    physicals: &'a [MotorizedPhysical],
    terrain: &'a [Part],
    body: BodyRef,
    id: PartId,
) -> &'a Part {
    match body {
        BodyRef::Physical(idx) => physicals[idx]
            .find_part(id)
            .expect("Located part missing from its physical"),
        BodyRef::Terrain(idx) => &terrain[idx],
    }
}

/// Computes the velocity of the contact point on the given body, including
/// any conveyor surface velocity of the part.
fn contact_point_velocity(
    physicals: &[MotorizedPhysical],
    body: BodyRef,
    part: &Part,
    point: &Position,
) -> Velocity {
    let body_velocity = match body {
        BodyRef::Physical(idx) => physicals[idx].velocity_of_point(point),
        BodyRef::Terrain(_) => Velocity::zeros(),
    };
    match part.properties().conveyor_effect {
        Some(conveyor) => body_velocity + part.cframe().local_to_relative(&conveyor),
        None => body_velocity,
    }
}

/// Computes the inverse of the effective inertia felt at the given point in
/// the given direction; zero for terrain.
fn inverse_point_inertia(
    physicals: &[MotorizedPhysical],
    body: BodyRef,
    point: &Position,
    direction: &Vector3<fph>,
) -> fph {
    match body {
        BodyRef::Physical(idx) => {
            let physical = &physicals[idx];
            let offset = point - physical.world_center_of_mass();
            1.0 / physical.inertia_of_point_in_direction_relative(&offset, direction)
        }
        BodyRef::Terrain(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::PartProperties;
    use approx::assert_abs_diff_eq;
    use kinetic_geometry::{GlobalCFrame, Shape};
    use nalgebra::{point, vector};

    fn cube_part(position: Position, properties: PartProperties) -> Part {
        Part::new(Shape::cuboid(1.0, 1.0, 1.0), GlobalCFrame::at_position(position), properties)
    }

    #[test]
    fn empty_world_tick_should_be_a_noop_besides_age() {
        let mut world = World::new();
        world.tick(1.0 / 120.0);
        assert_eq!(world.age(), 1);
        assert!(world.is_valid());
    }

    #[test]
    fn added_parts_should_be_registered_exactly_once() {
        let mut world = World::new();
        let id = world.add_part(cube_part(point![0.0, 0.0, 0.0], PartProperties::default()));
        world.add_terrain_part(cube_part(point![5.0, 0.0, 0.0], PartProperties::default()));
        assert_eq!(world.bounds_tree().len(), 2);
        assert!(world.part(id).is_some());
        assert!(world.is_valid());
    }

    #[test]
    fn removing_a_missing_part_should_fail_without_invalidating_the_world() {
        let mut world = World::new();
        let orphan = cube_part(point![0.0, 0.0, 0.0], PartProperties::default());
        assert!(world.remove_part(orphan.id()).is_err());
        assert!(world.is_valid());
    }

    #[test]
    fn removed_parts_should_leave_the_bounds_tree() {
        let mut world = World::new();
        let id = world.add_part(cube_part(point![0.0, 0.0, 0.0], PartProperties::default()));
        let removed = world.remove_part(id).unwrap();
        assert_eq!(removed.id(), id);
        assert_eq!(world.bounds_tree().len(), 0);
        assert!(world.physicals().is_empty());
        assert!(world.is_valid());
    }

    #[test]
    fn gravity_should_accelerate_a_free_body() {
        let mut world = World::new();
        world.add_part(cube_part(point![0.0, 10.0, 0.0], PartProperties::default()));
        world.add_external_force(ExternalForce::DirectionalGravity {
            gravity: vector![0.0, -10.0, 0.0],
        });

        let dt = 1.0 / 120.0;
        world.tick(dt);

        assert_abs_diff_eq!(
            world.physicals()[0].motion().velocity,
            vector![0.0, -10.0 * dt, 0.0],
            epsilon = 1e-12
        );
    }

    #[test]
    fn welded_parts_should_not_generate_contacts() {
        let mut world = World::new();
        let main_id = world.add_part(cube_part(point![0.0, 0.0, 0.0], PartProperties::default()));
        world
            .attach_part(
                main_id,
                cube_part(point![0.0, 0.0, 0.0], PartProperties::default()),
                CFrame::from_translation(vector![0.5, 0.0, 0.0]),
            )
            .unwrap();

        world.tick(1.0 / 120.0);

        assert_eq!(world.telemetry().gjk_collisions, 0);
        assert_abs_diff_eq!(
            world.physicals()[0].motion().velocity,
            Velocity::zeros(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn head_on_elastic_collision_should_exchange_velocities() {
        let elastic = PartProperties::new(1.0, 0.0, 1.0);
        let mut world = World::new();
        world.add_part(cube_part(point![-1.0, 0.0, 0.0], elastic));
        world.add_part(cube_part(point![1.0, 0.0, 0.0], elastic));
        world.physicals_mut()[0].motion_mut().velocity = vector![1.0, 0.0, 0.0];
        world.physicals_mut()[1].motion_mut().velocity = vector![-1.0, 0.0, 0.0];

        let dt = 1.0 / 120.0;
        for _ in 0..200 {
            world.tick(dt);
        }

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
    }

    #[test]
    fn conveyor_terrain_should_drag_resting_body() {
        let mut world = World::new();
        world.add_terrain_part(Part::new(
            Shape::cuboid(20.0, 1.0, 20.0),
            GlobalCFrame::at_position(point![0.0, 0.0, 0.0]),
            PartProperties::new(1.0, 1.0, 0.0)
                .with_conveyor_effect(vector![1.0, 0.0, 0.0]),
        ));
        // Resting slightly inside the belt so a contact forms immediately
        world.add_part(cube_part(point![0.0, 0.98, 0.0], PartProperties::new(1.0, 1.0, 0.0)));
        world.add_external_force(ExternalForce::DirectionalGravity {
            gravity: vector![0.0, -10.0, 0.0],
        });

        let dt = 1.0 / 120.0;
        for _ in 0..60 {
            world.tick(dt);
        }

        // Friction against the moving belt surface drags the cube along +x
        assert!(world.physicals()[0].motion().velocity.x > 0.01);
    }

    #[test]
    fn dissolving_a_physical_should_remap_constraint_indices() {
        let mut world = World::new();
        let first = world.add_part(cube_part(point![0.0, 0.0, 0.0], PartProperties::default()));
        world.add_part(cube_part(point![10.0, 0.0, 0.0], PartProperties::default()));
        world.add_part(cube_part(point![20.0, 0.0, 0.0], PartProperties::default()));

        world
            .add_constraint_group(ConstraintGroup::new(vec![
                crate::constraint::PhysicalConstraint {
                    physical_a: 1,
                    physical_b: 2,
                    constraint: crate::constraint::SoftConstraint::Ball(
                        crate::constraint::BallConstraint {
                            attach_a: point![0.0, 0.0, 0.0],
                            attach_b: point![0.0, 0.0, 0.0],
                        },
                    ),
                },
            ]))
            .unwrap();

        world.remove_part(first).unwrap();

        // Physical 2 was swapped into slot 0; the constraint must follow it
        let group = &world.constraint_groups()[0];
        assert_eq!(group.constraints[0].physical_a, 1);
        assert_eq!(group.constraints[0].physical_b, 0);
        assert!(world.is_valid());
    }
}
