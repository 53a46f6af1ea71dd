//! Articulated rigid bodies.
//!
//! A [`Physical`] is a tree: each node holds a rigid assembly of welded parts
//! (a [`RigidBody`]), and child nodes are connected to their parent through a
//! [`HardConstraint`] with an attach frame on either side. The root of every
//! tree is a [`MotorizedPhysical`], which carries the aggregate motion state
//! and owns the whole structure.

use crate::constraint::{HardConstraint, RelativeMotion};
use crate::fph;
use crate::inertia::{invert_inertia_tensor, parallel_axis_shift};
use crate::part::{Part, PartId};
use crate::quantities::{
    AngularMomentum, Force, Impulse, Moment, Motion, Position, Taylor, Velocity,
};
use kinetic_geometry::{Aabb, CFrame, GlobalCFrame, Sphere};
use kinetic_math::{skew_symmetric, skew_symmetric_squared, transform_basis};
use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// The tolerance used by [`MotorizedPhysical::is_valid`] when comparing world
/// frames against their forward composition from the root.
const VALIDITY_TOLERANCE: fph = 1e-9;

/// A part welded to the main part of a rigid body at a fixed attachment
/// frame.
#[derive(Clone, Debug)]
pub struct AttachedPart {
    pub attachment: CFrame,
    pub part: Part,
}

/// A rigid assembly of parts: a main part together with parts welded to it
/// at fixed attachment frames. All aggregate quantities are expressed in the
/// main part's frame.
#[derive(Clone, Debug)]
pub struct RigidBody {
    main_part: Part,
    attached_parts: Vec<AttachedPart>,
    mass: fph,
    local_center_of_mass: Position,
    inertia: Matrix3<fph>,
}

/// A child physical connected to its parent by a hard constraint, with attach
/// frames on the child's and the parent's main part.
#[derive(Clone, Debug)]
pub struct ConnectedPhysical {
    pub physical: Physical,
    pub constraint: HardConstraint,
    pub attach_on_child: CFrame,
    pub attach_on_parent: CFrame,
}

/// A node of an articulated body tree.
#[derive(Clone, Debug)]
pub struct Physical {
    rigid_body: RigidBody,
    children: Vec<ConnectedPhysical>,
    subtree_mass: fph,
    subtree_center_of_mass: Position,
    subtree_inertia: Matrix3<fph>,
}

/// The root of an articulated body tree, carrying the aggregate motion state
/// of the whole structure.
#[derive(Clone, Debug)]
pub struct MotorizedPhysical {
    root: Physical,
    cframe: GlobalCFrame,
    motion: Motion,
    total_force: Force,
    total_moment: Moment,
    local_centroid: Position,
    circumscribing_radius: fph,
}

/// The Taylor expansion of the aggregate quantities of an articulated body
/// that change as its joints move, relative to a root held at rest. All
/// quantities are expressed in the root main frame.
#[derive(Clone, Debug)]
pub struct InternalMotion {
    /// The center of mass location and its first two time derivatives.
    pub center_of_mass: Taylor<Vector3<fph>>,
    /// The composite inertia tensor about the center of mass and its first
    /// two time derivatives.
    pub inertia: Taylor<Matrix3<fph>>,
    /// The angular momentum about the center of mass due to joint motion.
    pub internal_angular_momentum: AngularMomentum,
}

/// Kinematic state of one tree node relative to the root main frame.
#[derive(Clone, Debug, Default)]
struct NodeKinematics {
    frame: CFrame,
    velocity: Vector3<fph>,
    acceleration: Vector3<fph>,
    angular_velocity: Vector3<fph>,
    angular_acceleration: Vector3<fph>,
}

/// The per-node quantities entering the aggregate Taylor expansion, derived
/// from a node's kinematics and its rigid body.
#[derive(Clone, Debug, Default)]
struct NodeMotionEntry {
    mass: fph,
    com_position: Vector3<fph>,
    com_velocity: Vector3<fph>,
    com_acceleration: Vector3<fph>,
    world_inertia: Matrix3<fph>,
    angular_velocity: Vector3<fph>,
    angular_acceleration: Vector3<fph>,
}

impl NodeMotionEntry {
    fn from_kinematics(body: &RigidBody, kinematics: &NodeKinematics) -> Self {
        let position = kinematics.frame.local_to_global(body.local_center_of_mass());
        let offset = position.coords - kinematics.frame.position();
        let velocity = kinematics.velocity + kinematics.angular_velocity.cross(&offset);
        let acceleration = kinematics.acceleration
            + kinematics.angular_acceleration.cross(&offset)
            + kinematics
                .angular_velocity
                .cross(&kinematics.angular_velocity.cross(&offset));
        let world_inertia = transform_basis(
            body.inertia(),
            &kinematics.frame.rotation().to_rotation_matrix(),
        );
        Self {
            mass: body.mass(),
            com_position: position.coords,
            com_velocity: velocity,
            com_acceleration: acceleration,
            world_inertia,
            angular_velocity: kinematics.angular_velocity,
            angular_acceleration: kinematics.angular_acceleration,
        }
    }
}

/// Scratch storage for [`MotorizedPhysical::compute_internal_motion`]. The
/// buffer grows monotonically to the physical count of the largest tree it
/// has been used with; the caller owns it so that the per-tick recursion
/// allocates nothing in steady state.
#[derive(Clone, Debug, Default)]
pub struct InternalMotionScratch {
    nodes: Vec<NodeMotionEntry>,
}

impl InternalMotionScratch {
    /// Creates an empty scratch buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scratch buffer pre-sized for a tree with the given physical
    /// count.
    pub fn with_capacity(physical_count: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(physical_count),
        }
    }
}

impl RigidBody {
    fn new(main_part: Part) -> Self {
        let mut body = Self {
            mass: main_part.mass(),
            local_center_of_mass: *main_part.local_center_of_mass(),
            inertia: *main_part.local_inertia(),
            main_part,
            attached_parts: Vec::new(),
        };
        body.refresh_aggregates();
        body
    }

    /// Returns the main part of the body.
    pub fn main_part(&self) -> &Part {
        &self.main_part
    }

    /// Returns the parts welded to the main part.
    pub fn attached_parts(&self) -> &[AttachedPart] {
        &self.attached_parts
    }

    /// Returns the total mass of the body.
    pub fn mass(&self) -> fph {
        self.mass
    }

    /// Returns the center of mass of the body in the main part's frame.
    pub fn local_center_of_mass(&self) -> &Position {
        &self.local_center_of_mass
    }

    /// Returns the inertia tensor of the body about its center of mass, in
    /// the main part's frame.
    pub fn inertia(&self) -> &Matrix3<fph> {
        &self.inertia
    }

    fn attach_part(&mut self, part: Part, attachment: CFrame) {
        self.attached_parts.push(AttachedPart { attachment, part });
        self.refresh_aggregates();
    }

    fn detach_part(&mut self, id: PartId) -> Option<Part> {
        let idx = self
            .attached_parts
            .iter()
            .position(|attached| attached.part.id() == id)?;
        let part = self.attached_parts.swap_remove(idx).part;
        self.refresh_aggregates();
        Some(part)
    }

    /// Makes the attached part with the given ID the main part, rebasing all
    /// attachment frames onto it.
    fn make_main_part(&mut self, id: PartId) -> bool {
        let Some(idx) = self
            .attached_parts
            .iter()
            .position(|attached| attached.part.id() == id)
        else {
            return false;
        };

        let new_main_frame = self.attached_parts[idx].attachment;
        std::mem::swap(&mut self.main_part, &mut self.attached_parts[idx].part);
        for (other_idx, attached) in self.attached_parts.iter_mut().enumerate() {
            if other_idx != idx {
                attached.attachment = new_main_frame.global_to_local_frame(&attached.attachment);
            }
        }
        self.attached_parts[idx].attachment = new_main_frame.inverse();
        self.refresh_aggregates();
        true
    }

    /// Recomputes mass, center of mass and inertia from the parts.
    fn refresh_aggregates(&mut self) {
        let mut total_mass = self.main_part.mass();
        let mut weighted_com = self.main_part.local_center_of_mass().coords * total_mass;
        for attached in &self.attached_parts {
            let part_com = attached
                .attachment
                .local_to_global(attached.part.local_center_of_mass());
            total_mass += attached.part.mass();
            weighted_com += part_com.coords * attached.part.mass();
        }
        let center_of_mass = Position::from(weighted_com / total_mass);

        let mut inertia = *self.main_part.local_inertia()
            + parallel_axis_shift(
                self.main_part.mass(),
                &(self.main_part.local_center_of_mass() - center_of_mass),
            );
        for attached in &self.attached_parts {
            let rotated = transform_basis(
                attached.part.local_inertia(),
                &attached.attachment.rotation().to_rotation_matrix(),
            );
            let displacement = attached
                .attachment
                .local_to_global(attached.part.local_center_of_mass())
                - center_of_mass;
            inertia += rotated + parallel_axis_shift(attached.part.mass(), &displacement);
        }

        self.mass = total_mass;
        self.local_center_of_mass = center_of_mass;
        self.inertia = inertia;
    }

    /// Computes the box bounding all parts in the main part's frame.
    fn local_bounds(&self) -> Aabb {
        let mut bounds = frame_relative_bounds(&self.main_part, &CFrame::identity());
        for attached in &self.attached_parts {
            bounds = Aabb::aabb_from_pair(
                &bounds,
                &frame_relative_bounds(&attached.part, &attached.attachment),
            );
        }
        bounds
    }

    fn update_part_cframes(&mut self, main_frame: &GlobalCFrame) {
        self.main_part.set_cframe(*main_frame);
        for attached in &mut self.attached_parts {
            attached
                .part
                .set_cframe(main_frame.local_to_global_frame(&attached.attachment));
        }
    }
}

/// Computes the box bounding the given box after transforming it by the
/// given frame.
fn transformed_bounds(bounds: &Aabb, frame: &CFrame) -> Aabb {
    let lower = bounds.lower_corner();
    let upper = bounds.upper_corner();
    let corners: Vec<Position> = (0..8)
        .map(|corner| {
            frame.local_to_global(&Position::new(
                if corner & 1 == 0 { lower.x } else { upper.x },
                if corner & 2 == 0 { lower.y } else { upper.y },
                if corner & 4 == 0 { lower.z } else { upper.z },
            ))
        })
        .collect();
    Aabb::aabb_for_points(&corners)
}

/// Computes the bounds of the given part's shape after placing it at the
/// given frame, from the shape's support map.
fn frame_relative_bounds(part: &Part, frame: &CFrame) -> Aabb {
    let mut lower = Position::origin();
    let mut upper = Position::origin();
    for axis in 0..3 {
        let mut direction = Vector3::zeros();
        direction[axis] = 1.0;
        let local_up = part.shape().support_point(&frame.relative_to_local(&direction));
        let local_down = part
            .shape()
            .support_point(&frame.relative_to_local(&-direction));
        upper[axis] = frame.local_to_global(&local_up)[axis];
        lower[axis] = frame.local_to_global(&local_down)[axis];
    }
    Aabb::new(lower, upper)
}

impl ConnectedPhysical {
    /// Computes the frame of the child's main part relative to the parent's
    /// main part at the constraint's current state.
    pub fn connection_frame(&self) -> CFrame {
        self.connection_frame_for(&self.constraint.relative_motion())
    }

    fn connection_frame_for(&self, relative_motion: &RelativeMotion) -> CFrame {
        self.attach_on_parent.local_to_global_frame(
            &relative_motion
                .cframe
                .local_to_global_frame(&self.attach_on_child.inverse()),
        )
    }
}

impl Physical {
    fn new(main_part: Part) -> Self {
        let rigid_body = RigidBody::new(main_part);
        let mut physical = Self {
            subtree_mass: rigid_body.mass(),
            subtree_center_of_mass: *rigid_body.local_center_of_mass(),
            subtree_inertia: *rigid_body.inertia(),
            rigid_body,
            children: Vec::new(),
        };
        physical.refresh_subtree_aggregates();
        physical
    }

    /// Returns the rigid assembly of welded parts at this node.
    pub fn rigid_body(&self) -> &RigidBody {
        &self.rigid_body
    }

    /// Returns the children connected to this node by hard constraints.
    pub fn children(&self) -> &[ConnectedPhysical] {
        &self.children
    }

    /// Returns the total mass of the subtree rooted at this node.
    pub fn subtree_mass(&self) -> fph {
        self.subtree_mass
    }

    /// Returns the center of mass of the subtree in this node's main frame
    /// at the current joint state.
    pub fn subtree_center_of_mass(&self) -> &Position {
        &self.subtree_center_of_mass
    }

    /// Returns the inertia tensor of the subtree about its center of mass,
    /// in this node's main frame at the current joint state.
    pub fn subtree_inertia(&self) -> &Matrix3<fph> {
        &self.subtree_inertia
    }

    /// Returns the number of nodes in the subtree rooted at this node.
    pub fn physical_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(|child| child.physical.physical_count())
            .sum::<usize>()
    }

    /// Calls the given closure for every part in the subtree.
    pub fn for_each_part(&self, f: &mut impl FnMut(&Part)) {
        f(&self.rigid_body.main_part);
        for attached in &self.rigid_body.attached_parts {
            f(&attached.part);
        }
        for child in &self.children {
            child.physical.for_each_part(f);
        }
    }

    /// Returns a reference to the part with the given ID, if it is in the
    /// subtree.
    pub fn find_part(&self, id: PartId) -> Option<&Part> {
        if self.rigid_body.main_part.id() == id {
            return Some(&self.rigid_body.main_part);
        }
        if let Some(attached) = self
            .rigid_body
            .attached_parts
            .iter()
            .find(|attached| attached.part.id() == id)
        {
            return Some(&attached.part);
        }
        self.children
            .iter()
            .find_map(|child| child.physical.find_part(id))
    }

    fn contains_part(&self, id: PartId) -> bool {
        self.find_part(id).is_some()
    }

    fn attach_part_at(&mut self, parent_part: PartId, part: Part, attachment: CFrame) -> bool {
        if self.rigid_body.main_part.id() == parent_part {
            self.rigid_body.attach_part(part, attachment);
            return true;
        }
        if let Some(attached) = self
            .rigid_body
            .attached_parts
            .iter()
            .find(|attached| attached.part.id() == parent_part)
        {
            // Rebase the attachment from the welded part onto the main part
            let attachment = attached.attachment.local_to_global_frame(&attachment);
            self.rigid_body.attach_part(part, attachment);
            return true;
        }
        for child in &mut self.children {
            if child.physical.attach_part_at(parent_part, part.clone(), attachment) {
                return true;
            }
        }
        false
    }

    fn attach_with_constraint_at(
        &mut self,
        parent_part: PartId,
        part: Part,
        constraint: HardConstraint,
        attach_on_child: CFrame,
        attach_on_parent: CFrame,
    ) -> bool {
        if self.rigid_body.main_part.id() == parent_part
            || self
                .rigid_body
                .attached_parts
                .iter()
                .any(|attached| attached.part.id() == parent_part)
        {
            let attach_on_parent = if self.rigid_body.main_part.id() == parent_part {
                attach_on_parent
            } else {
                let welded = self
                    .rigid_body
                    .attached_parts
                    .iter()
                    .find(|attached| attached.part.id() == parent_part)
                    .unwrap();
                welded.attachment.local_to_global_frame(&attach_on_parent)
            };
            self.children.push(ConnectedPhysical {
                physical: Physical::new(part),
                constraint,
                attach_on_child,
                attach_on_parent,
            });
            return true;
        }
        for child in &mut self.children {
            if child.physical.attach_with_constraint_at(
                parent_part,
                part.clone(),
                constraint.clone(),
                attach_on_child,
                attach_on_parent,
            ) {
                return true;
            }
        }
        false
    }

    /// Recomputes the subtree aggregates bottom-up at the current joint
    /// state.
    fn refresh_subtree_aggregates(&mut self) {
        self.rigid_body.refresh_aggregates();
        for child in &mut self.children {
            child.physical.refresh_subtree_aggregates();
        }

        let mut total_mass = self.rigid_body.mass();
        let mut weighted_com = self.rigid_body.local_center_of_mass().coords * total_mass;
        for child in &self.children {
            let connection = child.connection_frame();
            let child_com = connection.local_to_global(child.physical.subtree_center_of_mass());
            total_mass += child.physical.subtree_mass();
            weighted_com += child_com.coords * child.physical.subtree_mass();
        }
        let center_of_mass = Position::from(weighted_com / total_mass);

        let mut inertia = *self.rigid_body.inertia()
            + parallel_axis_shift(
                self.rigid_body.mass(),
                &(self.rigid_body.local_center_of_mass() - center_of_mass),
            );
        for child in &self.children {
            let connection = child.connection_frame();
            let rotated = transform_basis(
                child.physical.subtree_inertia(),
                &connection.rotation().to_rotation_matrix(),
            );
            let displacement =
                connection.local_to_global(child.physical.subtree_center_of_mass())
                    - center_of_mass;
            inertia += rotated + parallel_axis_shift(child.physical.subtree_mass(), &displacement);
        }

        self.subtree_mass = total_mass;
        self.subtree_center_of_mass = center_of_mass;
        self.subtree_inertia = inertia;
    }

    fn advance_constraints(&mut self, dt: fph) {
        for child in &mut self.children {
            child.constraint.update(dt);
            child.physical.advance_constraints(dt);
        }
    }

    fn update_part_cframes(&mut self, main_frame: &GlobalCFrame) {
        self.rigid_body.update_part_cframes(main_frame);
        for child in &mut self.children {
            let child_frame = main_frame.local_to_global_frame(&child.connection_frame());
            child.physical.update_part_cframes(&child_frame);
        }
    }

    /// Computes the box bounding the whole subtree in this node's main frame.
    fn subtree_local_bounds(&self, frame: &CFrame) -> Aabb {
        let mut bounds = transformed_bounds(&self.rigid_body.local_bounds(), frame);
        for child in &self.children {
            let child_frame = frame.local_to_global_frame(&child.connection_frame());
            bounds = Aabb::aabb_from_pair(
                &bounds,
                &child.physical.subtree_local_bounds(&child_frame),
            );
        }
        bounds
    }

    fn fill_kinematics(&self, own: NodeKinematics, scratch: &mut Vec<NodeMotionEntry>) {
        scratch.push(NodeMotionEntry::from_kinematics(&self.rigid_body, &own));
        for child in &self.children {
            let child_kinematics = child_kinematics(&own, child);
            child.physical.fill_kinematics(child_kinematics, scratch);
        }
    }
}

/// Computes the kinematics of a connected child from its parent's
/// kinematics, composing the constraint's relative motion through the attach
/// frames.
fn child_kinematics(parent: &NodeKinematics, child: &ConnectedPhysical) -> NodeKinematics {
    let relative_motion = child.constraint.relative_motion();

    // The parent attach frame moves rigidly with the parent node
    let attach_frame = parent.frame.local_to_global_frame(&child.attach_on_parent);
    let attach_offset = attach_frame.position() - parent.frame.position();
    let attach_velocity = parent.velocity + parent.angular_velocity.cross(&attach_offset);
    let attach_acceleration = parent.acceleration
        + parent.angular_acceleration.cross(&attach_offset)
        + parent
            .angular_velocity
            .cross(&parent.angular_velocity.cross(&attach_offset));

    // Relative motion of the child attach frame, rotated into root coords
    let relative_position = attach_frame.local_to_relative(relative_motion.cframe.position());
    let relative_velocity = attach_frame.local_to_relative(&relative_motion.velocity);
    let relative_acceleration = attach_frame.local_to_relative(&relative_motion.acceleration);
    let relative_angular_velocity =
        attach_frame.local_to_relative(&relative_motion.angular_velocity);
    let relative_angular_acceleration =
        attach_frame.local_to_relative(&relative_motion.angular_acceleration);

    let child_attach_velocity = attach_velocity
        + parent.angular_velocity.cross(&relative_position)
        + relative_velocity;
    let child_attach_acceleration = attach_acceleration
        + parent.angular_acceleration.cross(&relative_position)
        + parent
            .angular_velocity
            .cross(&parent.angular_velocity.cross(&relative_position))
        + 2.0 * parent.angular_velocity.cross(&relative_velocity)
        + relative_acceleration;

    let angular_velocity = parent.angular_velocity + relative_angular_velocity;
    let angular_acceleration = parent.angular_acceleration
        + parent.angular_velocity.cross(&relative_angular_velocity)
        + relative_angular_acceleration;

    // The child main frame is rigidly offset from the child attach frame
    let frame = parent.frame.local_to_global_frame(&child.connection_frame());
    let child_attach_position = attach_frame.position() + relative_position;
    let main_offset = frame.position() - child_attach_position;
    let velocity = child_attach_velocity + angular_velocity.cross(&main_offset);
    let acceleration = child_attach_acceleration
        + angular_acceleration.cross(&main_offset)
        + angular_velocity.cross(&angular_velocity.cross(&main_offset));

    NodeKinematics {
        frame,
        velocity,
        acceleration,
        angular_velocity,
        angular_acceleration,
    }
}

impl MotorizedPhysical {
    /// Creates a new single-part articulated body from the given part, using
    /// the part's placement as the root frame.
    pub fn new(main_part: Part) -> Self {
        let cframe = *main_part.cframe();
        let mut physical = Self {
            root: Physical::new(main_part),
            cframe,
            motion: Motion::stationary(),
            total_force: Force::zeros(),
            total_moment: Moment::zeros(),
            local_centroid: Position::origin(),
            circumscribing_radius: 0.0,
        };
        physical.refresh_with_new_parts();
        physical
    }

    /// Returns the root node of the tree.
    pub fn root(&self) -> &Physical {
        &self.root
    }

    /// Returns the world frame of the root main part.
    pub fn cframe(&self) -> &GlobalCFrame {
        &self.cframe
    }

    /// Returns the motion state of the body.
    pub fn motion(&self) -> &Motion {
        &self.motion
    }

    /// Returns the motion state of the body for modification.
    pub fn motion_mut(&mut self) -> &mut Motion {
        &mut self.motion
    }

    /// Returns the total mass of the body.
    pub fn total_mass(&self) -> fph {
        self.root.subtree_mass
    }

    /// Returns the center of mass in the root main frame.
    pub fn local_center_of_mass(&self) -> &Position {
        &self.root.subtree_center_of_mass
    }

    /// Returns the composite inertia tensor about the center of mass, in the
    /// root main frame.
    pub fn inertia(&self) -> &Matrix3<fph> {
        &self.root.subtree_inertia
    }

    /// Returns the total force accumulated for the current step.
    pub fn total_force(&self) -> &Force {
        &self.total_force
    }

    /// Returns the total moment accumulated for the current step.
    pub fn total_moment(&self) -> &Moment {
        &self.total_moment
    }

    /// Returns the center of mass in world space.
    pub fn world_center_of_mass(&self) -> Position {
        self.cframe.local_to_global(&self.root.subtree_center_of_mass)
    }

    /// Returns the composite inertia tensor about the center of mass, in
    /// world axes.
    pub fn world_inertia(&self) -> Matrix3<fph> {
        transform_basis(
            &self.root.subtree_inertia,
            &self.cframe.rotation().to_rotation_matrix(),
        )
    }

    /// Returns the sphere around the whole body in world space, cached from
    /// the latest structural refresh.
    pub fn circumscribing_sphere(&self) -> Sphere {
        Sphere::new(
            self.cframe.local_to_global(&self.local_centroid),
            self.circumscribing_radius,
        )
    }

    /// Returns the number of nodes in the tree.
    pub fn physical_count(&self) -> usize {
        self.root.physical_count()
    }

    /// Calls the given closure for every part in the tree.
    pub fn for_each_part(&self, mut f: impl FnMut(&Part)) {
        self.root.for_each_part(&mut f);
    }

    /// Returns a reference to the part with the given ID, if it is in the
    /// tree.
    pub fn find_part(&self, id: PartId) -> Option<&Part> {
        self.root.find_part(id)
    }

    /// Whether the part with the given ID is in the tree.
    pub fn contains_part(&self, id: PartId) -> bool {
        self.root.contains_part(id)
    }

    /// Welds the given part to the root main part at the given attachment
    /// frame.
    pub fn attach_part(&mut self, part: Part, attachment: CFrame) {
        self.attach_part_to(self.root.rigid_body.main_part.id(), part, attachment)
            .expect("Root main part missing from own tree");
    }

    /// Welds the given part to the part with the given ID at the given
    /// attachment frame.
    ///
    /// Returns an error with the part back if the parent part is not in this
    /// tree.
    pub fn attach_part_to(
        &mut self,
        parent_part: PartId,
        part: Part,
        attachment: CFrame,
    ) -> Result<(), Part> {
        if !self.root.contains_part(parent_part) {
            return Err(part);
        }
        let attached = self.root.attach_part_at(parent_part, part, attachment);
        debug_assert!(attached);
        self.refresh_with_new_parts();
        self.update_part_cframes();
        Ok(())
    }

    /// Connects the given part as a new child physical under the node owning
    /// the given parent part, through the given hard constraint.
    ///
    /// Returns an error with the part back if the parent part is not in this
    /// tree.
    pub fn attach_part_with_constraint(
        &mut self,
        parent_part: PartId,
        part: Part,
        constraint: HardConstraint,
        attach_on_child: CFrame,
        attach_on_parent: CFrame,
    ) -> Result<(), Part> {
        if !self.root.contains_part(parent_part) {
            return Err(part);
        }
        let attached = self.root.attach_with_constraint_at(
            parent_part,
            part,
            constraint,
            attach_on_child,
            attach_on_parent,
        );
        debug_assert!(attached);
        self.refresh_with_new_parts();
        self.update_part_cframes();
        Ok(())
    }

    /// Recomputes all aggregate quantities after a structural change: masses,
    /// centers of mass and inertia tensors bottom-up, and the circumscribing
    /// sphere.
    pub fn refresh_with_new_parts(&mut self) {
        self.root.refresh_subtree_aggregates();

        let bounds = self.root.subtree_local_bounds(&CFrame::identity());
        let centroid = bounds.center();
        // Conservative: measure from the subtree bounds corners
        let max_radius_squared = (0..8)
            .map(|corner| {
                let corner_point = Position::new(
                    if corner & 1 == 0 {
                        bounds.lower_corner().x
                    } else {
                        bounds.upper_corner().x
                    },
                    if corner & 2 == 0 {
                        bounds.lower_corner().y
                    } else {
                        bounds.upper_corner().y
                    },
                    if corner & 4 == 0 {
                        bounds.lower_corner().z
                    } else {
                        bounds.upper_corner().z
                    },
                );
                (corner_point - centroid).norm_squared()
            })
            .fold(0.0, fph::max);

        self.local_centroid = centroid;
        self.circumscribing_radius = max_radius_squared.sqrt();
    }

    /// Propagates the root frame into the world frames of every part in the
    /// tree.
    pub fn update_part_cframes(&mut self) {
        let cframe = self.cframe;
        self.root.update_part_cframes(&cframe);
    }

    /// Places the root main part at the given world frame, moving the whole
    /// tree with it.
    pub fn set_cframe(&mut self, cframe: GlobalCFrame) {
        self.cframe = cframe;
        self.update_part_cframes();
    }

    /// Applies the given force at the center of mass for the current step.
    pub fn apply_force_at_center_of_mass(&mut self, force: Force) {
        self.total_force += force;
    }

    /// Applies the given force at the given world-space displacement from the
    /// center of mass, adding the corresponding moment.
    pub fn apply_force(&mut self, origin: Vector3<fph>, force: Force) {
        self.total_force += force;
        self.apply_moment(origin.cross(&force));
    }

    /// Applies the given moment for the current step.
    pub fn apply_moment(&mut self, moment: Moment) {
        self.total_moment += moment;
    }

    /// Applies the given impulse at the center of mass, changing the linear
    /// velocity immediately.
    pub fn apply_impulse_at_center_of_mass(&mut self, impulse: Impulse) {
        self.motion.velocity += impulse / self.total_mass();
    }

    /// Applies the given impulse at the given world-space displacement from
    /// the center of mass, changing the linear and angular velocity
    /// immediately.
    pub fn apply_impulse(&mut self, origin: Vector3<fph>, impulse: Impulse) {
        self.motion.velocity += impulse / self.total_mass();
        self.apply_angular_impulse(origin.cross(&impulse));
    }

    /// Applies the given angular impulse, changing the angular velocity
    /// immediately.
    pub fn apply_angular_impulse(&mut self, angular_impulse: Vector3<fph>) {
        let local_angular_impulse = self.cframe.relative_to_local(&angular_impulse);
        let (inverse_inertia, _) = invert_inertia_tensor(&self.root.subtree_inertia);
        let local_velocity_change = inverse_inertia * local_angular_impulse;
        self.motion.angular_velocity += self.cframe.local_to_relative(&local_velocity_change);
    }

    /// Computes the velocity of the given world-space point when considered
    /// fixed to the body.
    pub fn velocity_of_point(&self, point: &Position) -> Velocity {
        self.motion
            .velocity_of_point(&(point - self.world_center_of_mass()))
    }

    /// Computes the acceleration of the given world-space point when
    /// considered fixed to the body, from the accelerations of the most
    /// recent step.
    pub fn acceleration_of_point(&self, point: &Position) -> Vector3<fph> {
        let offset = point - self.world_center_of_mass();
        self.motion.acceleration
            + self.motion.angular_acceleration.cross(&offset)
            + self
                .motion
                .angular_velocity
                .cross(&self.motion.angular_velocity.cross(&offset))
    }

    /// Makes the part with the given ID, which must be welded into the root
    /// node, the main part of the body. The root frame follows the promoted
    /// part; nothing moves in world space.
    ///
    /// Promoting the current main part is a no-op.
    ///
    /// # Panics
    /// If the part is not in the root node's rigid body.
    pub fn make_main_part(&mut self, id: PartId) {
        if self.root.rigid_body.main_part.id() == id {
            return;
        }
        let new_main_frame = self
            .root
            .rigid_body
            .attached_parts
            .iter()
            .find(|attached| attached.part.id() == id)
            .map(|attached| attached.attachment)
            .expect("Part to promote is not welded into the root node");

        self.root.rigid_body.make_main_part(id);
        for child in &mut self.root.children {
            child.attach_on_parent = new_main_frame.global_to_local_frame(&child.attach_on_parent);
        }
        self.cframe = self.cframe.local_to_global_frame(&new_main_frame);
        self.refresh_with_new_parts();
        self.update_part_cframes();
    }

    /// Computes the symmetric matrix mapping a force applied at the given
    /// point (expressed in the root main frame, relative to the center of
    /// mass) to the acceleration of that point.
    pub fn point_acceleration_matrix(&self, point: &Vector3<fph>) -> Matrix3<fph> {
        let (inverse_inertia, _) = invert_inertia_tensor(&self.root.subtree_inertia);
        let cross_matrix = skew_symmetric(point);
        Matrix3::from_diagonal_element(1.0 / self.total_mass())
            + cross_matrix.transpose() * inverse_inertia * cross_matrix
    }

    /// Computes the effective inertia felt by a force applied at the given
    /// point in the given direction, both expressed in the root main frame
    /// relative to the center of mass.
    pub fn inertia_of_point_in_direction(
        &self,
        point: &Vector3<fph>,
        direction: &Vector3<fph>,
    ) -> fph {
        let acceleration_matrix = self.point_acceleration_matrix(point);
        let acceleration = acceleration_matrix * direction;
        let acceleration_along_direction =
            acceleration.dot(direction) / direction.norm_squared();
        1.0 / acceleration_along_direction
    }

    /// Computes the effective inertia felt by a force applied at the given
    /// world-space point in the given world-space direction.
    pub fn inertia_of_point_in_direction_relative(
        &self,
        point: &Vector3<fph>,
        direction: &Vector3<fph>,
    ) -> fph {
        self.inertia_of_point_in_direction(
            &self.cframe.relative_to_local(point),
            &self.cframe.relative_to_local(direction),
        )
    }

    /// Computes the translational kinetic energy of the body.
    pub fn velocity_kinetic_energy(&self) -> fph {
        0.5 * self.total_mass() * self.motion.velocity.norm_squared()
    }

    /// Computes the rotational kinetic energy of the body.
    pub fn angular_kinetic_energy(&self) -> fph {
        let local_angular_velocity = self.cframe.relative_to_local(&self.motion.angular_velocity);
        0.5 * (self.root.subtree_inertia * local_angular_velocity).dot(&local_angular_velocity)
    }

    /// Computes the total kinetic energy of the body.
    pub fn kinetic_energy(&self) -> fph {
        self.velocity_kinetic_energy() + self.angular_kinetic_energy()
    }

    /// Computes the angular momentum of the body about its center of mass in
    /// world space, excluding internal joint motion.
    pub fn angular_momentum(&self) -> AngularMomentum {
        self.world_inertia() * self.motion.angular_velocity
    }

    /// Computes the Taylor expansion of the joint-driven aggregate motion of
    /// the tree, using the given scratch buffer for the recursion.
    pub fn compute_internal_motion(
        &self,
        scratch: &mut InternalMotionScratch,
    ) -> InternalMotion {
        scratch.nodes.clear();
        self.root
            .fill_kinematics(NodeKinematics::default(), &mut scratch.nodes);

        let total_mass: fph = scratch.nodes.iter().map(|entry| entry.mass).sum();

        let mut com = Taylor::<Vector3<fph>>::default();
        for entry in &scratch.nodes {
            com.value += entry.mass * entry.com_position;
            com.first_derivative += entry.mass * entry.com_velocity;
            com.second_derivative += entry.mass * entry.com_acceleration;
        }
        com.value /= total_mass;
        com.first_derivative /= total_mass;
        com.second_derivative /= total_mass;

        let mut inertia = Taylor::<Matrix3<fph>> {
            value: Matrix3::zeros(),
            first_derivative: Matrix3::zeros(),
            second_derivative: Matrix3::zeros(),
        };
        let mut internal_angular_momentum = AngularMomentum::zeros();

        for entry in &scratch.nodes {
            let world_inertia = entry.world_inertia;

            let spin = skew_symmetric(&entry.angular_velocity);
            let spin_rate = skew_symmetric(&entry.angular_acceleration);

            let inertia_rate = spin * world_inertia - world_inertia * spin;
            let inertia_rate_rate = spin_rate * world_inertia - world_inertia * spin_rate
                + spin * spin * world_inertia
                - 2.0 * spin * world_inertia * spin
                + world_inertia * spin * spin;

            let displacement = entry.com_position - com.value;
            let displacement_rate = entry.com_velocity - com.first_derivative;
            let displacement_rate_rate = entry.com_acceleration - com.second_derivative;

            let shift = -entry.mass * skew_symmetric_squared(&displacement);
            let shift_rate = -entry.mass
                * (displacement_rate * displacement.transpose()
                    + displacement * displacement_rate.transpose()
                    - 2.0 * displacement.dot(&displacement_rate) * Matrix3::identity());
            let shift_rate_rate = -entry.mass
                * (displacement_rate_rate * displacement.transpose()
                    + 2.0 * displacement_rate * displacement_rate.transpose()
                    + displacement * displacement_rate_rate.transpose()
                    - 2.0
                        * (displacement_rate.norm_squared()
                            + displacement.dot(&displacement_rate_rate))
                        * Matrix3::identity());

            inertia.value += world_inertia + shift;
            inertia.first_derivative += inertia_rate + shift_rate;
            inertia.second_derivative += inertia_rate_rate + shift_rate_rate;

            internal_angular_momentum += world_inertia * entry.angular_velocity
                + entry.mass * displacement.cross(&displacement_rate);
        }

        InternalMotion {
            center_of_mass: com,
            inertia,
            internal_angular_momentum,
        }
    }

    /// Advances the body by one semi-implicit step: accumulated forces and
    /// moments become velocity changes, the body moves and rotates about its
    /// center of mass, and the hard constraints advance their state. Joint
    /// motion neither displaces the center of mass nor changes the angular
    /// momentum of the body.
    pub fn update(&mut self, dt: fph, scratch: &mut InternalMotionScratch) {
        let mass = self.total_mass();
        let acceleration = self.total_force / mass;

        let local_moment = self.cframe.relative_to_local(&self.total_moment);
        let (inverse_inertia, regularized) = invert_inertia_tensor(&self.root.subtree_inertia);
        if regularized {
            log::warn!("Regularized singular inertia tensor during integration");
        }
        let local_angular_acceleration = inverse_inertia * local_moment;

        self.total_force = Force::zeros();
        self.total_moment = Moment::zeros();

        // The translation uses the velocity from before this step together
        // with the kinematic half-acceleration term, which reproduces
        // constant-acceleration trajectories exactly
        let translation = self.motion.velocity * dt + acceleration * (0.5 * dt * dt);

        self.motion.velocity += acceleration * dt;
        self.motion.angular_velocity += self
            .cframe
            .local_to_relative(&(local_angular_acceleration * dt));
        self.motion.acceleration = acceleration;
        self.motion.angular_acceleration =
            self.cframe.local_to_relative(&local_angular_acceleration);

        let rotation = UnitQuaternion::from_scaled_axis(self.motion.angular_velocity * dt);

        self.rotate_around_center_of_mass(&rotation);
        self.cframe.translate(&translation);
        self.cframe.renormalize_rotation();

        if self.root.children.is_empty() {
            self.update_part_cframes();
            return;
        }

        // Advancing joints changes the mass distribution; keep the center of
        // mass and the angular momentum of the whole body unchanged by the
        // internal motion
        let world_com_before = self.world_center_of_mass();
        let internal_before = self.compute_internal_motion(scratch);
        let angular_momentum_before = self.world_inertia() * self.motion.angular_velocity
            + self
                .cframe
                .local_to_relative(&internal_before.internal_angular_momentum);

        self.root.advance_constraints(dt);
        self.root.refresh_subtree_aggregates();

        let world_com_after = self.world_center_of_mass();
        self.cframe.translate(&(world_com_before - world_com_after));

        let internal_after = self.compute_internal_motion(scratch);
        let world_inertia_after = self.world_inertia();
        let (inverse_world_inertia, _) = invert_inertia_tensor(&world_inertia_after);
        self.motion.angular_velocity = inverse_world_inertia
            * (angular_momentum_before
                - self
                    .cframe
                    .local_to_relative(&internal_after.internal_angular_momentum));

        self.update_part_cframes();
    }

    /// Rotates the whole body around its center of mass.
    pub fn rotate_around_center_of_mass(&mut self, rotation: &UnitQuaternion<fph>) {
        let relative_com = self
            .cframe
            .local_to_relative(&self.root.subtree_center_of_mass.coords);
        let rotation_offset = rotation.transform_vector(&relative_com) - relative_com;
        self.cframe.rotate(rotation);
        self.cframe.translate(&-rotation_offset);
    }

    /// Translates the whole body.
    pub fn translate(&mut self, translation: &Vector3<fph>) {
        self.cframe.translate(translation);
        self.update_part_cframes();
    }

    /// Removes the part with the given ID from the tree.
    pub fn remove_part(&mut self, id: PartId) -> RemovePartOutcome {
        let root_frame = self.cframe;
        let world_com = self.world_center_of_mass();
        match remove_part_from(&mut self.root, &root_frame, id) {
            NodeRemoval::NotFound => RemovePartOutcome::NotFound,
            NodeRemoval::Removed { part, rebase } => {
                if let Some(rebase) = rebase {
                    // The root main part changed; the root frame follows it
                    self.cframe = self.cframe.local_to_global_frame(&rebase);
                }
                self.refresh_with_new_parts();
                self.update_part_cframes();
                RemovePartOutcome::Removed {
                    part,
                    split_off: Vec::new(),
                }
            }
            NodeRemoval::Dissolved { removed, orphans } => {
                let motion = self.motion;
                let orphans: Vec<MotorizedPhysical> = orphans
                    .into_iter()
                    .map(|(frame, physical)| {
                        motorized_from_orphan(frame, physical, &motion, &world_com)
                    })
                    .collect();

                if removed.id() == self.root.rigid_body.main_part.id() {
                    // The root node itself dissolved; this body is spent
                    RemovePartOutcome::Dissolved { removed, orphans }
                } else {
                    // An inner node dissolved; this body remains valid with
                    // the disconnected subtrees split off
                    self.refresh_with_new_parts();
                    self.update_part_cframes();
                    RemovePartOutcome::Removed {
                        part: removed,
                        split_off: orphans,
                    }
                }
            }
        }
    }

    /// Whether every invariant of the tree holds: part world frames match
    /// their forward composition from the root, and the cached aggregates
    /// match recomputation.
    pub fn is_valid(&self) -> bool {
        let mut part_ids = Vec::new();
        self.for_each_part(|part| part_ids.push(part.id()));
        part_ids.sort_unstable();
        part_ids.dedup();
        let mut part_count = 0;
        self.for_each_part(|_| part_count += 1);
        if part_ids.len() != part_count {
            return false;
        }

        let mut expected = self.clone();
        expected.root.refresh_subtree_aggregates();
        expected.update_part_cframes();

        if (expected.total_mass() - self.total_mass()).abs()
            > VALIDITY_TOLERANCE * expected.total_mass()
        {
            return false;
        }
        if (expected.root.subtree_center_of_mass - self.root.subtree_center_of_mass).norm()
            > VALIDITY_TOLERANCE
        {
            return false;
        }

        let mut expected_frames = Vec::new();
        expected.for_each_part(|part| expected_frames.push(*part.cframe()));
        let mut frames_match = true;
        let mut idx = 0;
        self.for_each_part(|part| {
            let expected_frame = &expected_frames[idx];
            if (expected_frame.position() - part.cframe().position()).norm() > VALIDITY_TOLERANCE
                || expected_frame.rotation().angle_to(part.cframe().rotation())
                    > VALIDITY_TOLERANCE
            {
                frames_match = false;
            }
            idx += 1;
        });
        frames_match
    }
}

/// The result of removing a part from a [`MotorizedPhysical`].
#[derive(Debug)]
pub enum RemovePartOutcome {
    /// The part was not in the tree.
    NotFound,
    /// The part was removed and the tree remains valid. If the removal
    /// dissolved an inner node, the subtrees hanging off that node continue
    /// as the independent bodies in `split_off`.
    Removed {
        part: Part,
        split_off: Vec<MotorizedPhysical>,
    },
    /// The part was the last part of the root node's rigid body, dissolving
    /// the root. The disconnected subtrees become independent bodies and the
    /// original body must be discarded.
    Dissolved {
        removed: Part,
        orphans: Vec<MotorizedPhysical>,
    },
}

enum NodeRemoval {
    NotFound,
    /// The part was removed. If removing it promoted a different part to
    /// main, `rebase` holds the frame of the new main part expressed in the
    /// old main frame, so the caller can rebase any frame referring to this
    /// node.
    Removed {
        part: Part,
        rebase: Option<CFrame>,
    },
    Dissolved {
        removed: Part,
        orphans: Vec<(GlobalCFrame, Physical)>,
    },
}

fn remove_part_from(node: &mut Physical, node_frame: &GlobalCFrame, id: PartId) -> NodeRemoval {
    if let Some(part) = node.rigid_body.detach_part(id) {
        return NodeRemoval::Removed { part, rebase: None };
    }

    if node.rigid_body.main_part.id() == id {
        if let Some(new_main) = node
            .rigid_body
            .attached_parts
            .first()
            .map(|attached| (attached.part.id(), attached.attachment))
        {
            let (new_main_id, new_main_frame) = new_main;
            node.rigid_body.make_main_part(new_main_id);
            // The node frame is now the frame of the promoted part; child
            // attach frames on this node must be rebased accordingly
            for child in &mut node.children {
                child.attach_on_parent =
                    new_main_frame.global_to_local_frame(&child.attach_on_parent);
            }
            let part = node
                .rigid_body
                .detach_part(id)
                .expect("Demoted main part missing from attachments");
            return NodeRemoval::Removed {
                part,
                rebase: Some(new_main_frame),
            };
        }

        // The node's only part is going away: its child subtrees become
        // orphans placed at their current world frames
        let orphans = node
            .children
            .drain(..)
            .map(|child| {
                let child_frame = node_frame.local_to_global_frame(&child.connection_frame());
                (child_frame, child.physical)
            })
            .collect();
        let removed = node.rigid_body.main_part.clone();
        return NodeRemoval::Dissolved { removed, orphans };
    }

    for child_idx in 0..node.children.len() {
        let child_frame =
            node_frame.local_to_global_frame(&node.children[child_idx].connection_frame());
        match remove_part_from(&mut node.children[child_idx].physical, &child_frame, id) {
            NodeRemoval::NotFound => continue,
            NodeRemoval::Removed { part, rebase } => {
                if let Some(rebase) = rebase {
                    // The child node's main frame moved; its attach frame is
                    // expressed on that main part
                    let child = &mut node.children[child_idx];
                    child.attach_on_child = rebase.global_to_local_frame(&child.attach_on_child);
                }
                return NodeRemoval::Removed { part, rebase: None };
            }
            NodeRemoval::Dissolved { removed, orphans } => {
                node.children.swap_remove(child_idx);
                return NodeRemoval::Dissolved { removed, orphans };
            }
        }
    }

    NodeRemoval::NotFound
}

/// Builds an independent body from a subtree disconnected by part removal,
/// inheriting the original body's motion at the subtree's location.
fn motorized_from_orphan(
    frame: GlobalCFrame,
    mut physical: Physical,
    motion: &Motion,
    original_world_com: &Position,
) -> MotorizedPhysical {
    physical.refresh_subtree_aggregates();
    let mut motorized = MotorizedPhysical {
        cframe: frame,
        root: physical,
        motion: Motion::stationary(),
        total_force: Force::zeros(),
        total_moment: Moment::zeros(),
        local_centroid: Position::origin(),
        circumscribing_radius: 0.0,
    };
    motorized.refresh_with_new_parts();
    motorized.update_part_cframes();

    let com_offset = motorized.world_center_of_mass() - original_world_com;
    motorized.motion =
        Motion::new(motion.velocity_of_point(&com_offset), motion.angular_velocity);
    motorized
}
