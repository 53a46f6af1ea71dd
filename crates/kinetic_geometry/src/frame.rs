//! Rigid coordinate frames.

use nalgebra::{Point3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A rigid transform with a translation relative to some parent frame and an
/// orthonormal rotation.
///
/// The rotation is kept orthonormal by construction; after long chains of
/// composition it can be repaired with [`Self::renormalize_rotation`].
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CFrame {
    position: Vector3<f64>,
    rotation: UnitQuaternion<f64>,
}

/// A rigid transform whose position is an absolute location in the world.
///
/// This is the frame type carried by objects placed directly in the world,
/// where positions can be large; frames relative to other frames use
/// [`CFrame`].
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalCFrame {
    position: Point3<f64>,
    rotation: UnitQuaternion<f64>,
}

impl CFrame {
    /// Creates a new frame with the given position and rotation.
    pub fn new(position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self { position, rotation }
    }

    /// Creates a new frame with the given position and the identity rotation.
    pub fn from_translation(position: Vector3<f64>) -> Self {
        Self::new(position, UnitQuaternion::identity())
    }

    /// Creates a new frame with the given rotation, located at the origin.
    pub fn from_rotation(rotation: UnitQuaternion<f64>) -> Self {
        Self::new(Vector3::zeros(), rotation)
    }

    /// The identity frame.
    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), UnitQuaternion::identity())
    }

    /// Returns the position of the frame.
    pub fn position(&self) -> &Vector3<f64> {
        &self.position
    }

    /// Returns the rotation of the frame.
    pub fn rotation(&self) -> &UnitQuaternion<f64> {
        &self.rotation
    }

    /// Transforms the given point from this frame to the parent frame.
    pub fn local_to_global(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation.transform_point(point) + self.position
    }

    /// Transforms the given point from the parent frame to this frame.
    pub fn global_to_local(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation
            .inverse_transform_point(&(point - self.position))
    }

    /// Rotates the given vector from this frame to the parent frame, without
    /// translating.
    pub fn local_to_relative(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.transform_vector(vector)
    }

    /// Rotates the given vector from the parent frame to this frame, without
    /// translating.
    pub fn relative_to_local(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse_transform_vector(vector)
    }

    /// Composes this frame with the given frame expressed in this frame's
    /// coordinates.
    pub fn local_to_global_frame(&self, frame: &CFrame) -> CFrame {
        CFrame::new(
            self.position + self.rotation.transform_vector(&frame.position),
            self.rotation * frame.rotation,
        )
    }

    /// Expresses the given frame, which shares this frame's parent, in this
    /// frame's coordinates.
    pub fn global_to_local_frame(&self, frame: &CFrame) -> CFrame {
        let inverse_rotation = self.rotation.inverse();
        CFrame::new(
            inverse_rotation.transform_vector(&(frame.position - self.position)),
            inverse_rotation * frame.rotation,
        )
    }

    /// Returns the inverse of this frame.
    pub fn inverse(&self) -> CFrame {
        let inverse_rotation = self.rotation.inverse();
        CFrame::new(
            -inverse_rotation.transform_vector(&self.position),
            inverse_rotation,
        )
    }

    /// Repairs accumulated numerical drift in the rotation quaternion.
    pub fn renormalize_rotation(&mut self) {
        self.rotation.renormalize();
    }
}

impl Default for CFrame {
    fn default() -> Self {
        Self::identity()
    }
}

impl GlobalCFrame {
    /// Creates a new frame with the given world position and rotation.
    pub fn new(position: Point3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self { position, rotation }
    }

    /// Creates a new frame at the given world position with the identity
    /// rotation.
    pub fn at_position(position: Point3<f64>) -> Self {
        Self::new(position, UnitQuaternion::identity())
    }

    /// The frame at the world origin with the identity rotation.
    pub fn identity() -> Self {
        Self::new(Point3::origin(), UnitQuaternion::identity())
    }

    /// Returns the world position of the frame.
    pub fn position(&self) -> &Point3<f64> {
        &self.position
    }

    /// Returns the rotation of the frame.
    pub fn rotation(&self) -> &UnitQuaternion<f64> {
        &self.rotation
    }

    /// Transforms the given point from this frame to world space.
    pub fn local_to_global(&self, point: &Point3<f64>) -> Point3<f64> {
        self.position + self.rotation.transform_point(point).coords
    }

    /// Transforms the given world-space point to this frame.
    pub fn global_to_local(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation
            .inverse_transform_point(&Point3::from(point - self.position))
    }

    /// Rotates the given vector from this frame to world space.
    pub fn local_to_relative(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.transform_vector(vector)
    }

    /// Rotates the given world-space vector to this frame.
    pub fn relative_to_local(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse_transform_vector(vector)
    }

    /// Composes this frame with the given frame expressed in this frame's
    /// coordinates, producing a world-space frame.
    pub fn local_to_global_frame(&self, frame: &CFrame) -> GlobalCFrame {
        GlobalCFrame::new(
            self.position + self.rotation.transform_vector(frame.position()),
            self.rotation * frame.rotation(),
        )
    }

    /// Expresses the given world-space frame in this frame's coordinates.
    pub fn global_to_local_frame(&self, frame: &GlobalCFrame) -> CFrame {
        let inverse_rotation = self.rotation.inverse();
        CFrame::new(
            inverse_rotation.transform_vector(&(frame.position - self.position)),
            inverse_rotation * frame.rotation,
        )
    }

    /// Translates the frame by the given world-space displacement.
    pub fn translate(&mut self, translation: &Vector3<f64>) {
        self.position += translation;
    }

    /// Applies the given rotation to the frame's rotation, leaving the
    /// position unchanged.
    pub fn rotate(&mut self, rotation: &UnitQuaternion<f64>) {
        self.rotation = rotation * self.rotation;
    }

    /// Repairs accumulated numerical drift in the rotation quaternion.
    pub fn renormalize_rotation(&mut self) {
        self.rotation.renormalize();
    }
}

impl Default for GlobalCFrame {
    fn default() -> Self {
        Self::identity()
    }
}
