//! Representation of spheres.

use crate::Aabb;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// A sphere represented by the center point and the radius.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    center: Point3<f64>,
    radius: f64,
}

impl Sphere {
    /// Creates a new sphere with the given center and radius.
    ///
    /// # Panics
    /// If the given radius is negative.
    pub fn new(center: Point3<f64>, radius: f64) -> Self {
        assert!(radius >= 0.0, "Tried creating sphere with negative radius");
        Self { center, radius }
    }

    /// Returns the center of the sphere.
    pub fn center(&self) -> &Point3<f64> {
        &self.center
    }

    /// Returns the radius of the sphere.
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Returns the square of the radius of the sphere.
    pub fn radius_squared(&self) -> f64 {
        self.radius * self.radius
    }

    /// Whether the given point is inside the sphere. Points on the boundary
    /// are considered inside.
    pub fn contains_point(&self, point: &Point3<f64>) -> bool {
        (point - self.center).norm_squared() <= self.radius_squared()
    }

    /// Returns the sphere translated by the given displacement.
    pub fn translated(&self, displacement: &Vector3<f64>) -> Self {
        Self::new(self.center + displacement, self.radius)
    }

    /// Computes the axis-aligned box bounding the sphere.
    pub fn compute_aabb(&self) -> Aabb {
        let extent = Vector3::from_element(self.radius);
        Aabb::new(self.center - extent, self.center + extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::point;

    #[test]
    fn should_contain_center_but_not_point_outside_radius() {
        let sphere = Sphere::new(point![1.0, 2.0, 3.0], 0.5);
        assert!(sphere.contains_point(sphere.center()));
        assert!(!sphere.contains_point(&point![1.6, 2.0, 3.0]));
    }

    #[test]
    fn bounding_box_should_contain_sphere_extremes() {
        let sphere = Sphere::new(point![0.0, 1.0, 0.0], 2.0);
        let aabb = sphere.compute_aabb();
        assert!(aabb.contains_point(&point![2.0, 1.0, 0.0]));
        assert!(aabb.contains_point(&point![0.0, -1.0, 0.0]));
    }

    #[test]
    #[should_panic]
    fn should_panic_for_negative_radius() {
        Sphere::new(Point3::origin(), -1.0);
    }
}
