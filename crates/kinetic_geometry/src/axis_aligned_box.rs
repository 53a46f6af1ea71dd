//! Representation of axis-aligned boxes.

use nalgebra::{Point3, UnitVector3, Vector3};
use serde::{Deserialize, Serialize};

/// A box with face normals along the axes of the coordinate system,
/// represented by the corner with the lowest coordinates and the corner with
/// the highest coordinates.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    lower_corner: Point3<f64>,
    upper_corner: Point3<f64>,
}

/// A ray with an origin and a unit direction.
#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: Point3<f64>,
    pub direction: UnitVector3<f64>,
}

impl Aabb {
    /// Creates a new box with the given lower and upper corner points.
    pub fn new(lower_corner: Point3<f64>, upper_corner: Point3<f64>) -> Self {
        Self {
            lower_corner,
            upper_corner,
        }
    }

    /// Creates the box bounding the given set of points.
    ///
    /// # Panics
    /// If the point slice is empty.
    pub fn aabb_for_points(points: &[Point3<f64>]) -> Self {
        assert!(
            !points.is_empty(),
            "Tried creating bounding box for empty point set"
        );
        let mut lower_corner = points[0];
        let mut upper_corner = points[0];
        for point in &points[1..] {
            lower_corner = lower_corner.inf(point);
            upper_corner = upper_corner.sup(point);
        }
        Self::new(lower_corner, upper_corner)
    }

    /// Creates the box bounding both of the given boxes.
    pub fn aabb_from_pair(aabb_1: &Self, aabb_2: &Self) -> Self {
        Self::new(
            aabb_1.lower_corner.inf(&aabb_2.lower_corner),
            aabb_1.upper_corner.sup(&aabb_2.upper_corner),
        )
    }

    /// Returns the corner of the box with the lowest coordinates.
    pub fn lower_corner(&self) -> &Point3<f64> {
        &self.lower_corner
    }

    /// Returns the corner of the box with the highest coordinates.
    pub fn upper_corner(&self) -> &Point3<f64> {
        &self.upper_corner
    }

    /// Returns the center point of the box.
    pub fn center(&self) -> Point3<f64> {
        self.lower_corner + 0.5 * (self.upper_corner - self.lower_corner)
    }

    /// Returns the extent of the box along each axis.
    pub fn extents(&self) -> Vector3<f64> {
        self.upper_corner - self.lower_corner
    }

    /// Computes half the surface area of the box. This is the cost metric
    /// used when arranging boxes in a [`BoundsTree`](crate::BoundsTree).
    pub fn cost(&self) -> f64 {
        let extents = self.extents();
        extents.x * extents.y + extents.y * extents.z + extents.z * extents.x
    }

    /// Whether the given point is inside the box. Points on the boundary are
    /// considered inside.
    pub fn contains_point(&self, point: &Point3<f64>) -> bool {
        (0..3).all(|axis| {
            point[axis] >= self.lower_corner[axis] && point[axis] <= self.upper_corner[axis]
        })
    }

    /// Whether the given box lies fully inside this box. Shared boundaries
    /// are considered inside.
    pub fn contains_box(&self, other: &Self) -> bool {
        self.contains_point(&other.lower_corner) && self.contains_point(&other.upper_corner)
    }

    /// Whether this box and the given box overlap. Shared boundaries count as
    /// overlap.
    pub fn intersects_box(&self, other: &Self) -> bool {
        (0..3).all(|axis| {
            self.lower_corner[axis] <= other.upper_corner[axis]
                && other.lower_corner[axis] <= self.upper_corner[axis]
        })
    }

    /// Returns the box expanded by the given margin in every direction.
    pub fn expanded(&self, margin: f64) -> Self {
        let margin = Vector3::from_element(margin);
        Self::new(self.lower_corner - margin, self.upper_corner + margin)
    }

    /// Returns the box translated by the given displacement.
    pub fn translated(&self, displacement: &Vector3<f64>) -> Self {
        Self::new(
            self.lower_corner + displacement,
            self.upper_corner + displacement,
        )
    }

    /// Whether the given ray passes through the box, determined with the
    /// slab method.
    pub fn intersects_ray(&self, ray: &Ray) -> bool {
        let mut t_min = f64::NEG_INFINITY;
        let mut t_max = f64::INFINITY;

        for axis in 0..3 {
            let direction = ray.direction[axis];
            if direction.abs() < f64::EPSILON {
                if ray.origin[axis] < self.lower_corner[axis]
                    || ray.origin[axis] > self.upper_corner[axis]
                {
                    return false;
                }
            } else {
                let inv_direction = 1.0 / direction;
                let t_1 = (self.lower_corner[axis] - ray.origin[axis]) * inv_direction;
                let t_2 = (self.upper_corner[axis] - ray.origin[axis]) * inv_direction;
                t_min = t_min.max(t_1.min(t_2));
                t_max = t_max.min(t_1.max(t_2));
            }
        }

        t_max >= t_min.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{point, vector};

    #[test]
    fn should_contain_own_center() {
        let aabb = Aabb::new(point![-1.0, -2.0, -3.0], point![1.0, 2.0, 3.0]);
        assert!(aabb.contains_point(&aabb.center()));
    }

    #[test]
    fn merged_box_should_contain_both_inputs() {
        let aabb_1 = Aabb::new(point![-1.0, 0.0, 0.0], point![1.0, 1.0, 1.0]);
        let aabb_2 = Aabb::new(point![0.5, -2.0, 0.0], point![3.0, 0.5, 0.5]);
        let merged = Aabb::aabb_from_pair(&aabb_1, &aabb_2);
        assert!(merged.contains_box(&aabb_1));
        assert!(merged.contains_box(&aabb_2));
    }

    #[test]
    fn disjoint_boxes_should_not_intersect() {
        let aabb_1 = Aabb::new(point![0.0, 0.0, 0.0], point![1.0, 1.0, 1.0]);
        let aabb_2 = Aabb::new(point![2.0, 0.0, 0.0], point![3.0, 1.0, 1.0]);
        assert!(!aabb_1.intersects_box(&aabb_2));
        assert!(aabb_2.intersects_box(&aabb_2));
    }

    #[test]
    fn ray_toward_box_should_intersect_it() {
        let aabb = Aabb::new(point![1.0, -1.0, -1.0], point![2.0, 1.0, 1.0]);
        let hitting_ray = Ray {
            origin: point![0.0, 0.0, 0.0],
            direction: UnitVector3::new_normalize(vector![1.0, 0.1, 0.0]),
        };
        let missing_ray = Ray {
            origin: point![0.0, 0.0, 0.0],
            direction: UnitVector3::new_normalize(vector![-1.0, 0.0, 0.0]),
        };
        assert!(aabb.intersects_ray(&hitting_ray));
        assert!(!aabb.intersects_ray(&missing_ray));
    }
}
