//! Convex shape descriptions.

use crate::{Aabb, ConvexPolyhedron};
use nalgebra::{Matrix3, Point3, Vector3};
use std::sync::Arc;

/// The default number of sides used when triangulating cylinders.
pub const CYLINDER_TRIANGULATION_SIDES: u32 = 16;

/// A canonical convex shape occupying the unit cube `[-0.5, 0.5]³` before
/// scaling.
///
/// A class is immutable once created. Two classes are considered equal only if
/// they are the same class; for the polyhedral variant this means sharing the
/// same underlying allocation.
#[derive(Clone, Debug)]
pub enum ShapeClass {
    /// The unit cube.
    Box,
    /// The sphere with diameter 1. Under non-uniform scaling it becomes a
    /// triaxial ellipsoid.
    Sphere,
    /// The cylinder with diameter 1 and height 1, with the length axis along
    /// z.
    Cylinder,
    /// An arbitrary convex polyhedron.
    Convex(Arc<ConvexPolyhedron>),
}

/// A convex shape: a [`ShapeClass`] together with the scale factors (width,
/// height, depth) applied along the x-, y- and z-axis.
#[derive(Clone, Debug, PartialEq)]
pub struct Shape {
    class: ShapeClass,
    scale: Vector3<f64>,
}

impl ShapeClass {
    /// Creates a polyhedral shape class from the given polyhedron.
    pub fn convex(polyhedron: ConvexPolyhedron) -> Self {
        Self::Convex(Arc::new(polyhedron))
    }
}

impl PartialEq for ShapeClass {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Box, Self::Box) | (Self::Sphere, Self::Sphere) | (Self::Cylinder, Self::Cylinder) => {
                true
            }
            (Self::Convex(a), Self::Convex(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Shape {
    /// Creates a new shape with the given class and scale factors.
    ///
    /// # Panics
    /// If any scale factor does not exceed zero.
    pub fn new(class: ShapeClass, width: f64, height: f64, depth: f64) -> Self {
        assert!(
            width > 0.0 && height > 0.0 && depth > 0.0,
            "Tried creating shape with scale factor not exceeding zero"
        );
        Self {
            class,
            scale: Vector3::new(width, height, depth),
        }
    }

    /// Creates a box shape with the given extents.
    pub fn cuboid(width: f64, height: f64, depth: f64) -> Self {
        Self::new(ShapeClass::Box, width, height, depth)
    }

    /// Creates a sphere shape with the given diameter.
    pub fn sphere(diameter: f64) -> Self {
        Self::new(ShapeClass::Sphere, diameter, diameter, diameter)
    }

    /// Creates a cylinder shape with the given diameter and height, with the
    /// length axis along z.
    pub fn cylinder(diameter: f64, height: f64) -> Self {
        Self::new(ShapeClass::Cylinder, diameter, diameter, height)
    }

    /// Returns the class of the shape.
    pub fn class(&self) -> &ShapeClass {
        &self.class
    }

    /// Returns the scale factors (width, height, depth) of the shape.
    pub fn scale(&self) -> &Vector3<f64> {
        &self.scale
    }

    /// Returns the extent of the shape along the x-axis.
    pub fn width(&self) -> f64 {
        self.scale.x
    }

    /// Returns the extent of the shape along the y-axis.
    pub fn height(&self) -> f64 {
        self.scale.y
    }

    /// Returns the extent of the shape along the z-axis.
    pub fn depth(&self) -> f64 {
        self.scale.z
    }

    /// Returns the shape with its scale factors multiplied componentwise by
    /// the given factors.
    pub fn scaled(&self, factors: &Vector3<f64>) -> Self {
        Self::new(
            self.class.clone(),
            self.scale.x * factors.x,
            self.scale.y * factors.y,
            self.scale.z * factors.z,
        )
    }

    /// Finds the point on the shape lying farthest in the given direction.
    pub fn support_point(&self, direction: &Vector3<f64>) -> Point3<f64> {
        let half_scale = 0.5 * self.scale;
        match &self.class {
            ShapeClass::Box => Point3::new(
                half_scale.x.copysign(direction.x),
                half_scale.y.copysign(direction.y),
                half_scale.z.copysign(direction.z),
            ),
            ShapeClass::Sphere => ellipsoid_support_point(&half_scale, direction),
            ShapeClass::Cylinder => {
                let radial = Vector3::new(
                    half_scale.x * direction.x,
                    half_scale.y * direction.y,
                    0.0,
                );
                let norm = radial.norm();
                let (x, y) = if norm > 0.0 {
                    (
                        half_scale.x * half_scale.x * direction.x / norm,
                        half_scale.y * half_scale.y * direction.y / norm,
                    )
                } else {
                    (0.0, 0.0)
                };
                Point3::new(x, y, half_scale.z.copysign(direction.z))
            }
            ShapeClass::Convex(polyhedron) => {
                // Maximizing d·(S·v) over the scaled vertices is maximizing
                // (S·d)·v over the unscaled ones
                let class_direction = direction.component_mul(&self.scale);
                let (_, vertex) = polyhedron.support_vertex(&class_direction);
                scale_point(&vertex, &self.scale)
            }
        }
    }

    /// Computes the axis-aligned box bounding the shape in its local frame.
    pub fn local_bounds(&self) -> Aabb {
        match &self.class {
            ShapeClass::Box | ShapeClass::Sphere | ShapeClass::Cylinder => {
                let half_scale = 0.5 * self.scale;
                Aabb::new(Point3::from(-half_scale), Point3::from(half_scale))
            }
            ShapeClass::Convex(polyhedron) => {
                let class_bounds = polyhedron.compute_aabb();
                Aabb::new(
                    scale_point(class_bounds.lower_corner(), &self.scale),
                    scale_point(class_bounds.upper_corner(), &self.scale),
                )
            }
        }
    }

    /// Computes an upper bound for the squared distance from the given local
    /// point to any point on the shape.
    ///
    /// For the polyhedral class the bound is exact; for the analytic classes
    /// it is the distance to the farthest corner of the local bounds.
    pub fn max_radius_squared(&self, center: &Point3<f64>) -> f64 {
        match &self.class {
            ShapeClass::Convex(polyhedron) => polyhedron
                .vertices()
                .iter()
                .map(|vertex| (scale_point(vertex, &self.scale) - center).norm_squared())
                .fold(0.0, f64::max),
            _ => {
                let bounds = self.local_bounds();
                let lower = bounds.lower_corner();
                let upper = bounds.upper_corner();
                (0..8)
                    .map(|corner| {
                        let corner_point = Point3::new(
                            if corner & 1 == 0 { lower.x } else { upper.x },
                            if corner & 2 == 0 { lower.y } else { upper.y },
                            if corner & 4 == 0 { lower.z } else { upper.z },
                        );
                        (corner_point - center).norm_squared()
                    })
                    .fold(0.0, f64::max)
            }
        }
    }

    /// Computes the volume of the shape.
    pub fn volume(&self) -> f64 {
        let scale_product = self.scale.x * self.scale.y * self.scale.z;
        match &self.class {
            ShapeClass::Box => scale_product,
            ShapeClass::Sphere => (std::f64::consts::PI / 6.0) * scale_product,
            ShapeClass::Cylinder => (std::f64::consts::PI / 4.0) * scale_product,
            ShapeClass::Convex(polyhedron) => polyhedron.compute_volume() * scale_product,
        }
    }

    /// Computes the center of mass of the uniformly dense shape in its local
    /// frame.
    pub fn local_center_of_mass(&self) -> Point3<f64> {
        match &self.class {
            ShapeClass::Box | ShapeClass::Sphere | ShapeClass::Cylinder => Point3::origin(),
            ShapeClass::Convex(polyhedron) => {
                scale_point(&polyhedron.compute_center_of_mass(), &self.scale)
            }
        }
    }

    /// Computes the inertia tensor of the shape around its center of mass for
    /// a mass density of one.
    ///
    /// A non-uniformly scaled sphere is treated as a triaxial ellipsoid.
    pub fn unit_density_inertia(&self) -> Matrix3<f64> {
        let mass = self.volume();
        let half_scale = 0.5 * self.scale;
        let (a, b, c) = (half_scale.x, half_scale.y, half_scale.z);
        match &self.class {
            ShapeClass::Box => {
                let extents_squared = self.scale.component_mul(&self.scale);
                Matrix3::from_diagonal(&Vector3::new(
                    (mass / 12.0) * (extents_squared.y + extents_squared.z),
                    (mass / 12.0) * (extents_squared.x + extents_squared.z),
                    (mass / 12.0) * (extents_squared.x + extents_squared.y),
                ))
            }
            ShapeClass::Sphere => Matrix3::from_diagonal(&Vector3::new(
                (mass / 5.0) * (b * b + c * c),
                (mass / 5.0) * (a * a + c * c),
                (mass / 5.0) * (a * a + b * b),
            )),
            ShapeClass::Cylinder => {
                let height_squared = self.scale.z * self.scale.z;
                Matrix3::from_diagonal(&Vector3::new(
                    mass * (b * b / 4.0 + height_squared / 12.0),
                    mass * (a * a / 4.0 + height_squared / 12.0),
                    mass * (a * a + b * b) / 4.0,
                ))
            }
            ShapeClass::Convex(polyhedron) => {
                let scaled = polyhedron.scaled(&self.scale);
                let (_, _, inertia) = scaled.compute_mass_properties(1.0);
                inertia
            }
        }
    }

    /// Produces a deterministic triangulation of the shape.
    ///
    /// `sphere_subdivisions` controls the tessellation order used for the
    /// sphere class; the other classes ignore it.
    pub fn as_polyhedron(&self, sphere_subdivisions: u32) -> ConvexPolyhedron {
        let class_polyhedron = match &self.class {
            ShapeClass::Box => ConvexPolyhedron::unit_box(),
            ShapeClass::Sphere => ConvexPolyhedron::unit_sphere(sphere_subdivisions),
            ShapeClass::Cylinder => ConvexPolyhedron::unit_cylinder(CYLINDER_TRIANGULATION_SIDES),
            ShapeClass::Convex(polyhedron) => (**polyhedron).clone(),
        };
        class_polyhedron.scaled(&self.scale)
    }

    /// Whether the given local point lies inside the shape.
    pub fn contains_point(&self, point: &Point3<f64>) -> bool {
        let class_point = inverse_scale_point(point, &self.scale);
        match &self.class {
            ShapeClass::Box => class_point
                .coords
                .iter()
                .all(|&coord| coord.abs() <= 0.5),
            ShapeClass::Sphere => class_point.coords.norm_squared() <= 0.25,
            ShapeClass::Cylinder => {
                class_point.x * class_point.x + class_point.y * class_point.y <= 0.25
                    && class_point.z.abs() <= 0.5
            }
            ShapeClass::Convex(polyhedron) => polyhedron.contains_point(&class_point),
        }
    }
}

fn scale_point(point: &Point3<f64>, scale: &Vector3<f64>) -> Point3<f64> {
    Point3::new(point.x * scale.x, point.y * scale.y, point.z * scale.z)
}

fn inverse_scale_point(point: &Point3<f64>, scale: &Vector3<f64>) -> Point3<f64> {
    Point3::new(point.x / scale.x, point.y / scale.y, point.z / scale.z)
}

fn ellipsoid_support_point(semi_axes: &Vector3<f64>, direction: &Vector3<f64>) -> Point3<f64> {
    let scaled_direction = semi_axes.component_mul(direction);
    let norm = scaled_direction.norm();
    if norm > 0.0 {
        Point3::from(semi_axes.component_mul(&scaled_direction) / norm)
    } else {
        Point3::new(semi_axes.x, 0.0, 0.0)
    }
}
