//! Convex polyhedra represented as triangle meshes.

use crate::Aabb;
use nalgebra::{Matrix3, Point3, UnitVector3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A closed convex polyhedron represented by its vertices and a triangulation
/// of its surface.
///
/// Triangles wind counterclockwise when seen from outside, so face normals
/// computed from the winding point out of the polyhedron.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvexPolyhedron {
    vertices: Vec<Point3<f64>>,
    triangles: Vec<[u32; 3]>,
}

impl ConvexPolyhedron {
    /// Creates a new polyhedron from the given vertices and triangles.
    ///
    /// # Panics
    /// If any triangle refers to a vertex that does not exist.
    pub fn new(vertices: Vec<Point3<f64>>, triangles: Vec<[u32; 3]>) -> Self {
        let vertex_count = vertices.len() as u32;
        assert!(
            triangles
                .iter()
                .all(|triangle| triangle.iter().all(|&idx| idx < vertex_count)),
            "Tried creating polyhedron with out-of-range vertex index"
        );
        Self {
            vertices,
            triangles,
        }
    }

    /// Creates the unit cube spanning `[-0.5, 0.5]` along every axis.
    pub fn unit_box() -> Self {
        let vertices = (0..8)
            .map(|i| {
                Point3::new(
                    if i & 1 == 0 { -0.5 } else { 0.5 },
                    if i & 2 == 0 { -0.5 } else { 0.5 },
                    if i & 4 == 0 { -0.5 } else { 0.5 },
                )
            })
            .collect();

        let triangles = vec![
            [0, 4, 6],
            [0, 6, 2],
            [1, 3, 7],
            [1, 7, 5],
            [0, 1, 5],
            [0, 5, 4],
            [2, 6, 7],
            [2, 7, 3],
            [0, 2, 3],
            [0, 3, 1],
            [4, 5, 7],
            [4, 7, 6],
        ];

        Self::new(vertices, triangles)
    }

    /// Creates a tessellation of the sphere with diameter 1 by subdividing an
    /// octahedron the given number of times and projecting the vertices onto
    /// the sphere.
    ///
    /// The triangulation is deterministic for a given subdivision order.
    pub fn unit_sphere(subdivisions: u32) -> Self {
        const RADIUS: f64 = 0.5;

        let mut vertices: Vec<Point3<f64>> = vec![
            Point3::new(RADIUS, 0.0, 0.0),
            Point3::new(-RADIUS, 0.0, 0.0),
            Point3::new(0.0, RADIUS, 0.0),
            Point3::new(0.0, -RADIUS, 0.0),
            Point3::new(0.0, 0.0, RADIUS),
            Point3::new(0.0, 0.0, -RADIUS),
        ];
        let mut triangles: Vec<[u32; 3]> = vec![
            [0, 2, 4],
            [2, 1, 4],
            [1, 3, 4],
            [3, 0, 4],
            [2, 0, 5],
            [1, 2, 5],
            [3, 1, 5],
            [0, 3, 5],
        ];

        for _ in 0..subdivisions {
            let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
            let mut subdivided = Vec::with_capacity(triangles.len() * 4);

            for &[a, b, c] in &triangles {
                let ab = midpoint_on_sphere(&mut vertices, &mut midpoints, RADIUS, a, b);
                let bc = midpoint_on_sphere(&mut vertices, &mut midpoints, RADIUS, b, c);
                let ca = midpoint_on_sphere(&mut vertices, &mut midpoints, RADIUS, c, a);

                subdivided.push([a, ab, ca]);
                subdivided.push([b, bc, ab]);
                subdivided.push([c, ca, bc]);
                subdivided.push([ab, bc, ca]);
            }

            triangles = subdivided;
        }

        Self::new(vertices, triangles)
    }

    /// Creates a prism approximation of the cylinder with diameter 1 and
    /// height 1, with the length axis along z, using the given number of
    /// sides.
    ///
    /// # Panics
    /// If fewer than 3 sides are requested.
    pub fn unit_cylinder(sides: u32) -> Self {
        assert!(sides >= 3, "Tried creating cylinder with fewer than 3 sides");

        const RADIUS: f64 = 0.5;

        let mut vertices = Vec::with_capacity(2 * sides as usize);
        for ring_z in [-0.5, 0.5] {
            for i in 0..sides {
                let angle = f64::from(i) * std::f64::consts::TAU / f64::from(sides);
                vertices.push(Point3::new(
                    RADIUS * angle.cos(),
                    RADIUS * angle.sin(),
                    ring_z,
                ));
            }
        }

        let mut triangles = Vec::with_capacity(4 * sides as usize - 4);
        for i in 0..sides {
            let next = (i + 1) % sides;
            let (bottom, bottom_next) = (i, next);
            let (top, top_next) = (sides + i, sides + next);
            triangles.push([bottom, bottom_next, top_next]);
            triangles.push([bottom, top_next, top]);
        }
        for i in 1..sides - 1 {
            triangles.push([0, i + 1, i]);
            triangles.push([sides, sides + i, sides + i + 1]);
        }

        Self::new(vertices, triangles)
    }

    /// Returns the vertices of the polyhedron.
    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    /// Returns the triangles of the polyhedron as vertex index triples.
    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    /// Returns an iterator over the vertex positions of each triangle.
    pub fn triangle_vertex_positions(&self) -> impl Iterator<Item = [&Point3<f64>; 3]> + '_ {
        self.triangles.iter().map(|&[a, b, c]| {
            [
                &self.vertices[a as usize],
                &self.vertices[b as usize],
                &self.vertices[c as usize],
            ]
        })
    }

    /// Computes the outward unit normal of the triangle with the given index.
    ///
    /// # Panics
    /// If the triangle index is out of range.
    pub fn face_normal(&self, triangle_idx: usize) -> UnitVector3<f64> {
        let [a, b, c] = self.triangles[triangle_idx];
        let vertex_a = self.vertices[a as usize];
        let edge_1 = self.vertices[b as usize] - vertex_a;
        let edge_2 = self.vertices[c as usize] - vertex_a;
        UnitVector3::new_normalize(edge_1.cross(&edge_2))
    }

    /// Finds the vertex lying farthest in the given direction and returns its
    /// index together with its position.
    ///
    /// # Panics
    /// If the polyhedron has no vertices.
    pub fn support_vertex(&self, direction: &Vector3<f64>) -> (usize, Point3<f64>) {
        let (idx, vertex) = self
            .vertices
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                direction.dot(&a.coords).total_cmp(&direction.dot(&b.coords))
            })
            .expect("Requested support vertex of empty polyhedron");
        (idx, *vertex)
    }

    /// Computes the axis-aligned box bounding the polyhedron.
    pub fn compute_aabb(&self) -> Aabb {
        Aabb::aabb_for_points(&self.vertices)
    }

    /// Computes the largest squared distance from the given point to any
    /// vertex.
    pub fn max_radius_squared(&self, center: &Point3<f64>) -> f64 {
        self.vertices
            .iter()
            .map(|vertex| (vertex - center).norm_squared())
            .fold(0.0, f64::max)
    }

    /// Whether the given point lies inside the polyhedron, determined by
    /// checking the point against the half-space of every face.
    pub fn contains_point(&self, point: &Point3<f64>) -> bool {
        self.triangles.iter().enumerate().all(|(idx, &[a, _, _])| {
            let normal = self.face_normal(idx);
            normal.dot(&(point - self.vertices[a as usize])) <= 1e-12
        })
    }

    /// Computes the volume enclosed by the polyhedron surface, using the
    /// method described in Eberly (2004).
    pub fn compute_volume(&self) -> f64 {
        self.compute_mass_properties(1.0).0
    }

    /// Computes the center of mass of the uniformly dense body enclosed by
    /// the polyhedron surface.
    pub fn compute_center_of_mass(&self) -> Point3<f64> {
        self.compute_mass_properties(1.0).1
    }

    /// Computes the mass, center of mass and inertia tensor of the uniformly
    /// dense body enclosed by the polyhedron surface, using the method
    /// described in Eberly (2004). The inertia tensor is defined relative to
    /// the center of mass.
    pub fn compute_mass_properties(
        &self,
        mass_density: f64,
    ) -> (f64, Point3<f64>, Matrix3<f64>) {
        let mut volume = 0.0;
        let mut first_moments = Vector3::zeros();
        let mut diagonal_second_moments = Vector3::zeros();
        let mut mixed_second_moments = Vector3::zeros();

        for [vertex_0, vertex_1, vertex_2] in self.triangle_vertex_positions() {
            let w_0 = vertex_0.coords;
            let w_1 = vertex_1.coords;
            let w_2 = vertex_2.coords;

            let tmp_0 = w_0 + w_1;
            let tmp_1 = w_0.component_mul(&w_0);
            let tmp_2 = tmp_1 + w_1.component_mul(&tmp_0);

            let f_1 = tmp_0 + w_2;
            let f_2 = tmp_2 + w_2.component_mul(&f_1);
            let f_3 = w_0.component_mul(&tmp_1)
                + w_1.component_mul(&tmp_2)
                + w_2.component_mul(&f_2);

            let g_0 = f_2 + w_0.component_mul(&(f_1 + w_0));
            let g_1 = f_2 + w_1.component_mul(&(f_1 + w_1));
            let g_2 = f_2 + w_2.component_mul(&(f_1 + w_2));

            let edge_cross_prod = (vertex_1 - vertex_0).cross(&(vertex_2 - vertex_0));

            volume += edge_cross_prod.x * f_1.x;
            first_moments += edge_cross_prod.component_mul(&f_2);
            diagonal_second_moments += edge_cross_prod.component_mul(&f_3);

            // Integrals of x·y, y·z and z·x over the volume
            mixed_second_moments += Vector3::new(
                edge_cross_prod.x * (w_0.y * g_0.x + w_1.y * g_1.x + w_2.y * g_2.x),
                edge_cross_prod.y * (w_0.z * g_0.y + w_1.z * g_1.y + w_2.z * g_2.y),
                edge_cross_prod.z * (w_0.x * g_0.z + w_1.x * g_1.z + w_2.x * g_2.z),
            );
        }

        volume *= 1.0 / 6.0;
        first_moments *= 1.0 / 24.0;
        diagonal_second_moments *= 1.0 / 60.0;
        mixed_second_moments *= 1.0 / 120.0;

        let mass = volume * mass_density;
        let center_of_mass = Point3::from(first_moments / volume);

        let second = diagonal_second_moments * mass_density;
        let mixed = mixed_second_moments * mass_density;

        // Inertia about the origin, then shifted to the center of mass with
        // the parallel axis theorem
        let mut j_xx = second.y + second.z;
        let mut j_yy = second.z + second.x;
        let mut j_zz = second.x + second.y;
        let mut j_xy = -mixed.x;
        let mut j_yz = -mixed.y;
        let mut j_zx = -mixed.z;

        let c = center_of_mass.coords;
        j_xx -= mass * (c.y * c.y + c.z * c.z);
        j_yy -= mass * (c.z * c.z + c.x * c.x);
        j_zz -= mass * (c.x * c.x + c.y * c.y);
        j_xy += mass * c.x * c.y;
        j_yz += mass * c.y * c.z;
        j_zx += mass * c.z * c.x;

        let inertia = Matrix3::new(
            j_xx, j_xy, j_zx, //
            j_xy, j_yy, j_yz, //
            j_zx, j_yz, j_zz,
        );

        (mass, center_of_mass, inertia)
    }

    /// Returns the polyhedron with every vertex scaled componentwise by the
    /// given factors. The triangle index order is unchanged.
    pub fn scaled(&self, scale: &Vector3<f64>) -> Self {
        Self {
            vertices: self
                .vertices
                .iter()
                .map(|vertex| Point3::new(
                    vertex.x * scale.x,
                    vertex.y * scale.y,
                    vertex.z * scale.z,
                ))
                .collect(),
            triangles: self.triangles.clone(),
        }
    }
}

fn midpoint_on_sphere(
    vertices: &mut Vec<Point3<f64>>,
    midpoints: &mut HashMap<(u32, u32), u32>,
    radius: f64,
    a: u32,
    b: u32,
) -> u32 {
    let key = (a.min(b), a.max(b));
    *midpoints.entry(key).or_insert_with(|| {
        let midpoint = Point3::from(
            0.5 * (vertices[a as usize].coords + vertices[b as usize].coords),
        );
        let projected = Point3::from(midpoint.coords.normalize() * radius);
        vertices.push(projected);
        (vertices.len() - 1) as u32
    })
}
