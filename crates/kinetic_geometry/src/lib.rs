//! Geometric primitives, convex shapes and spatial indexing for the Kinetic
//! physics engine.

pub mod axis_aligned_box;
pub mod bounds_tree;
pub mod frame;
pub mod polyhedron;
pub mod shape;
pub mod sphere;

pub use axis_aligned_box::{Aabb, Ray};
pub use bounds_tree::BoundsTree;
pub use frame::{CFrame, GlobalCFrame};
pub use polyhedron::ConvexPolyhedron;
pub use shape::{Shape, ShapeClass};
pub use sphere::Sphere;
