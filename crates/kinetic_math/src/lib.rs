//! Math kernel for the Kinetic physics engine.

pub mod eigen;
pub mod tensor;

pub use eigen::{EigenDecomposition, symmetric_eigen_decomposition};
pub use tensor::{
    rotation_from_vector, skew_symmetric, skew_symmetric_squared, transform_basis,
};
