//! Eigendecomposition of symmetric 3×3 matrices.

use nalgebra::{Matrix3, Vector3};

/// The eigenvalues and eigenvectors of a symmetric 3×3 matrix.
///
/// The columns of `eigenvectors` are the unit eigenvectors corresponding to
/// the entries of `eigenvalues`, in matching order.
#[derive(Clone, Debug)]
pub struct EigenDecomposition {
    pub eigenvalues: Vector3<f64>,
    pub eigenvectors: Matrix3<f64>,
}

/// Computes the eigendecomposition of the given symmetric 3×3 matrix.
///
/// Only the lower triangle of the input is read. The eigenvalues are returned
/// in ascending order.
pub fn symmetric_eigen_decomposition(matrix: &Matrix3<f64>) -> EigenDecomposition {
    let eigen = matrix.symmetric_eigen();

    // nalgebra does not order the eigenvalues, so sort them ascending and
    // permute the eigenvector columns to match
    let mut order = [0, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

    let eigenvalues = Vector3::new(
        eigen.eigenvalues[order[0]],
        eigen.eigenvalues[order[1]],
        eigen.eigenvalues[order[2]],
    );
    let eigenvectors = Matrix3::from_columns(&[
        eigen.eigenvectors.column(order[0]).into_owned(),
        eigen.eigenvectors.column(order[1]).into_owned(),
        eigen.eigenvectors.column(order[2]).into_owned(),
    ]);

    EigenDecomposition {
        eigenvalues,
        eigenvectors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{abs_diff_eq, assert_abs_diff_eq};
    use proptest::prelude::*;

    prop_compose! {
        fn symmetric_matrix_strategy(max_element: f64)(
            d in prop::array::uniform3(-max_element..max_element),
            o in prop::array::uniform3(-max_element..max_element),
        ) -> Matrix3<f64> {
            Matrix3::new(
                d[0], o[0], o[1], //
                o[0], d[1], o[2], //
                o[1], o[2], d[2],
            )
        }
    }

    #[test]
    fn should_decompose_diagonal_matrix() {
        let matrix = Matrix3::from_diagonal(&Vector3::new(3.0, 1.0, 2.0));
        let decomposition = symmetric_eigen_decomposition(&matrix);
        assert_abs_diff_eq!(
            decomposition.eigenvalues,
            Vector3::new(1.0, 2.0, 3.0),
            epsilon = 1e-12
        );
    }

    proptest! {
        #[test]
        fn eigenpairs_should_satisfy_eigenvalue_equation(
            matrix in symmetric_matrix_strategy(1e2),
        ) {
            let decomposition = symmetric_eigen_decomposition(&matrix);
            for i in 0..3 {
                let eigenvector = decomposition.eigenvectors.column(i);
                prop_assert!(abs_diff_eq!(
                    matrix * eigenvector,
                    decomposition.eigenvalues[i] * eigenvector,
                    epsilon = 1e-7 * matrix.norm().max(1.0)
                ));
            }
        }
    }

    proptest! {
        #[test]
        fn eigenvalues_should_be_ascending(
            matrix in symmetric_matrix_strategy(1e2),
        ) {
            let decomposition = symmetric_eigen_decomposition(&matrix);
            prop_assert!(decomposition.eigenvalues.x <= decomposition.eigenvalues.y);
            prop_assert!(decomposition.eigenvalues.y <= decomposition.eigenvalues.z);
        }
    }
}
