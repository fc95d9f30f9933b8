//! Row-major flattening of fixed-size matrices, the layout used by the JSON
//! snapshot and by OpenCV.

use sophus::nalgebra::SMatrix;

use crate::Real;

pub fn flatten_row_major<const R: usize, const C: usize>(matrix: &SMatrix<Real, R, C>) -> Vec<Real> {
    let mut values = Vec::with_capacity(R * C);
    for row in 0..R {
        for col in 0..C {
            values.push(matrix[(row, col)]);
        }
    }
    values
}

/// Returns `None` when `values` does not hold exactly `R * C` elements.
pub fn reshape_row_major<const R: usize, const C: usize>(
    values: &[Real],
) -> Option<SMatrix<Real, R, C>> {
    if values.len() != R * C {
        return None;
    }
    Some(SMatrix::<Real, R, C>::from_row_slice(values))
}
