use anyhow::{bail, Result};
use opencv::{
    core::{Mat, CV_64F},
    prelude::*,
};
use stereocal_core::{
    matrix::{flatten_row_major, reshape_row_major},
    nalgebra::SMatrix,
    Real,
};

/// Copies a fixed size matrix into a `CV_64F` Mat of the same shape.
pub fn matrix_to_mat<const R: usize, const C: usize>(matrix: &SMatrix<Real, R, C>) -> Result<Mat> {
    let values = flatten_row_major(matrix);
    let rows: Vec<&[Real]> = values.chunks(C).collect();
    Ok(Mat::from_slice_2d(&rows)?)
}

/// Every element of `mat` in row-major order, converted to `f64`.
pub fn mat_to_values(mat: &Mat) -> Result<Vec<Real>> {
    let mut converted = Mat::default();
    mat.convert_to(&mut converted, CV_64F, 1.0, 0.0)?;

    let mut values = Vec::with_capacity(converted.total());
    for r in 0..converted.rows() {
        for c in 0..converted.cols() {
            values.push(*converted.at_2d::<f64>(r, c)?);
        }
    }
    Ok(values)
}

/// Reads an R x C matrix from `mat`. Only the element count has to match, so
/// vectors are accepted as rows or columns.
pub fn mat_to_matrix<const R: usize, const C: usize>(mat: &Mat) -> Result<SMatrix<Real, R, C>> {
    let values = mat_to_values(mat)?;
    match reshape_row_major::<R, C>(&values) {
        Some(matrix) => Ok(matrix),
        None => bail!(
            "expected {} elements, the Mat is {}x{}",
            R * C,
            mat.rows(),
            mat.cols()
        ),
    }
}
