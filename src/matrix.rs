// src/matrix.rs

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::error::{CompressionError, Result};

/// Dense, row-major `f32` matrix that owns its storage.
///
/// Public constructors reject zero extents. The decomposition produces
/// zero-extent factor buffers for a rank-0 request (an `m x 0` U, a `0 x n`
/// Vt), which go through the crate-internal [`MatrixBuffer::with_shape`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixBuffer {
    data: Array2<f32>,
}

impl MatrixBuffer {
    /// Creates a zero-filled `rows x columns` buffer.
    ///
    /// # Errors
    /// `InvalidDimension` if either extent is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use lowrank_compress::MatrixBuffer;
    /// let m = MatrixBuffer::new(2, 3).unwrap();
    /// assert_eq!(m.shape(), (2, 3));
    /// assert!(MatrixBuffer::new(0, 3).is_err());
    /// ```
    pub fn new(rows: usize, columns: usize) -> Result<Self> {
        check_extents(rows, columns)?;
        Ok(Self::with_shape(rows, columns))
    }

    /// Creates a buffer with `values[i]` at `(i, i)` for
    /// `i < min(rows, columns, values.len())` and zeros elsewhere.
    pub fn from_diagonal(values: &[f32], rows: usize, columns: usize) -> Result<Self> {
        check_extents(rows, columns)?;
        Ok(Self::diagonal_unchecked(values, rows, columns))
    }

    /// Wraps a row-major vector of `rows * columns` elements.
    pub fn from_row_major(rows: usize, columns: usize, values: Vec<f32>) -> Result<Self> {
        check_extents(rows, columns)?;
        if values.len() != rows * columns {
            return Err(CompressionError::DimensionMismatch {
                left: (rows, columns),
                right: (values.len(), 1),
                context: "row-major data length must equal rows * columns",
            });
        }
        let data = Array2::from_shape_vec((rows, columns), values).map_err(|e| {
            CompressionError::InvalidDimension(format!(
                "Failed to shape {}x{} buffer: {}",
                rows, columns, e
            ))
        })?;
        Ok(Self { data })
    }

    /// Takes ownership of an existing array, re-laying it out row-major if needed.
    pub fn from_array(array: Array2<f32>) -> Result<Self> {
        let (rows, columns) = array.dim();
        check_extents(rows, columns)?;
        Ok(Self::from_array_unchecked(array))
    }

    pub(crate) fn with_shape(rows: usize, columns: usize) -> Self {
        Self {
            data: Array2::zeros((rows, columns)),
        }
    }

    pub(crate) fn diagonal_unchecked(values: &[f32], rows: usize, columns: usize) -> Self {
        let mut out = Self::with_shape(rows, columns);
        let n = rows.min(columns).min(values.len());
        for (i, &v) in values.iter().take(n).enumerate() {
            out.data[[i, i]] = v;
        }
        out
    }

    pub(crate) fn from_array_unchecked(array: Array2<f32>) -> Self {
        if array.is_standard_layout() {
            Self { data: array }
        } else {
            let mut data = Array2::zeros(array.dim());
            data.assign(&array);
            Self { data }
        }
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn columns(&self) -> usize {
        self.data.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reads the element at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Result<f32> {
        self.check_index(row, col)?;
        Ok(self.data[[row, col]])
    }

    /// Writes the element at `(row, col)`.
    pub fn set(&mut self, row: usize, col: usize, value: f32) -> Result<()> {
        self.check_index(row, col)?;
        self.data[[row, col]] = value;
        Ok(())
    }

    /// Row-major backing storage.
    pub fn as_slice(&self) -> &[f32] {
        // Every constructor keeps standard layout, so this slice always exists.
        self.data.as_slice().unwrap_or(&[])
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    pub fn into_array(self) -> Array2<f32> {
        self.data
    }

    pub fn transpose(&self) -> MatrixBuffer {
        Self::from_array_unchecked(self.data.t().to_owned())
    }

    /// Applies `f` to every element, producing a fresh buffer.
    pub fn map<F: Fn(f32) -> f32>(&self, f: F) -> MatrixBuffer {
        Self {
            data: self.data.mapv(f),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Square root of the sum of squared entries, accumulated in `f64`.
    pub fn frobenius_norm(&self) -> f64 {
        self.data
            .iter()
            .map(|&v| (v as f64) * (v as f64))
            .sum::<f64>()
            .sqrt()
    }

    /// Frobenius norm of `self - other`.
    pub fn frobenius_distance(&self, other: &MatrixBuffer) -> Result<f64> {
        if self.shape() != other.shape() {
            return Err(CompressionError::DimensionMismatch {
                left: self.shape(),
                right: other.shape(),
                context: "frobenius distance needs equal shapes",
            });
        }
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| {
                let d = a as f64 - b as f64;
                d * d
            })
            .sum::<f64>()
            .sqrt())
    }

    /// Computes `a * b` into a fresh buffer.
    ///
    /// # Errors
    /// `DimensionMismatch` unless `a.columns() == b.rows()`.
    ///
    /// # Examples
    ///
    /// ```
    /// use lowrank_compress::MatrixBuffer;
    /// let a = MatrixBuffer::from_row_major(1, 2, vec![1.0, 2.0]).unwrap();
    /// let b = MatrixBuffer::from_row_major(2, 1, vec![3.0, 4.0]).unwrap();
    /// let c = MatrixBuffer::multiply(&a, &b).unwrap();
    /// assert_eq!(c.get(0, 0).unwrap(), 11.0);
    /// ```
    pub fn multiply(a: &MatrixBuffer, b: &MatrixBuffer) -> Result<MatrixBuffer> {
        check_product_shapes(a, b)?;
        let mut out = Self::with_shape(a.rows(), b.columns());
        multiply_rows(a, b, &mut out);
        Ok(out)
    }

    /// Computes `a * b` into `dest`, overwriting its contents.
    ///
    /// `dest` is borrowed exclusively while `a` and `b` are shared borrows, so
    /// the output can never alias an operand.
    pub fn multiply_into(a: &MatrixBuffer, b: &MatrixBuffer, dest: &mut MatrixBuffer) -> Result<()> {
        check_product_shapes(a, b)?;
        let expected = (a.rows(), b.columns());
        if dest.shape() != expected {
            return Err(CompressionError::DimensionMismatch {
                left: expected,
                right: dest.shape(),
                context: "destination must be a.rows x b.columns",
            });
        }
        multiply_rows(a, b, dest);
        Ok(())
    }

    /// Same shape, entries converted to `f64`.
    pub(crate) fn to_f64(&self) -> Array2<f64> {
        self.data.mapv(|v| v as f64)
    }

    /// Narrows an `f64` array into a row-major `f32` buffer.
    pub(crate) fn from_f64(array: &ArrayView2<f64>) -> MatrixBuffer {
        Self::from_array_unchecked(array.mapv(|v| v as f32))
    }

    fn check_index(&self, row: usize, col: usize) -> Result<()> {
        if row >= self.rows() || col >= self.columns() {
            return Err(CompressionError::OutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.columns(),
            });
        }
        Ok(())
    }
}

fn check_extents(rows: usize, columns: usize) -> Result<()> {
    if rows == 0 || columns == 0 {
        return Err(CompressionError::InvalidDimension(format!(
            "Matrix dimensions must be positive, got {}x{}",
            rows, columns
        )));
    }
    Ok(())
}

fn check_product_shapes(a: &MatrixBuffer, b: &MatrixBuffer) -> Result<()> {
    if a.columns() != b.rows() {
        return Err(CompressionError::DimensionMismatch {
            left: a.shape(),
            right: b.shape(),
            context: "multiply needs a.columns == b.rows",
        });
    }
    Ok(())
}

/// Row-parallel i-k-j product with one `f64` accumulator row per output row.
fn multiply_rows(a: &MatrixBuffer, b: &MatrixBuffer, out: &mut MatrixBuffer) {
    let inner = a.columns();
    let n_cols = b.columns();
    if out.is_empty() {
        return;
    }
    let a_view = a.data.view();
    let b_view = b.data.view();

    out.data
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut out_row)| {
            let mut acc = vec![0.0f64; n_cols];
            let a_row = a_view.row(i);
            for p in 0..inner {
                let a_ip = a_row[p] as f64;
                for (slot, &b_pj) in acc.iter_mut().zip(b_view.row(p).iter()) {
                    *slot += a_ip * b_pj as f64;
                }
            }
            for (dst, v) in out_row.iter_mut().zip(acc) {
                *dst = v as f32;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::ShapeBuilder;

    #[test]
    fn new_is_zero_filled_and_rejects_zero_extents() {
        let m = MatrixBuffer::new(3, 4).unwrap();
        assert_eq!(m.len(), 12);
        assert!(m.as_slice().iter().all(|&v| v == 0.0));
        assert!(matches!(
            MatrixBuffer::new(0, 4),
            Err(CompressionError::InvalidDimension(_))
        ));
        assert!(matches!(
            MatrixBuffer::new(4, 0),
            Err(CompressionError::InvalidDimension(_))
        ));
    }

    #[test]
    fn diagonal_places_only_what_fits() {
        let m = MatrixBuffer::from_diagonal(&[1.0, 2.0, 3.0], 2, 4).unwrap();
        assert_eq!(m.get(0, 0).unwrap(), 1.0);
        assert_eq!(m.get(1, 1).unwrap(), 2.0);
        assert_eq!(m.get(0, 1).unwrap(), 0.0);
        assert_eq!(m.as_slice().iter().filter(|&&v| v != 0.0).count(), 2);

        let short = MatrixBuffer::from_diagonal(&[5.0], 3, 3).unwrap();
        assert_eq!(short.get(0, 0).unwrap(), 5.0);
        assert_eq!(short.get(2, 2).unwrap(), 0.0);
    }

    #[test]
    fn get_and_set_are_bounds_checked() {
        let mut m = MatrixBuffer::new(2, 2).unwrap();
        m.set(1, 0, 4.5).unwrap();
        assert_eq!(m.get(1, 0).unwrap(), 4.5);
        assert_eq!(m.as_slice()[2], 4.5, "storage is row-major");
        assert!(matches!(
            m.get(2, 0),
            Err(CompressionError::OutOfBounds { row: 2, col: 0, rows: 2, cols: 2 })
        ));
        assert!(m.set(0, 2, 1.0).is_err());
    }

    #[test]
    fn from_row_major_checks_length() {
        assert!(matches!(
            MatrixBuffer::from_row_major(2, 2, vec![1.0; 3]),
            Err(CompressionError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn from_array_normalizes_layout() {
        let fortran = Array2::from_shape_vec((2, 3).f(), vec![1.0f32, 4.0, 2.0, 5.0, 3.0, 6.0]).unwrap();
        let m = MatrixBuffer::from_array(fortran).unwrap();
        assert_eq!(m.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn multiply_matches_hand_computed_product() {
        let a = MatrixBuffer::from_row_major(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = MatrixBuffer::from_row_major(3, 2, vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let c = MatrixBuffer::multiply(&a, &b).unwrap();
        assert_eq!(c.shape(), (2, 2));
        assert_eq!(c.as_slice(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn multiply_rejects_incompatible_shapes() {
        let a = MatrixBuffer::new(2, 3).unwrap();
        let b = MatrixBuffer::new(2, 3).unwrap();
        assert!(matches!(
            MatrixBuffer::multiply(&a, &b),
            Err(CompressionError::DimensionMismatch { left: (2, 3), right: (2, 3), .. })
        ));
    }

    #[test]
    fn multiply_into_overwrites_destination() {
        let a = MatrixBuffer::from_diagonal(&[2.0, 3.0], 2, 2).unwrap();
        let b = MatrixBuffer::from_row_major(2, 2, vec![1.0, 1.0, 1.0, 1.0]).unwrap();
        let mut dest = MatrixBuffer::from_row_major(2, 2, vec![9.0; 4]).unwrap();
        MatrixBuffer::multiply_into(&a, &b, &mut dest).unwrap();
        assert_eq!(dest.as_slice(), &[2.0, 2.0, 3.0, 3.0]);

        let mut wrong = MatrixBuffer::new(3, 2).unwrap();
        assert!(MatrixBuffer::multiply_into(&a, &b, &mut wrong).is_err());
    }

    #[test]
    fn zero_inner_dimension_yields_zero_product() {
        let u = MatrixBuffer::with_shape(3, 0);
        let vt = MatrixBuffer::with_shape(0, 4);
        let c = MatrixBuffer::multiply(&u, &vt).unwrap();
        assert_eq!(c.shape(), (3, 4));
        assert!(c.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn norms_and_transpose() {
        let m = MatrixBuffer::from_row_major(2, 2, vec![3.0, 0.0, 4.0, 0.0]).unwrap();
        assert_abs_diff_eq!(m.frobenius_norm(), 5.0, epsilon = 1e-12);
        let t = m.transpose();
        assert_eq!(t.as_slice(), &[3.0, 4.0, 0.0, 0.0]);
        let zero = MatrixBuffer::new(2, 2).unwrap();
        assert_abs_diff_eq!(m.frobenius_distance(&zero).unwrap(), 5.0, epsilon = 1e-12);
        assert!(m.frobenius_distance(&MatrixBuffer::new(1, 2).unwrap()).is_err());
    }

    #[test]
    fn product_propagates_ieee_specials_through_zero_entries() {
        let a = MatrixBuffer::from_row_major(1, 2, vec![0.0, 1.0]).unwrap();
        let b = MatrixBuffer::from_row_major(2, 1, vec![f32::INFINITY, 1.0]).unwrap();
        // 0 * inf + 1 * 1 is NaN.
        assert!(MatrixBuffer::multiply(&a, &b).unwrap().get(0, 0).unwrap().is_nan());

        let b = MatrixBuffer::from_row_major(2, 1, vec![f32::NAN, 2.0]).unwrap();
        let mut dest = MatrixBuffer::new(1, 1).unwrap();
        MatrixBuffer::multiply_into(&a, &b, &mut dest).unwrap();
        assert!(dest.get(0, 0).unwrap().is_nan());
    }
}
