// src/linalg_backends.rs

use ndarray::{Array1, Array2};
use std::marker::PhantomData;

use crate::error::Result;
use crate::svd::householder::householder_thin_q;
use crate::svd::jacobi::{jacobi_svd, JacobiSettings};

// --- Trait Definitions ---

/// Trait for QR decomposition, focusing on retrieving the thin Q factor.
pub trait BackendQR<F: 'static + Copy + Send + Sync> {
    fn qr_q_factor(&self, matrix: &Array2<F>) -> Result<Array2<F>>;
}

/// Output of a Singular Value Decomposition.
///
/// Singular values are non-negative and sorted in descending order; `u` holds
/// `min(m, n)` orthonormal columns and `vt` holds `min(m, n)` orthonormal rows.
#[derive(Debug)]
pub struct SVDOutput<F: 'static> {
    pub u: Option<Array2<F>>,
    pub s: Array1<F>,
    pub vt: Option<Array2<F>>,
    /// Jacobi sweeps spent, when the backend is iterative and reports it.
    pub sweeps: Option<usize>,
}

/// Trait for thin Singular Value Decomposition.
pub trait BackendSVD<F: 'static + Copy + Send + Sync> {
    fn svd_into(&self, matrix: Array2<F>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<F>>;
}

// --- Native (pure Rust) backend ---

/// Householder QR and one-sided Jacobi SVD, computed in `f64`.
#[derive(Debug, Default, Copy, Clone)]
pub struct NativeLinAlgBackend {
    settings: JacobiSettings,
}

impl NativeLinAlgBackend {
    pub fn new(settings: JacobiSettings) -> Self {
        Self { settings }
    }
}

impl BackendQR<f64> for NativeLinAlgBackend {
    fn qr_q_factor(&self, matrix: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(householder_thin_q(&matrix.view()))
    }
}

impl BackendSVD<f64> for NativeLinAlgBackend {
    fn svd_into(&self, matrix: Array2<f64>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<f64>> {
        let mut output = jacobi_svd(&matrix.view(), &self.settings)?;
        if !compute_u {
            output.u = None;
        }
        if !compute_v {
            output.vt = None;
        }
        Ok(output)
    }
}

// --- NdarrayLinAlgBackend (LAPACK through ndarray-linalg) ---
#[cfg(any(feature = "backend_openblas", feature = "backend_openblas_system"))]
mod ndarray_linalg_specific_code {
    use super::{BackendQR, BackendSVD, SVDOutput};
    use crate::error::{CompressionError, Result};
    use ndarray::Array2;
    use ndarray_linalg::{SVDInto as NdLinalgSVDInto, QR as NdLinalgQR};

    #[derive(Debug, Default, Copy, Clone)]
    pub struct NdarrayLinAlgBackend;

    fn to_backend_error<E: std::fmt::Display>(e: E) -> CompressionError {
        CompressionError::Backend(e.to_string())
    }

    impl BackendQR<f64> for NdarrayLinAlgBackend {
        fn qr_q_factor(&self, matrix: &Array2<f64>) -> Result<Array2<f64>> {
            let (q_factor, _r) = matrix.qr().map_err(to_backend_error)?;
            Ok(q_factor)
        }
    }

    impl BackendSVD<f64> for NdarrayLinAlgBackend {
        fn svd_into(&self, matrix: Array2<f64>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<f64>> {
            let (nrows, ncols) = matrix.dim();
            let k = nrows.min(ncols);
            let (u, s, vt) = matrix.svd_into(compute_u, compute_v).map_err(to_backend_error)?;
            // LAPACK hands back the full square factors; keep the thin part.
            let u = u.map(|u| u.slice(ndarray::s![.., ..k]).to_owned());
            let vt = vt.map(|vt| vt.slice(ndarray::s![..k, ..]).to_owned());
            Ok(SVDOutput { u, s, vt, sweeps: None })
        }
    }
}

// --- FaerLinAlgBackend ---
#[cfg(feature = "backend_faer")]
mod faer_specific_code {
    use super::{BackendQR, BackendSVD, SVDOutput};
    use crate::error::{CompressionError, Result};
    use bytemuck::Pod;
    use faer::linalg::solvers::Svd as FaerSolverSvd;
    use faer::traits::num_traits::Zero;
    use faer::traits::ComplexField;
    use faer::MatRef;
    use ndarray::{Array1, Array2, ArrayView2, ShapeBuilder};

    #[derive(Debug, Default, Copy, Clone)]
    pub struct FaerLinAlgBackend;

    fn faer_mat_to_ndarray<F: ComplexField + Copy + Pod + Zero>(faer_mat: MatRef<'_, F>) -> Array2<F> {
        let nrows = faer_mat.nrows();
        let ncols = faer_mat.ncols();
        Array2::from_shape_fn((nrows, ncols).f(), |(i, j)| unsafe { *faer_mat.get_unchecked(i, j) })
    }

    fn faer_col_to_ndarray_vec<F: ComplexField + Copy + Pod + Zero>(faer_col: faer::ColRef<'_, F>) -> Array1<F> {
        Array1::from_shape_fn(faer_col.nrows(), |i| unsafe { *faer_col.get_unchecked(i) })
    }

    /// Borrows a contiguous ndarray as a faer view without copying.
    fn as_faer_view<'a>(matrix_view: &'a ArrayView2<'a, f64>) -> Result<MatRef<'a, f64>> {
        let (nrows, ncols) = matrix_view.dim();
        let slice = matrix_view.as_slice_memory_order().ok_or_else(|| {
            CompressionError::Backend(format!(
                "Input ndarray matrix ({}x{}) is non-contiguous and cannot be viewed by faer",
                nrows, ncols
            ))
        })?;
        if matrix_view.is_standard_layout() {
            Ok(MatRef::from_row_major_slice(slice, nrows, ncols))
        } else {
            Ok(MatRef::from_column_major_slice(slice, nrows, ncols))
        }
    }

    impl BackendQR<f64> for FaerLinAlgBackend {
        fn qr_q_factor(&self, matrix: &Array2<f64>) -> Result<Array2<f64>> {
            let (nrows, ncols) = matrix.dim();
            if nrows == 0 || ncols == 0 {
                return Ok(Array2::zeros((nrows, nrows.min(ncols))));
            }
            let matrix_view = matrix.view();
            let qr_decomp = as_faer_view(&matrix_view)?.qr();
            let q_thin_faer_mat = qr_decomp.compute_thin_q();
            Ok(faer_mat_to_ndarray(q_thin_faer_mat.as_ref()))
        }
    }

    impl BackendSVD<f64> for FaerLinAlgBackend {
        fn svd_into(&self, matrix: Array2<f64>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<f64>> {
            let (nrows, ncols) = matrix.dim();
            let k_dim = nrows.min(ncols);
            if matrix.is_empty() {
                return Ok(SVDOutput {
                    u: if compute_u { Some(Array2::zeros((nrows, k_dim))) } else { None },
                    s: Array1::zeros(k_dim),
                    vt: if compute_v { Some(Array2::zeros((k_dim, ncols))) } else { None },
                    sweeps: None,
                });
            }
            let matrix_view = matrix.view();
            let svd_solver_instance = FaerSolverSvd::new_thin(as_faer_view(&matrix_view)?)
                .map_err(|e| CompressionError::Backend(format!("Faer SVD computation failed: {:?}", e)))?;

            let s_ndarray = faer_col_to_ndarray_vec(svd_solver_instance.S().diagonal().as_ref());
            let u_ndarray = if compute_u {
                Some(faer_mat_to_ndarray(svd_solver_instance.U().as_ref()))
            } else {
                None
            };
            let vt_ndarray = if compute_v {
                Some(faer_mat_to_ndarray(svd_solver_instance.V().as_ref()).t().to_owned())
            } else {
                None
            };
            Ok(SVDOutput { u: u_ndarray, s: s_ndarray, vt: vt_ndarray, sweeps: None })
        }
    }
}

// --- LinAlgBackendProvider Dispatch ---

/// Dispatches to the linear algebra backend selected by compile-time features.
///
/// `backend_faer` wins over `backend_openblas*`; with neither enabled the
/// native Jacobi/Householder backend is used.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    #[cfg_attr(
        any(feature = "backend_faer", feature = "backend_openblas", feature = "backend_openblas_system"),
        allow(dead_code)
    )]
    native: NativeLinAlgBackend,
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new(settings: JacobiSettings) -> Self {
        Self {
            native: NativeLinAlgBackend::new(settings),
            _phantom: PhantomData,
        }
    }

    /// Name of the active backend, for logs.
    pub fn backend_name(&self) -> &'static str {
        #[cfg(feature = "backend_faer")]
        {
            "faer"
        }
        #[cfg(all(
            not(feature = "backend_faer"),
            any(feature = "backend_openblas", feature = "backend_openblas_system")
        ))]
        {
            "ndarray-linalg"
        }
        #[cfg(not(any(
            feature = "backend_faer",
            feature = "backend_openblas",
            feature = "backend_openblas_system"
        )))]
        {
            "native"
        }
    }
}

impl BackendQR<f64> for LinAlgBackendProvider<f64> {
    fn qr_q_factor(&self, matrix: &Array2<f64>) -> Result<Array2<f64>> {
        #[cfg(feature = "backend_faer")]
        {
            faer_specific_code::FaerLinAlgBackend.qr_q_factor(matrix)
        }
        #[cfg(all(
            not(feature = "backend_faer"),
            any(feature = "backend_openblas", feature = "backend_openblas_system")
        ))]
        {
            ndarray_linalg_specific_code::NdarrayLinAlgBackend.qr_q_factor(matrix)
        }
        #[cfg(not(any(
            feature = "backend_faer",
            feature = "backend_openblas",
            feature = "backend_openblas_system"
        )))]
        {
            self.native.qr_q_factor(matrix)
        }
    }
}

impl BackendSVD<f64> for LinAlgBackendProvider<f64> {
    fn svd_into(&self, matrix: Array2<f64>, compute_u: bool, compute_v: bool) -> Result<SVDOutput<f64>> {
        #[cfg(feature = "backend_faer")]
        {
            faer_specific_code::FaerLinAlgBackend.svd_into(matrix, compute_u, compute_v)
        }
        #[cfg(all(
            not(feature = "backend_faer"),
            any(feature = "backend_openblas", feature = "backend_openblas_system")
        ))]
        {
            ndarray_linalg_specific_code::NdarrayLinAlgBackend.svd_into(matrix, compute_u, compute_v)
        }
        #[cfg(not(any(
            feature = "backend_faer",
            feature = "backend_openblas",
            feature = "backend_openblas_system"
        )))]
        {
            self.native.svd_into(matrix, compute_u, compute_v)
        }
    }
}
