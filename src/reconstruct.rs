// src/reconstruct.rs

use log::trace;
use ndarray::s;

use crate::error::{CompressionError, Result};
use crate::matrix::MatrixBuffer;
use crate::svd::TruncatedSvd;

/// Multiplies truncated factors back into a full matrix.
///
/// The product is staged as `(U * Sigma) * Vt`: the intermediate is only
/// m x k, which is smaller than any other staging when k < n.
#[derive(Debug, Default, Clone, Copy)]
pub struct Reconstructor;

impl Reconstructor {
    pub fn new() -> Self {
        Self
    }

    /// Rebuilds the m x n approximation from a decomposition.
    pub fn reconstruct(&self, svd: &TruncatedSvd) -> Result<MatrixBuffer> {
        self.reconstruct_from_parts(&svd.u, &svd.sigma_matrix(), &svd.vt)
    }

    /// Computes `u * sigma * vt` with two chained multiplies.
    ///
    /// # Errors
    /// `DimensionMismatch` if the factor shapes do not chain.
    pub fn reconstruct_from_parts(
        &self,
        u: &MatrixBuffer,
        sigma: &MatrixBuffer,
        vt: &MatrixBuffer,
    ) -> Result<MatrixBuffer> {
        let u_sigma = MatrixBuffer::multiply(u, sigma)?;
        trace!("Reconstruction intermediate U*Sigma has shape {:?}", u_sigma.shape());
        MatrixBuffer::multiply(&u_sigma, vt)
    }

    /// Rebuilds using only the leading `use_rank` components (clamped to the
    /// decomposition's rank). Lets a caller preview coarser approximations
    /// without decomposing again.
    pub fn reconstruct_progressive(&self, svd: &TruncatedSvd, use_rank: usize) -> Result<MatrixBuffer> {
        let k = svd.rank();
        let use_rank = use_rank.min(k);
        if use_rank == k {
            return self.reconstruct(svd);
        }
        let (rows, columns) = svd.source_shape;
        if svd.u.shape() != (rows, k) || svd.vt.shape() != (k, columns) {
            return Err(CompressionError::DimensionMismatch {
                left: svd.u.shape(),
                right: svd.vt.shape(),
                context: "factors do not match the recorded source shape",
            });
        }

        let u = MatrixBuffer::from_array_unchecked(svd.u.view().slice(s![.., ..use_rank]).to_owned());
        let vt = MatrixBuffer::from_array_unchecked(svd.vt.view().slice(s![..use_rank, ..]).to_owned());
        let sigma = MatrixBuffer::diagonal_unchecked(&svd.singular_values[..use_rank], use_rank, use_rank);
        self.reconstruct_from_parts(&u, &sigma, &vt)
    }
}
