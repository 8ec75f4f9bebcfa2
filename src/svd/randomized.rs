// src/svd/randomized.rs

use log::{debug, trace};
use ndarray::{Array2, ArrayView2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{CompressionError, Result};
use crate::linalg_backends::{BackendQR, BackendSVD, LinAlgBackendProvider, SVDOutput};

/// Randomized range-finder SVD (Halko, Martinsson & Tropp).
///
/// Returns up to `k + oversampling` components (capped at `min(m, n)`); the
/// caller truncates to `k`. `power_iterations` rounds of `A A^T` sharpen the
/// sketch when the spectrum decays slowly, which is the usual case for
/// natural images.
pub(crate) fn randomized_svd(
    matrix: &ArrayView2<f64>,
    k: usize,
    oversampling: usize,
    power_iterations: usize,
    seed: u64,
    backend: &LinAlgBackendProvider<f64>,
) -> Result<SVDOutput<f64>> {
    let (m, n) = matrix.dim();
    let sketch_dimension = (k + oversampling).min(m.min(n));
    trace!(
        "RSVD: target K={}, sketch L={}, input {}x{}, power iterations={}",
        k, sketch_dimension, m, n, power_iterations
    );

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal_dist = Normal::new(0.0, 1.0).map_err(|e| {
        CompressionError::NumericalError(format!("Failed to create normal distribution for RSVD: {}", e))
    })?;
    // Omega: n x L
    let omega = Array2::from_shape_fn((n, sketch_dimension), |_| normal_dist.sample(&mut rng));

    // Q = orth(A * Omega), m x L
    let mut q_basis = backend.qr_q_factor(&matrix.dot(&omega))?;

    for iter_idx in 0..power_iterations {
        trace!("RSVD power iteration {}/{}", iter_idx + 1, power_iterations);
        let q_tilde = backend.qr_q_factor(&matrix.t().dot(&q_basis))?;
        q_basis = backend.qr_q_factor(&matrix.dot(&q_tilde))?;
    }

    // B = Q^T A, L x n, small enough for the exact solver.
    let projected = q_basis.t().dot(matrix);
    let small = backend.svd_into(projected, true, true)?;
    let u_small = small
        .u
        .ok_or_else(|| CompressionError::Backend("SVD of projected matrix returned no U".to_string()))?;

    debug!(
        "RSVD produced {} components from a {}-column sketch",
        small.s.len(),
        sketch_dimension
    );
    Ok(SVDOutput {
        u: Some(q_basis.dot(&u_small)),
        s: small.s,
        vt: small.vt,
        sweeps: small.sweeps,
    })
}
