// src/svd/mod.rs
//
// Truncated SVD of a single channel plane.

pub(crate) mod householder;
pub(crate) mod jacobi;
mod randomized;

use log::{debug, info};
use ndarray::s;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::{CompressionError, Result};
use crate::linalg_backends::{BackendSVD, LinAlgBackendProvider, SVDOutput};
use crate::matrix::MatrixBuffer;

pub use jacobi::{JacobiSettings, DEFAULT_MAX_SWEEPS, DEFAULT_RANK_TOLERANCE, DEFAULT_TOLERANCE};

/// How the factors are computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SvdMethod {
    /// Full one-sided Jacobi SVD, then truncation. Optimal in the
    /// Eckart-Young sense.
    Exact,
    /// Randomized range finder followed by an exact SVD of the small
    /// projected matrix. Approximate; cheap when `k` is far below `min(m, n)`.
    Randomized {
        oversampling: usize,
        power_iterations: usize,
        seed: u64,
    },
    /// Randomized when `k / min(m, n) < randomized_below`, exact otherwise.
    Auto { randomized_below: f64 },
}

pub const DEFAULT_OVERSAMPLING: usize = 10;
pub const DEFAULT_POWER_ITERATIONS: usize = 2;
pub const DEFAULT_SEED: u64 = 2025;

impl SvdMethod {
    /// Randomized method with the default sketch parameters.
    pub fn randomized() -> Self {
        SvdMethod::Randomized {
            oversampling: DEFAULT_OVERSAMPLING,
            power_iterations: DEFAULT_POWER_ITERATIONS,
            seed: DEFAULT_SEED,
        }
    }
}

impl Default for SvdMethod {
    fn default() -> Self {
        SvdMethod::Exact
    }
}

/// Configuration of the decomposition stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SvdConfig {
    pub method: SvdMethod,
    /// Convergence controls of the Jacobi solver (also used for the small
    /// projected SVD of the randomized method).
    pub jacobi: JacobiSettings,
}

/// Rank-`k` factors of one matrix: `u` is m x k, `singular_values` has k
/// descending non-negative entries, `vt` is k x n.
#[derive(Debug, Clone, PartialEq)]
pub struct TruncatedSvd {
    pub u: MatrixBuffer,
    pub singular_values: Vec<f32>,
    pub vt: MatrixBuffer,
    /// Shape of the decomposed matrix.
    pub source_shape: (usize, usize),
    /// Sum of the squared singular values that were dropped. Known only
    /// when the full spectrum was computed (exact method or k == 0).
    pub discarded_energy: Option<f64>,
    /// Jacobi sweeps used by the underlying solver, if it reports them.
    pub sweeps: Option<usize>,
}

impl TruncatedSvd {
    pub fn rank(&self) -> usize {
        self.singular_values.len()
    }

    /// Sigma as a k x k diagonal buffer.
    pub fn sigma_matrix(&self) -> MatrixBuffer {
        let k = self.rank();
        MatrixBuffer::diagonal_unchecked(&self.singular_values, k, k)
    }

    /// Number of stored values: `m*k + k + k*n`.
    pub fn stored_len(&self) -> usize {
        self.u.len() + self.singular_values.len() + self.vt.len()
    }

    fn empty(rows: usize, columns: usize, discarded_energy: f64) -> Self {
        Self {
            u: MatrixBuffer::with_shape(rows, 0),
            singular_values: Vec::new(),
            vt: MatrixBuffer::with_shape(0, columns),
            source_shape: (rows, columns),
            discarded_energy: Some(discarded_energy),
            sweeps: None,
        }
    }
}

/// Computes truncated SVDs according to an [`SvdConfig`].
#[derive(Debug, Clone, Default)]
pub struct SvdEngine {
    config: SvdConfig,
}

impl SvdEngine {
    pub fn new(config: SvdConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SvdConfig {
        &self.config
    }

    /// Decomposes `matrix` and keeps the leading `k` singular triplets.
    ///
    /// `k` larger than `min(rows, columns)` is clamped; `k == 0` returns
    /// empty factors without running a solver.
    ///
    /// # Errors
    /// - `InvalidDimension` for negative `k` or an empty matrix.
    /// - `NumericalError` if the matrix holds NaN or infinite values.
    /// - `ConvergenceError` if the Jacobi solver exhausts its sweep budget.
    ///
    /// # Examples
    ///
    /// ```
    /// use lowrank_compress::{MatrixBuffer, SvdEngine};
    /// let m = MatrixBuffer::from_diagonal(&[3.0, 1.0], 2, 2).unwrap();
    /// let svd = SvdEngine::default().decompose(&m, 1).unwrap();
    /// assert_eq!(svd.singular_values, vec![3.0]);
    /// ```
    pub fn decompose(&self, matrix: &MatrixBuffer, k: i64) -> Result<TruncatedSvd> {
        if k < 0 {
            return Err(CompressionError::InvalidDimension(format!(
                "Truncation rank must be non-negative, got {}",
                k
            )));
        }
        let (rows, columns) = matrix.shape();
        if rows == 0 || columns == 0 {
            return Err(CompressionError::InvalidDimension(format!(
                "Cannot decompose an empty {}x{} matrix",
                rows, columns
            )));
        }
        let non_finite = matrix.as_slice().iter().filter(|v| !v.is_finite()).count();
        if non_finite > 0 {
            return Err(CompressionError::NumericalError(format!(
                "Matrix contains {} non-finite value(s)",
                non_finite
            )));
        }

        let max_rank = rows.min(columns);
        let k = (k as u64).min(max_rank as u64) as usize;
        if k == 0 {
            debug!("Rank 0 requested for {}x{} matrix; returning empty factors", rows, columns);
            let energy = matrix.frobenius_norm().powi(2);
            return Ok(TruncatedSvd::empty(rows, columns, energy));
        }

        let start_time = Instant::now();
        let method = self.resolve_method(k, max_rank);
        let backend = LinAlgBackendProvider::<f64>::new(self.config.jacobi);
        let input = matrix.to_f64();
        let output = match method {
            SvdMethod::Randomized {
                oversampling,
                power_iterations,
                seed,
            } => randomized::randomized_svd(&input.view(), k, oversampling, power_iterations, seed, &backend)?,
            _ => backend.svd_into(input, true, true)?,
        };
        let exact = !matches!(method, SvdMethod::Randomized { .. });
        let truncated = truncate(output, k, (rows, columns), exact)?;

        info!(
            "Decomposed {}x{} matrix to rank {} ({:?}, {} backend) in {:?}",
            rows,
            columns,
            truncated.rank(),
            method,
            backend.backend_name(),
            start_time.elapsed()
        );
        Ok(truncated)
    }

    fn resolve_method(&self, k: usize, max_rank: usize) -> SvdMethod {
        match self.config.method {
            SvdMethod::Auto { randomized_below } => {
                if (k as f64) / (max_rank as f64) < randomized_below {
                    SvdMethod::randomized()
                } else {
                    SvdMethod::Exact
                }
            }
            other => other,
        }
    }
}

fn truncate(output: SVDOutput<f64>, k: usize, source_shape: (usize, usize), exact: bool) -> Result<TruncatedSvd> {
    let missing = |factor: &str| CompressionError::Backend(format!("SVD backend returned no {} factor", factor));
    let u = output.u.ok_or_else(|| missing("U"))?;
    let vt = output.vt.ok_or_else(|| missing("Vt"))?;
    let k = k.min(output.s.len());

    if let Some(&largest) = output.s.slice(s![..k]).iter().find(|&&v| v > f32::MAX as f64) {
        return Err(CompressionError::NumericalError(format!(
            "singular value {:e} does not fit in f32",
            largest
        )));
    }
    // Clamp tiny negative round-off some backends produce.
    let singular_values: Vec<f32> = output
        .s
        .slice(s![..k])
        .iter()
        .map(|&v| v.max(0.0) as f32)
        .collect();
    let discarded_energy = if exact {
        Some(output.s.slice(s![k..]).iter().map(|v| v * v).sum::<f64>())
    } else {
        None
    };

    Ok(TruncatedSvd {
        u: MatrixBuffer::from_f64(&u.slice(s![.., ..k])),
        singular_values,
        vt: MatrixBuffer::from_f64(&vt.slice(s![..k, ..])),
        source_shape,
        discarded_energy,
        sweeps: output.sweeps,
    })
}

/// Smallest rank whose leading singular values hold at least
/// `target_energy` (a fraction in [0, 1]) of the total squared energy.
///
/// Returns 0 for an empty or all-zero spectrum.
pub fn rank_for_energy(singular_values: &[f32], target_energy: f64) -> usize {
    let target = target_energy.clamp(0.0, 1.0);
    let total: f64 = singular_values.iter().map(|&s| (s as f64) * (s as f64)).sum();
    if total <= 0.0 || target <= 0.0 {
        return 0;
    }
    let mut cumulative = 0.0;
    for (i, &s) in singular_values.iter().enumerate() {
        cumulative += (s as f64) * (s as f64);
        if cumulative / total >= target {
            return i + 1;
        }
    }
    singular_values.len()
}
