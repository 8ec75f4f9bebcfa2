//! One-sided (Hestenes) Jacobi SVD.
//!
//! The matrix is oriented so that the vectors being orthogonalized are the
//! `min(m, n)` columns, stored as contiguous rows of a working array. Every
//! sweep visits each pair once and applies the plane rotation that makes
//! that pair orthogonal; the accumulated rotations form V.

use log::{debug, trace, warn};
use ndarray::{s, Array1, Array2, ArrayView2, ArrayViewMut1, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{CompressionError, Result};
use crate::linalg_backends::SVDOutput;

/// Convergence controls of the Jacobi iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JacobiSettings {
    /// A pair counts as orthogonal once `|wp . wq| <= tolerance * |wp| * |wq|`.
    pub tolerance: f64,
    /// Sweep budget; running out of it is a `ConvergenceError`.
    pub max_sweeps: usize,
    /// Singular values below `rank_tolerance * sigma_max` are treated as zero
    /// and their left singular vectors are completed to an orthonormal basis.
    pub rank_tolerance: f64,
}

pub const DEFAULT_TOLERANCE: f64 = 1e-12;
pub const DEFAULT_MAX_SWEEPS: usize = 60;
pub const DEFAULT_RANK_TOLERANCE: f64 = 1e-10;

impl Default for JacobiSettings {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            max_sweeps: DEFAULT_MAX_SWEEPS,
            rank_tolerance: DEFAULT_RANK_TOLERANCE,
        }
    }
}

/// Thin SVD of `matrix` (m x n): U is m x r, S has r entries, Vt is r x n,
/// with r = min(m, n).
pub(crate) fn jacobi_svd(matrix: &ArrayView2<f64>, settings: &JacobiSettings) -> Result<SVDOutput<f64>> {
    let (m, n) = matrix.dim();
    let r = m.min(n);
    if r == 0 {
        return Ok(SVDOutput {
            u: Some(Array2::zeros((m, 0))),
            s: Array1::zeros(0),
            vt: Some(Array2::zeros((0, n))),
            sweeps: Some(0),
        });
    }

    // Work on A (m >= n) or A^T (m < n); either way the rows of `work` are the
    // r columns being orthogonalized, each of length `len`.
    let transposed = m < n;
    let oriented = if transposed { matrix.t() } else { matrix.view() };
    let len = oriented.nrows();
    let mut work = Array2::<f64>::zeros((r, len));
    work.assign(&oriented.t());
    let mut rotations = Array2::<f64>::eye(r);

    let scale = work.iter().map(|v| v * v).sum::<f64>().sqrt();
    // Columns this small relative to the whole matrix carry no information.
    let negligible = (f64::EPSILON * scale).powi(2).max(f64::MIN_POSITIVE);

    let sweeps = run_sweeps(&mut work, &mut rotations, settings, negligible)?;
    debug!(
        "Jacobi SVD of {}x{} converged after {} sweeps (transposed: {})",
        m, n, sweeps, transposed
    );

    // Column norms are the singular values; order them descending.
    let norms: Vec<f64> = work.rows().into_iter().map(|row| row.dot(&row).sqrt()).collect();
    let mut order: Vec<usize> = (0..r).collect();
    order.sort_by(|&a, &b| norms[b].total_cmp(&norms[a]));

    let sigma_max = norms[order[0]];
    let cutoff = settings.rank_tolerance * sigma_max;

    let mut singular_values = Array1::<f64>::zeros(r);
    let mut left = Array2::<f64>::zeros((r, len));
    let mut right = Array2::<f64>::zeros((r, r));
    let mut null_slots = Vec::new();
    for (slot, &col) in order.iter().enumerate() {
        right.row_mut(slot).assign(&rotations.row(col));
        let sigma = norms[col];
        if sigma > cutoff && sigma > 0.0 {
            singular_values[slot] = sigma;
            left.row_mut(slot).assign(&work.row(col).mapv(|v| v / sigma));
        } else {
            null_slots.push(slot);
        }
    }
    if !null_slots.is_empty() {
        trace!(
            "Jacobi SVD: {} singular values below cutoff {:e}, completing the left basis",
            null_slots.len(),
            cutoff
        );
        complete_orthonormal_rows(&mut left, &null_slots);
    }

    // A V = W  =>  A = (W / S) S V^T.
    let (u, vt) = if transposed {
        (right.t().to_owned(), left)
    } else {
        (left.t().to_owned(), right)
    };

    Ok(SVDOutput {
        u: Some(u),
        s: singular_values,
        vt: Some(vt),
        sweeps: Some(sweeps),
    })
}

fn run_sweeps(
    work: &mut Array2<f64>,
    rotations: &mut Array2<f64>,
    settings: &JacobiSettings,
    negligible: f64,
) -> Result<usize> {
    let r = work.nrows();
    let mut residual = 0.0f64;
    for sweep in 0..settings.max_sweeps {
        let mut rotated = false;
        residual = 0.0;
        for p in 0..r {
            for q in (p + 1)..r {
                let (alpha, beta, gamma) = {
                    let wp = work.row(p);
                    let wq = work.row(q);
                    (wp.dot(&wp), wq.dot(&wq), wp.dot(&wq))
                };
                if alpha <= negligible || beta <= negligible {
                    continue;
                }
                let ratio = gamma.abs() / (alpha * beta).sqrt();
                residual = residual.max(ratio);
                if ratio <= settings.tolerance {
                    continue;
                }
                rotated = true;

                let zeta = (beta - alpha) / (2.0 * gamma);
                let t = zeta.signum() / (zeta.abs() + (1.0 + zeta * zeta).sqrt());
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = c * t;
                rotate_pair(work, p, q, c, s);
                rotate_pair(rotations, p, q, c, s);
            }
        }
        trace!("Jacobi sweep {}: largest off-diagonal ratio {:e}", sweep + 1, residual);
        if !rotated {
            return Ok(sweep + 1);
        }
    }
    warn!(
        "Jacobi SVD exhausted {} sweeps, residual {:e}",
        settings.max_sweeps, residual
    );
    Err(CompressionError::ConvergenceError {
        max_sweeps: settings.max_sweeps,
        residual,
    })
}

/// Replaces rows `p`, `q` by `c*p - s*q` and `s*p + c*q`.
fn rotate_pair(matrix: &mut Array2<f64>, p: usize, q: usize, c: f64, s: f64) {
    let (mut row_p, mut row_q) = matrix.multi_slice_mut((s![p, ..], s![q, ..]));
    Zip::from(&mut row_p).and(&mut row_q).for_each(|x, y| {
        let xp = *x;
        let yq = *y;
        *x = c * xp - s * yq;
        *y = s * xp + c * yq;
    });
}

/// Fills the rows listed in `slots` with unit vectors orthogonal to every
/// other row, using modified Gram-Schmidt on standard basis candidates.
pub(crate) fn complete_orthonormal_rows(rows: &mut Array2<f64>, slots: &[usize]) {
    let len = rows.ncols();
    let mut filled: Vec<usize> = (0..rows.nrows()).filter(|i| !slots.contains(i)).collect();
    let mut next_candidate = 0usize;
    for &slot in slots {
        while next_candidate < len {
            let mut candidate = Array1::<f64>::zeros(len);
            candidate[next_candidate] = 1.0;
            next_candidate += 1;
            // Two passes keep the result orthogonal to working precision.
            for _ in 0..2 {
                for &other in &filled {
                    let basis = rows.row(other);
                    let proj = basis.dot(&candidate);
                    candidate.scaled_add(-proj, &basis);
                }
            }
            let norm = candidate.dot(&candidate).sqrt();
            if norm > 0.5 {
                let mut target: ArrayViewMut1<f64> = rows.row_mut(slot);
                target.assign(&candidate.mapv(|v| v / norm));
                filled.push(slot);
                break;
            }
        }
    }
}
