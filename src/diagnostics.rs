// src/diagnostics.rs

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::matrix::MatrixBuffer;
use crate::svd::TruncatedSvd;

/// Number of singular values kept in [`DecompositionDiagnostics::sampled_singular_values`].
pub const SINGULAR_VALUE_SAMPLE_COUNT: usize = 10;

/// Quality metrics for one channel's decomposition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecompositionDiagnostics {
    pub source_dims: (usize, usize),
    pub rank: usize,
    pub source_fro_norm: f64,
    /// ||I - U^T U||_F
    pub u_orthogonality_error: Option<f64>,
    /// ||I - V^T V||_F, computed on the rows of Vt.
    pub vt_orthogonality_error: Option<f64>,
    /// ||M - U S Vt||_F / ||M||_F
    pub relative_reconstruction_error: Option<f64>,
    /// Fraction of the total squared energy kept by the leading `rank`
    /// components. Needs the discarded energy, so exact method only.
    pub retained_energy_fraction: Option<f64>,
    pub sampled_singular_values: Vec<f32>,
    pub sweeps: Option<usize>,
    pub notes: String,
}

impl DecompositionDiagnostics {
    /// Measures `svd` against the matrix it was computed from.
    pub fn collect(source: &MatrixBuffer, svd: &TruncatedSvd) -> Self {
        let source_view = source.view();
        let s_values = ndarray::Array1::from(svd.singular_values.clone());
        let source_fro_norm = compute_frob_norm_f64(&source.to_f64().view());
        let kept_energy: f64 = svd.singular_values.iter().map(|&s| (s as f64) * (s as f64)).sum();

        let retained_energy_fraction = svd.discarded_energy.map(|discarded| {
            let total = kept_energy + discarded;
            if total > 0.0 {
                kept_energy / total
            } else {
                1.0
            }
        });

        let mut notes = String::new();
        if svd.rank() == 0 {
            notes.push_str("rank 0: factors are empty");
        }

        Self {
            source_dims: source.shape(),
            rank: svd.rank(),
            source_fro_norm,
            u_orthogonality_error: compute_orthogonality_error_f32(&svd.u.view()),
            vt_orthogonality_error: compute_orthogonality_error_f32(&svd.vt.view().t()),
            relative_reconstruction_error: compute_svd_reconstruction_error_f32(
                &source_view,
                &svd.u.view(),
                &s_values.view(),
                &svd.vt.view(),
            ),
            retained_energy_fraction,
            sampled_singular_values: sample_singular_values(&s_values.view(), SINGULAR_VALUE_SAMPLE_COUNT),
            sweeps: svd.sweeps,
            notes,
        }
    }
}

/// Computes Frobenius norm for an f32 matrix, accumulating in f64.
pub fn compute_frob_norm_f32(matrix: &ArrayView2<f32>) -> f64 {
    matrix.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt()
}

/// Computes Frobenius norm for an f64 matrix.
pub fn compute_frob_norm_f64(matrix: &ArrayView2<f64>) -> f64 {
    matrix.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

/// Computes orthogonality error ||I - Q^T Q||_F for an f32 matrix.
/// `None` when Q has no columns.
pub fn compute_orthogonality_error_f32(q_matrix: &ArrayView2<f32>) -> Option<f64> {
    if q_matrix.nrows() == 0 || q_matrix.ncols() == 0 {
        return None;
    }
    let q_f64 = q_matrix.mapv(|x| x as f64);
    compute_orthogonality_error_f64(&q_f64.view())
}

/// Computes orthogonality error ||I - Q^T Q||_F for an f64 matrix.
pub fn compute_orthogonality_error_f64(q_matrix: &ArrayView2<f64>) -> Option<f64> {
    if q_matrix.nrows() == 0 || q_matrix.ncols() == 0 {
        return None;
    }
    let qtq = q_matrix.t().dot(q_matrix);
    let diff = Array2::<f64>::eye(qtq.nrows()) - qtq;
    Some(compute_frob_norm_f64(&diff.view()))
}

/// Computes ||A - U S V^T||_F / ||A||_F for f32 inputs, in f64.
///
/// `None` on inconsistent factor shapes. A zero `A` gives 0.0 if the
/// reconstruction is also zero and infinity otherwise. With an empty
/// factorization (rank 0) the reconstruction is the zero matrix.
pub fn compute_svd_reconstruction_error_f32(
    original_matrix: &ArrayView2<f32>,
    u: &ArrayView2<f32>,
    s_vec: &ArrayView1<f32>,
    vt: &ArrayView2<f32>,
) -> Option<f64> {
    if original_matrix.is_empty() {
        return None;
    }
    if u.ncols() != s_vec.len() || s_vec.len() != vt.nrows() {
        return None;
    }
    if u.nrows() != original_matrix.nrows() || vt.ncols() != original_matrix.ncols() {
        return None;
    }

    let original_f64 = original_matrix.mapv(|x| x as f64);
    let u_f64 = u.mapv(|x| x as f64);
    let s_diag = Array2::from_diag(&s_vec.mapv(|x| x as f64));
    let vt_f64 = vt.mapv(|x| x as f64);
    let reconstructed = u_f64.dot(&s_diag).dot(&vt_f64);
    let diff = &original_f64 - &reconstructed;

    let norm_diff = compute_frob_norm_f64(&diff.view());
    let norm_original = compute_frob_norm_f64(&original_f64.view());
    if norm_original < 1e-12 {
        if norm_diff < 1e-12 {
            Some(0.0)
        } else {
            Some(f64::INFINITY)
        }
    } else {
        Some(norm_diff / norm_original)
    }
}

/// Takes `count` evenly spaced singular values, always including the first
/// and the last.
pub fn sample_singular_values(s_values: &ArrayView1<f32>, count: usize) -> Vec<f32> {
    let len = s_values.len();
    if len == 0 || count == 0 {
        return Vec::new();
    }
    if count >= len {
        return s_values.to_vec();
    }
    if count == 1 {
        return vec![s_values[0]];
    }
    (0..count)
        .map(|i| {
            let idx = (i as f64 * (len - 1) as f64 / (count - 1) as f64).round() as usize;
            s_values[idx.min(len - 1)]
        })
        .collect()
}
