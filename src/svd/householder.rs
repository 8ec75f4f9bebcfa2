// src/svd/householder.rs

use ndarray::{s, Array1, Array2, ArrayView2, Zip};

/// Thin Q factor (m x min(m, n)) of a Householder QR factorization.
///
/// Columns that are already zero get an identity reflector, so Q is
/// orthonormal even for rank-deficient input; the randomized SVD relies on
/// that when the sketch has fewer independent columns than requested.
pub(crate) fn householder_thin_q(matrix: &ArrayView2<f64>) -> Array2<f64> {
    let (m, n) = matrix.dim();
    let k = m.min(n);
    let mut r = matrix.to_owned();
    let mut reflectors: Vec<Option<Array1<f64>>> = Vec::with_capacity(k);

    for j in 0..k {
        let mut v = r.slice(s![j.., j]).to_owned();
        let norm_x = v.dot(&v).sqrt();
        if norm_x == 0.0 {
            reflectors.push(None);
            continue;
        }
        let alpha = if v[0] >= 0.0 { -norm_x } else { norm_x };
        v[0] -= alpha;
        let norm_v = v.dot(&v).sqrt();
        if norm_v == 0.0 {
            reflectors.push(None);
            continue;
        }
        v.mapv_inplace(|x| x / norm_v);
        apply_reflector(&mut r.slice_mut(s![j.., j..]), &v);
        reflectors.push(Some(v));
    }

    // Q = H_0 H_1 ... H_{k-1} applied to the first k columns of the identity.
    let mut q = Array2::<f64>::zeros((m, k));
    for i in 0..k {
        q[[i, i]] = 1.0;
    }
    for (j, reflector) in reflectors.iter().enumerate().rev() {
        if let Some(v) = reflector {
            apply_reflector(&mut q.slice_mut(s![j.., ..]), v);
        }
    }
    q
}

/// `block <- (I - 2 v v^T) block` for a unit vector `v`.
fn apply_reflector(block: &mut ndarray::ArrayViewMut2<f64>, v: &Array1<f64>) {
    let projection = v.dot(&*block);
    Zip::from(block.rows_mut()).and(v).for_each(|mut row, &vi| {
        row.scaled_add(-2.0 * vi, &projection);
    });
}
