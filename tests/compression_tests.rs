// In tests/compression_tests.rs

use approx::assert_abs_diff_eq;
use float_cmp::approx_eq;
use lowrank_compress::diagnostics::compute_orthogonality_error_f32;
use lowrank_compress::{
    compression_ratio, CompressionConfig, CompressionController, CompressionError, MatrixBuffer, PixelBuffer,
    PixelLayout, Reconstructor, SvdConfig, SvdEngine, SvdMethod,
};
use ndarray::{s, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const ORTHONORMALITY_TOLERANCE: f64 = 1e-4;

fn random_plane(rows: usize, columns: usize, seed: u64) -> MatrixBuffer {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let data = Array2::<f32>::random_using((rows, columns), Uniform::new(0.0f32, 255.0), &mut rng);
    MatrixBuffer::from_array(data).unwrap()
}

fn max_abs_diff(a: &MatrixBuffer, b: &MatrixBuffer) -> f32 {
    a.as_slice()
        .iter()
        .zip(b.as_slice())
        .fold(0.0f32, |acc, (x, y)| acc.max((x - y).abs()))
}

fn rank_k_error(m: &MatrixBuffer, engine: &SvdEngine, k: i64) -> f64 {
    let svd = engine.decompose(m, k).unwrap();
    let approx = Reconstructor::new().reconstruct(&svd).unwrap();
    m.frobenius_distance(&approx).unwrap()
}

#[test]
fn full_rank_reconstruction_reproduces_input() {
    for &(rows, columns, seed) in &[(9, 7, 11), (7, 9, 12), (16, 16, 13)] {
        let m = random_plane(rows, columns, seed);
        let k = rows.min(columns) as i64;
        let svd = SvdEngine::default().decompose(&m, k).unwrap();
        let out = Reconstructor::new().reconstruct(&svd).unwrap();
        assert_eq!(out.shape(), m.shape());
        let relative = m.frobenius_distance(&out).unwrap() / m.frobenius_norm();
        assert!(relative < 1e-5, "{}x{}: relative error {}", rows, columns, relative);
    }
}

#[test]
fn error_does_not_increase_with_rank() {
    let m = random_plane(14, 11, 21);
    let engine = SvdEngine::default();
    let errors: Vec<f64> = (0..=11).map(|k| rank_k_error(&m, &engine, k)).collect();
    for (k, pair) in errors.windows(2).enumerate() {
        assert!(
            pair[1] <= pair[0] * (1.0 + 1e-5) + 1e-3,
            "error grew from k={} ({}) to k={} ({})",
            k,
            pair[0],
            k + 1,
            pair[1]
        );
    }
    assert!(errors[11] < 1e-2);
}

#[test]
fn exact_truncation_is_optimal_against_other_rank_k_approximations() {
    let m = random_plane(30, 24, 31);
    let exact = SvdEngine::default();
    let sketchy = SvdEngine::new(SvdConfig {
        method: SvdMethod::Randomized {
            oversampling: 2,
            power_iterations: 0,
            seed: 5,
        },
        ..SvdConfig::default()
    });
    for k in [1usize, 4, 10] {
        let exact_err = rank_k_error(&m, &exact, k as i64);
        let randomized_err = rank_k_error(&m, &sketchy, k as i64);
        assert!(exact_err <= randomized_err * (1.0 + 1e-4));

        // Keeping only the first k columns is another rank-k matrix.
        let mut columns_kept = m.view().to_owned();
        columns_kept.slice_mut(s![.., k..]).fill(0.0);
        let column_err = m
            .frobenius_distance(&MatrixBuffer::from_array(columns_kept).unwrap())
            .unwrap();
        assert!(exact_err <= column_err * (1.0 + 1e-4));
    }
}

#[test]
fn factors_are_orthonormal() {
    let engine = SvdEngine::default();
    for &(rows, columns, seed) in &[(40, 25, 41), (25, 40, 42)] {
        let m = random_plane(rows, columns, seed);
        let svd = engine.decompose(&m, 20).unwrap();
        assert!(compute_orthogonality_error_f32(&svd.u.view()).unwrap() < ORTHONORMALITY_TOLERANCE);
        assert!(compute_orthogonality_error_f32(&svd.vt.view().t()).unwrap() < ORTHONORMALITY_TOLERANCE);
        for col in svd.u.view().columns() {
            assert_abs_diff_eq!(col.dot(&col), 1.0, epsilon = 1e-4);
        }
    }
}

#[test]
fn rank_zero_and_oversized_rank() {
    let m = random_plane(6, 4, 51);
    let engine = SvdEngine::default();

    let zero = Reconstructor::new().reconstruct(&engine.decompose(&m, 0).unwrap()).unwrap();
    assert_eq!(zero.shape(), (6, 4));
    assert!(zero.as_slice().iter().all(|&v| v == 0.0));

    let clamped = engine.decompose(&m, 1_000).unwrap();
    assert_eq!(clamped.rank(), 4);
}

#[test]
fn identity_round_trips_at_full_rank() {
    let identity = MatrixBuffer::from_diagonal(&[1.0; 4], 4, 4).unwrap();
    let svd = SvdEngine::default().decompose(&identity, 4).unwrap();
    let out = Reconstructor::new().reconstruct(&svd).unwrap();
    assert!(max_abs_diff(&out, &identity) < 1e-5);
}

#[test]
fn all_ones_is_exact_at_rank_one() {
    let ones = MatrixBuffer::from_row_major(100, 100, vec![1.0; 10_000]).unwrap();
    let svd = SvdEngine::default().decompose(&ones, 1).unwrap();
    assert_abs_diff_eq!(svd.singular_values[0], 100.0, epsilon = 1e-3);
    let out = Reconstructor::new().reconstruct(&svd).unwrap();
    assert!(max_abs_diff(&out, &ones) < 1e-4);
    assert!(svd.discarded_energy.unwrap() < 1e-6);
}

#[test]
fn reported_ratio_matches_the_stored_element_count() {
    let planes: Vec<MatrixBuffer> = (0..3).map(|c| random_plane(256, 256, 60 + c)).collect();
    let controller = CompressionController::new(CompressionConfig {
        svd: SvdConfig {
            method: SvdMethod::randomized(),
            ..SvdConfig::default()
        },
        ..CompressionConfig::default()
    });
    let outcome = controller.compress(&planes, 50).unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.effective_rank, 50);
    // 256*256*3 / (3 * (256*50 + 50 + 50*256))
    let expected = (256.0 * 256.0 * 3.0) / (3.0 * (256.0 * 50.0 + 50.0 + 50.0 * 256.0));
    assert!(approx_eq!(f64, outcome.compression_ratio, expected, epsilon = 1e-12));
    assert!(approx_eq!(f64, compression_ratio(256, 256, 50, 3), 2.555, epsilon = 1e-3));
    for plane in outcome.into_planes().unwrap() {
        assert_eq!(plane.shape(), (256, 256));
    }
}

#[test]
fn invalid_and_empty_ranks() {
    let m = random_plane(5, 5, 71);
    let engine = SvdEngine::default();
    assert!(matches!(
        engine.decompose(&m, -1),
        Err(CompressionError::InvalidDimension(_))
    ));
    let empty = engine.decompose(&m, 0).unwrap();
    assert_eq!(empty.u.shape(), (5, 0));
    assert!(empty.singular_values.is_empty());
    assert_eq!(empty.vt.shape(), (0, 5));
}

#[test]
fn nan_input_fails_cleanly() {
    let mut m = random_plane(8, 8, 81);
    m.set(3, 5, f32::NAN).unwrap();
    let result = SvdEngine::default().decompose(&m, 4);
    assert!(matches!(result, Err(CompressionError::NumericalError(_))));
}

#[test]
fn one_bad_channel_does_not_abort_the_others() {
    let mut planes: Vec<MatrixBuffer> = (0..3).map(|c| random_plane(12, 10, 90 + c)).collect();
    planes[1].set(0, 0, f32::NAN).unwrap();
    let outcome = CompressionController::default().compress(&planes, 3).unwrap();

    assert!(!outcome.is_complete());
    assert_eq!(outcome.failed_channels(), vec![1]);
    assert!(matches!(outcome.channels[1], Err(CompressionError::NumericalError(_))));
    assert_eq!(outcome.channels[0].as_ref().unwrap().shape(), (12, 10));
    assert_eq!(outcome.channels[2].as_ref().unwrap().shape(), (12, 10));
    assert!(outcome.into_planes().is_err());
}

#[test]
fn diagnostics_are_collected_on_request() {
    let planes: Vec<MatrixBuffer> = (0..2).map(|c| random_plane(10, 8, 100 + c)).collect();
    let controller = CompressionController::new(CompressionConfig {
        collect_diagnostics: true,
        ..CompressionConfig::default()
    });
    let outcome = controller.compress(&planes, 4).unwrap();
    assert_eq!(outcome.diagnostics.len(), 2);
    for diag in outcome.diagnostics.iter() {
        let diag = diag.as_ref().unwrap();
        assert_eq!(diag.rank, 4);
        assert!(diag.u_orthogonality_error.unwrap() < ORTHONORMALITY_TOLERANCE);
        let kept = diag.retained_energy_fraction.unwrap();
        assert!(kept > 0.0 && kept <= 1.0);
    }

    let quiet = CompressionController::default().compress(&planes, 4).unwrap();
    assert!(quiet.diagnostics.iter().all(|d| d.is_none()));
}

#[test]
fn image_round_trip_at_full_rank_keeps_every_byte() {
    let (width, height) = (7usize, 5usize);
    let mut rng = ChaCha8Rng::seed_from_u64(111);
    let bytes = Array2::<u8>::random_using((height, width * 4), Uniform::new_inclusive(0u8, 255), &mut rng);
    let image = PixelBuffer::new(width, height, PixelLayout::Rgba8, bytes.iter().copied().collect()).unwrap();

    let (rebuilt, outcome) = CompressionController::default().compress_image(&image, 5).unwrap();
    assert_eq!(outcome.channels.len(), 3);
    assert_eq!(rebuilt, image);
}

#[test]
fn low_rank_image_stays_in_byte_range() {
    let image = PixelBuffer::new(
        4,
        2,
        PixelLayout::Gray8,
        vec![0, 255, 0, 255, 255, 0, 255, 0],
    )
    .unwrap();
    let (rebuilt, outcome) = CompressionController::default().compress_image(&image, 1).unwrap();
    assert_eq!(outcome.effective_rank, 1);
    assert_eq!(rebuilt.width(), 4);
    assert_eq!(rebuilt.height(), 2);
    assert_eq!(rebuilt.as_bytes().len(), 8);
}
