use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lowrank_compress::{CompressionConfig, CompressionController, MatrixBuffer, SvdConfig, SvdEngine, SvdMethod};
use ndarray::{Array, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

// Random plane with pixel-range values
fn generate_plane(rows: usize, columns: usize) -> MatrixBuffer {
    let data: Array2<f32> = Array::random((rows, columns), Uniform::new(0.0f32, 255.0));
    MatrixBuffer::from_array(data).unwrap()
}

fn bench_multiply(c: &mut Criterion) {
    let mut group = c.benchmark_group("MatrixBuffer_multiply");

    for &n in [64usize, 128, 256].iter() {
        let a = generate_plane(n, n);
        let b = generate_plane(n, n);
        group.throughput(Throughput::Elements((n * n * n) as u64));
        group.bench_with_input(BenchmarkId::new("square", n), &(a, b), |bench, (a, b)| {
            bench.iter(|| MatrixBuffer::multiply(a, b).unwrap());
        });
    }
    group.finish();
}

fn bench_decompose(c: &mut Criterion) {
    let mut group = c.benchmark_group("SvdEngine_decompose");
    group.sample_size(10);

    let exact = SvdEngine::default();
    let randomized = SvdEngine::new(SvdConfig {
        method: SvdMethod::randomized(),
        ..SvdConfig::default()
    });

    for &(rows, columns, k) in [(64, 64, 8), (128, 96, 16), (256, 256, 20)].iter() {
        let plane = generate_plane(rows, columns);
        let label = format!("{}x{}_k{}", rows, columns, k);
        group.throughput(Throughput::Elements((rows * columns) as u64));
        group.bench_with_input(BenchmarkId::new("exact", &label), &plane, |b, plane| {
            b.iter(|| exact.decompose(plane, k).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("randomized", &label), &plane, |b, plane| {
            b.iter(|| randomized.decompose(plane, k).unwrap());
        });
    }
    group.finish();
}

fn bench_compress_rgb(c: &mut Criterion) {
    let mut group = c.benchmark_group("CompressionController_compress");
    group.sample_size(10);

    let planes: Vec<MatrixBuffer> = (0..3).map(|_| generate_plane(128, 128)).collect();
    for &parallel_channels in [false, true].iter() {
        let controller = CompressionController::new(CompressionConfig {
            parallel_channels,
            ..CompressionConfig::default()
        });
        let label = if parallel_channels { "parallel" } else { "sequential" };
        group.bench_with_input(BenchmarkId::new(label, "128x128x3_k16"), &planes, |b, planes| {
            b.iter(|| controller.compress(planes, 16).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_multiply, bench_decompose, bench_compress_rgb);
criterion_main!(benches);
