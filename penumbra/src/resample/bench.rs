//! Benchmark module for resampling.
//! Run with: cargo bench -p penumbra --features bench --bench resample

use std::hint::black_box;

use common::Buffer2;
use criterion::{BenchmarkId, Criterion};

use super::{ResampleKernel, resize, resize_by_factor};

/// Register resampling benchmarks with Criterion.
pub fn benchmarks(c: &mut Criterion) {
    benchmark_shrink_to_working_size(c);
    benchmark_octave_halving(c);
    benchmark_surface_upsample(c);
}

fn gradient_plane(width: usize, height: usize) -> Buffer2<f64> {
    Buffer2::from_fn(width, height, |x, y| (x * 3 + y * 7) as f64 % 4096.0)
}

fn benchmark_shrink_to_working_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample_shrink");
    for (w, h) in [(512, 512), (1392, 1040)] {
        let plane = gradient_plane(w, h);
        group.bench_with_input(BenchmarkId::from_parameter(format!("{w}x{h}")), &plane, |b, p| {
            b.iter(|| black_box(resize(p, 112, 84, ResampleKernel::Cubic)))
        });
    }
    group.finish();
}

fn benchmark_octave_halving(c: &mut Criterion) {
    let plane = gradient_plane(112, 84);
    c.bench_function("resample_halve_112x84", |b| {
        b.iter(|| black_box(resize_by_factor(&plane, 0.5, ResampleKernel::Cubic)))
    });
}

fn benchmark_surface_upsample(c: &mut Criterion) {
    let plane = gradient_plane(112, 84);
    c.bench_function("resample_upsample_bilinear_1392x1040", |b| {
        b.iter(|| black_box(resize(&plane, 1392, 1040, ResampleKernel::Bilinear)))
    });
}
