use criterion::{criterion_group, criterion_main};

fn resample_benchmarks(c: &mut criterion::Criterion) {
    penumbra::bench::resample::benchmarks(c);
}

criterion_group!(benches, resample_benchmarks);
criterion_main!(benches);
