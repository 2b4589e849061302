//! Benchmark module for model estimation.
//! Run with: cargo bench -p penumbra --features bench --bench model

use std::hint::black_box;

use criterion::Criterion;

use super::build_model;
use crate::config::ModelConfig;
use crate::stack::MemoryPlanes;
use crate::testing::{SyntheticConfig, synthetic_stack};

/// Register model estimation benchmarks with Criterion.
pub fn benchmarks(c: &mut Criterion) {
    let synthetic = synthetic_stack(&SyntheticConfig {
        width: 128,
        height: 96,
        depth: 60,
        ..Default::default()
    });
    let source = MemoryPlanes::new(synthetic.planes).expect("Synthetic planes share one size");
    let config = ModelConfig::default()
        .with_max_iterations(50)
        .with_max_function_evals(100);

    let mut group = c.benchmark_group("build_model");
    group.sample_size(10);
    group.bench_function("128x96x60", |b| {
        b.iter(|| black_box(build_model(&source, &config)))
    });
    group.finish();
}
