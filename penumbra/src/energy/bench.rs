//! Benchmark module for the energy objective.
//! Run with: cargo bench -p penumbra --features bench --bench model

use std::hint::black_box;

use criterion::Criterion;

use super::{EnergyContext, EnergyObjective, EnergyTerms, LogFilterBank, MEstimator};
use crate::model::ZLimits;
use crate::optimizer::Objective;
use crate::stack::{ImageSize, SortedStack};

/// Register energy benchmarks with Criterion.
pub fn benchmarks(c: &mut Criterion) {
    let size = ImageSize::new(112, 84);
    let depth = 200;
    let area = size.pixel_count();

    let q: Vec<f64> = (0..depth).map(|z| z as f64 * 5.0 - 500.0).collect();
    let mut profiles = Vec::with_capacity(area * depth);
    for p in 0..area {
        let gain = 0.6 + 0.4 * (p % size.width) as f64 / size.width as f64;
        profiles.extend(q.iter().map(|&qz| gain * qz + (p % 7) as f64));
    }
    let stack = SortedStack::from_sorted_profiles(size, depth, profiles);
    let pivot_shift_y = vec![1000.0; area];
    let filters = LogFilterBank::new(size);
    let context = EnergyContext {
        stack: &stack,
        q: &q,
        pivot_shift_x: 1000.0,
        pivot_shift_y: &pivot_shift_y,
        z_limits: ZLimits {
            min: 0.0,
            max: 100.0,
        },
        lambda_vreg: 1e8,
        lambda_zero: 3.16,
        filters: &filters,
    };

    let mut x = vec![1.0; area];
    x.extend(std::iter::repeat_n(0.0, area));
    x.extend([85.0, 85.0]);
    let mut grad = vec![0.0; x.len()];

    let mut group = c.benchmark_group("energy_112x84x200");
    for (name, terms, estimator) in [
        ("fit_ls", EnergyTerms::FitOnly, MEstimator::LeastSquares),
        ("all_cauchy", EnergyTerms::AllTerms, MEstimator::Cauchy { width: 3.0 }),
    ] {
        let objective = EnergyObjective::new(&context, terms, estimator);
        group.bench_function(name, |b| {
            b.iter(|| black_box(objective.evaluate(black_box(&x), &mut grad)))
        });
    }
    group.finish();
}
