//! Benchmark entry points, compiled with the `bench` feature.

pub mod resample {
    pub use crate::resample::bench::benchmarks;
}

pub mod energy {
    pub use crate::energy::bench::benchmarks;
}

pub mod model {
    pub use crate::model::bench::benchmarks;
}
