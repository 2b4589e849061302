//! Testing utilities for penumbra.

#![allow(dead_code)]

use common::Buffer2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
#[cfg(test)]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Stack generated as `true_v * content + true_z + noise`, with the ground truth kept.
///
/// Every pixel sees the same set of scene intensities, each in its own random order.
#[derive(Debug, Clone)]
pub struct SyntheticStack {
    pub planes: Vec<Buffer2<f64>>,
    pub true_v: Buffer2<f64>,
    pub true_z: Buffer2<f64>,
}

/// Parameters of [`synthetic_stack`].
#[derive(Debug, Clone, Copy)]
pub struct SyntheticConfig {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    /// Gain at the image centre; falls smoothly to `edge_gain` at the corners.
    pub centre_gain: f64,
    pub edge_gain: f64,
    /// Zero-light level ramps linearly in x between these values.
    pub zero_light_left: f64,
    pub zero_light_right: f64,
    /// Scene intensities are drawn uniformly from this range.
    pub content_min: f64,
    pub content_max: f64,
    pub noise_sigma: f64,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            depth: 50,
            centre_gain: 1.0,
            edge_gain: 0.5,
            zero_light_left: 100.0,
            zero_light_right: 140.0,
            content_min: 500.0,
            content_max: 3000.0,
            noise_sigma: 3.0,
            seed: 42,
        }
    }
}

/// Raised-cosine vignetting surface, flat at the centre and along the borders.
pub fn vignette_gain(width: usize, height: usize, centre: f64, edge: f64) -> Buffer2<f64> {
    let bump = |i: usize, n: usize| {
        let t = i as f64 / (n as f64 - 1.0).max(1.0);
        0.5 * (1.0 - (2.0 * std::f64::consts::PI * t).cos())
    };
    Buffer2::from_fn(width, height, |x, y| {
        edge + (centre - edge) * bump(x, width) * bump(y, height)
    })
}

/// Horizontal ramp.
pub fn linear_ramp(width: usize, height: usize, left: f64, right: f64) -> Buffer2<f64> {
    let span = (width as f64 - 1.0).max(1.0);
    Buffer2::from_fn(width, height, |x, _| left + (right - left) * x as f64 / span)
}

pub fn synthetic_stack(config: &SyntheticConfig) -> SyntheticStack {
    let SyntheticConfig { width, height, .. } = *config;
    let true_v = vignette_gain(width, height, config.centre_gain, config.edge_gain);
    let true_z = linear_ramp(width, height, config.zero_light_left, config.zero_light_right);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut levels: Vec<f64> = (0..config.depth)
        .map(|_| rng.random_range(config.content_min..config.content_max))
        .collect();

    let mut planes = vec![Buffer2::new_filled(width, height, 0.0); config.depth];
    for y in 0..height {
        for x in 0..width {
            levels.shuffle(&mut rng);
            for (plane, &content) in planes.iter_mut().zip(&levels) {
                let noise = gaussian(&mut rng) * config.noise_sigma;
                plane[(x, y)] = true_v[(x, y)] * content + true_z[(x, y)] + noise;
            }
        }
    }

    SyntheticStack {
        planes,
        true_v,
        true_z,
    }
}

/// Standard normal sample via Box-Muller.
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
