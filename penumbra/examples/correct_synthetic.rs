//! Example: Illumination Correction of a Synthetic Stack
//!
//! Builds a vignetted, offset stack of random scenes, fits the illumination model,
//! corrects one plane and saves the model:
//! 1. Load a configuration (or use the defaults)
//! 2. Estimate gain and zero-light surfaces
//! 3. Correct a plane and compare flatness before and after
//! 4. Save the model descriptor
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --example correct_synthetic -- [config.yaml] [model.yaml]
//! ```

use std::env;
use std::path::Path;

use common::Buffer2;
use penumbra::{Corrector, MemoryPlanes, ModelConfig, build_model};

const WIDTH: usize = 320;
const HEIGHT: usize = 240;
const DEPTH: usize = 80;

fn main() {
    let _log_guard = common::log_setup::setup_logging("penumbra", "info", Some(Path::new("logs")))
        .expect("Failed to set up logging");

    let args: Vec<String> = env::args().collect();
    let config = match args.get(1) {
        Some(path) => ModelConfig::from_file(path).expect("Failed to load configuration"),
        None => ModelConfig::default(),
    };
    let model_path = args.get(2).map_or("model.yaml", String::as_str);

    let planes: Vec<Buffer2<f64>> = (0..DEPTH).map(scene).collect();
    let source = MemoryPlanes::new(planes.clone()).expect("Planes share one size");

    let fitted = build_model(&source, &config).expect("Model estimation failed");
    let diagnostics = &fitted.diagnostics;
    println!(
        "Least squares: {} ({} iterations)",
        diagnostics.least_squares.termination, diagnostics.least_squares.iterations
    );
    println!(
        "Robust: {} ({} iterations)",
        diagnostics.robust.termination, diagnostics.robust.iterations
    );
    println!(
        "Zero-light point ({:.2}, {:.2}), entropy {:.3}, {} octave(s)",
        diagnostics.zero_light.0,
        diagnostics.zero_light.1,
        diagnostics.entropy,
        diagnostics.octaves_blended
    );

    let corrector = Corrector::new(&fitted.model, config.correction_mode);
    let flat = flat_field();
    let corrected = corrector.correct(&flat).expect("Plane matches model size");
    print_spread("Flat field before correction", &flat);
    print_spread("Flat field after correction", &corrected);

    fitted.model.save(model_path).expect("Failed to save model");
    println!("Model saved to {model_path}");
}

fn gain(x: usize, y: usize) -> f64 {
    let dx = (x as f64 - WIDTH as f64 / 2.0) / WIDTH as f64;
    let dy = (y as f64 - HEIGHT as f64 / 2.0) / HEIGHT as f64;
    1.0 - 1.2 * (dx * dx + dy * dy)
}

fn zero_light(x: usize, _y: usize) -> f64 {
    100.0 + 20.0 * x as f64 / WIDTH as f64
}

/// Deterministic pseudo-random scene seen through the illumination.
fn scene(index: usize) -> Buffer2<f64> {
    Buffer2::from_fn(WIDTH, HEIGHT, |x, y| {
        let hash = (x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663) ^ index.wrapping_mul(83_492_791))
            % 2000;
        gain(x, y) * (200.0 + hash as f64) + zero_light(x, y)
    })
}

fn flat_field() -> Buffer2<f64> {
    Buffer2::from_fn(WIDTH, HEIGHT, |x, y| gain(x, y) * 1000.0 + zero_light(x, y))
}

fn print_spread(label: &str, plane: &Buffer2<f64>) {
    let (min, max) = plane.min_max();
    println!("{label}: min {min:.1}, max {max:.1}, spread {:.2}%", 100.0 * (max - min) / plane.mean());
}
