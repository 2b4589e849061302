use std::cell::Cell;

use super::*;
use crate::math::pearson;
use crate::stack::MemoryPlanes;
use crate::testing::{SyntheticConfig, init_tracing, synthetic_stack};

fn fast_config() -> ModelConfig {
    ModelConfig::default()
        .with_target_num_pixels(4096)
        .with_max_iterations(150)
        .with_max_function_evals(300)
}

// ============================================================================
// End to end
// ============================================================================

#[test]
fn test_build_model_recovers_synthetic_surfaces() {
    init_tracing();

    let synthetic = synthetic_stack(&SyntheticConfig::default());
    let source = MemoryPlanes::new(synthetic.planes.clone()).unwrap();
    let fitted = build_model(&source, &fast_config()).unwrap();
    let model = &fitted.model;

    assert_eq!(model.image_size, ImageSize::new(64, 64));
    assert_eq!(model.working_size, ImageSize::new(64, 64));
    model.validate().unwrap();

    let v_corr = pearson(model.v_small.pixels(), synthetic.true_v.pixels());
    let z_corr = pearson(model.z_small.pixels(), synthetic.true_z.pixels());
    assert!(v_corr > 0.9, "gain correlation {v_corr}");
    assert!(z_corr > 0.9, "zero-light correlation {z_corr}");

    let diagnostics = &fitted.diagnostics;
    assert_eq!(diagnostics.octaves_blended, 1);
    assert_eq!(diagnostics.depth, 50);
    assert_eq!(diagnostics.bit_depth, BitDepth::Twelve);
    assert!(diagnostics.cauchy_width > 0.0);
    assert_eq!(diagnostics.z_limits.min, 0.0);
    let (zx, zy) = diagnostics.zero_light;
    assert!(zx >= -0.01 && zx <= diagnostics.z_limits.max + 0.01);
    assert!(zy >= -0.01 && zy <= diagnostics.z_limits.max + 0.01);
    assert!(diagnostics.robust.function_evals <= 330);
}

#[test]
fn test_build_model_upsamples_to_image_size() {
    let synthetic = synthetic_stack(&SyntheticConfig {
        width: 48,
        height: 32,
        depth: 12,
        ..Default::default()
    });
    let source = MemoryPlanes::new(synthetic.planes).unwrap();
    let config = ModelConfig::default()
        .with_target_num_pixels(384)
        .with_max_iterations(20)
        .with_z_limits(ZLimitStrategy::Fixed {
            min: 50.0,
            max: 150.0,
        });
    let fitted = build_model(&source, &config).unwrap();

    let model = &fitted.model;
    assert_eq!(model.image_size, ImageSize::new(48, 32));
    assert_eq!(model.working_size, ImageSize::new(24, 16));
    assert_eq!(ImageSize::of(&model.v), model.image_size);
    assert_eq!(ImageSize::of(&model.z_small), model.working_size);
    assert_eq!(
        fitted.diagnostics.z_limits,
        ZLimits {
            min: 50.0,
            max: 150.0
        }
    );
    assert!(model.v.iter().all(|v| v.is_finite()));
    assert!(model.z.iter().all(|z| z.is_finite()));
}

#[test]
fn test_percentile_limits_come_from_min_image() {
    let synthetic = synthetic_stack(&SyntheticConfig {
        width: 16,
        height: 16,
        depth: 8,
        ..Default::default()
    });
    let min_image = {
        let mut min = synthetic.planes[0].clone();
        for plane in &synthetic.planes[1..] {
            min.iter_mut().zip(plane.iter()).for_each(|(m, &v)| *m = m.min(v));
        }
        min
    };
    let source = MemoryPlanes::new(synthetic.planes).unwrap();
    let config = ModelConfig::default()
        .with_target_num_pixels(64)
        .with_max_iterations(5)
        .with_z_limits(ZLimitStrategy::Percentile);
    let fitted = build_model(&source, &config).unwrap();

    let limits = fitted.diagnostics.z_limits;
    assert_eq!(limits.min, percentile(min_image.pixels(), 0.1));
    assert_eq!(limits.max, percentile(min_image.pixels(), 99.9));
}

// ============================================================================
// Error propagation
// ============================================================================

struct CountingSource {
    inner: MemoryPlanes,
    loads: Cell<usize>,
}

impl PlaneSource for CountingSource {
    fn image_size(&self) -> ImageSize {
        self.inner.image_size()
    }

    fn plane_count(&self) -> usize {
        self.inner.plane_count()
    }

    fn load_plane(&self, index: usize) -> Result<Buffer2<f64>> {
        self.loads.set(self.loads.get() + 1);
        self.inner.load_plane(index)
    }
}

#[test]
fn test_contradictory_limits_fail_before_loading() {
    let source = CountingSource {
        inner: MemoryPlanes::new(vec![Buffer2::new_filled(4, 4, 10.0); 3]).unwrap(),
        loads: Cell::new(0),
    };
    let config = ModelConfig::default().with_z_limits(ZLimitStrategy::Fixed {
        min: 10.0,
        max: 5.0,
    });

    let err = build_model(&source, &config).unwrap_err();
    assert!(matches!(err, Error::InvalidZLimits { .. }));
    assert_eq!(source.loads.get(), 0);
}

struct FailingSource;

impl PlaneSource for FailingSource {
    fn image_size(&self) -> ImageSize {
        ImageSize::new(4, 4)
    }

    fn plane_count(&self) -> usize {
        3
    }

    fn load_plane(&self, index: usize) -> Result<Buffer2<f64>> {
        if index == 1 {
            return Ok(Buffer2::new_filled(5, 4, 0.0));
        }
        Ok(Buffer2::new_filled(4, 4, 1.0))
    }
}

#[test]
fn test_mismatched_plane_aborts_fit() {
    let err = build_model(&FailingSource, &ModelConfig::default()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Dimension mismatch for plane 1: expected 4x4, got 5x4"
    );
}

struct HollowSource;

impl PlaneSource for HollowSource {
    fn image_size(&self) -> ImageSize {
        ImageSize::new(0, 8)
    }

    fn plane_count(&self) -> usize {
        3
    }

    fn load_plane(&self, _index: usize) -> Result<Buffer2<f64>> {
        Ok(Buffer2::new(0, 8, Vec::new()))
    }
}

#[test]
fn test_plane_without_pixels_aborts_fit() {
    let err = build_model(&HollowSource, &ModelConfig::default()).unwrap_err();
    assert!(matches!(err, Error::EmptyPlane(size) if size == ImageSize::new(0, 8)));
}

#[test]
fn test_non_finite_pixels_do_not_abort_fit() {
    let mut synthetic = synthetic_stack(&SyntheticConfig {
        width: 16,
        height: 16,
        depth: 12,
        ..Default::default()
    });
    synthetic.planes[3][(5, 5)] = f64::NAN;
    synthetic.planes[7][(0, 9)] = f64::INFINITY;
    synthetic.planes[9][(15, 15)] = f64::NEG_INFINITY;

    let source = MemoryPlanes::new(synthetic.planes).unwrap();
    let config = ModelConfig {
        number_of_quantiles: 5,
        ..ModelConfig::default()
            .with_target_num_pixels(256)
            .with_max_iterations(20)
    };
    let fitted = build_model(&source, &config).unwrap();

    assert_eq!(fitted.diagnostics.depth, 5);
    assert!(fitted.model.v.iter().all(|v| v.is_finite()));
    assert!(fitted.model.z.iter().all(|z| z.is_finite()));
    assert!(fitted.diagnostics.cauchy_width.is_finite());
}

// ============================================================================
// Building blocks
// ============================================================================

#[test]
fn test_resolve_z_limits_strategies() {
    let min_image = Buffer2::from_fn(10, 10, |x, y| (x + 10 * y) as f64);

    let (limits, start) = resolve_z_limits(ZLimitStrategy::Derived, 200.0, &min_image);
    assert_eq!(limits, ZLimits { min: 0.0, max: 200.0 });
    assert!((start - 170.0).abs() < 1e-12);

    let (limits, start) = resolve_z_limits(
        ZLimitStrategy::Fixed {
            min: 20.0,
            max: 60.0,
        },
        200.0,
        &min_image,
    );
    assert_eq!(limits, ZLimits { min: 20.0, max: 60.0 });
    assert_eq!(start, 40.0);

    let (limits, start) = resolve_z_limits(ZLimitStrategy::Percentile, 200.0, &min_image);
    assert_eq!(limits, ZLimits { min: 0.0, max: 99.0 });
    assert_eq!(start, 49.5);
}

#[test]
fn test_pivot_uses_median_slice() {
    let stack = SortedStack::from_sorted_profiles(
        ImageSize::new(2, 1),
        4,
        vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0],
    );
    let pivot = Pivot::new(&stack, &[5.0, 6.0, 7.0, 8.0]);
    assert_eq!(pivot.shift_x, 6.0);
    assert_eq!(pivot.shift_y, vec![2.0, 20.0]);
}

#[test]
fn test_standard_error_of_exact_fit_is_floored() {
    let q = [0.0, 1.0, 2.0, 3.0];
    let profiles: Vec<f64> = q.iter().map(|v| 2.0 * v + 1.0).collect();
    let stack = SortedStack::from_sorted_profiles(ImageSize::new(1, 1), 4, profiles);
    assert_eq!(mean_standard_error(&stack, &q, &[2.0], &[1.0]), MIN_CAUCHY_WIDTH);
}

#[test]
fn test_standard_error_value() {
    let q = [0.0, 1.0, 2.0, 3.0];
    // Residuals of the line 0 * q + 0 are -1, 1, -1, 1.
    let stack = SortedStack::from_sorted_profiles(ImageSize::new(1, 1), 4, vec![1.0, -1.0, 1.0, -1.0]);
    let se = mean_standard_error(&stack, &q, &[0.0], &[0.0]);
    assert!((se - 2f64.sqrt()).abs() < 1e-12);
}

// ============================================================================
// Persistence
// ============================================================================

fn small_descriptor() -> ModelDescriptor {
    let v_small = Buffer2::from_fn(3, 2, |x, y| 0.8 + 0.01 * (x + y) as f64 + 1e-13);
    let z_small = Buffer2::from_fn(3, 2, |x, _| 100.0 / 3.0 + x as f64);
    ModelDescriptor {
        image_size: ImageSize::new(6, 4),
        working_size: ImageSize::new(3, 2),
        v: resample::resize(&v_small, 6, 4, ResampleKernel::Bilinear),
        z: resample::resize(&z_small, 6, 4, ResampleKernel::Bilinear),
        v_small,
        z_small,
    }
}

#[test]
fn test_descriptor_json_round_trip_is_lossless() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    let model = small_descriptor();
    model.save(&path).unwrap();
    assert_eq!(ModelDescriptor::load(&path).unwrap(), model);
}

#[test]
fn test_descriptor_yaml_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.yaml");
    let model = small_descriptor();
    model.save(&path).unwrap();

    let loaded = ModelDescriptor::load(&path).unwrap();
    assert_eq!(loaded.image_size, model.image_size);
    assert_eq!(loaded.working_size, model.working_size);
    for (a, b) in loaded.z.iter().zip(model.z.iter()) {
        assert!((a - b).abs() < 1e-9);
    }
}

#[test]
fn test_descriptor_load_rejects_size_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    let mut model = small_descriptor();
    model.working_size = ImageSize::new(4, 2);
    common::serde::save_to_file(&model, &path).unwrap();

    let err = ModelDescriptor::load(&path).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid model descriptor: v_small is 3x2, expected 4x2"
    );
}

#[test]
fn test_descriptor_load_reports_missing_file() {
    let err = ModelDescriptor::load("/nonexistent/penumbra/model.yaml").unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));
}
