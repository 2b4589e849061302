//! Two-phase model estimation.
//!
//! Pipeline: load and shrink planes, preprocess, estimate Q, shift into pivot space, fit the
//! intensity lines by least squares, refit robustly with all terms, then unpivot and upsample.

mod descriptor;

#[cfg(test)]
mod tests;

#[cfg(feature = "bench")]
pub mod bench;

use common::Buffer2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ModelConfig, Parameters, ZLimitStrategy};
use crate::energy::{EnergyContext, EnergyObjective, EnergyTerms, LogFilterBank, MEstimator};
use crate::error::{Error, Result};
use crate::math::{mean, percentile};
use crate::optimizer::{self, LbfgsResult, Termination};
use crate::preprocess::{self, BitDepth};
use crate::quantile::estimate_q;
use crate::resample::{self, ResampleKernel};
use crate::stack::{self, ImageSize, PlaneSource, SortedStack};

pub use descriptor::ModelDescriptor;

/// Start of the zero-light point, as a fraction of the stack minimum.
const DERIVED_ZERO_LIGHT_START: f64 = 0.85;
/// Percentiles of the minimum image bounding the zero-light point.
const LOWER_PERCENTILE: f64 = 0.1;
const UPPER_PERCENTILE: f64 = 99.9;
/// Floor for the Cauchy width.
const MIN_CAUCHY_WIDTH: f64 = 1e-12;

/// Physical bounds of the zero-light point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZLimits {
    pub min: f64,
    pub max: f64,
}

impl ZLimits {
    #[inline]
    pub fn midpoint(&self) -> f64 {
        0.5 * (self.min + self.max)
    }
}

/// Outcome of one optimizer run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub termination: Termination,
    pub iterations: usize,
    pub function_evals: usize,
    pub energy: f64,
}

impl From<&LbfgsResult> for PhaseReport {
    fn from(result: &LbfgsResult) -> Self {
        Self {
            termination: result.termination,
            iterations: result.iterations,
            function_evals: result.function_evals,
            energy: result.f,
        }
    }
}

/// What the fit observed. Non-convergence is reported here, never as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub least_squares: PhaseReport,
    pub robust: PhaseReport,
    pub cauchy_width: f64,
    pub z_limits: ZLimits,
    /// Fitted zero-light point `(zx, zy)`.
    pub zero_light: (f64, f64),
    pub entropy: f64,
    pub octaves_blended: usize,
    pub bit_depth: BitDepth,
    /// Depth of the stack the fit ran on.
    pub depth: usize,
    pub lambda_vreg: f64,
    pub lambda_zero: f64,
}

impl FitDiagnostics {
    pub fn converged(&self) -> bool {
        self.least_squares.termination.is_converged() && self.robust.termination.is_converged()
    }
}

#[derive(Debug, Clone)]
pub struct FittedModel {
    pub model: ModelDescriptor,
    pub diagnostics: FitDiagnostics,
}

/// Estimates the illumination model of every plane in `source`.
///
/// Configuration errors are reported before any plane is read.
pub fn build_model<S: PlaneSource + ?Sized>(source: &S, config: &ModelConfig) -> Result<FittedModel> {
    config.validate()?;
    if source.plane_count() == 0 {
        return Err(Error::EmptyStack);
    }
    source.image_size().ensure_not_empty()?;

    let params = config.resolve(source.image_size(), source.plane_count());
    tracing::info!(
        "Building model from {} planes of {}: lambda_vreg {:.3}, lambda_zero {:.3}, q {:.3}",
        params.num_images,
        params.image_size,
        params.lambda_vreg,
        params.lambda_zero,
        params.q_percent
    );

    let loaded = stack::load_stack(source, params.working_size)?;
    let (sorted, report) = preprocess::preprocess(loaded.stack, &params);

    let stack_min = sorted.min_value();
    let (z_limits, zero_light_start) = resolve_z_limits(params.z_limits, stack_min, &loaded.min_image);
    tracing::info!(
        "Zero-light limits [{:.3}, {:.3}], start {:.3}",
        z_limits.min,
        z_limits.max,
        zero_light_start
    );

    let q = estimate_q(&sorted, params.q_percent);
    let pivot = Pivot::new(&sorted, &q);
    let shifted_stack = sorted.shifted(&pivot.shift_y);
    let shifted_q: Vec<f64> = q.iter().map(|v| v - pivot.shift_x).collect();
    let filters = LogFilterBank::new(params.working_size);

    let context = EnergyContext {
        stack: &shifted_stack,
        q: &shifted_q,
        pivot_shift_x: pivot.shift_x,
        pivot_shift_y: &pivot.shift_y,
        z_limits,
        lambda_vreg: params.lambda_vreg_weight(),
        lambda_zero: params.lambda_zero_weight(),
        filters: &filters,
    };

    let area = params.working_size.pixel_count();
    let mut x0 = vec![1.0; area];
    x0.extend(pivot.shift_y.iter().map(|psy| pivot.shift_x - psy));
    x0.extend([zero_light_start, zero_light_start]);

    tracing::info!("Phase 1: least-squares fit");
    let least_squares = EnergyObjective::new(&context, EnergyTerms::FitOnly, MEstimator::LeastSquares);
    let phase_one = optimizer::minimize(&least_squares, x0, &params.optimizer);
    log_phase("least-squares", &phase_one);

    let (v1, rest) = phase_one.x.split_at(area);
    let cauchy_width = mean_standard_error(&shifted_stack, &shifted_q, v1, &rest[..area]);
    tracing::info!("Cauchy width {:.6}", cauchy_width);

    let mut x1 = phase_one.x.clone();
    x1[2 * area] = zero_light_start;
    x1[2 * area + 1] = zero_light_start;

    tracing::info!("Phase 2: robust fit with regularization");
    let robust = EnergyObjective::new(
        &context,
        EnergyTerms::AllTerms,
        MEstimator::Cauchy {
            width: cauchy_width,
        },
    );
    let phase_two = optimizer::minimize(&robust, x1, &params.optimizer);
    log_phase("robust", &phase_two);

    let (v, rest) = phase_two.x.split_at(area);
    let (b, zero_light) = rest.split_at(area);
    let (zx, zy) = (zero_light[0], zero_light[1]);
    let model = assemble_descriptor(&params, &pivot, v, b, zx);

    let diagnostics = FitDiagnostics {
        least_squares: PhaseReport::from(&phase_one),
        robust: PhaseReport::from(&phase_two),
        cauchy_width,
        z_limits,
        zero_light: (zx, zy),
        entropy: report.entropy,
        octaves_blended: report.octaves_blended,
        bit_depth: report.bit_depth,
        depth: report.depth,
        lambda_vreg: params.lambda_vreg,
        lambda_zero: params.lambda_zero,
    };
    tracing::info!(
        "Model built: zero-light point ({:.3}, {:.3}), mean v {:.4}, mean z {:.3}",
        zx,
        zy,
        model.mean_v(),
        model.mean_z()
    );

    Ok(FittedModel { model, diagnostics })
}

/// Bounds and starting value for the zero-light point.
pub(crate) fn resolve_z_limits(
    strategy: ZLimitStrategy,
    stack_min: f64,
    min_image: &Buffer2<f64>,
) -> (ZLimits, f64) {
    match strategy {
        ZLimitStrategy::Derived => (
            ZLimits {
                min: 0.0,
                max: stack_min,
            },
            DERIVED_ZERO_LIGHT_START * stack_min,
        ),
        ZLimitStrategy::Fixed { min, max } => {
            let limits = ZLimits { min, max };
            (limits, limits.midpoint())
        }
        ZLimitStrategy::Percentile => {
            let limits = ZLimits {
                min: percentile(min_image.pixels(), LOWER_PERCENTILE),
                max: percentile(min_image.pixels(), UPPER_PERCENTILE),
            };
            (limits, limits.midpoint())
        }
    }
}

/// Median-depth slice used as the origin of the fit.
pub(crate) struct Pivot {
    pub shift_x: f64,
    pub shift_y: Vec<f64>,
}

impl Pivot {
    pub fn new(stack: &SortedStack, q: &[f64]) -> Self {
        let mid = (stack.depth() - 1) / 2;
        Self {
            shift_x: q[mid],
            shift_y: stack.profiles().map(|profile| profile[mid]).collect(),
        }
    }
}

/// Mean over pixels of `sqrt(sum r^2 / (depth - 2))`.
pub(crate) fn mean_standard_error(stack: &SortedStack, q: &[f64], v: &[f64], b: &[f64]) -> f64 {
    let dof = stack.depth().saturating_sub(2).max(1) as f64;
    let errors: Vec<f64> = stack
        .values()
        .par_chunks(stack.depth())
        .zip(v.par_iter().zip(b.par_iter()))
        .map(|(profile, (&vp, &bp))| {
            let sum_sq: f64 = q
                .iter()
                .zip(profile)
                .map(|(&qz, &sz)| {
                    let r = qz * vp + bp - sz;
                    r * r
                })
                .sum();
            (sum_sq / dof).sqrt()
        })
        .collect();
    mean(&errors).max(MIN_CAUCHY_WIDTH)
}

/// Moves `b` back out of pivot space, derives `z` and upsamples both surfaces.
fn assemble_descriptor(params: &Parameters, pivot: &Pivot, v: &[f64], b: &[f64], zx: f64) -> ModelDescriptor {
    let working = params.working_size;
    let z: Vec<f64> = v
        .iter()
        .zip(b)
        .zip(&pivot.shift_y)
        .map(|((&vp, &bp), &psy)| psy + bp - pivot.shift_x * vp + zx * vp)
        .collect();

    let v_small = Buffer2::new(working.width, working.height, v.to_vec());
    let z_small = Buffer2::new(working.width, working.height, z);
    let ImageSize { width, height } = params.image_size;

    ModelDescriptor {
        image_size: params.image_size,
        working_size: working,
        v: resample::resize(&v_small, width, height, ResampleKernel::Bilinear),
        z: resample::resize(&z_small, width, height, ResampleKernel::Bilinear),
        v_small,
        z_small,
    }
}

fn log_phase(name: &str, result: &LbfgsResult) {
    if result.termination.is_converged() {
        tracing::info!(
            "{} fit: {} after {} iterations, {} evaluations, energy {:.6e}",
            name,
            result.termination,
            result.iterations,
            result.function_evals,
            result.f
        );
    } else {
        tracing::warn!(
            "{} fit did not converge: {} after {} iterations, {} evaluations, energy {:.6e}",
            name,
            result.termination,
            result.iterations,
            result.function_evals,
            result.f
        );
    }
}
