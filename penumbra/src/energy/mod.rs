//! Energy of an illumination model against a sorted, pivot-shifted stack.
//!
//! The state vector is laid out as `[v (area), b (area), zx, zy]`: per-pixel gain, per-pixel
//! offset in pivot space, and the shared zero-light point.
//!
//! Terms:
//! - fit: robust residual of `Q_z * v + b` against each pixel's sorted profile
//! - vreg: multi-scale LoG smoothness of `v`
//! - zero: pull of every pixel's line towards the zero-light point
//! - barrier: keeps `zx` and `zy` inside the physical limits

mod barrier;
mod log_filter;


#[cfg(feature = "bench")]
pub mod bench;

use rayon::prelude::*;
use strum_macros::Display;

use crate::model::ZLimits;
use crate::optimizer::Objective;
use crate::stack::SortedStack;

pub(crate) use barrier::{BARRIER_RATE, BARRIER_WEIGHT, barrier};
pub(crate) use log_filter::LogFilterBank;

/// Depth the fit term is normalized to.
const FIT_NORMALIZATION_DEPTH: f64 = 200.0;

/// Which terms contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum EnergyTerms {
    /// Fit term only; `zx` and `zy` receive zero gradient.
    #[strum(serialize = "fit only")]
    FitOnly,
    #[strum(serialize = "all terms")]
    AllTerms,
}

/// Residual penalty of the fit term.
#[derive(Debug, Clone, Copy, PartialEq, Display)]
pub(crate) enum MEstimator {
    /// `r^2 / 2`
    #[strum(serialize = "least squares")]
    LeastSquares,
    /// `(w^2 / 2) * ln(1 + r^2 / w^2)`
    #[strum(serialize = "cauchy")]
    Cauchy { width: f64 },
}

/// Penalty `rho(r)` and its influence `psi(r) = rho'(r)`.
trait Response: Sync {
    fn rho_psi(&self, r: f64) -> (f64, f64);
}

struct LeastSquaresResponse;

impl Response for LeastSquaresResponse {
    #[inline]
    fn rho_psi(&self, r: f64) -> (f64, f64) {
        (0.5 * r * r, r)
    }
}

struct CauchyResponse {
    width_sq: f64,
}

impl Response for CauchyResponse {
    #[inline]
    fn rho_psi(&self, r: f64) -> (f64, f64) {
        let ratio = r * r / self.width_sq;
        (0.5 * self.width_sq * ratio.ln_1p(), r / (1.0 + ratio))
    }
}

/// Everything the energy reads besides the state vector. Immutable for a whole fit.
#[derive(Debug)]
pub(crate) struct EnergyContext<'a> {
    /// Sorted profiles minus each pixel's pivot value.
    pub stack: &'a SortedStack,
    /// Q minus its pivot value.
    pub q: &'a [f64],
    pub pivot_shift_x: f64,
    pub pivot_shift_y: &'a [f64],
    pub z_limits: ZLimits,
    /// Linear weight of the vreg term.
    pub lambda_vreg: f64,
    /// Linear weight of the zero-light term.
    pub lambda_zero: f64,
    pub filters: &'a LogFilterBank,
}

impl EnergyContext<'_> {
    #[inline]
    pub fn area(&self) -> usize {
        self.stack.size().pixel_count()
    }

    /// Length of the state vector.
    #[inline]
    pub fn state_len(&self) -> usize {
        2 * self.area() + 2
    }
}

/// Energy for one phase of the fit: a context plus the active terms and M-estimator.
pub(crate) struct EnergyObjective<'a> {
    context: &'a EnergyContext<'a>,
    terms: EnergyTerms,
    estimator: MEstimator,
}

/// Energy of each term at one state, unweighted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct EnergyBreakdown {
    pub fit: f64,
    pub vreg: f64,
    pub zero: f64,
    pub barrier: f64,
}

impl<'a> EnergyObjective<'a> {
    pub fn new(context: &'a EnergyContext<'a>, terms: EnergyTerms, estimator: MEstimator) -> Self {
        if let MEstimator::Cauchy { width } = estimator {
            assert!(width > 0.0, "Cauchy width must be positive");
        }
        Self {
            context,
            terms,
            estimator,
        }
    }

    /// Evaluates every term at `x`, writing the total gradient into `grad`.
    pub fn evaluate_terms(&self, x: &[f64], grad: &mut [f64]) -> EnergyBreakdown {
        let ctx = self.context;
        let area = ctx.area();
        assert_eq!(x.len(), ctx.state_len());
        assert_eq!(grad.len(), ctx.state_len());

        grad.fill(0.0);
        let (v, rest) = x.split_at(area);
        let (b, z) = rest.split_at(area);
        let (grad_v, rest) = grad.split_at_mut(area);
        let (grad_b, grad_z) = rest.split_at_mut(area);

        let fit = match self.estimator {
            MEstimator::LeastSquares => fit_term(ctx, &LeastSquaresResponse, v, b, grad_v, grad_b),
            MEstimator::Cauchy { width } => fit_term(
                ctx,
                &CauchyResponse {
                    width_sq: width * width,
                },
                v,
                b,
                grad_v,
                grad_b,
            ),
        };

        let mut breakdown = EnergyBreakdown {
            fit,
            ..Default::default()
        };
        if self.terms == EnergyTerms::FitOnly {
            return breakdown;
        }

        breakdown.vreg = ctx.filters.energy_and_gradient(v, grad_v, ctx.lambda_vreg);
        breakdown.zero = zero_light_term(ctx, v, b, z[0], z[1], grad_v, grad_b, grad_z);

        let (ex, gx) = barrier(z[0], ctx.z_limits.min, ctx.z_limits.max, BARRIER_RATE);
        let (ey, gy) = barrier(z[1], ctx.z_limits.min, ctx.z_limits.max, BARRIER_RATE);
        breakdown.barrier = ex + ey;
        grad_z[0] += BARRIER_WEIGHT * gx;
        grad_z[1] += BARRIER_WEIGHT * gy;

        breakdown
    }

    /// Weighted sum of the active terms.
    pub fn total(&self, breakdown: &EnergyBreakdown) -> f64 {
        match self.terms {
            EnergyTerms::FitOnly => breakdown.fit,
            EnergyTerms::AllTerms => {
                breakdown.fit
                    + self.context.lambda_vreg * breakdown.vreg
                    + self.context.lambda_zero * breakdown.zero
                    + BARRIER_WEIGHT * breakdown.barrier
            }
        }
    }
}

impl Objective for EnergyObjective<'_> {
    fn evaluate(&self, x: &[f64], grad: &mut [f64]) -> f64 {
        let breakdown = self.evaluate_terms(x, grad);
        self.total(&breakdown)
    }
}

/// Robust fit of every pixel's line `Q * v + b` to its sorted profile, normalized to
/// 200 slices. Gradients are written (not added) into `grad_v` and `grad_b`.
fn fit_term<R: Response>(
    ctx: &EnergyContext<'_>,
    response: &R,
    v: &[f64],
    b: &[f64],
    grad_v: &mut [f64],
    grad_b: &mut [f64],
) -> f64 {
    let q = ctx.q;
    let norm = FIT_NORMALIZATION_DEPTH / ctx.stack.depth() as f64;

    grad_v
        .par_iter_mut()
        .zip(grad_b.par_iter_mut())
        .zip(ctx.stack.values().par_chunks(ctx.stack.depth()))
        .zip(v.par_iter().zip(b.par_iter()))
        .map(|(((gv, gb), profile), (&vp, &bp))| {
            let mut energy = 0.0;
            let mut sum_v = 0.0;
            let mut sum_b = 0.0;
            for (&qz, &sz) in q.iter().zip(profile) {
                let r = qz * vp + bp - sz;
                let (rho, psi) = response.rho_psi(r);
                energy += rho;
                sum_v += qz * psi;
                sum_b += psi;
            }
            *gv = norm * sum_v;
            *gb = norm * sum_b;
            norm * energy
        })
        .sum()
}

/// `sum_p (v_p * px + b_p - py_p)^2` with `px = zx - psx`, `py_p = zy - psy_p`.
/// Gradients are added into the slices, scaled by the term weight.
#[allow(clippy::too_many_arguments)]
fn zero_light_term(
    ctx: &EnergyContext<'_>,
    v: &[f64],
    b: &[f64],
    zx: f64,
    zy: f64,
    grad_v: &mut [f64],
    grad_b: &mut [f64],
    grad_z: &mut [f64],
) -> f64 {
    let weight = ctx.lambda_zero;
    let px = zx - ctx.pivot_shift_x;

    let (energy, sum_v_res, sum_res) = grad_v
        .par_iter_mut()
        .zip(grad_b.par_iter_mut())
        .zip(v.par_iter().zip(b.par_iter()))
        .zip(ctx.pivot_shift_y.par_iter())
        .map(|(((gv, gb), (&vp, &bp)), &psy)| {
            let res = vp * px + bp - (zy - psy);
            *gv += weight * 2.0 * px * res;
            *gb += weight * 2.0 * res;
            (res * res, vp * res, res)
        })
        .reduce(
            || (0.0, 0.0, 0.0),
            |acc, item| (acc.0 + item.0, acc.1 + item.1, acc.2 + item.2),
        );

    grad_z[0] += weight * 2.0 * sum_v_res;
    grad_z[1] -= weight * 2.0 * sum_res;
    energy
}
