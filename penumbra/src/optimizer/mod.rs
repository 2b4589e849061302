//! Limited-memory BFGS minimizer with a strong Wolfe line search.
//!
//! The outer loop is sequential: every iteration consumes the previous gradient and the
//! correction history. Parallelism belongs inside [`Objective::evaluate`].

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::math::{l1_norm, max_abs};

mod history;
mod line_search;

#[cfg(test)]
mod tests;

pub(crate) use history::LbfgsHistory;
pub(crate) use line_search::{LineSearchResult, polyinterp, wolfe_line_search};

/// Differentiable scalar function of a flat parameter vector.
pub trait Objective {
    /// Returns the energy at `x` and writes its gradient into `grad` (same length as `x`).
    fn evaluate(&self, x: &[f64], grad: &mut [f64]) -> f64;
}

impl<F> Objective for F
where
    F: Fn(&[f64], &mut [f64]) -> f64,
{
    fn evaluate(&self, x: &[f64], grad: &mut [f64]) -> f64 {
        self(x, grad)
    }
}

/// Limits and tolerances for [`minimize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbfgsConfig {
    pub max_iterations: usize,
    pub max_function_evals: usize,
    /// Threshold for step size, energy change and directional derivative.
    pub progress_tolerance: f64,
    /// Threshold on `max|∇E|`.
    pub optimality_tolerance: f64,
    /// Number of `(s, y)` pairs kept.
    pub corrections: usize,
    /// Sufficient decrease constant.
    pub c1: f64,
    /// Curvature constant.
    pub c2: f64,
    pub max_line_search_iterations: usize,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            max_function_evals: 1000,
            progress_tolerance: 1e-5,
            optimality_tolerance: 1e-5,
            corrections: 100,
            c1: 1e-4,
            c2: 0.9,
            max_line_search_iterations: 25,
        }
    }
}

/// Why the minimizer stopped. Every variant still yields the best point found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Termination {
    #[strum(serialize = "initial point satisfies the optimality condition")]
    InitialPointOptimal,
    #[strum(serialize = "directional derivative below progress tolerance")]
    DirectionalDerivative,
    #[strum(serialize = "optimality condition below optimality tolerance")]
    Optimality,
    #[strum(serialize = "step size below progress tolerance")]
    StepSize,
    #[strum(serialize = "function value changing by less than progress tolerance")]
    FunctionChange,
    #[strum(serialize = "reached maximum number of function evaluations")]
    FunctionEvaluations,
    #[strum(serialize = "reached maximum number of iterations")]
    Iterations,
}

impl Termination {
    /// False when a budget ran out before any convergence criterion was met.
    pub fn is_converged(self) -> bool {
        !matches!(self, Self::FunctionEvaluations | Self::Iterations)
    }
}

#[derive(Debug, Clone)]
pub struct LbfgsResult {
    pub x: Vec<f64>,
    pub f: f64,
    pub iterations: usize,
    pub function_evals: usize,
    pub termination: Termination,
}

/// Minimizes `objective` starting from `x0`.
pub fn minimize<O: Objective + ?Sized>(
    objective: &O,
    x0: Vec<f64>,
    config: &LbfgsConfig,
) -> LbfgsResult {
    let n = x0.len();
    let mut x = x0;
    let mut g = vec![0.0; n];
    let mut f = objective.evaluate(&x, &mut g);
    let mut function_evals = 1;

    if max_abs(&g) <= config.optimality_tolerance {
        tracing::debug!("Optimality condition met at the initial point");
        return LbfgsResult {
            x,
            f,
            iterations: 0,
            function_evals,
            termination: Termination::InitialPointOptimal,
        };
    }

    let mut history = LbfgsHistory::new(config.corrections);
    let mut d = vec![0.0; n];
    let mut g_old = vec![0.0; n];
    let mut t = 0.0;
    let mut iteration = 0;

    let termination = loop {
        if iteration == 0 {
            d.iter_mut().zip(&g).for_each(|(di, &gi)| *di = -gi);
        } else {
            let y: Vec<f64> = g.iter().zip(&g_old).map(|(a, b)| a - b).collect();
            let s: Vec<f64> = d.iter().map(|di| t * di).collect();
            if !history.push(s, y) {
                tracing::debug!("Skipping L-BFGS update at iteration {}", iteration);
            }
            history.direction(&g, &mut d);
        }
        g_old.copy_from_slice(&g);

        let gtd: f64 = g.iter().zip(&d).map(|(a, b)| a * b).sum();
        if gtd > -config.progress_tolerance {
            break Termination::DirectionalDerivative;
        }

        t = if iteration == 0 {
            (1.0 / l1_norm(&g)).min(1.0)
        } else {
            1.0
        };
        let f_old = f;

        let LineSearchResult {
            step,
            f: f_new,
            grad,
            evaluations,
        } = wolfe_line_search(objective, &x, t, &d, f, &g, gtd, config);
        t = step;
        f = f_new;
        g = grad;
        function_evals += evaluations;

        x.iter_mut().zip(&d).for_each(|(xi, &di)| *xi += t * di);
        iteration += 1;

        tracing::trace!(
            "iter {:4} evals {:5} step {:.3e} f {:.6e} opt {:.3e}",
            iteration,
            function_evals,
            t,
            f,
            max_abs(&g)
        );

        if max_abs(&g) <= config.optimality_tolerance {
            break Termination::Optimality;
        }
        if t * max_abs(&d) <= config.progress_tolerance {
            break Termination::StepSize;
        }
        if (f - f_old).abs() < config.progress_tolerance {
            break Termination::FunctionChange;
        }
        if function_evals >= config.max_function_evals {
            break Termination::FunctionEvaluations;
        }
        if iteration >= config.max_iterations {
            break Termination::Iterations;
        }
    };

    tracing::debug!(
        "L-BFGS stopped after {} iterations ({} evaluations): {}",
        iteration,
        function_evals,
        termination
    );

    LbfgsResult {
        x,
        f,
        iterations: iteration,
        function_evals,
        termination,
    }
}
