//! Bracketing and zoom line search for the strong Wolfe conditions.

use super::{LbfgsConfig, Objective};
use crate::math::{dot, max_abs};

/// Accepted trial point.
#[derive(Debug, Clone)]
pub(crate) struct LineSearchResult {
    pub step: f64,
    pub f: f64,
    pub grad: Vec<f64>,
    pub evaluations: usize,
}

#[derive(Debug, Clone)]
struct Trial {
    t: f64,
    f: f64,
    g: Vec<f64>,
    gtd: f64,
}

struct Evaluator<'a, O: Objective + ?Sized> {
    objective: &'a O,
    x: &'a [f64],
    d: &'a [f64],
    point: Vec<f64>,
    evaluations: usize,
}

impl<O: Objective + ?Sized> Evaluator<'_, O> {
    fn at(&mut self, t: f64) -> Trial {
        for ((p, &xi), &di) in self.point.iter_mut().zip(self.x).zip(self.d) {
            *p = xi + t * di;
        }
        let mut g = vec![0.0; self.x.len()];
        let f = self.objective.evaluate(&self.point, &mut g);
        self.evaluations += 1;
        let gtd = dot(&g, self.d);
        Trial { t, f, g, gtd }
    }
}

/// Minimizer of the cubic through two points with known derivatives, clamped to `[lo, hi]`.
///
/// Each point is `(position, value, derivative)`. Falls back to the middle of the bounds when
/// the cubic has no real stationary point.
pub(crate) fn polyinterp(a: (f64, f64, f64), b: (f64, f64, f64), lo: f64, hi: f64) -> f64 {
    let (first, second) = if a.0 <= b.0 { (a, b) } else { (b, a) };
    let (x1, f1, g1) = first;
    let (x2, f2, g2) = second;

    let d1 = g1 + g2 - 3.0 * (f1 - f2) / (x1 - x2);
    let disc = d1 * d1 - g1 * g2;
    if disc >= 0.0 {
        let d2 = disc.sqrt();
        let t = x2 - (x2 - x1) * ((g2 + d2 - d1) / (g2 - g1 + 2.0 * d2));
        if t.is_finite() {
            return t.max(lo).min(hi);
        }
    }
    (lo + hi) / 2.0
}

#[inline]
fn armijo_holds(trial: &Trial, f: f64, gtd: f64, c1: f64) -> bool {
    trial.f <= f + c1 * trial.t * gtd
}

/// Finds a step along `d` from `x` satisfying the strong Wolfe conditions.
///
/// `f`, `g`, `gtd` describe the start point; `t` is the first trial step.
#[allow(clippy::too_many_arguments)]
pub(crate) fn wolfe_line_search<O: Objective + ?Sized>(
    objective: &O,
    x: &[f64],
    t: f64,
    d: &[f64],
    f: f64,
    g: &[f64],
    gtd: f64,
    config: &LbfgsConfig,
) -> LineSearchResult {
    let mut eval = Evaluator {
        objective,
        x,
        d,
        point: vec![0.0; x.len()],
        evaluations: 0,
    };
    let start = Trial {
        t: 0.0,
        f,
        g: g.to_vec(),
        gtd,
    };

    let mut prev = start.clone();
    let mut new = eval.at(t);
    let mut iteration = 0;

    // expand until the minimum is bracketed
    let (mut bracket, mut done) = loop {
        if iteration >= config.max_line_search_iterations {
            break (vec![start, new], false);
        }
        if !armijo_holds(&new, f, gtd, config.c1) || (iteration > 1 && new.f >= prev.f) {
            break (vec![prev, new], false);
        }
        if new.gtd.abs() <= -config.c2 * gtd {
            break (vec![new], true);
        }
        if new.gtd >= 0.0 {
            break (vec![prev, new], false);
        }

        let min_step = new.t + 0.01 * (new.t - prev.t);
        let max_step = new.t * 10.0;
        let next_t = polyinterp(
            (prev.t, prev.f, prev.gtd),
            (new.t, new.f, new.gtd),
            min_step,
            max_step,
        );

        prev = new;
        new = eval.at(next_t);
        iteration += 1;
    };

    // zoom inside the bracket
    let d_norm = max_abs(d);
    let mut insufficient_progress = false;
    while !done && iteration < config.max_line_search_iterations {
        let (lo, hi) = if bracket[0].f <= bracket[1].f {
            (0, 1)
        } else {
            (1, 0)
        };

        let b_min = bracket[0].t.min(bracket[1].t);
        let b_max = bracket[0].t.max(bracket[1].t);
        let mut t = polyinterp(
            (bracket[0].t, bracket[0].f, bracket[0].gtd),
            (bracket[1].t, bracket[1].f, bracket[1].gtd),
            b_min,
            b_max,
        );

        // keep at least 10% of the interval away from its ends
        let width = b_max - b_min;
        if (b_max - t).min(t - b_min) / width < 0.1 {
            if insufficient_progress || t >= b_max || t <= b_min {
                t = if (t - b_max).abs() < (t - b_min).abs() {
                    b_max - 0.1 * width
                } else {
                    b_min + 0.1 * width
                };
                insufficient_progress = false;
            } else {
                insufficient_progress = true;
            }
        } else {
            insufficient_progress = false;
        }

        let trial = eval.at(t);
        iteration += 1;

        if !armijo_holds(&trial, f, gtd, config.c1) || trial.f >= bracket[lo].f {
            bracket[hi] = trial;
        } else {
            if trial.gtd.abs() <= -config.c2 * gtd {
                done = true;
            } else if trial.gtd * (bracket[hi].t - bracket[lo].t) >= 0.0 {
                bracket[hi] = bracket[lo].clone();
            }
            bracket[lo] = trial;
        }

        if !done && (bracket[0].t - bracket[1].t).abs() * d_norm < config.progress_tolerance {
            break;
        }
    }

    if iteration == config.max_line_search_iterations {
        tracing::debug!("Line search reached {} iterations", iteration);
    }

    let lo = if bracket.len() == 1 || bracket[0].f <= bracket[1].f {
        0
    } else {
        1
    };
    let best = bracket.swap_remove(lo);

    LineSearchResult {
        step: best.t,
        f: best.f,
        grad: best.g,
        evaluations: eval.evaluations,
    }
}
