use super::*;
use crate::math::dot;

/// `0.5 Σ a_i (x_i - c_i)²` with curvatures spread over two orders of magnitude.
struct Quadratic {
    curvature: Vec<f64>,
    center: Vec<f64>,
}

impl Quadratic {
    fn new(n: usize) -> Self {
        Self {
            curvature: (0..n).map(|i| 1.0 + 99.0 * i as f64 / (n - 1) as f64).collect(),
            center: (0..n).map(|i| (i as f64 * 0.7).sin() * 3.0).collect(),
        }
    }

    fn max_curvature(&self) -> f64 {
        self.curvature.iter().copied().fold(0.0, f64::max)
    }
}

impl Objective for Quadratic {
    fn evaluate(&self, x: &[f64], grad: &mut [f64]) -> f64 {
        let mut f = 0.0;
        for i in 0..x.len() {
            let r = x[i] - self.center[i];
            f += 0.5 * self.curvature[i] * r * r;
            grad[i] = self.curvature[i] * r;
        }
        f
    }
}

fn rosenbrock(x: &[f64], g: &mut [f64]) -> f64 {
    let (a, b) = (x[0], x[1]);
    g[0] = -400.0 * a * (b - a * a) - 2.0 * (1.0 - a);
    g[1] = 200.0 * (b - a * a);
    100.0 * (b - a * a).powi(2) + (1.0 - a).powi(2)
}

fn tight_config() -> LbfgsConfig {
    LbfgsConfig {
        progress_tolerance: 1e-20,
        ..Default::default()
    }
}

/// Fixed-step steepest descent; returns iterations needed to reach `tol`.
fn gradient_descent_iterations<O: Objective>(objective: &O, x0: &[f64], step: f64, tol: f64) -> usize {
    let mut x = x0.to_vec();
    let mut g = vec![0.0; x.len()];
    for iteration in 0..1_000_000 {
        objective.evaluate(&x, &mut g);
        if max_abs(&g) <= tol {
            return iteration;
        }
        x.iter_mut().zip(&g).for_each(|(xi, gi)| *xi -= step * gi);
    }
    usize::MAX
}

#[test]
fn test_polyinterp_recovers_cubic_minimizer() {
    // p(x) = x^3 - 3x, local minimum at 1
    let t = polyinterp((0.0, 0.0, -3.0), (2.0, 2.0, 9.0), 0.0, 2.0);
    assert!((t - 1.0).abs() < 1e-12, "t = {t}");
    // argument order does not matter
    let t = polyinterp((2.0, 2.0, 9.0), (0.0, 0.0, -3.0), 0.0, 2.0);
    assert!((t - 1.0).abs() < 1e-12, "t = {t}");
}

#[test]
fn test_polyinterp_recovers_quadratic_minimizer() {
    // (x - 0.3)^2 sampled at 0 and 1
    let t = polyinterp((0.0, 0.09, -0.6), (1.0, 0.49, 1.4), 0.0, 1.0);
    assert!((t - 0.3).abs() < 1e-12, "t = {t}");
}

#[test]
fn test_polyinterp_clamps_to_bounds() {
    let t = polyinterp((0.0, 0.09, -0.6), (1.0, 0.49, 1.4), 0.5, 10.0);
    assert_eq!(t, 0.5);
}

#[test]
fn test_polyinterp_without_real_minimizer_returns_midpoint() {
    // steep descent at both ends with a negative discriminant
    let t = polyinterp((0.0, 0.0, -1.0), (1.0, -10.0, -30.0), 1.01, 10.0);
    let d1 = -1.0 - 30.0 - 3.0 * (0.0 - -10.0) / (0.0 - 1.0);
    assert!(d1 * d1 - 30.0 < 0.0, "test setup must give a negative discriminant");
    assert_eq!(t, (1.01 + 10.0) / 2.0);
}

#[test]
fn test_history_rejects_non_positive_curvature() {
    let mut history = LbfgsHistory::new(3);
    assert!(!history.push(vec![1.0, 0.0], vec![-1.0, 0.0]));
    assert!(!history.push(vec![1.0, 0.0], vec![0.0, 5.0]));
    assert_eq!(history.len(), 0);
    assert_eq!(history.h_diag(), 1.0);

    assert!(history.push(vec![1.0, 0.0], vec![2.0, 0.0]));
    assert_eq!(history.len(), 1);
    assert_eq!(history.h_diag(), 0.5);
}

#[test]
fn test_history_is_bounded() {
    let mut history = LbfgsHistory::new(2);
    for k in 1..=5 {
        assert!(history.push(vec![k as f64, 0.0], vec![k as f64, 1.0]));
    }
    assert_eq!(history.len(), 2);
}

#[test]
fn test_history_direction_matches_inverse_hessian_on_diagonal_quadratic() {
    // pairs from a diagonal Hessian diag(2, 8): y = H s
    let mut history = LbfgsHistory::new(10);
    history.push(vec![1.0, 0.0], vec![2.0, 0.0]);
    history.push(vec![0.0, 1.0], vec![0.0, 8.0]);
    let g = [4.0, 16.0];
    let mut d = [0.0; 2];
    history.direction(&g, &mut d);
    assert!((d[0] + 2.0).abs() < 1e-12, "{d:?}");
    assert!((d[1] + 2.0).abs() < 1e-12, "{d:?}");
}

#[test]
fn test_lbfgs_beats_gradient_descent_on_quadratic() {
    let quadratic = Quadratic::new(30);
    let x0 = vec![0.0; 30];
    let config = tight_config();

    let result = minimize(&quadratic, x0.clone(), &config);
    assert_eq!(result.termination, Termination::Optimality);

    let mut g = vec![0.0; 30];
    quadratic.evaluate(&result.x, &mut g);
    assert!(max_abs(&g) <= config.optimality_tolerance);
    for (x, c) in result.x.iter().zip(&quadratic.center) {
        assert!((x - c).abs() <= 1e-5);
    }

    let gd = gradient_descent_iterations(
        &quadratic,
        &x0,
        1.0 / quadratic.max_curvature(),
        config.optimality_tolerance,
    );
    assert!(
        result.iterations < gd,
        "L-BFGS took {} iterations, gradient descent {}",
        result.iterations,
        gd
    );
}

#[test]
fn test_lbfgs_solves_rosenbrock() {
    let config = LbfgsConfig {
        progress_tolerance: 1e-12,
        optimality_tolerance: 1e-8,
        ..Default::default()
    };
    let result = minimize(&rosenbrock, vec![-1.2, 1.0], &config);
    assert!(result.termination.is_converged(), "{}", result.termination);
    assert!((result.x[0] - 1.0).abs() < 1e-4, "{:?}", result.x);
    assert!((result.x[1] - 1.0).abs() < 1e-4, "{:?}", result.x);
    assert!(result.f < 1e-8);
}

#[test]
fn test_accepted_steps_satisfy_armijo() {
    let config = LbfgsConfig::default();
    for start in [[-1.2, 1.0], [0.5, -0.5], [2.0, 2.0], [-0.3, 0.8]] {
        let mut g = [0.0; 2];
        let f = rosenbrock(&start, &mut g);
        let d = [-g[0], -g[1]];
        let gtd = dot(&g, &d);
        for t0 in [1.0, 1e-3, 10.0] {
            let ls = wolfe_line_search(&rosenbrock, &start, t0, &d, f, &g, gtd, &config);
            assert!(
                ls.f <= f + config.c1 * ls.step * gtd,
                "start {start:?} t0 {t0}: f {} -> {} with step {}",
                f,
                ls.f,
                ls.step
            );
            let mut check = [0.0; 2];
            let moved = [start[0] + ls.step * d[0], start[1] + ls.step * d[1]];
            assert_eq!(rosenbrock(&moved, &mut check), ls.f);
            assert!(ls.evaluations >= 1);
        }
    }
}

fn parabola(x: &[f64], grad: &mut [f64]) -> f64 {
    let r = x[0] - 10.0;
    grad[0] = r;
    0.5 * r * r
}

#[test]
fn test_line_search_returns_best_trial_when_expansion_is_capped() {
    let config = LbfgsConfig {
        max_line_search_iterations: 1,
        ..Default::default()
    };
    let start = [0.0];
    let mut g = [0.0];
    let f = parabola(&start, &mut g);
    let d = [-g[0]];
    let gtd = dot(&g, &d);

    let ls = wolfe_line_search(&parabola, &start, 1e-3, &d, f, &g, gtd, &config);
    assert_eq!(ls.evaluations, 2);
    assert!(ls.step > 1e-3 && ls.step <= 1e-2, "step {}", ls.step);
    assert!(ls.f < f);
    assert_eq!(ls.grad.len(), 1);
}

#[test]
fn test_energy_never_increases_across_iterations() {
    let config = LbfgsConfig::default();
    let mut previous = f64::INFINITY;
    for max_iterations in 1..20 {
        let result = minimize(
            &rosenbrock,
            vec![-1.2, 1.0],
            &LbfgsConfig {
                max_iterations,
                ..config.clone()
            },
        );
        assert!(result.f <= previous + 1e-12);
        previous = result.f;
    }
}

#[test]
fn test_initial_optimum_returns_immediately() {
    let quadratic = Quadratic::new(5);
    let result = minimize(&quadratic, quadratic.center.clone(), &LbfgsConfig::default());
    assert_eq!(result.termination, Termination::InitialPointOptimal);
    assert_eq!(result.iterations, 0);
    assert_eq!(result.function_evals, 1);
    assert_eq!(result.x, quadratic.center);
}

#[test]
fn test_iteration_cap_is_reported() {
    let quadratic = Quadratic::new(30);
    let config = LbfgsConfig {
        max_iterations: 2,
        ..tight_config()
    };
    let result = minimize(&quadratic, vec![0.0; 30], &config);
    assert_eq!(result.termination, Termination::Iterations);
    assert!(!result.termination.is_converged());
    assert_eq!(result.iterations, 2);

    let mut g = vec![0.0; 30];
    assert!(result.f < quadratic.evaluate(&vec![0.0; 30], &mut g));
}

#[test]
fn test_function_evaluation_cap_is_reported() {
    let quadratic = Quadratic::new(30);
    let config = LbfgsConfig {
        max_function_evals: 3,
        ..tight_config()
    };
    let result = minimize(&quadratic, vec![0.0; 30], &config);
    assert_eq!(result.termination, Termination::FunctionEvaluations);
    assert!(result.function_evals >= 3);
}

#[test]
fn test_termination_messages() {
    assert_eq!(
        Termination::Optimality.to_string(),
        "optimality condition below optimality tolerance"
    );
    assert_eq!(
        Termination::Iterations.to_string(),
        "reached maximum number of iterations"
    );
}
