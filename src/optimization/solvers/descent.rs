use super::traits::{clamp_params, OptimizationCallback, Problem, Solver, SolverResult};
use crate::core::Result;
use tracing::debug;

/// Projected gradient descent with finite-difference gradients, Armijo line
/// search and learning rate adaptation.
///
/// Works in range-normalized coordinates so parameters with very different
/// scales move comparably. Every evaluated point stays inside the bounds:
/// the difference stencil turns one-sided at a bound and every step is
/// projected back onto the box.
pub struct DescentOptimizer {
    max_iter: u32,
    precision: f64,
    learning_rate: f64,
    min_learning_rate: f64,
    max_learning_rate: f64,
    armijo_c: f64,         // Armijo condition parameter
    backtrack_factor: f64, // Line search backtracking
    increase_factor: f64,  // Learning rate increase when successful
    fd_step: f64,          // Difference step as a fraction of each range
}

impl DescentOptimizer {
    pub fn new(max_iter: u32, precision: f64) -> Self {
        Self {
            max_iter,
            precision,
            learning_rate: 0.1,
            min_learning_rate: 1e-6,
            max_learning_rate: 1.0,
            armijo_c: 1e-4,
            backtrack_factor: 0.5,
            increase_factor: 1.2,
            fd_step: 1e-6,
        }
    }

    /// Gradient with respect to range-normalized coordinates.
    fn compute_gradient(
        &self,
        problem: &dyn Problem,
        params: &[f64],
        cost: f64,
        gradient: &mut [f64],
        cost_evals: &mut usize,
    ) -> Result<()> {
        let bounds = problem.bounds();
        let mut shifted = params.to_vec();

        for i in 0..params.len() {
            let (min, max) = bounds[i];
            let h = self.fd_step * (max - min);
            if h <= 0.0 {
                gradient[i] = 0.0;
                continue;
            }

            let can_up = params[i] + h <= max;
            let can_down = params[i] - h >= min;
            let mut sample = |value: f64| -> Result<f64> {
                shifted[i] = value;
                let c = problem.cost(&shifted);
                shifted[i] = params[i];
                *cost_evals += 1;
                c
            };

            let g = match (can_up, can_down) {
                (true, true) => {
                    let c_plus = sample(params[i] + h)?;
                    let c_minus = sample(params[i] - h)?;
                    (c_plus - c_minus) / (2.0 * self.fd_step)
                }
                (true, false) => (sample(params[i] + h)? - cost) / self.fd_step,
                (false, true) => (cost - sample(params[i] - h)?) / self.fd_step,
                (false, false) => 0.0,
            };

            // Rejected neighbours carry no slope information
            gradient[i] = if g.is_finite() { g } else { 0.0 };
        }
        Ok(())
    }

    /// Armijo line search with backtracking. Returns the accepted step, the
    /// new point and its cost, or `None` if no step decreases the cost.
    fn line_search(
        &self,
        problem: &dyn Problem,
        params: &[f64],
        gradient: &[f64],
        current_cost: f64,
        cost_evals: &mut usize,
    ) -> Result<Option<(f64, Vec<f64>, f64)>> {
        let bounds = problem.bounds();
        let mut alpha = self.learning_rate;
        let grad_norm_sq: f64 = gradient.iter().map(|&g| g * g).sum();

        // Try up to 10 backtracking steps
        for _ in 0..10 {
            let mut new_params = params.to_vec();
            for (i, p) in new_params.iter_mut().enumerate() {
                let (min, max) = bounds[i];
                *p -= alpha * gradient[i] * (max - min);
            }
            clamp_params(&mut new_params, bounds);

            let new_cost = problem.cost(&new_params)?;
            *cost_evals += 1;

            // Armijo condition: sufficient decrease
            if new_cost < current_cost
                && new_cost <= current_cost - self.armijo_c * alpha * grad_norm_sq
            {
                return Ok(Some((alpha, new_params, new_cost)));
            }

            alpha *= self.backtrack_factor;
            if alpha < self.min_learning_rate {
                break;
            }
        }
        Ok(None)
    }
}

impl Solver for DescentOptimizer {
    fn name(&self) -> &str {
        "LocalDescent"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverResult> {
        let n = problem.num_params();
        let bounds = problem.bounds();

        let mut params = problem.initial_params().to_vec();
        clamp_params(&mut params, bounds);
        let mut gradient = vec![0.0; n];

        let mut cost = problem.cost(&params)?;
        let mut cost_evals = 1;
        let mut grad_evals = 0;
        let mut consecutive_improvements = 0;

        for iter in 0..self.max_iter {
            callback.on_iteration(iter + 1, &params, cost)?;

            if callback.should_stop() {
                return Ok(finish(true, "Stopped by callback", iter + 1, params, cost, cost_evals, grad_evals));
            }

            self.compute_gradient(problem, &params, cost, &mut gradient, &mut cost_evals)?;
            grad_evals += 1;

            let grad_norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
            if grad_norm < self.precision {
                return Ok(finish(
                    cost.is_finite(),
                    "Converged: gradient vanished",
                    iter + 1,
                    params,
                    cost,
                    cost_evals,
                    grad_evals,
                ));
            }

            let Some((alpha, next, next_cost)) =
                self.line_search(problem, &params, &gradient, cost, &mut cost_evals)?
            else {
                return Ok(finish(
                    cost.is_finite(),
                    "Converged: no descent step within bounds",
                    iter + 1,
                    params,
                    cost,
                    cost_evals,
                    grad_evals,
                ));
            };

            let improvement = cost - next_cost;
            debug!(iteration = iter + 1, alpha, improvement, "descent step");
            params = next;
            cost = next_cost;

            // Adapt learning rate based on progress
            if alpha >= self.learning_rate {
                consecutive_improvements += 1;
                if consecutive_improvements >= 3 {
                    self.learning_rate =
                        (self.learning_rate * self.increase_factor).min(self.max_learning_rate);
                }
            } else {
                consecutive_improvements = 0;
                self.learning_rate = alpha.max(self.min_learning_rate);
            }

            if improvement < self.precision * (1.0 + cost.abs()) {
                return Ok(finish(
                    true,
                    "Converged: improvement below precision",
                    iter + 1,
                    params,
                    cost,
                    cost_evals,
                    grad_evals,
                ));
            }
        }

        Ok(finish(false, "Max iterations reached", self.max_iter, params, cost, cost_evals, grad_evals))
    }
}

fn finish(
    success: bool,
    message: &str,
    iterations: u32,
    params: Vec<f64>,
    cost: f64,
    cost_evals: usize,
    grad_evals: usize,
) -> SolverResult {
    SolverResult {
        success,
        cost,
        iterations,
        message: message.to_string(),
        params,
        cost_evals,
        grad_evals,
    }
}
