use super::traits::{clamp_params, OptimizationCallback, Problem, Solver, SolverResult};
use crate::core::{OptimizeError, Result};
use crate::optimization::sampling::initial_sample;
use argmin::core::{CostFunction, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use std::cell::RefCell;
use std::collections::VecDeque;

/// Bounded Nelder-Mead direct search, seeded with an `n + 1` vertex simplex
/// from the initial sample generator.
///
/// argmin's simplex moves are unbounded, so every vertex is projected onto
/// the box before it is scored. The best projected vertex is tracked here
/// rather than read back from the executor state.
pub struct SimplexOptimizer {
    max_iter: u32,
    precision: f64,
}

impl SimplexOptimizer {
    pub fn new(max_iter: u32, precision: f64) -> Self {
        Self {
            max_iter,
            precision,
        }
    }
}

enum Halt {
    Stopped,
    Failed(OptimizeError),
}

struct Tracker<'c> {
    callback: &'c mut dyn OptimizationCallback,
    best: Option<(Vec<f64>, f64)>,
    improvements: u32,
    cost_evals: usize,
    /// Costs of the starting simplex, handed to argmin's initial scoring.
    primed: VecDeque<f64>,
    halt: Option<Halt>,
}

impl Tracker<'_> {
    /// Reports an improvement to the callback. Returns true once the
    /// callback asks to stop.
    fn record(&mut self, params: &[f64], cost: f64) -> Result<bool> {
        let improved = match &self.best {
            Some((_, best)) => cost < *best,
            None => true,
        };
        if improved {
            self.improvements += 1;
            self.callback.on_iteration(self.improvements, params, cost)?;
            self.best = Some((params.to_vec(), cost));
            return Ok(self.callback.should_stop());
        }
        Ok(false)
    }
}

/// Wrapper to make a design problem compatible with argmin
struct ArgminProblem<'p, 't, 'c> {
    problem: &'p dyn Problem,
    tracker: &'t RefCell<Tracker<'c>>,
}

impl CostFunction for ArgminProblem<'_, '_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let mut tracker = self.tracker.borrow_mut();
        // argmin scores the starting simplex without propagating errors
        if let Some(cost) = tracker.primed.pop_front() {
            return Ok(cost);
        }
        if tracker.halt.is_some() {
            return Err(argmin::core::Error::msg("search halted"));
        }

        let mut clamped = params.clone();
        clamp_params(&mut clamped, self.problem.bounds());
        let outcome = self.problem.cost(&clamped).and_then(|cost| {
            tracker.cost_evals += 1;
            tracker.record(&clamped, cost).map(|stop| (cost, stop))
        });
        match outcome {
            Ok((cost, false)) => Ok(cost),
            Ok((_, true)) => {
                tracker.halt = Some(Halt::Stopped);
                Err(argmin::core::Error::msg("stopped by callback"))
            }
            Err(e) => {
                let message = e.to_string();
                tracker.halt = Some(Halt::Failed(e));
                Err(argmin::core::Error::msg(message))
            }
        }
    }
}

fn stopped_result(tracker: Tracker<'_>) -> Result<SolverResult> {
    let (params, cost) = tracker.best.ok_or_else(|| {
        OptimizeError::Solver("simplex search evaluated no vertices".to_string())
    })?;
    Ok(SolverResult {
        success: cost.is_finite(),
        cost,
        iterations: tracker.improvements,
        message: "Stopped by callback".to_string(),
        params,
        cost_evals: tracker.cost_evals,
        grad_evals: 0,
    })
}

impl Solver for SimplexOptimizer {
    fn name(&self) -> &str {
        "NelderMead"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverResult> {
        let n = problem.num_params();
        let mut simplex = initial_sample(problem.initial_params(), problem.bounds(), n + 1);

        let mut tracker = Tracker {
            callback,
            best: None,
            improvements: 0,
            cost_evals: 0,
            primed: VecDeque::with_capacity(simplex.len()),
            halt: None,
        };
        for vertex in simplex.iter_mut() {
            clamp_params(vertex, problem.bounds());
            let cost = problem.cost(vertex)?;
            tracker.cost_evals += 1;
            tracker.primed.push_back(cost);
            if tracker.record(vertex, cost)? {
                return stopped_result(tracker);
            }
        }

        let solver: NelderMead<Vec<f64>, f64> = NelderMead::new(simplex)
            .with_sd_tolerance(self.precision)
            .map_err(|e| OptimizeError::Solver(format!("invalid simplex tolerance: {}", e)))?;

        let tracker = RefCell::new(tracker);
        let wrapped = ArgminProblem {
            problem,
            tracker: &tracker,
        };

        let max_iters = u64::from(self.max_iter);
        let outcome = Executor::new(wrapped, solver)
            .configure(|state| state.max_iters(max_iters))
            .run()
            .map(|res| {
                let state = res.state();
                let termination = state.get_termination_status();
                let converged = matches!(
                    termination,
                    TerminationStatus::Terminated(TerminationReason::SolverConverged)
                );
                (state.get_iter(), converged, termination.to_string())
            });

        let mut tracker = tracker.into_inner();
        match tracker.halt.take() {
            Some(Halt::Failed(e)) => return Err(e),
            Some(Halt::Stopped) => return stopped_result(tracker),
            None => {}
        }
        let (iterations, success, message) = outcome
            .map_err(|e| OptimizeError::Solver(format!("simplex search failed: {}", e)))?;

        let (params, cost) = tracker.best.ok_or_else(|| {
            OptimizeError::Solver("simplex search evaluated no vertices".to_string())
        })?;

        Ok(SolverResult {
            success: success && cost.is_finite(),
            cost,
            iterations: u32::try_from(iterations).unwrap_or(u32::MAX),
            message,
            params,
            cost_evals: tracker.cost_evals,
            grad_evals: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::solvers::testing::{Quadratic, Recorder};

    #[test]
    fn finds_interior_minimum() {
        let problem = Quadratic::new(vec![0.3, -0.2], vec![(-1.0, 1.0), (-1.0, 1.0)], vec![0.9, 0.9]);
        let mut solver = SimplexOptimizer::new(500, 1e-10);
        let mut callback = Recorder::default();
        let result = solver.solve(&problem, &mut callback).unwrap();

        assert!((result.params[0] - 0.3).abs() < 1e-3, "{:?}", result.params);
        assert!((result.params[1] + 0.2).abs() < 1e-3, "{:?}", result.params);
        assert!(result.cost < 1e-6);
        assert_eq!(result.cost_evals, problem.evals());
        // progress is reported on every improvement, so costs only decrease
        assert!(callback.costs.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn vertices_are_projected_onto_the_box() {
        let problem = Quadratic::new(vec![5.0, 0.5], vec![(0.0, 1.0), (0.0, 1.0)], vec![0.5, 0.5]);
        let mut solver = SimplexOptimizer::new(300, 1e-10);
        let result = solver.solve(&problem, &mut Recorder::default()).unwrap();
        assert!(problem.all_in_bounds());
        assert!((result.params[0] - 1.0).abs() < 1e-3, "{:?}", result.params);
    }

    #[test]
    fn flat_cost_reports_the_guess() {
        let problem = Quadratic::flat(vec![(0.0, 1.0)], vec![0.25]);
        let mut solver = SimplexOptimizer::new(50, 1e-6);
        let result = solver.solve(&problem, &mut Recorder::default()).unwrap();
        assert_eq!(result.cost, 0.0);
        assert_eq!(result.params, vec![0.25]);
        assert!(result.success);
    }

    #[test]
    fn callback_budget_stops_the_search() {
        let problem = Quadratic::new(vec![0.3], vec![(-1.0, 1.0)], vec![0.9]);
        let mut solver = SimplexOptimizer::new(500, 1e-12);
        let mut callback = Recorder::with_budget(2);
        let result = solver.solve(&problem, &mut callback).unwrap();
        assert_eq!(result.message, "Stopped by callback");
        assert_eq!(callback.costs.len(), 2);
        assert_eq!(result.cost, callback.costs[1]);
    }

    #[test]
    fn stop_while_scoring_the_starting_simplex() {
        let problem = Quadratic::new(vec![0.3], vec![(-1.0, 1.0)], vec![0.9]);
        let mut solver = SimplexOptimizer::new(500, 1e-12);
        let mut callback = Recorder::with_budget(1);
        let result = solver.solve(&problem, &mut callback).unwrap();
        assert_eq!(result.message, "Stopped by callback");
        assert_eq!(result.params, vec![0.9]);
        assert_eq!(problem.evals(), 1);
    }

    #[test]
    fn errors_during_iterations_are_returned() {
        // two vertices score fine, the first reflection fails
        let problem = Quadratic::failing_after(vec![0.3], vec![(-1.0, 1.0)], vec![0.9], 2);
        let mut solver = SimplexOptimizer::new(100, 1e-12);
        let err = solver.solve(&problem, &mut Recorder::default()).unwrap_err();
        assert!(err.is_simulation(), "{err}");
        assert_eq!(problem.evals(), 3);
    }

    #[test]
    fn simulation_errors_come_back_unchanged() {
        let problem = Quadratic::failing(vec![(0.0, 1.0)], vec![0.5]);
        let mut solver = SimplexOptimizer::new(10, 1e-6);
        let err = solver.solve(&problem, &mut Recorder::default()).unwrap_err();
        assert!(err.is_simulation(), "{err}");
    }
}
