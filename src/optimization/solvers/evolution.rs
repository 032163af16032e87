use super::traits::{OptimizationCallback, Problem, Solver, SolverResult};
use crate::core::{OptimizeError, Result};
use crate::optimization::sampling::initial_sample;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::debug;

/// Differential evolution (best/1/bin) with deferred updating.
///
/// Each generation builds one trial per member from the current population,
/// scores all trials concurrently on a pool of `workers` threads, then
/// replaces every member its trial beats. The population is seeded by the
/// initial sample generator, `max(5, 3n)` members strong.
pub struct EvolutionOptimizer {
    max_iter: u32,
    precision: f64,
    workers: usize,
    population_factor: usize,
    mutation: (f64, f64), // dither range for the differential weight
    crossover: f64,
    atol: f64,
    seed: Option<u64>,
}

impl EvolutionOptimizer {
    pub fn new(max_iter: u32, precision: f64) -> Self {
        Self {
            max_iter,
            precision,
            workers: 4,
            population_factor: 3,
            mutation: (0.5, 1.0),
            crossover: 0.7,
            atol: 0.0,
            seed: None,
        }
    }

    /// Number of concurrent evaluations (0 = one per CPU)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn population_size(&self, num_params: usize) -> usize {
        (self.population_factor * num_params).max(5)
    }

    fn build_pool(&self) -> Result<ThreadPool> {
        let threads = if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        };
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("evolution-worker-{}", i))
            .build()
            .map_err(|e| OptimizeError::Solver(format!("failed to start worker pool: {}", e)))
    }

    /// Mutant from the best member and two others, binomially crossed with
    /// the target. Components that leave the box are redrawn uniformly.
    fn trial(
        &self,
        rng: &mut StdRng,
        population: &[Vec<f64>],
        target: usize,
        best: usize,
        bounds: &[(f64, f64)],
    ) -> Vec<f64> {
        let n = bounds.len();
        let mut others = index::sample(&mut *rng, population.len(), 3)
            .into_iter()
            .filter(|&i| i != target);
        let r1 = others.next().unwrap_or(best);
        let r2 = others.next().unwrap_or(best);

        let weight = rng.gen_range(self.mutation.0..self.mutation.1);
        let forced = rng.gen_range(0..n);
        let mut trial = population[target].clone();
        for k in 0..n {
            if k == forced || rng.gen_range(0.0..1.0) < self.crossover {
                trial[k] = population[best][k] + weight * (population[r1][k] - population[r2][k]);
            }
            let (min, max) = bounds[k];
            if !(min..=max).contains(&trial[k]) {
                trial[k] = rng.gen_range(min..=max);
            }
        }
        trial
    }

    fn converged(&self, costs: &[f64]) -> bool {
        let mean = costs.iter().sum::<f64>() / costs.len() as f64;
        let variance = costs.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / costs.len() as f64;
        variance.sqrt() <= self.atol + self.precision * mean.abs()
    }
}

fn evaluate_all(pool: &ThreadPool, problem: &dyn Problem, candidates: &[Vec<f64>]) -> Result<Vec<f64>> {
    pool.install(|| candidates.par_iter().map(|c| problem.cost(c)).collect())
}

fn best_index(costs: &[f64]) -> usize {
    costs
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

impl Solver for EvolutionOptimizer {
    fn name(&self) -> &str {
        "DifferentialEvolution"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverResult> {
        let n = problem.num_params();
        let bounds = problem.bounds();
        let pool = self.build_pool()?;
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let size = self.population_size(n);
        let mut population = initial_sample(problem.initial_params(), bounds, size);
        let mut costs = evaluate_all(&pool, problem, &population)?;
        let mut cost_evals = costs.len();
        let mut best = best_index(&costs);

        for iter in 0..self.max_iter {
            callback.on_iteration(iter + 1, &population[best], costs[best])?;

            if callback.should_stop() {
                return Ok(SolverResult {
                    success: true,
                    cost: costs[best],
                    iterations: iter + 1,
                    message: "Stopped by callback".into(),
                    params: population[best].clone(),
                    cost_evals,
                    grad_evals: 0,
                });
            }

            if self.converged(&costs) {
                return Ok(SolverResult {
                    success: costs[best].is_finite(),
                    cost: costs[best],
                    iterations: iter + 1,
                    message: "Converged: population spread below tolerance".into(),
                    params: population[best].clone(),
                    cost_evals,
                    grad_evals: 0,
                });
            }

            let trials: Vec<Vec<f64>> = (0..size)
                .map(|j| self.trial(&mut rng, &population, j, best, bounds))
                .collect();
            let trial_costs = evaluate_all(&pool, problem, &trials)?;
            cost_evals += trial_costs.len();

            let mut replaced = 0;
            for (j, (trial, cost)) in trials.into_iter().zip(trial_costs).enumerate() {
                if cost < costs[j] {
                    population[j] = trial;
                    costs[j] = cost;
                    replaced += 1;
                }
            }
            best = best_index(&costs);
            debug!(generation = iter + 1, replaced, best = costs[best], "evolution step");
        }

        // Max iterations reached
        Ok(SolverResult {
            success: false,
            cost: costs[best],
            iterations: self.max_iter,
            message: "Max iterations reached".into(),
            params: population[best].clone(),
            cost_evals,
            grad_evals: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::solvers::testing::{Quadratic, Recorder};

    #[test]
    fn finds_minimum_with_parallel_workers() {
        let problem = Quadratic::new(
            vec![0.3, -0.2, 0.6],
            vec![(-1.0, 1.0), (-1.0, 1.0), (0.0, 2.0)],
            vec![0.9, 0.9, 1.9],
        );
        let mut solver = EvolutionOptimizer::new(400, 1e-8).with_workers(3).with_seed(Some(7));
        let result = solver.solve(&problem, &mut Recorder::default()).unwrap();

        assert!(result.cost < 1e-3, "{:?} {}", result.params, result.cost);
        assert!(problem.all_in_bounds());
        assert_eq!(result.cost_evals, problem.evals());
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let run = || {
            let problem = Quadratic::new(vec![0.1], vec![(0.0, 1.0)], vec![0.5]);
            let mut solver = EvolutionOptimizer::new(20, 0.0).with_workers(2).with_seed(Some(11));
            solver.solve(&problem, &mut Recorder::default()).unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.params, b.params);
        assert_eq!(a.cost.to_bits(), b.cost.to_bits());
    }

    #[test]
    fn population_is_at_least_five() {
        let solver = EvolutionOptimizer::new(1, 1e-6);
        assert_eq!(solver.population_size(1), 5);
        assert_eq!(solver.population_size(4), 12);
    }

    #[test]
    fn flat_population_converges_at_once() {
        let problem = Quadratic::flat(vec![(0.0, 1.0)], vec![0.5]);
        let mut solver = EvolutionOptimizer::new(50, 1e-6).with_seed(Some(1));
        let result = solver.solve(&problem, &mut Recorder::default()).unwrap();
        assert!(result.success);
        assert_eq!(result.cost, 0.0);
        assert_eq!(result.iterations, 1);
        assert_eq!(problem.evals(), 5);
    }

    #[test]
    fn callback_budget_stops_the_search() {
        let problem = Quadratic::new(vec![0.1], vec![(0.0, 1.0)], vec![0.5]);
        let mut solver = EvolutionOptimizer::new(100, 0.0).with_seed(Some(3));
        let mut callback = Recorder::with_budget(4);
        let result = solver.solve(&problem, &mut callback).unwrap();
        assert_eq!(result.message, "Stopped by callback");
        assert_eq!(result.iterations, 4);
        assert_eq!(callback.costs.len(), 4);
    }

    #[test]
    fn worker_errors_abort_the_search() {
        let problem = Quadratic::failing(vec![(0.0, 1.0)], vec![0.5]);
        let mut solver = EvolutionOptimizer::new(10, 1e-6).with_workers(2);
        assert!(solver.solve(&problem, &mut Recorder::default()).unwrap_err().is_simulation());
    }
}
