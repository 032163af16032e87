mod descent;
mod evolution;
mod simplex;
#[cfg(test)]
pub(crate) mod testing;
pub mod traits;

pub use descent::DescentOptimizer;
pub use evolution::EvolutionOptimizer;
pub use simplex::SimplexOptimizer;
pub use traits::{OptimizationCallback, Problem, Solver, SolverResult};

use crate::core::Method;

/// Search settings shared by every strategy.
#[derive(Clone, Copy, Debug)]
pub struct SearchSettings {
    pub max_iterations: u32,
    pub precision: f64,
    pub workers: usize,
    pub seed: Option<u64>,
}

/// Build the configured search strategy, with a one-line description of it.
pub fn select_solver(method: Method, num_params: usize, settings: &SearchSettings) -> (Box<dyn Solver>, String) {
    match method {
        Method::LocalDescent => (
            Box::new(DescentOptimizer::new(settings.max_iterations, settings.precision)),
            format!("{} params → bounded local descent (finite-difference gradient)", num_params),
        ),
        Method::NelderMead => (
            Box::new(SimplexOptimizer::new(settings.max_iterations, settings.precision)),
            format!("{} params → Nelder-Mead (simplex of {})", num_params, num_params + 1),
        ),
        Method::DifferentialEvolution => {
            let de = EvolutionOptimizer::new(settings.max_iterations, settings.precision)
                .with_workers(settings.workers)
                .with_seed(settings.seed);
            let pop_size = de.population_size(num_params);
            (
                Box::new(de),
                format!(
                    "{} params → differential evolution (pop={}, workers={})",
                    num_params,
                    pop_size,
                    if settings.workers == 0 { num_cpus::get() } else { settings.workers }
                ),
            )
        }
    }
}
