pub mod callback;
pub mod problem;
pub mod sampling;
pub mod solvers;

pub use callback::{DesignOptimizationCallback, IterationResult};
pub use problem::DesignProblem;
pub use sampling::initial_sample;
pub use solvers::{select_solver, DescentOptimizer, EvolutionOptimizer, SearchSettings, SimplexOptimizer};
pub use solvers::{OptimizationCallback, Problem, Solver, SolverResult};
