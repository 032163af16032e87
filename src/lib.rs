//! Design parameter optimization for annotated COSY ion-optics scripts.
//!
//! A template script marks tunable declarations with `PARAM` annotations and
//! output observables with `CONSTRAINT` annotations. The optimizer fills the
//! parameters in, runs the external simulator, scores the report, and
//! searches the bounded parameter box for the lowest cost.
//!
//! ```no_run
//! use ionoptimizer::{Optimizer, OptimizerConfig};
//!
//! let config = OptimizerConfig::from_json_file("optimize.json")?;
//! let result = Optimizer::new(config)?.optimize()?;
//! for p in &result.parameters {
//!     println!("{} = {} {}", p.name, p.value, p.unit);
//! }
//! # Ok::<(), ionoptimizer::OptimizeError>(())
//! ```

pub mod core;
pub mod optimization;
pub mod optimizer;
pub mod simulation;

pub use crate::core::*;
pub use optimization::{initial_sample, DesignProblem, Problem, Solver, SolverResult};
pub use optimizer::{Optimizer, OptimizerConfig};
pub use simulation::{EvaluationCache, Evaluator, ExternalSimulator, Simulator, Template};
