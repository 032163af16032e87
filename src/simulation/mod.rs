pub mod cache;
pub mod evaluator;
pub mod output;
pub mod runner;
pub mod template;
pub mod workspace;

pub use cache::{CacheKey, EvaluationCache};
pub use evaluator::{Evaluator, SimulationEvaluator, DEFAULT_CHECKPOINT_INTERVAL};
pub use output::{check_for_errors, normalize_line_endings, parse_output};
pub use runner::{ExternalSimulator, Simulator};
pub use template::{RunSettings, Template};
pub use workspace::{RunId, ScratchFiles, Workspace};
