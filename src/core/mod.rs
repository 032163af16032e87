pub mod error;
pub mod expression;
pub mod types;

pub use error::{OptimizeError, Result};
pub use expression::{evaluate_constant, CompiledExpression};
pub use types::*;
