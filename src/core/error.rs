use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while preparing or running an optimization.
#[derive(Error, Debug)]
pub enum OptimizeError {
    /// Template annotations or run settings are unusable. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The external simulator failed or produced output we cannot interpret.
    #[error("simulation error: {0}")]
    Simulation(String),

    #[error("expression error: {0}")]
    Expression(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache format error: {0}")]
    CacheFormat(#[from] serde_json::Error),

    #[error("solver error: {0}")]
    Solver(String),
}

impl OptimizeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures that originate in the external simulator.
    pub fn is_simulation(&self) -> bool {
        matches!(self, Self::Simulation(_))
    }
}

pub type Result<T> = std::result::Result<T, OptimizeError>;
