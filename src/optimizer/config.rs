use crate::core::{Method, OptimizeError, Result};
use crate::optimization::SearchSettings;
use crate::simulation::DEFAULT_CHECKPOINT_INTERVAL;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_simulator() -> String {
    "cosy".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("generated")
}

fn default_order() -> u32 {
    6
}

fn default_frugality() -> f64 {
    0.1
}

fn default_max_iterations() -> u32 {
    1000
}

fn default_precision() -> f64 {
    1e-6
}

fn default_workers() -> usize {
    4
}

fn default_checkpoint_interval() -> usize {
    DEFAULT_CHECKPOINT_INTERVAL
}

fn default_true() -> bool {
    true
}

/// Settings for one optimization run, usually read from a JSON file.
///
/// ```json
/// { "template": "mergs_ion_optics.fox", "method": "differential-evolution", "workers": 8 }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Annotated script; its file stem names the cache and scratch files.
    pub template: PathBuf,
    #[serde(default = "default_simulator")]
    pub simulator: String,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Order of the transfer map calculation.
    #[serde(default = "default_order")]
    pub order: u32,
    /// Weight of the design penalty against the resolution term.
    #[serde(default = "default_frugality")]
    pub frugality: f64,
    #[serde(default)]
    pub method: Method,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_precision")]
    pub precision: f64,
    /// Concurrent evaluations for the population search (0 = one per CPU).
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Re-run the optimum with file graphics output when done.
    #[serde(default = "default_true")]
    pub render_optimum: bool,
    #[serde(default)]
    pub verbose: bool,
}

impl OptimizerConfig {
    pub fn new(template: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            simulator: default_simulator(),
            work_dir: default_work_dir(),
            order: default_order(),
            frugality: default_frugality(),
            method: Method::default(),
            max_iterations: default_max_iterations(),
            precision: default_precision(),
            workers: default_workers(),
            checkpoint_interval: default_checkpoint_interval(),
            seed: None,
            render_optimum: true,
            verbose: false,
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| OptimizeError::Configuration(format!("invalid optimizer config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| OptimizeError::io(path, e))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.order == 0 {
            return Err(OptimizeError::Configuration(
                "order must be at least 1".to_string(),
            ));
        }
        if !self.frugality.is_finite() {
            return Err(OptimizeError::Configuration(format!(
                "frugality must be finite, got {}",
                self.frugality
            )));
        }
        if !self.precision.is_finite() || self.precision < 0.0 {
            return Err(OptimizeError::Configuration(format!(
                "precision must be a non-negative number, got {}",
                self.precision
            )));
        }
        if self.checkpoint_interval == 0 {
            return Err(OptimizeError::Configuration(
                "checkpoint_interval must be at least 1".to_string(),
            ));
        }
        if self.simulator.trim().is_empty() {
            return Err(OptimizeError::Configuration(
                "simulator program is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Run identifier of the final file-output run, e.g. `optimal_6th_0.1x`.
    pub fn optimum_run_id(&self) -> String {
        format!("optimal_{}th_{}x", self.order, self.frugality)
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            max_iterations: self.max_iterations,
            precision: self.precision,
            workers: self.workers,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = OptimizerConfig::from_json_str(r#"{ "template": "mergs_ion_optics.fox" }"#).unwrap();
        assert_eq!(config, OptimizerConfig::new("mergs_ion_optics.fox"));
        assert_eq!(config.simulator, "cosy");
        assert_eq!(config.work_dir, PathBuf::from("generated"));
        assert_eq!(config.order, 6);
        assert_eq!(config.frugality, 0.1);
        assert_eq!(config.method, Method::NelderMead);
        assert_eq!(config.checkpoint_interval, 20);
        assert!(config.render_optimum);
        assert_eq!(config.optimum_run_id(), "optimal_6th_0.1x");
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let config = OptimizerConfig::from_json_str(
            r#"{
                "template": "beamline.fox",
                "method": "differential-evolution",
                "workers": 0,
                "seed": 42,
                "order": 3,
                "frugality": 0.5
            }"#,
        )
        .unwrap();
        assert_eq!(config.method, Method::DifferentialEvolution);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.search_settings().workers, 0);
        assert_eq!(config.optimum_run_id(), "optimal_3th_0.5x");
    }

    #[test]
    fn invalid_configs_are_rejected() {
        for text in [
            r#"{ "template": "a.fox", "order": 0 }"#,
            r#"{ "template": "a.fox", "checkpoint_interval": 0 }"#,
            r#"{ "template": "a.fox", "precision": -1.0 }"#,
            r#"{ "template": "a.fox", "method": "L-BFGS-B" }"#,
            r#"{ "template": "a.fox", "unknown": true }"#,
            r#"{ "order": 3 }"#,
        ] {
            let err = OptimizerConfig::from_json_str(text).unwrap_err();
            assert!(matches!(err, OptimizeError::Configuration(_)), "{text}: {err}");
        }
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("optimize.json");
        std::fs::write(&path, r#"{ "template": "x.fox", "max_iterations": 25 }"#).unwrap();
        assert_eq!(OptimizerConfig::from_json_file(&path).unwrap().max_iterations, 25);
        assert!(OptimizerConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
