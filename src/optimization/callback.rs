use super::solvers::traits::OptimizationCallback;
use crate::core::Result;
use tracing::info;

/// Iteration result for tracking optimization progress
#[derive(Debug, Clone)]
pub struct IterationResult {
    pub params: Vec<f64>,
    pub cost: f64,
}

/// Callback for tracking and logging design optimization progress
pub struct DesignOptimizationCallback {
    verbose: bool,
    max_iterations: u32,
    iteration_count: u32,
    history: Vec<IterationResult>,
    param_names: Vec<String>,
}

impl DesignOptimizationCallback {
    pub fn new(verbose: bool, max_iterations: u32, param_names: Vec<String>) -> Self {
        Self {
            verbose,
            max_iterations,
            iteration_count: 0,
            history: Vec::new(),
            param_names,
        }
    }

    /// Get iteration history
    pub fn history(&self) -> &[IterationResult] {
        &self.history
    }

    pub fn iterations(&self) -> u32 {
        self.iteration_count
    }

    /// Log the best design and how the cost fell to it.
    pub fn log_summary(&self, success: bool, stop_reason: &str) {
        info!(
            success,
            improvements = self.history.len(),
            "search finished: {}",
            stop_reason
        );
        let Some(best) = self.history.last() else {
            info!("no design was scored");
            return;
        };
        for (name, value) in self.param_names.iter().zip(&best.params) {
            info!("  {} = {:.6e}", name, value);
        }
        let trajectory: Vec<String> = self.history.iter().map(|r| format!("{:.4}", r.cost)).collect();
        info!(cost = best.cost, "cost trajectory: {}", trajectory.join(" -> "));
    }
}

impl OptimizationCallback for DesignOptimizationCallback {
    fn on_iteration(&mut self, iteration: u32, params: &[f64], cost: f64) -> Result<()> {
        self.iteration_count = iteration;
        self.history.push(IterationResult {
            params: params.to_vec(),
            cost,
        });

        if self.verbose {
            info!(iteration, cost, "best so far");
        }
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.iteration_count >= self.max_iterations
    }
}
