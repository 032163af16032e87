use crate::core::Result;

#[derive(Clone, Debug)]
pub struct SolverResult {
    pub success: bool,
    pub cost: f64,
    pub iterations: u32,
    pub message: String,
    pub params: Vec<f64>,
    pub cost_evals: usize,
    pub grad_evals: usize,
}

/// Callback interface for optimization progress
pub trait OptimizationCallback {
    /// Called at each iteration with the best parameters and cost so far
    fn on_iteration(&mut self, iteration: u32, params: &[f64], cost: f64) -> Result<()>;

    /// Check if optimization should stop early
    fn should_stop(&self) -> bool {
        false
    }
}

/// Core problem definition - just the essentials.
///
/// `cost` may be called from several worker threads at once and may return
/// `+inf` for rejected candidates.
pub trait Problem: Sync {
    /// Evaluate cost for given parameters (runs a simulation on cache miss)
    fn cost(&self, params: &[f64]) -> Result<f64>;

    /// Number of parameters
    fn num_params(&self) -> usize;

    /// Initial parameter values
    fn initial_params(&self) -> &[f64];

    /// Parameter bounds (min, max) for each parameter
    fn bounds(&self) -> &[(f64, f64)];
}

/// Search strategy interface - takes problem and callback
pub trait Solver {
    fn name(&self) -> &str;

    /// Search the bounded space, returning the best vector and cost found
    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverResult>;
}

#[inline]
pub(crate) fn clamp_params(params: &mut [f64], bounds: &[(f64, f64)]) {
    for (p, &(min, max)) in params.iter_mut().zip(bounds) {
        *p = p.clamp(min, max);
    }
}
