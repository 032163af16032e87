mod config;

pub use config::OptimizerConfig;

use crate::core::{OptimizationResult, OutputMode, ParameterValue, Result};
use crate::optimization::{select_solver, DesignOptimizationCallback, DesignProblem, Problem};
use crate::simulation::{
    EvaluationCache, Evaluator, ExternalSimulator, RunId, SimulationEvaluator, Simulator, Template,
    Workspace,
};
use tracing::{info, warn};

/// Runs one design optimization: template, cache, search, cleanup.
pub struct Optimizer {
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Optimize with the configured external simulator program.
    pub fn optimize(&self) -> Result<OptimizationResult> {
        self.optimize_with(ExternalSimulator::new(self.config.simulator.clone()))
    }

    /// Optimize with any simulator implementation.
    ///
    /// The cache is flushed and leftover worker scratch files are removed
    /// whether or not the search succeeds.
    pub fn optimize_with<S: Simulator>(&self, simulator: S) -> Result<OptimizationResult> {
        let template = Template::load(&self.config.template)?;
        info!(
            template = template.name(),
            parameters = template.parameters().len(),
            constraints = template.constraints().len(),
            method = %self.config.method,
            "optimization start"
        );

        let workspace = Workspace::new(self.config.work_dir.clone(), template.name());
        workspace.ensure_exists()?;
        let cache = EvaluationCache::load(workspace.cache_path())?;

        let evaluator = SimulationEvaluator::new(
            template.clone(),
            workspace.clone(),
            simulator,
            cache,
            self.config.order,
        )
        .with_checkpoint_interval(self.config.checkpoint_interval);

        let outcome = self.search(&evaluator, &template);
        let flushed = evaluator.flush_cache();
        let cleaned = workspace.cleanup_scratch();
        let result = outcome?;
        flushed?;
        cleaned?;

        info!(
            success = result.success,
            cost = result.cost,
            iterations = result.iterations,
            evaluations = result.cost_evals,
            simulations = evaluator.simulations(),
            "optimization complete: {}",
            result.message
        );

        if self.config.render_optimum {
            let run_id = RunId::named(self.config.optimum_run_id());
            if let Err(e) = evaluator.evaluate_uncached(&result.best, OutputMode::File, &run_id) {
                warn!(run = %run_id, "final run of the optimum failed: {}", e);
            }
        }

        Ok(result)
    }

    fn search(&self, evaluator: &dyn Evaluator, template: &Template) -> Result<OptimizationResult> {
        let problem = DesignProblem::new(evaluator, template, self.config.frugality);

        let (mut solver, reason) = select_solver(
            self.config.method,
            problem.num_params(),
            &self.config.search_settings(),
        );
        info!(solver = solver.name(), "{}", reason);

        let mut callback = DesignOptimizationCallback::new(
            self.config.verbose,
            self.config.max_iterations,
            template.parameter_names(),
        );
        let result = solver.solve(&problem, &mut callback)?;

        if self.config.verbose {
            callback.log_summary(result.success, &result.message);
        }

        let parameters = template
            .parameters()
            .iter()
            .zip(&result.params)
            .map(|(def, &value)| ParameterValue {
                name: def.name.clone(),
                value,
                unit: def.unit.clone(),
            })
            .collect();

        Ok(OptimizationResult {
            success: result.success,
            cost: result.cost,
            iterations: result.iterations,
            cost_evals: problem.evaluations(),
            message: result.message,
            solver: solver.name().to_string(),
            best: result.params,
            parameters,
        })
    }
}
