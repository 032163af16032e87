use super::cache::EvaluationCache;
use super::output::{check_for_errors, normalize_line_endings};
use super::runner::Simulator;
use super::template::{RunSettings, Template};
use super::workspace::{RunId, Workspace};
use crate::core::{OptimizeError, OutputMode, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

/// Cache checkpoint cadence used when none is configured.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 20;

/// Capability to turn a parameter vector into a raw simulator report.
pub trait Evaluator: Sync {
    fn evaluate(&self, vector: &[f64]) -> Result<String>;
}

/// Evaluates vectors by instantiating the template and running the
/// simulator, with every report kept in a persistent cache.
///
/// The cache sits behind one mutex shared by all worker threads. The lock is
/// never held while the simulator runs, and checkpoints are written under
/// it, so flushes never interleave.
pub struct SimulationEvaluator<S: Simulator> {
    template: Template,
    workspace: Workspace,
    simulator: S,
    cache: Mutex<EvaluationCache>,
    order: u32,
    checkpoint_interval: usize,
    simulations: AtomicUsize,
}

impl<S: Simulator> SimulationEvaluator<S> {
    pub fn new(
        template: Template,
        workspace: Workspace,
        simulator: S,
        cache: EvaluationCache,
        order: u32,
    ) -> Self {
        Self {
            template,
            workspace,
            simulator,
            cache: Mutex::new(cache),
            order,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            simulations: AtomicUsize::new(0),
        }
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Number of simulator launches so far (cache misses plus uncached runs).
    pub fn simulations(&self) -> usize {
        self.simulations.load(Ordering::Relaxed)
    }

    pub fn cache_len(&self) -> Result<usize> {
        Ok(self.lock_cache()?.len())
    }

    /// Write the cache to storage now.
    pub fn flush_cache(&self) -> Result<()> {
        self.lock_cache()?.flush()
    }

    /// Run the simulator regardless of the cache, e.g. to leave a
    /// file-output run of the optimum behind. The result is not cached.
    pub fn evaluate_uncached(
        &self,
        vector: &[f64],
        output_mode: OutputMode,
        run_id: &RunId,
    ) -> Result<String> {
        self.simulate(vector, output_mode, run_id)
    }

    fn lock_cache(&self) -> Result<MutexGuard<'_, EvaluationCache>> {
        self.cache
            .lock()
            .map_err(|e| OptimizeError::Solver(format!("Failed to lock cache: {}", e)))
    }

    fn check_bounds(&self, vector: &[f64]) -> Result<()> {
        for (param, &value) in self.template.parameters().iter().zip(vector) {
            if !param.is_within_bounds(value) {
                return Err(OptimizeError::Solver(format!(
                    "candidate value {} for '{}' is outside [{}, {}]",
                    value, param.name, param.min, param.max
                )));
            }
        }
        Ok(())
    }

    fn simulate(&self, vector: &[f64], output_mode: OutputMode, run_id: &RunId) -> Result<String> {
        let files = self.workspace.scratch(run_id);
        let settings = RunSettings {
            output_mode,
            order: self.order,
            output_file: &files.output,
        };
        let script = self.template.instantiate(vector, &settings)?;

        self.simulations.fetch_add(1, Ordering::Relaxed);
        let raw = self.simulator.run(&script, &files)?;
        let output = normalize_line_endings(&raw);

        if let Err(e) = check_for_errors(&output) {
            error!(run = %run_id, "simulator output:\n{}", output);
            return Err(e);
        }
        Ok(output)
    }
}

impl<S: Simulator> Evaluator for SimulationEvaluator<S> {
    fn evaluate(&self, vector: &[f64]) -> Result<String> {
        if vector.len() != self.template.parameters().len() {
            return Err(OptimizeError::Solver(format!(
                "expected {} parameter values, got {}",
                self.template.parameters().len(),
                vector.len()
            )));
        }

        if let Some(hit) = self.lock_cache()?.get(vector) {
            return Ok(hit.to_string());
        }
        self.check_bounds(vector)?;

        let run_id = RunId::current_worker();
        let output = self.simulate(vector, OutputMode::None, &run_id)?;

        let mut cache = self.lock_cache()?;
        cache.insert(vector, output.clone());
        if cache.unsaved() >= self.checkpoint_interval {
            debug!(entries = cache.len(), "checkpointing evaluation cache");
            cache.flush()?;
        }
        Ok(output)
    }
}

impl<S: Simulator> Drop for SimulationEvaluator<S> {
    fn drop(&mut self) {
        let cache = match self.cache.get_mut() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        if cache.unsaved() > 0 {
            if let Err(e) = cache.flush() {
                warn!("failed to save evaluation cache: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::workspace::ScratchFiles;

    const TEMPLATE: &str = "\
output_mode := 1;
order := 3;
out_filename := 'x.txt';
radius := 0.5; {{PARAM min=0|max=1|bias=0|unit=m}}
";

    /// Scripted simulator: echoes the instantiated radius line into a report.
    struct EchoSimulator {
        calls: AtomicUsize,
        report: fn(&str) -> String,
    }

    impl EchoSimulator {
        fn new(report: fn(&str) -> String) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                report,
            }
        }
    }

    impl Simulator for EchoSimulator {
        fn run(&self, script: &str, _files: &ScratchFiles) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((self.report)(script))
        }
    }

    fn ok_report(script: &str) -> String {
        let radius = script
            .lines()
            .find(|l| l.starts_with("radius"))
            .unwrap_or_default()
            .to_string();
        format!("{}\r\n\r\nalgebraic resolution:\r\n", radius)
    }

    fn evaluator(sim: EchoSimulator, cache: EvaluationCache) -> SimulationEvaluator<EchoSimulator> {
        let template = Template::parse("beamline", TEMPLATE).unwrap();
        SimulationEvaluator::new(template, Workspace::new("generated", "beamline"), sim, cache, 5)
    }

    #[test]
    fn second_request_is_served_from_cache() {
        let eval = evaluator(EchoSimulator::new(ok_report), EvaluationCache::in_memory());
        let first = eval.evaluate(&[0.25]).unwrap();
        let second = eval.evaluate(&[0.25]).unwrap();
        assert_eq!(first, second);
        assert_eq!(eval.simulator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(eval.simulations(), 1);

        eval.evaluate(&[0.5]).unwrap();
        assert_eq!(eval.simulator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(eval.cache_len().unwrap(), 2);
    }

    #[test]
    fn output_is_normalized_and_instantiated() {
        let eval = evaluator(EchoSimulator::new(ok_report), EvaluationCache::in_memory());
        let output = eval.evaluate(&[0.75]).unwrap();
        assert_eq!(
            output,
            "radius := 0.75; {{PARAM min=0|max=1|bias=0|unit=m}}\nalgebraic resolution:\n"
        );
    }

    #[test]
    fn error_markers_fail_and_are_not_cached() {
        let eval = evaluator(
            EchoSimulator::new(|_| "### ERROR: element too long\n".to_string()),
            EvaluationCache::in_memory(),
        );
        assert!(eval.evaluate(&[0.1]).unwrap_err().is_simulation());
        assert!(eval.evaluate(&[0.1]).unwrap_err().is_simulation());
        assert_eq!(eval.simulator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(eval.cache_len().unwrap(), 0);
    }

    #[test]
    fn out_of_bounds_vectors_are_rejected() {
        let eval = evaluator(EchoSimulator::new(ok_report), EvaluationCache::in_memory());
        assert!(eval.evaluate(&[1.5]).is_err());
        assert!(eval.evaluate(&[0.1, 0.2]).is_err());
        assert_eq!(eval.simulator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn checkpoints_every_interval_and_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beamline_cache.json");
        let cache = EvaluationCache::load(&path).unwrap();
        let eval = evaluator(EchoSimulator::new(ok_report), cache).with_checkpoint_interval(2);

        eval.evaluate(&[0.1]).unwrap();
        assert!(!path.exists());
        eval.evaluate(&[0.2]).unwrap();
        assert_eq!(EvaluationCache::load(&path).unwrap().len(), 2);

        eval.evaluate(&[0.3]).unwrap();
        assert_eq!(EvaluationCache::load(&path).unwrap().len(), 2);
        drop(eval);
        assert_eq!(EvaluationCache::load(&path).unwrap().len(), 3);
    }

    #[test]
    fn uncached_runs_bypass_the_cache() {
        let eval = evaluator(EchoSimulator::new(ok_report), EvaluationCache::in_memory());
        eval.evaluate(&[0.5]).unwrap();
        eval.evaluate_uncached(&[0.5], OutputMode::File, &RunId::named("optimal"))
            .unwrap();
        assert_eq!(eval.simulator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(eval.cache_len().unwrap(), 1);
    }
}
