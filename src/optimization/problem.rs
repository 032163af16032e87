use crate::core::{Constraint, EvaluationResult, OptimizeError, Parameter, Result};
use crate::optimization::solvers::traits::Problem;
use crate::simulation::{parse_output, Evaluator, Template};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, info};

/// Optics design problem: scores a parameter vector by the resolution the
/// simulator reports, the design penalty, and the constraint bands.
pub struct DesignProblem<'a> {
    evaluator: &'a dyn Evaluator,
    parameters: Vec<Parameter>,
    constraints: Vec<Constraint>,
    frugality: f64,
    initial: Vec<f64>,
    bounds: Vec<(f64, f64)>,
    evaluations: AtomicUsize,
}

impl<'a> DesignProblem<'a> {
    pub fn new(evaluator: &'a dyn Evaluator, template: &Template, frugality: f64) -> Self {
        Self {
            evaluator,
            parameters: template.parameters().to_vec(),
            constraints: template.constraints().to_vec(),
            frugality,
            initial: template.initial_guess(),
            bounds: template.bounds(),
            evaluations: AtomicUsize::new(0),
        }
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn frugality(&self) -> f64 {
        self.frugality
    }

    /// Number of objective evaluations requested so far, cached or not.
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Design penalty: rewards small biased parameters and in-band
    /// constraint observables, `+inf` when any observable leaves its band.
    pub fn penalty(&self, vector: &[f64], result: &EvaluationResult) -> Result<f64> {
        let mut penalty = 0.0;
        for (param, &value) in self.parameters.iter().zip(vector) {
            penalty -= param.bias * value.abs();
        }

        for constraint in &self.constraints {
            let value = result.observable(&constraint.name).ok_or_else(|| {
                OptimizeError::Simulation(format!(
                    "output does not report constraint '{}'",
                    constraint.name
                ))
            })?;
            if !constraint.is_satisfied(value) {
                penalty = f64::INFINITY;
            } else {
                penalty -= constraint.bias * value.abs();
            }
        }
        Ok(penalty)
    }

    /// Cost of `vector` given its parsed report. Smaller is better.
    pub fn objective(&self, vector: &[f64], result: &EvaluationResult) -> Result<f64> {
        if result.resolutions.is_empty() {
            return Err(OptimizeError::Simulation(
                "output reports no resolution measurements".to_string(),
            ));
        }
        let mean_resolution = result.mean_resolution();
        let penalty = self.penalty(vector, result)?;

        // A rejected candidate stays rejected even with zero frugality
        let cost = if penalty == f64::INFINITY {
            f64::INFINITY
        } else {
            self.frugality * penalty + 2.0 * mean_resolution.ln()
        };

        let values: Vec<String> = vector.iter().map(|v| format!("{}", v)).collect();
        info!(
            "[{}] -> {}*{:.6} + 2*log({:5.2} keV) = {:.6}",
            values.join(", "),
            self.frugality,
            penalty,
            mean_resolution,
            cost
        );
        Ok(cost)
    }
}

impl Problem for DesignProblem<'_> {
    fn cost(&self, params: &[f64]) -> Result<f64> {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let output = self.evaluator.evaluate(params)?;
        let scored = parse_output(&output).and_then(|result| self.objective(params, &result));
        if let Err(e) = &scored {
            error!("unusable simulator output ({}):\n{}", e, output);
        }
        scored
    }

    fn num_params(&self) -> usize {
        self.parameters.len()
    }

    fn initial_params(&self) -> &[f64] {
        &self.initial
    }

    fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }
}
