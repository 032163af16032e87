//! Analytic problems, a recording callback and log capture for tests.

use super::traits::{OptimizationCallback, Problem};
use crate::core::{OptimizeError, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

enum Shape {
    Bowl(Vec<f64>),
    Flat,
    Failing,
    /// Bowl that starts failing once the given number of evaluations is spent.
    FailsAfter(Vec<f64>, usize),
}

/// Sum of squared distances to a centre, or a constant, or an error.
pub struct Quadratic {
    shape: Shape,
    bounds: Vec<(f64, f64)>,
    initial: Vec<f64>,
    evals: AtomicUsize,
    out_of_bounds: AtomicBool,
}

impl Quadratic {
    fn with_shape(shape: Shape, bounds: Vec<(f64, f64)>, initial: Vec<f64>) -> Self {
        Self {
            shape,
            bounds,
            initial,
            evals: AtomicUsize::new(0),
            out_of_bounds: AtomicBool::new(false),
        }
    }

    pub fn new(center: Vec<f64>, bounds: Vec<(f64, f64)>, initial: Vec<f64>) -> Self {
        Self::with_shape(Shape::Bowl(center), bounds, initial)
    }

    pub fn flat(bounds: Vec<(f64, f64)>, initial: Vec<f64>) -> Self {
        Self::with_shape(Shape::Flat, bounds, initial)
    }

    pub fn failing(bounds: Vec<(f64, f64)>, initial: Vec<f64>) -> Self {
        Self::with_shape(Shape::Failing, bounds, initial)
    }

    pub fn failing_after(center: Vec<f64>, bounds: Vec<(f64, f64)>, initial: Vec<f64>, evals: usize) -> Self {
        Self::with_shape(Shape::FailsAfter(center, evals), bounds, initial)
    }

    pub fn evals(&self) -> usize {
        self.evals.load(Ordering::SeqCst)
    }

    /// True if every evaluated point was inside the bounds.
    pub fn all_in_bounds(&self) -> bool {
        !self.out_of_bounds.load(Ordering::SeqCst)
    }
}

impl Problem for Quadratic {
    fn cost(&self, params: &[f64]) -> Result<f64> {
        let spent = self.evals.fetch_add(1, Ordering::SeqCst);
        let inside = params
            .iter()
            .zip(&self.bounds)
            .all(|(&p, &(min, max))| p >= min && p <= max);
        if !inside {
            self.out_of_bounds.store(true, Ordering::SeqCst);
        }

        let bowl = |center: &[f64]| -> f64 {
            params
                .iter()
                .zip(center)
                .map(|(p, c)| (p - c) * (p - c))
                .sum()
        };
        match &self.shape {
            Shape::Bowl(center) => Ok(bowl(center)),
            Shape::FailsAfter(center, limit) if spent < *limit => Ok(bowl(center)),
            Shape::Flat => Ok(0.0),
            Shape::Failing | Shape::FailsAfter(..) => Err(OptimizeError::Simulation("### ERROR".to_string())),
        }
    }

    fn num_params(&self) -> usize {
        self.bounds.len()
    }

    fn initial_params(&self) -> &[f64] {
        &self.initial
    }

    fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }
}

/// Records every reported cost; optionally stops after a budget.
#[derive(Default)]
pub struct Recorder {
    pub costs: Vec<f64>,
    pub budget: Option<u32>,
    last: u32,
}

impl Recorder {
    pub fn with_budget(budget: u32) -> Self {
        Self {
            budget: Some(budget),
            ..Self::default()
        }
    }
}

impl OptimizationCallback for Recorder {
    fn on_iteration(&mut self, iteration: u32, _params: &[f64], cost: f64) -> Result<()> {
        self.last = iteration;
        self.costs.push(cost);
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.budget.is_some_and(|b| self.last >= b)
    }
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a subscriber that records every event as plain text.
pub fn logged<T>(f: impl FnOnce() -> T) -> (T, String) {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    let text = String::from_utf8_lossy(&captured.0.lock().unwrap()).into_owned();
    (value, text)
}
