use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered parameter values aligned one-to-one with the parsed parameter list.
pub type ParameterVector = Vec<f64>;

// ===== ANNOTATED VARIABLES =====

/// A tunable scalar input to the simulator, declared by a `PARAM` annotation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub default: f64,
    pub min: f64,
    pub max: f64,
    pub bias: f64,
    pub unit: String,
}

impl Parameter {
    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    pub fn is_within_bounds(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// A named simulator observable that must stay inside `[min, max]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub bias: f64,
    pub unit: String,
}

impl Constraint {
    pub fn is_satisfied(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

// ===== EVALUATION =====

/// Observables and resolution measurements parsed from one simulator report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvaluationResult {
    /// Named scalar observables in report order.
    pub observables: IndexMap<String, f64>,
    pub resolutions: Vec<f64>,
}

impl EvaluationResult {
    /// Root-mean-square of the resolution measurements.
    pub fn mean_resolution(&self) -> f64 {
        let sum_sq: f64 = self.resolutions.iter().map(|r| r * r).sum();
        (sum_sq / self.resolutions.len() as f64).sqrt()
    }

    pub fn observable(&self, name: &str) -> Option<f64> {
        self.observables.get(name).copied()
    }
}

/// Graphics mode written into the simulator script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    None,
    Gui,
    File,
}

impl OutputMode {
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Gui => 1,
            Self::File => 2,
        }
    }
}

/// Search strategy used by the optimizer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    /// Bounded finite-difference descent from the initial guess.
    LocalDescent,
    #[default]
    NelderMead,
    /// Population search evaluated by concurrent workers.
    DifferentialEvolution,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::LocalDescent => "local-descent",
            Self::NelderMead => "nelder-mead",
            Self::DifferentialEvolution => "differential-evolution",
        };
        f.write_str(name)
    }
}

// ===== RESULTS =====

/// A named parameter value in a finished result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParameterValue {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct OptimizationResult {
    pub success: bool,
    pub cost: f64,
    pub iterations: u32,
    pub cost_evals: usize,
    pub message: String,
    pub solver: String,
    pub best: ParameterVector,
    pub parameters: Vec<ParameterValue>,
}

impl OptimizationResult {
    pub fn get_parameter(&self, name: &str) -> Option<&ParameterValue> {
        self.parameters.iter().find(|p| p.name == name)
    }
}
