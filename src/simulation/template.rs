//! Annotated simulator templates.
//!
//! A template is a COSY script in which some declarations carry an inline
//! annotation comment:
//!
//! ```text
//! p_dipole_field := 0.3123733; {{PARAM min=0.1|max=0.6|bias=0|unit=T}}
//! WRITE out 'dispersion:' DISP; {{CONSTRAINT min=-1|max=1|bias=0.5|unit=m}}
//! ```
//!
//! Parsing produces the ordered parameter and constraint lists plus a slot
//! model of the script, so instantiation fills named slots instead of
//! pattern-matching the text again.

use crate::core::{evaluate_constant, Constraint, OptimizeError, OutputMode, Parameter, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<lead>\s*(?P<name>[A-Za-z0-9_]+)\s*:=\s*)(?P<value>[-+]?(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][-+]?[0-9]+)?)(?P<rest>\s*;.*)$",
    )
    .expect("declaration pattern is valid")
});

static WRITE_OUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*WRITE out '(?P<name>[A-Za-z0-9_ ]+):'").expect("write pattern is valid")
});

static ANNOTATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(?P<kind>PARAM|CONSTRAINT)(?P<args>[^}]*)\}\}")
        .expect("annotation pattern is valid")
});

static OUT_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<lead>\s*out_filename\s*:=\s*)'[^']*'(?P<rest>\s*;.*)$")
        .expect("out_filename pattern is valid")
});

const REQUIRED_HYPERPARAMETERS: [&str; 4] = ["min", "max", "bias", "unit"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Parameter(usize),
    OutputMode,
    Order,
    OutputFile,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Text(String),
    Slot(Slot),
}

/// Fixed per-run values written into every instantiated script.
#[derive(Clone, Copy, Debug)]
pub struct RunSettings<'a> {
    pub output_mode: OutputMode,
    pub order: u32,
    pub output_file: &'a Path,
}

/// Parsed template: parameters, constraints and a slot model of the script.
#[derive(Clone, Debug)]
pub struct Template {
    name: String,
    segments: Vec<Segment>,
    parameters: Vec<Parameter>,
    constraints: Vec<Constraint>,
}

impl Template {
    /// Read and parse a template file; its file stem becomes the logical name.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| OptimizeError::io(path, e))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                OptimizeError::Configuration(format!(
                    "invalid template filename: {}",
                    path.display()
                ))
            })?;
        Self::parse(name, &text)
    }

    pub fn parse(name: &str, text: &str) -> Result<Self> {
        let mut builder = Builder::default();

        for (line_no, raw_line) in text.split_inclusive('\n').enumerate() {
            let (body, eol) = split_line_ending(raw_line);
            builder.line(line_no + 1, body, eol)?;
        }

        if builder.parameters.is_empty() {
            return Err(OptimizeError::Configuration(format!(
                "template '{}' does not declare any PARAM annotations",
                name
            )));
        }

        for (slot, setting) in [
            (Slot::OutputMode, "output_mode"),
            (Slot::Order, "order"),
            (Slot::OutputFile, "out_filename"),
        ] {
            if !builder.segments.contains(&Segment::Slot(slot)) {
                warn!(template = name, "no '{}' declaration to rewrite", setting);
            }
        }

        debug!(
            template = name,
            parameters = builder.parameters.len(),
            constraints = builder.constraints.len(),
            "parsed template"
        );

        Ok(Self {
            name: name.to_string(),
            segments: builder.segments,
            parameters: builder.parameters,
            constraints: builder.constraints,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    /// Declared defaults, in parameter order.
    pub fn initial_guess(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.default).collect()
    }

    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.parameters.iter().map(Parameter::bounds).collect()
    }

    /// Produce a simulator-ready script for `vector`.
    pub fn instantiate(&self, vector: &[f64], settings: &RunSettings<'_>) -> Result<String> {
        if vector.len() != self.parameters.len() {
            return Err(OptimizeError::Configuration(format!(
                "expected {} parameter values, got {}",
                self.parameters.len(),
                vector.len()
            )));
        }

        let mut script = String::with_capacity(self.segments.iter().map(Segment::len_hint).sum());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => script.push_str(text),
                Segment::Slot(Slot::Parameter(idx)) => {
                    script.push_str(&format_value(vector[*idx]));
                }
                Segment::Slot(Slot::OutputMode) => {
                    script.push_str(&settings.output_mode.code().to_string());
                }
                Segment::Slot(Slot::Order) => script.push_str(&settings.order.to_string()),
                Segment::Slot(Slot::OutputFile) => {
                    script.push('\'');
                    script.push_str(&settings.output_file.display().to_string());
                    script.push('\'');
                }
            }
        }
        Ok(script)
    }
}

impl Segment {
    fn len_hint(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Slot(_) => 24,
        }
    }
}

#[derive(Default)]
struct Builder {
    segments: Vec<Segment>,
    parameters: Vec<Parameter>,
    constraints: Vec<Constraint>,
}

impl Builder {
    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Segment::Text(last)) = self.segments.last_mut() {
            last.push_str(text);
        } else {
            self.segments.push(Segment::Text(text.to_string()));
        }
    }

    fn push_slot(&mut self, lead: &str, slot: Slot, rest: &str, eol: &str) {
        self.push_text(lead);
        self.segments.push(Segment::Slot(slot));
        self.push_text(rest);
        self.push_text(eol);
    }

    fn line(&mut self, line_no: usize, body: &str, eol: &str) -> Result<()> {
        let declaration = DECLARATION.captures(body);

        if let Some(annotation) = ANNOTATION.captures(body) {
            let hyper = parse_hyperparameters(line_no, &annotation["args"])?;
            let is_param = &annotation["kind"] == "PARAM";

            if let Some(decl) = declaration {
                let name = decl["name"].to_string();
                if is_param {
                    let default: f64 = decl["value"].parse().map_err(|_| {
                        OptimizeError::Configuration(format!(
                            "line {}: invalid default '{}' for '{}'",
                            line_no, &decl["value"], name
                        ))
                    })?;
                    let parameter = build_parameter(line_no, name, default, &hyper)?;
                    if self.parameters.iter().any(|p| p.name == parameter.name) {
                        return Err(OptimizeError::Configuration(format!(
                            "line {}: parameter '{}' is declared more than once",
                            line_no, parameter.name
                        )));
                    }
                    let idx = self.parameters.len();
                    self.parameters.push(parameter);
                    self.push_slot(&decl["lead"], Slot::Parameter(idx), &decl["rest"], eol);
                    return Ok(());
                }
                self.constraints.push(build_constraint(line_no, name, &hyper)?);
            } else if let Some(write) = WRITE_OUT.captures(body) {
                let name = write["name"].trim().to_string();
                if is_param {
                    return Err(OptimizeError::Configuration(format!(
                        "line {}: PARAM '{}' has no numeric default",
                        line_no, name
                    )));
                }
                self.constraints.push(build_constraint(line_no, name, &hyper)?);
            } else {
                return Err(OptimizeError::Configuration(format!(
                    "line {}: annotation is not attached to a declaration or WRITE statement",
                    line_no
                )));
            }

            self.push_text(body);
            self.push_text(eol);
            return Ok(());
        }

        if let Some(decl) = declaration {
            let slot = match &decl["name"] {
                "output_mode" => Some(Slot::OutputMode),
                "order" => Some(Slot::Order),
                _ => None,
            };
            if let Some(slot) = slot {
                self.push_slot(&decl["lead"], slot, &decl["rest"], eol);
                return Ok(());
            }
        } else if let Some(out) = OUT_FILENAME.captures(body) {
            self.push_slot(&out["lead"], Slot::OutputFile, &out["rest"], eol);
            return Ok(());
        }

        self.push_text(body);
        self.push_text(eol);
        Ok(())
    }
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

fn parse_hyperparameters(line_no: usize, args: &str) -> Result<HashMap<String, String>> {
    let mut hyper = HashMap::new();
    for arg in args.split('|') {
        let arg = arg.trim();
        if arg.is_empty() {
            continue;
        }
        let (key, value) = arg.split_once('=').ok_or_else(|| {
            OptimizeError::Configuration(format!(
                "line {}: malformed hyperparameter '{}' (expected key=value)",
                line_no, arg
            ))
        })?;
        hyper.insert(key.trim().to_string(), value.trim().to_string());
    }

    for key in REQUIRED_HYPERPARAMETERS {
        if !hyper.contains_key(key) {
            return Err(OptimizeError::Configuration(format!(
                "line {}: annotation is missing '{}'",
                line_no, key
            )));
        }
    }
    Ok(hyper)
}

fn parse_number(line_no: usize, key: &str, hyper: &HashMap<String, String>) -> Result<f64> {
    let raw = &hyper[key];
    raw.parse::<f64>().map_err(|_| {
        OptimizeError::Configuration(format!(
            "line {}: '{}={}' is not a number",
            line_no, key, raw
        ))
    })
}

/// Shared bounds/bias/unit fields of both annotation kinds.
fn parse_common(
    line_no: usize,
    name: &str,
    hyper: &HashMap<String, String>,
) -> Result<(f64, f64, f64, String)> {
    let min = parse_number(line_no, "min", hyper)?;
    let max = parse_number(line_no, "max", hyper)?;
    if min > max {
        return Err(OptimizeError::Configuration(format!(
            "line {}: '{}' has min {} greater than max {}",
            line_no, name, min, max
        )));
    }
    let bias = evaluate_constant(&hyper["bias"]).map_err(|e| {
        OptimizeError::Configuration(format!("line {}: bias of '{}': {}", line_no, name, e))
    })?;
    Ok((min, max, bias, hyper["unit"].clone()))
}

fn build_parameter(
    line_no: usize,
    name: String,
    default: f64,
    hyper: &HashMap<String, String>,
) -> Result<Parameter> {
    let (min, max, bias, unit) = parse_common(line_no, &name, hyper)?;
    Ok(Parameter {
        name,
        default,
        min,
        max,
        bias,
        unit,
    })
}

fn build_constraint(
    line_no: usize,
    name: String,
    hyper: &HashMap<String, String>,
) -> Result<Constraint> {
    let (min, max, bias, unit) = parse_common(line_no, &name, hyper)?;
    Ok(Constraint {
        name,
        min,
        max,
        bias,
        unit,
    })
}

/// Shortest round-trip decimal form.
fn format_value(value: f64) -> String {
    format!("{}", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SCRIPT: &str = "\
INCLUDE 'COSY';
PROCEDURE RUN;
  VARIABLE output_mode 1; VARIABLE order 1;
  output_mode := 1;
  order := 3;
  out_filename := 'results.txt';
  foil_width := 0.3000000E-01;
  p_m5_quad_field := 0.4093343E-01; {{PARAM min=0|max=0.2|bias=0|unit=T}}
  p_dipole_field := 0.3123733; {{PARAM min=0.1 | max=0.6 | bias=1/10 | unit=T}}
  WRITE out 'dispersion:' DISP; {{CONSTRAINT min=-1|max=1|bias=0.5|unit=m}}
  p_drift_pre_bend := 0.2034160; {{PARAM min=0|max=1|bias=-2*0.5|unit=m}}
  tilt := 0; {{CONSTRAINT min=0|max=5|bias=0|unit=deg}}
ENDPROCEDURE;
RUN; END;
";

    #[test]
    fn parses_in_declaration_order() {
        let template = Template::parse("mergs", SCRIPT).unwrap();
        let names = template.parameter_names();
        assert_eq!(names, vec!["p_m5_quad_field", "p_dipole_field", "p_drift_pre_bend"]);

        let params = template.parameters();
        assert_eq!(params[0].default, 0.04093343);
        assert_eq!(params[1].bias, 0.1);
        assert_eq!(params[2].bias, -1.0);
        assert_eq!(params[1].unit, "T");
        assert_eq!(template.bounds()[1], (0.1, 0.6));
        assert_eq!(template.initial_guess()[2], 0.2034160);

        let constraints = template.constraints();
        assert_eq!(constraints.len(), 2);
        assert_eq!(constraints[0].name, "dispersion");
        assert_eq!(constraints[0].bias, 0.5);
        assert_eq!(constraints[1].name, "tilt");
        assert_eq!(constraints[1].unit, "deg");
    }

    #[test]
    fn instantiate_rewrites_slots_only() {
        let template = Template::parse("mergs", SCRIPT).unwrap();
        let out = PathBuf::from("generated/mergs_proc7_output.txt");
        let settings = RunSettings {
            output_mode: OutputMode::None,
            order: 6,
            output_file: &out,
        };
        let script = template.instantiate(&[0.05, 0.25, 0.5], &settings).unwrap();

        assert!(script.contains("  output_mode := 0;\n"));
        assert!(script.contains("  order := 6;\n"));
        assert!(script.contains("  out_filename := 'generated/mergs_proc7_output.txt';\n"));
        assert!(script.contains("  p_m5_quad_field := 0.05; {{PARAM min=0|max=0.2|bias=0|unit=T}}\n"));
        assert!(script.contains("  p_dipole_field := 0.25; {{PARAM"));
        assert!(script.contains("  p_drift_pre_bend := 0.5; {{PARAM"));
        // untouched lines survive verbatim
        assert!(script.contains("  foil_width := 0.3000000E-01;\n"));
        assert!(script.contains("  VARIABLE output_mode 1; VARIABLE order 1;\n"));
        assert!(script.contains("  tilt := 0; {{CONSTRAINT"));
        assert!(script.ends_with("RUN; END;\n"));
    }

    #[test]
    fn instantiate_preserves_text_between_runs() {
        let template = Template::parse("mergs", SCRIPT).unwrap();
        let out = PathBuf::from("results.txt");
        let settings = RunSettings {
            output_mode: OutputMode::Gui,
            order: 3,
            output_file: &out,
        };
        let defaults = template.initial_guess();
        let script = template.instantiate(&defaults, &settings).unwrap();
        let reparsed = Template::parse("mergs", &script).unwrap();
        assert_eq!(reparsed.parameters(), template.parameters());
        assert!(script.contains("  output_mode := 1;\n"));
    }

    #[test]
    fn instantiate_rejects_wrong_length() {
        let template = Template::parse("mergs", SCRIPT).unwrap();
        let out = PathBuf::from("results.txt");
        let settings = RunSettings {
            output_mode: OutputMode::None,
            order: 3,
            output_file: &out,
        };
        assert!(template.instantiate(&[0.1], &settings).is_err());
    }

    #[test]
    fn zero_parameters_is_a_configuration_error() {
        let err = Template::parse("empty", "x := 1;\nWRITE out 'y:' Y;\n").unwrap_err();
        assert!(matches!(err, OptimizeError::Configuration(_)));
    }

    #[test]
    fn missing_hyperparameter_is_a_configuration_error() {
        let err = Template::parse("bad", "a := 1; {{PARAM min=0|max=2|unit=m}}\n").unwrap_err();
        match err {
            OptimizeError::Configuration(msg) => assert!(msg.contains("bias")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_annotations_are_rejected() {
        assert!(Template::parse("bad", "a := 1; {{PARAM min=0|max|bias=0|unit=m}}\n").is_err());
        assert!(Template::parse("bad", "a := 1; {{PARAM min=3|max=2|bias=0|unit=m}}\n").is_err());
        assert!(Template::parse("bad", "a := 1; {{PARAM min=0|max=2|bias=zz|unit=m}}\n").is_err());
        assert!(Template::parse("bad", "WRITE out 'a:' A; {{PARAM min=0|max=2|bias=0|unit=m}}\n").is_err());
        assert!(Template::parse(
            "bad",
            "a := 1; {{PARAM min=0|max=2|bias=0|unit=m}}\na := 2; {{PARAM min=0|max=2|bias=0|unit=m}}\n"
        )
        .is_err());
    }

    #[test]
    fn load_uses_file_stem_as_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mergs_ion_optics.fox");
        std::fs::write(&path, SCRIPT).unwrap();
        let template = Template::load(&path).unwrap();
        assert_eq!(template.name(), "mergs_ion_optics");
        assert_eq!(template.parameters().len(), 3);
    }
}
