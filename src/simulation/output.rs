use crate::core::{EvaluationResult, OptimizeError, Result};
use indexmap::IndexMap;

/// Line that separates named observables from the resolution table.
pub const RESOLUTION_MARKER: &str = "algebraic resolution:";

/// Suffix of the line preceding each resolution value.
pub const ENERGY_SUFFIX: &str = "MeV ->";

const ERROR_MARKERS: [&str; 2] = ["$$$ ERROR", "### ERROR"];

/// Printed by the simulator when a number overflows its format field.
const OVERFLOW_MARKER: &str = "******";

/// Collapse every run of CR/LF characters into a single `\n`.
pub fn normalize_line_endings(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut in_break = false;
    for c in text.chars() {
        if c == '\n' || c == '\r' {
            if !in_break {
                normalized.push('\n');
                in_break = true;
            }
        } else {
            normalized.push(c);
            in_break = false;
        }
    }
    normalized
}

/// Reject reports that carry a simulator error or a malformed number.
pub fn check_for_errors(output: &str) -> Result<()> {
    if ERROR_MARKERS.iter().any(|marker| output.contains(marker)) {
        return Err(OptimizeError::Simulation(
            "simulator reported an error".to_string(),
        ));
    }
    if output.contains(OVERFLOW_MARKER) {
        return Err(OptimizeError::Simulation(
            "simulator produced a malformed number format".to_string(),
        ));
    }
    Ok(())
}

/// Extract the named observables and resolution measurements from a
/// normalized simulator report.
pub fn parse_output(output: &str) -> Result<EvaluationResult> {
    let lines: Vec<&str> = output.split('\n').collect();
    let marker = lines
        .iter()
        .position(|line| line.trim() == RESOLUTION_MARKER)
        .ok_or_else(|| {
            OptimizeError::Simulation(format!(
                "output has no '{}' section; the run did not complete",
                RESOLUTION_MARKER
            ))
        })?;

    let mut resolutions = Vec::new();
    let mut i = marker + 1;
    while i < lines.len() {
        if lines[i].trim_end().ends_with(ENERGY_SUFFIX) {
            let raw = lines.get(i + 1).copied().unwrap_or("");
            resolutions.push(parse_value(raw, "resolution")?);
        }
        i += 3;
    }

    let mut observables = IndexMap::new();
    for i in 0..marker {
        let line = lines[i].trim_end();
        if let Some(key) = line.strip_suffix(':') {
            let value = parse_value(lines[i + 1], key)?;
            observables.insert(key.trim().to_string(), value);
        } else if let Some((key, value)) = line.split_once(":=") {
            let value = value.trim().trim_end_matches(';');
            observables.insert(key.trim().to_string(), parse_value(value, key.trim())?);
        }
    }

    Ok(EvaluationResult {
        observables,
        resolutions,
    })
}

fn parse_value(raw: &str, what: &str) -> Result<f64> {
    raw.trim().parse::<f64>().map_err(|_| {
        OptimizeError::Simulation(format!(
            "could not read a number for '{}' from '{}'",
            what,
            raw.trim()
        ))
    })
}
