use super::workspace::ScratchFiles;
use crate::core::{OptimizeError, Result};
use std::fs;
use std::process::{Command, Stdio};
use tracing::debug;

/// Something that can turn an instantiated script into a raw report.
///
/// Implementations must be callable from several worker threads at once;
/// each call gets its own [`ScratchFiles`].
pub trait Simulator: Sync {
    fn run(&self, script: &str, files: &ScratchFiles) -> Result<String>;
}

/// Runs an external program (COSY by default) on the script file.
#[derive(Clone, Debug)]
pub struct ExternalSimulator {
    program: String,
}

impl ExternalSimulator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ExternalSimulator {
    fn default() -> Self {
        Self::new("cosy")
    }
}

impl Simulator for ExternalSimulator {
    fn run(&self, script: &str, files: &ScratchFiles) -> Result<String> {
        if let Some(parent) = files.script.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| OptimizeError::io(parent, e))?;
        }
        fs::write(&files.script, script).map_err(|e| OptimizeError::io(&files.script, e))?;
        // scratch files are reused per worker; a stale report must never be read back
        match fs::remove_file(&files.output) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(OptimizeError::io(&files.output, e)),
        }

        debug!(program = %self.program, script = %files.script.display(), "launching simulator");

        // Blocks for the full simulation; stdout is noise, stderr is kept for diagnostics
        let output = Command::new(&self.program)
            .arg(&files.invocation)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                OptimizeError::Simulation(format!("failed to execute '{}': {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OptimizeError::Simulation(format!(
                "'{} {}' exited with {}: {}",
                self.program,
                files.invocation.display(),
                output.status,
                stderr.trim()
            )));
        }

        let bytes = fs::read(&files.output).map_err(|e| {
            OptimizeError::Simulation(format!(
                "simulator did not write {}: {}",
                files.output.display(),
                e
            ))
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
