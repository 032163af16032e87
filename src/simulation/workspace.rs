use crate::core::{OptimizeError, Result};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Prefix shared by every worker-scoped run identifier.
const WORKER_PREFIX: &str = "proc";

/// Token that namespaces one worker's scratch files.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    /// Identifier for the calling worker: the process id, plus the pool
    /// thread index when called from inside a rayon pool.
    pub fn current_worker() -> Self {
        let pid = std::process::id();
        match rayon::current_thread_index() {
            Some(thread) => Self(format!("{}{}t{}", WORKER_PREFIX, pid, thread)),
            None => Self(format!("{}{}", WORKER_PREFIX, pid)),
        }
    }

    /// A fixed identifier, e.g. for the final optimum run.
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Paths used by a single simulator invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScratchFiles {
    /// Instantiated script (`<stem>.fox`).
    pub script: PathBuf,
    /// Report the script writes to.
    pub output: PathBuf,
    /// Script path without extension, as the simulator expects it.
    pub invocation: PathBuf,
}

/// The working ("generated") area for one template.
#[derive(Clone, Debug)]
pub struct Workspace {
    dir: PathBuf,
    name: String,
}

impl Workspace {
    pub fn new(dir: impl Into<PathBuf>, template_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: template_name.into(),
        }
    }

    pub fn ensure_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| OptimizeError::io(&self.dir, e))
    }

    /// Persisted cache location, derived from the template name.
    pub fn cache_path(&self) -> PathBuf {
        self.dir.join(format!("{}_cache.json", self.name))
    }

    pub fn scratch(&self, run_id: &RunId) -> ScratchFiles {
        let stem = format!("{}_{}", self.name, run_id);
        ScratchFiles {
            script: self.dir.join(format!("{}.fox", stem)),
            output: self.dir.join(format!("{}_output.txt", stem)),
            invocation: self.dir.join(stem),
        }
    }

    /// Remove every worker-scoped scratch file, including leftovers from
    /// runs that were killed. Returns the number of files removed.
    pub fn cleanup_scratch(&self) -> Result<usize> {
        let pattern = format!(
            "{}/{}_{}*",
            glob::Pattern::escape(&self.dir.to_string_lossy()),
            glob::Pattern::escape(&self.name),
            WORKER_PREFIX
        );
        let paths = glob::glob(&pattern)
            .map_err(|e| OptimizeError::Configuration(format!("bad scratch pattern: {}", e)))?;

        let mut removed = 0;
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => {
                    std::fs::remove_file(&path).map_err(|e| OptimizeError::io(&path, e))?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => warn!("skipping unreadable scratch entry: {}", e),
            }
        }
        debug!(dir = %self.dir.display(), removed, "cleaned up scratch files");
        Ok(removed)
    }
}
