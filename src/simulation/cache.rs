//! Persistent evaluation cache.
//!
//! Maps an exact parameter vector to the raw simulator report it produced.
//! Keys compare bit-for-bit (no tolerance), and are persisted as the `u64`
//! bit patterns of each component so a save/load cycle cannot perturb them.
//!
//! Values are raw report text, never parsed results, so changes to output
//! parsing do not invalidate stored entries.

use crate::core::{OptimizeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Bit-exact cache key for a parameter vector.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<u64>);

impl CacheKey {
    pub fn new(vector: &[f64]) -> Self {
        Self(vector.iter().map(|v| v.to_bits()).collect())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: CacheKey,
    output: String,
}

#[derive(Default)]
pub struct EvaluationCache {
    path: Option<PathBuf>,
    entries: HashMap<CacheKey, String>,
    unsaved: usize,
}

impl EvaluationCache {
    /// Cache that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache stored at `path`, or start empty if the file is absent.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => {
                let stored: Vec<StoredEntry> = serde_json::from_str(&text)?;
                stored.into_iter().map(|e| (e.key, e.output)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(OptimizeError::io(&path, e)),
        };
        debug!(path = %path.display(), entries = entries.len(), "loaded evaluation cache");
        Ok(Self {
            path: Some(path),
            entries,
            unsaved: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries inserted since the last flush.
    pub fn unsaved(&self) -> usize {
        self.unsaved
    }

    pub fn get(&self, vector: &[f64]) -> Option<&str> {
        self.entries.get(&CacheKey::new(vector)).map(String::as_str)
    }

    pub fn insert(&mut self, vector: &[f64], output: String) {
        if self.entries.insert(CacheKey::new(vector), output).is_none() {
            self.unsaved += 1;
        }
    }

    /// Write all entries to storage. The file is replaced atomically so an
    /// interrupted flush leaves the previous checkpoint intact.
    pub fn flush(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            self.unsaved = 0;
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| OptimizeError::io(parent, e))?;
        }

        let stored: Vec<StoredEntry> = self
            .entries
            .iter()
            .map(|(key, output)| StoredEntry {
                key: key.clone(),
                output: output.clone(),
            })
            .collect();
        let json = serde_json::to_string(&stored)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| OptimizeError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| OptimizeError::io(path, e))?;

        debug!(path = %path.display(), entries = self.entries.len(), "flushed evaluation cache");
        self.unsaved = 0;
        Ok(())
    }
}
