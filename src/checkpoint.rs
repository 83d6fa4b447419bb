//! Append-only record of completed fingerprints, one file per manifest.
//!
//! The store is the authoritative "already done" set across restarts. It is
//! only ever appended to, and only for slots whose jobs reached COMPLETE, so
//! a crash between completion and append at worst resubmits that one slot.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::errors::{AlphaBatchError, Result};

#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store for a manifest: the manifest path with `suffix` appended.
    pub fn for_manifest(manifest: &Path, suffix: &str) -> Self {
        Self::new(checkpoint_path(manifest, suffix))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Completed fingerprints. Missing or unreadable files read as empty.
    pub fn load(&self) -> HashSet<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No checkpoint at {}, starting fresh", self.path.display());
                HashSet::new()
            }
            Err(e) => {
                warn!(
                    "Cannot read checkpoint {}: {}. Treating every request as pending",
                    self.path.display(),
                    e
                );
                HashSet::new()
            }
        }
    }

    /// Append fingerprints, one per line, and flush.
    pub fn append(&self, fingerprints: &[String]) -> Result<()> {
        if fingerprints.is_empty() {
            return Ok(());
        }
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AlphaBatchError::checkpoint("checkpoint writer lock poisoned"))?;

        let mut buffer = String::with_capacity(fingerprints.len() * 65);
        for fingerprint in fingerprints {
            buffer.push_str(fingerprint);
            buffer.push('\n');
        }

        let write = || -> io::Result<()> {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            file.write_all(buffer.as_bytes())?;
            file.flush()
        };
        write().map_err(|e| {
            AlphaBatchError::checkpoint(format!("cannot append to {}: {}", self.path.display(), e))
        })?;

        info!(
            "Checkpointed {} completed alphas to {}",
            fingerprints.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// `<manifest><suffix>`, e.g. `batch.json.checkpoint`.
pub fn checkpoint_path(manifest: &Path, suffix: &str) -> PathBuf {
    let mut raw = manifest.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}
