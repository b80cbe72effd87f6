//! Typed paths into a run directory layout.
use super::Stage;
use crate::error::{PipelineError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Length of the fingerprint prefix used for version directory names.
const VERSION_DIR_CHARS: usize = 16;

/// Convenience wrapper for locating run-owned files.
#[derive(Debug, Clone)]
pub struct RunPaths {
    root: PathBuf,
}

impl RunPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the `config.json` path.
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Return the `manifest.json` path.
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    /// Return the `history.jsonl` path.
    pub fn history_path(&self) -> PathBuf {
        self.root.join("history.jsonl")
    }

    /// Return the `stages/` directory path.
    pub fn stages_dir(&self) -> PathBuf {
        self.root.join("stages")
    }

    /// Return the versioned artifact directory for a stage fingerprint.
    pub fn version_dir(&self, stage: Stage, fingerprint: &str) -> PathBuf {
        let short = &fingerprint[..fingerprint.len().min(VERSION_DIR_CHARS)];
        self.stages_dir().join(stage.as_str()).join(short)
    }

    /// Resolve a run-relative artifact path.
    pub fn resolve(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Express an absolute path under the run root as a `/`-joined relative path.
    pub fn relative(&self, path: &Path) -> Result<String> {
        let rel = path.strip_prefix(&self.root).map_err(|_| {
            PipelineError::Precondition(format!(
                "{} is outside run directory {}",
                path.display(),
                self.root.display()
            ))
        })?;
        Ok(rel
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }
}

/// Resolve a run directory, optionally creating it.
pub fn ensure_run_root(path: &Path, create: bool) -> Result<PathBuf> {
    if create {
        fs::create_dir_all(path)
            .map_err(|err| PipelineError::io(format!("create {}", path.display()), err))?;
    }
    path.canonicalize().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            PipelineError::Precondition(format!(
                "run directory {} does not exist (run `gapval init`)",
                path.display()
            ))
        } else {
            PipelineError::io(format!("resolve run directory {}", path.display()), err)
        }
    })
}
