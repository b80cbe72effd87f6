//! Manifest persistence and input fingerprints.
//!
//! The manifest ties each completed stage to the exact content of its inputs
//! so reruns can detect staleness without looking at timestamps.
use super::{RunManifest, RunPaths, Stage, MANIFEST_SCHEMA_VERSION};
use crate::error::{PipelineError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Load the manifest, failing with a precondition error when the run was
/// never initialized.
pub fn load_manifest(run_root: &Path) -> Result<RunManifest> {
    let path = RunPaths::new(run_root.to_path_buf()).manifest_path();
    let bytes = fs::read(&path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            PipelineError::Precondition(format!(
                "run not initialized: missing {} (run `gapval init`)",
                path.display()
            ))
        } else {
            PipelineError::io(format!("read manifest {}", path.display()), err)
        }
    })?;
    let manifest: RunManifest = serde_json::from_slice(&bytes)
        .map_err(|err| PipelineError::json(format!("parse {}", path.display()), err))?;
    if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
        return Err(PipelineError::Precondition(format!(
            "unsupported manifest schema_version {}",
            manifest.schema_version
        )));
    }
    Ok(manifest)
}

/// Persist the manifest atomically (temp file + rename).
pub fn write_manifest(run_root: &Path, manifest: &RunManifest) -> Result<()> {
    let path = RunPaths::new(run_root.to_path_buf()).manifest_path();
    let text = serde_json::to_string_pretty(manifest)
        .map_err(|err| PipelineError::json("serialize manifest", err))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text.as_bytes())
        .map_err(|err| PipelineError::io(format!("write {}", tmp.display()), err))?;
    fs::rename(&tmp, &path)
        .map_err(|err| PipelineError::io(format!("publish {}", path.display()), err))?;
    Ok(())
}

/// Incremental content fingerprint for one stage's inputs.
///
/// Every contribution is labelled so reordering inputs changes the digest.
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub fn new(stage: Stage) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"stage:");
        hasher.update(stage.as_str().as_bytes());
        Self { hasher }
    }

    /// Chain the fingerprint of the stage this one consumes.
    pub fn upstream(&mut self, fingerprint: &str) -> &mut Self {
        self.text("upstream", fingerprint)
    }

    pub fn text(&mut self, label: &str, value: &str) -> &mut Self {
        self.hasher.update(b"\x00text:");
        self.hasher.update(label.as_bytes());
        self.hasher.update(b"=");
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value.as_bytes());
        self
    }

    /// Hash a serializable value through its canonical JSON form.
    pub fn json<T: Serialize>(&mut self, label: &str, value: &T) -> Result<&mut Self> {
        let bytes = serde_json::to_vec(value)
            .map_err(|err| PipelineError::json(format!("fingerprint {label}"), err))?;
        self.hasher.update(b"\x00json:");
        self.hasher.update(label.as_bytes());
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(&bytes);
        Ok(self)
    }

    /// Hash a file's content; a missing file hashes as a distinct marker.
    pub fn file(&mut self, label: &str, path: &Path) -> Result<&mut Self> {
        self.hasher.update(b"\x00file:");
        self.hasher.update(label.as_bytes());
        if !path.exists() {
            self.hasher.update(b":missing:");
            self.hasher.update(path.to_string_lossy().as_bytes());
            return Ok(self);
        }
        let bytes =
            fs::read(path).map_err(|err| PipelineError::io(format!("read {}", path.display()), err))?;
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(&bytes);
        Ok(self)
    }

    pub fn finish(&self) -> String {
        format!("{:x}", self.hasher.clone().finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_content_changes_fingerprint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("draft.json");
        fs::write(&path, "{\"a\":1}").expect("write");
        let first = Fingerprint::new(Stage::Blastp)
            .file("draft", &path)
            .expect("hash")
            .finish();
        let again = Fingerprint::new(Stage::Blastp)
            .file("draft", &path)
            .expect("hash")
            .finish();
        assert_eq!(first, again);

        fs::write(&path, "{\"a\":2}").expect("rewrite");
        let changed = Fingerprint::new(Stage::Blastp)
            .file("draft", &path)
            .expect("hash")
            .finish();
        assert_ne!(first, changed);
    }

    #[test]
    fn stage_and_labels_are_part_of_the_digest() {
        let a = Fingerprint::new(Stage::Files).text("x", "1").finish();
        let b = Fingerprint::new(Stage::Blastp).text("x", "1").finish();
        let c = Fingerprint::new(Stage::Files).text("y", "1").finish();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn missing_manifest_is_a_precondition_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_manifest(dir.path()).expect_err("missing manifest");
        assert_eq!(err.kind(), "PreconditionError");
    }
}
