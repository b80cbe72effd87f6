//! Versioned artifact store for stage outputs.
//!
//! Each stage writes into `stages/<stage>/<fingerprint>/`, so a new input
//! fingerprint always lands in a new directory and concurrent writers never
//! share a target. Files are published with a temp-file rename.
use crate::error::{PipelineError, Result};
use crate::run::{ArtifactRef, RunPaths, Stage, StageRecord};
use crate::util::sha256_hex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    paths: RunPaths,
}

impl ArtifactStore {
    pub fn new(paths: RunPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    /// Open a writer for one stage version.
    pub fn version(&self, stage: Stage, fingerprint: &str) -> VersionWriter<'_> {
        VersionWriter {
            store: self,
            dir: self.paths.version_dir(stage, fingerprint),
            written: Vec::new(),
        }
    }

    /// Check that an artifact is present and unmodified.
    pub fn verify(&self, artifact: &ArtifactRef) -> std::result::Result<(), String> {
        let path = self.paths.resolve(&artifact.path);
        let bytes = fs::read(&path).map_err(|_| format!("missing artifact {}", artifact.path))?;
        if sha256_hex(&bytes) != artifact.sha256 {
            return Err(format!("artifact {} was modified", artifact.path));
        }
        Ok(())
    }

    /// Verify every artifact of a stage record.
    pub fn verify_record(&self, record: &StageRecord) -> std::result::Result<(), String> {
        record
            .artifacts
            .iter()
            .try_for_each(|artifact| self.verify(artifact))
    }

    pub fn read_bytes(&self, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        let path = self.paths.resolve(&artifact.path);
        fs::read(&path).map_err(|err| PipelineError::io(format!("read {}", path.display()), err))
    }

    pub fn read_json<T: DeserializeOwned>(&self, artifact: &ArtifactRef) -> Result<T> {
        let bytes = self.read_bytes(artifact)?;
        serde_json::from_slice(&bytes)
            .map_err(|err| PipelineError::json(format!("parse {}", artifact.path), err))
    }

    pub fn read_text(&self, artifact: &ArtifactRef) -> Result<String> {
        let bytes = self.read_bytes(artifact)?;
        String::from_utf8(bytes).map_err(|_| {
            PipelineError::Precondition(format!("artifact {} is not valid UTF-8", artifact.path))
        })
    }
}

/// Locate a named artifact in a stage record.
pub fn find_artifact<'a>(record: &'a StageRecord, name: &str) -> Result<&'a ArtifactRef> {
    record
        .artifacts
        .iter()
        .find(|artifact| {
            artifact.path == name
                || artifact
                    .path
                    .rsplit_once('/')
                    .is_some_and(|(_, file)| file == name)
                || artifact.path.ends_with(&format!("/{name}"))
        })
        .ok_or_else(|| PipelineError::Precondition(format!("stage artifact {name} not recorded")))
}

/// Writer scoped to one `stages/<stage>/<fingerprint>/` directory.
pub struct VersionWriter<'a> {
    store: &'a ArtifactStore,
    dir: PathBuf,
    written: Vec<ArtifactRef>,
}

impl VersionWriter<'_> {
    pub fn write_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<ArtifactRef> {
        let dest = self.dir.join(name);
        publish_bytes(&dest, bytes)?;
        let artifact = ArtifactRef {
            path: self.store.paths.relative(&dest)?,
            sha256: sha256_hex(bytes),
        };
        self.written.push(artifact.clone());
        Ok(artifact)
    }

    pub fn write_text(&mut self, name: &str, text: &str) -> Result<ArtifactRef> {
        self.write_bytes(name, text.as_bytes())
    }

    pub fn write_json<T: Serialize>(&mut self, name: &str, value: &T) -> Result<ArtifactRef> {
        let mut bytes = serde_json::to_vec_pretty(value)
            .map_err(|err| PipelineError::json(format!("serialize {name}"), err))?;
        bytes.push(b'\n');
        self.write_bytes(name, &bytes)
    }

    /// Artifacts written so far, in write order.
    pub fn finish(self) -> Vec<ArtifactRef> {
        self.written
    }
}

fn publish_bytes(dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| PipelineError::io(format!("create {}", parent.display()), err))?;
    }
    if fs::read(dest).is_ok_and(|existing| existing == bytes) {
        return Ok(());
    }
    let file_name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("artifact");
    let tmp_path = dest
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{file_name}.tmp"));
    fs::write(&tmp_path, bytes)
        .map_err(|err| PipelineError::io(format!("write {}", tmp_path.display()), err))?;
    fs::rename(&tmp_path, dest)
        .map_err(|err| PipelineError::io(format!("publish {}", dest.display()), err))?;
    Ok(())
}
