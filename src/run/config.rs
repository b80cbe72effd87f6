//! Run configuration helpers.
//!
//! This module loads, validates, and writes the run-owned `config.json` so
//! every stage works from the same typed settings.
use super::{
    DispatchConfig, EvidenceThresholds, RunConfig, RunPaths, ToolConfig, CONFIG_SCHEMA_VERSION,
};
use crate::error::{PipelineError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Upper bound on concurrent alignment workers.
pub const MAX_CONCURRENCY: usize = 64;

/// Default solver invocation, meneco-style flags.
///
/// The run hands the solver JSON networks and plain-text seed and target
/// lists (one id per line), not SBML. Stock meneco reads SBML, so the
/// `meneco` found on PATH is expected to be a wrapper that converts these
/// inputs; point `--solver-command` at a different template otherwise.
pub const DEFAULT_SOLVER_COMMAND: &str =
    "meneco -d {draft} -s {seeds} -t {targets} -r {repair} --json {output}";

/// Any hit under the search e-value counts, matching the original filter.
pub fn default_thresholds() -> EvidenceThresholds {
    EvidenceThresholds {
        min_identity: 0.0,
        min_coverage: 0.0,
        max_evalue: 1e-10,
    }
}

pub fn default_dispatch() -> DispatchConfig {
    DispatchConfig {
        max_concurrency: 4,
        max_attempts: 3,
        retry_backoff_ms: 500,
        timeout_secs: 600,
        search_evalue: 1e-10,
    }
}

pub fn default_tools() -> ToolConfig {
    ToolConfig {
        solver: DEFAULT_SOLVER_COMMAND.to_string(),
        blastp: "blastp".to_string(),
        tblastn: "tblastn".to_string(),
    }
}

/// Load the run-owned config from `config.json`.
pub fn load_config(run_root: &Path) -> Result<RunConfig> {
    let path = RunPaths::new(run_root.to_path_buf()).config_path();
    let bytes = fs::read(&path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            PipelineError::Precondition(format!(
                "run not initialized: missing {} (run `gapval init`)",
                path.display()
            ))
        } else {
            PipelineError::io(format!("read config {}", path.display()), err)
        }
    })?;
    let config: RunConfig = serde_json::from_slice(&bytes)
        .map_err(|err| PipelineError::json(format!("parse {}", path.display()), err))?;
    validate_config(&config)?;
    Ok(config)
}

/// Persist a config to disk in a stable JSON format.
pub fn write_config(run_root: &Path, config: &RunConfig) -> Result<()> {
    let path = RunPaths::new(run_root.to_path_buf()).config_path();
    let text = serde_json::to_string_pretty(config)
        .map_err(|err| PipelineError::json("serialize run config", err))?;
    fs::write(&path, text.as_bytes())
        .map_err(|err| PipelineError::io(format!("write {}", path.display()), err))?;
    Ok(())
}

/// Validate schema version, thresholds, dispatch limits and declared inputs.
pub fn validate_config(config: &RunConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(PipelineError::Config(format!(
            "unsupported config schema_version {}",
            config.schema_version
        )));
    }
    if config.run_id.trim().is_empty() {
        return Err(PipelineError::Config("run_id must be non-empty".to_string()));
    }
    if config.reference_networks.is_empty() {
        return Err(PipelineError::Config(
            "at least one reference network is required".to_string(),
        ));
    }
    if config.organisms.is_empty() {
        return Err(PipelineError::Config(
            "at least one organism (proteome or genome) is required".to_string(),
        ));
    }
    let mut organism_ids = BTreeSet::new();
    for organism in &config.organisms {
        if organism.id.trim().is_empty() || organism.id.contains(['/', '\\']) {
            return Err(PipelineError::Config(format!(
                "organism id {:?} must be non-empty and contain no path separators",
                organism.id
            )));
        }
        if !organism_ids.insert(organism.id.as_str()) {
            return Err(PipelineError::Config(format!(
                "duplicate organism id {}",
                organism.id
            )));
        }
    }
    if config.targets.is_empty() {
        return Err(PipelineError::Config(
            "at least one target metabolite is required".to_string(),
        ));
    }
    validate_thresholds(&config.thresholds)?;
    let dispatch = &config.dispatch;
    if !(1..=MAX_CONCURRENCY).contains(&dispatch.max_concurrency) {
        return Err(PipelineError::Config(format!(
            "dispatch.max_concurrency must be between 1 and {MAX_CONCURRENCY} (got {})",
            dispatch.max_concurrency
        )));
    }
    if dispatch.timeout_secs == 0 {
        return Err(PipelineError::Config(
            "dispatch.timeout_secs must be at least 1".to_string(),
        ));
    }
    if dispatch.max_attempts == 0 {
        return Err(PipelineError::Config(
            "dispatch.max_attempts must be at least 1".to_string(),
        ));
    }
    if dispatch.search_evalue.is_nan() || dispatch.search_evalue <= 0.0 {
        return Err(PipelineError::Config(
            "dispatch.search_evalue must be positive".to_string(),
        ));
    }
    for (label, command) in [
        ("tools.solver", &config.tools.solver),
        ("tools.blastp", &config.tools.blastp),
        ("tools.tblastn", &config.tools.tblastn),
    ] {
        if command.trim().is_empty() {
            return Err(PipelineError::Config(format!("{label} must be non-empty")));
        }
    }
    Ok(())
}

fn validate_thresholds(thresholds: &EvidenceThresholds) -> Result<()> {
    if !(0.0..=100.0).contains(&thresholds.min_identity) {
        return Err(PipelineError::Config(format!(
            "thresholds.min_identity must be a percentage in [0, 100] (got {})",
            thresholds.min_identity
        )));
    }
    if !(0.0..=1.0).contains(&thresholds.min_coverage) {
        return Err(PipelineError::Config(format!(
            "thresholds.min_coverage must be a fraction in [0, 1] (got {})",
            thresholds.min_coverage
        )));
    }
    if thresholds.max_evalue.is_nan() || thresholds.max_evalue < 0.0 {
        return Err(PipelineError::Config(format!(
            "thresholds.max_evalue must be non-negative (got {})",
            thresholds.max_evalue
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
