//! INIT stage: create the run directory, config and manifest.
//!
//! Re-initializing with `--force` rewrites the config but keeps stage
//! records; their fingerprints decide what is still current.
use super::{init_fingerprint, StageOutcome, StageVerdict};
use crate::error::{PipelineError, Result, StageFailure};
use crate::run::{
    append_history, ensure_run_root, load_manifest, validate_config, write_config, write_manifest,
    DispatchConfig, EvidenceThresholds, HistoryEntry, OrganismConfig, RunConfig, RunManifest,
    RunPaths, Stage, StageRecord, ToolConfig, CONFIG_SCHEMA_VERSION, HISTORY_SCHEMA_VERSION,
    MANIFEST_SCHEMA_VERSION,
};
use crate::util::now_epoch_ms;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Inputs for a new run.
#[derive(Debug, Clone)]
pub struct InitRequest {
    pub run_dir: PathBuf,
    pub draft: PathBuf,
    pub references: Vec<PathBuf>,
    pub proteins: PathBuf,
    pub organisms: Vec<OrganismConfig>,
    pub seeds: Vec<String>,
    pub targets: Vec<String>,
    pub thresholds: EvidenceThresholds,
    pub dispatch: DispatchConfig,
    pub tools: ToolConfig,
    pub force: bool,
}

pub fn run_init(request: &InitRequest) -> std::result::Result<StageOutcome, StageFailure> {
    let started = now_epoch_ms();
    let result = init(request);
    if let Ok((root, outcome)) = &result {
        let entry = HistoryEntry {
            schema_version: HISTORY_SCHEMA_VERSION,
            started_at_epoch_ms: started,
            finished_at_epoch_ms: now_epoch_ms(),
            stage: Stage::Init,
            group: None,
            fingerprint: Some(outcome.fingerprint.clone()),
            success: true,
            reused: false,
            message: outcome.message.clone(),
        };
        if let Err(err) = append_history(root, &entry) {
            warn!(error = %err, "failed to append history entry");
        }
    }
    result
        .map(|(_, outcome)| outcome)
        .map_err(|err| StageFailure::new(Stage::Init, err))
}

fn init(request: &InitRequest) -> Result<(PathBuf, StageOutcome)> {
    let root = ensure_run_root(&request.run_dir, true)?;
    let paths = RunPaths::new(root.clone());
    if paths.config_path().is_file() && !request.force {
        return Err(PipelineError::Precondition(format!(
            "run already initialized at {} (use --force to overwrite)",
            root.display()
        )));
    }

    let run_id = root
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "run".to_string());
    let config = RunConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        run_id: run_id.clone(),
        draft_network: absolute(&request.draft)?,
        reference_networks: request
            .references
            .iter()
            .map(|path| absolute(path))
            .collect::<Result<_>>()?,
        reference_proteins: absolute(&request.proteins)?,
        organisms: request
            .organisms
            .iter()
            .map(|organism| {
                Ok(OrganismConfig {
                    id: organism.id.clone(),
                    sequences: absolute(&organism.sequences)?,
                    kind: organism.kind,
                })
            })
            .collect::<Result<_>>()?,
        seeds: request.seeds.clone(),
        targets: request.targets.clone(),
        thresholds: request.thresholds,
        dispatch: request.dispatch.clone(),
        tools: request.tools.clone(),
    };
    validate_config(&config)?;

    let mut manifest = if paths.manifest_path().is_file() {
        load_manifest(&root)?
    } else {
        RunManifest {
            schema_version: MANIFEST_SCHEMA_VERSION,
            run_id: run_id.clone(),
            stages: BTreeMap::new(),
            partial_enrich: None,
        }
    };
    let fingerprint = init_fingerprint(&config);
    manifest.run_id = run_id;
    manifest.stages.insert(
        Stage::Init,
        StageRecord {
            fingerprint: fingerprint.clone(),
            completed_at_epoch_ms: now_epoch_ms(),
            artifacts: Vec::new(),
        },
    );
    write_config(&root, &config)?;
    write_manifest(&root, &manifest)?;
    info!(run = %root.display(), organisms = config.organisms.len(), "run initialized");

    Ok((
        root,
        StageOutcome {
            stage: Stage::Init,
            verdict: StageVerdict::Executed,
            fingerprint,
            message: Some(format!("run {} initialized", config.run_id)),
        },
    ))
}

/// Absolute form of an input path; missing files are kept as given
/// (relative to the current directory) and reported by CHECK.
fn absolute(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|err| PipelineError::io("resolve current directory", err))?;
    Ok(cwd.join(path))
}
