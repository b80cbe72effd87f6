//! Stage orchestration for a gap-fill validation run.
//!
//! Each stage is a small function over a [`StageContext`]; the
//! [`Orchestrator`] owns the precondition, reuse, and manifest bookkeeping
//! around it so the stage bodies only compute and write artifacts.
mod blastp;
mod check;
mod enrich;
mod files;
mod fill;
mod init;
mod run;
mod status;

pub use blastp::{
    BLAST_RESULTS_TSV, CANDIDATES_JSON, EVIDENCE_JSON, FAILURES_JSON, RXN_PROT_TSV,
    SOLVER_REPORT_JSON, UNITS_JSON,
};
pub use check::{CheckItem, CheckReport};
pub use enrich::{GroupReport, DECISIONS_JSON};
pub use files::{
    GeneEntry, OrganismEntry, GENE_INDEX_JSON, ORGANISMS_JSON, REFERENCE_PROTEINS_FASTA,
};
pub use fill::{FillProvenance, NETWORK_JSON, PROVENANCE_JSON, STATS_TSV};
pub use init::{run_init, InitRequest};
pub use status::{run_status, StageStatus, StatusReport};

use crate::align::{Aligner, BlastCommand};
use crate::cancel::CancellationToken;
use crate::error::{PipelineError, Result, StageFailure};
use crate::network::{JsonNetworkLibrary, NetworkLibrary};
use crate::run::{
    append_history, ensure_run_root, load_config, load_manifest, write_manifest, ArtifactRef,
    Fingerprint, HistoryEntry, RunConfig, RunManifest, RunPaths, Stage, StageRecord, ToolConfig,
    HISTORY_SCHEMA_VERSION,
};
use crate::solver::{CommandSolver, GapFillSolver, ReferenceNetwork};
use crate::store::ArtifactStore;
use crate::util::now_epoch_ms;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// External collaborators used by the stages.
pub struct Toolbox {
    pub solver: Box<dyn GapFillSolver>,
    pub aligner: Box<dyn Aligner>,
    pub network: Box<dyn NetworkLibrary>,
}

impl Toolbox {
    /// Command-line solver and BLAST+ aligner from the run's tool config.
    pub fn from_config(tools: &ToolConfig) -> Self {
        Self {
            solver: Box::new(CommandSolver::new(tools.solver.clone())),
            aligner: Box::new(BlastCommand::new(tools.blastp.clone(), tools.tblastn.clone())),
            network: Box::new(JsonNetworkLibrary),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageVerdict {
    Executed,
    /// Inputs unchanged and artifacts intact; nothing was re-run.
    Reused,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub verdict: StageVerdict,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StageOutcome {
    /// One-line report printed by the CLI.
    pub fn report_line(&self) -> String {
        let verdict = match self.verdict {
            StageVerdict::Executed => "success",
            StageVerdict::Reused => "reused",
        };
        format!("stage={} verdict={verdict}", self.stage)
    }
}

/// Everything a stage body may read.
pub(crate) struct StageContext<'a> {
    pub config: &'a RunConfig,
    pub manifest: &'a RunManifest,
    pub store: &'a ArtifactStore,
    pub toolbox: &'a Toolbox,
    pub cancel: &'a CancellationToken,
    pub fingerprint: &'a str,
}

impl StageContext<'_> {
    /// Record of a completed upstream stage; preconditions already checked it.
    pub fn record(&self, stage: Stage) -> Result<&StageRecord> {
        self.manifest.stages.get(&stage).ok_or_else(|| {
            PipelineError::Precondition(format!("stage {stage} has not completed"))
        })
    }

    pub fn references(&self) -> Result<Vec<ReferenceNetwork>> {
        load_references(self.config, self.toolbox.network.as_ref())
    }
}

/// Result of a stage body: artifacts for the manifest plus a summary.
pub(crate) struct StageArtifacts {
    pub artifacts: Vec<ArtifactRef>,
    pub message: Option<String>,
}

/// Sequences stages over one run directory.
pub struct Orchestrator {
    paths: RunPaths,
    store: ArtifactStore,
    toolbox: Toolbox,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(run_dir: &Path, toolbox: Toolbox, cancel: CancellationToken) -> Result<Self> {
        let root = ensure_run_root(run_dir, false)?;
        let paths = RunPaths::new(root);
        Ok(Self {
            store: ArtifactStore::new(paths.clone()),
            paths,
            toolbox,
            cancel,
        })
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    /// Run one stage (optionally scoped to a completion group for enrich).
    pub fn run_stage(
        &self,
        stage: Stage,
        group: Option<&str>,
    ) -> std::result::Result<StageOutcome, StageFailure> {
        let started = now_epoch_ms();
        info!(stage = %stage, group = group.unwrap_or("-"), "stage start");
        let result = self.execute(stage, group);
        let entry = HistoryEntry {
            schema_version: HISTORY_SCHEMA_VERSION,
            started_at_epoch_ms: started,
            finished_at_epoch_ms: now_epoch_ms(),
            stage,
            group: group.map(str::to_string),
            fingerprint: result.as_ref().ok().map(|outcome| outcome.fingerprint.clone()),
            success: result.is_ok(),
            reused: matches!(&result, Ok(outcome) if outcome.verdict == StageVerdict::Reused),
            message: match &result {
                Ok(outcome) => outcome.message.clone(),
                Err(err) => Some(format!("{}: {err}", err.kind())),
            },
        };
        if let Err(err) = append_history(self.paths.root(), &entry) {
            warn!(error = %err, "failed to append history entry");
        }
        match result {
            Ok(outcome) => {
                info!(
                    stage = %stage,
                    verdict = ?outcome.verdict,
                    detail = outcome.message.as_deref().unwrap_or(""),
                    "stage finished"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(stage = %stage, kind = err.kind(), error = %err, "stage failed");
                Err(StageFailure::new(stage, err))
            }
        }
    }

    /// Run CHECK through FILL in order, stopping at the first failure.
    /// `on_stage` sees each outcome as soon as its stage finishes.
    pub fn workflow(
        &self,
        mut on_stage: impl FnMut(&StageOutcome),
    ) -> std::result::Result<Vec<StageOutcome>, StageFailure> {
        run::run_workflow(self, &mut on_stage)
    }

    fn execute(&self, stage: Stage, group: Option<&str>) -> Result<StageOutcome> {
        if stage == Stage::Init {
            return Err(PipelineError::Precondition(
                "init is run with `gapval init`".to_string(),
            ));
        }
        if group.is_some() && stage != Stage::Enrich {
            return Err(PipelineError::Precondition(format!(
                "stage {stage} does not take a group"
            )));
        }
        let config = load_config(self.paths.root())?;
        let mut manifest = load_manifest(self.paths.root())?;
        let expected = expected_fingerprints(&config, stage)?;
        if let Some(previous) = stage.previous() {
            self.require(&manifest, previous, &expected)?;
        }
        let fingerprint = expected
            .get(&stage)
            .cloned()
            .ok_or_else(|| PipelineError::Precondition(format!("no fingerprint for {stage}")))?;

        if let Some(outcome) = self.reusable(&manifest, stage, group, &fingerprint) {
            return Ok(outcome);
        }

        let ctx = StageContext {
            config: &config,
            manifest: &manifest,
            store: &self.store,
            toolbox: &self.toolbox,
            cancel: &self.cancel,
            fingerprint: &fingerprint,
        };
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let output = match (stage, group) {
            (Stage::Check, _) => check::run_check(&ctx)?,
            (Stage::Files, _) => files::run_files(&ctx)?,
            (Stage::Blastp, _) => blastp::run_blastp(&ctx)?,
            (Stage::Enrich, Some(group)) => {
                let progress = enrich::run_enrich_group(&ctx, group)?;
                enrich::record_group(&mut manifest, &fingerprint, progress);
                write_manifest(self.paths.root(), &manifest)?;
                let message = if manifest.stages.contains_key(&Stage::Enrich) {
                    format!("group {group} enriched; all groups complete")
                } else {
                    format!("group {group} enriched")
                };
                return Ok(StageOutcome {
                    stage,
                    verdict: StageVerdict::Executed,
                    fingerprint,
                    message: Some(message),
                });
            }
            (Stage::Enrich, None) => enrich::run_enrich(&ctx)?,
            (Stage::Fill, _) => fill::run_fill(&ctx)?,
            (Stage::Init, _) => {
                return Err(PipelineError::Precondition(
                    "init is run with `gapval init`".to_string(),
                ))
            }
        };
        manifest.complete(
            stage,
            StageRecord {
                fingerprint: fingerprint.clone(),
                completed_at_epoch_ms: now_epoch_ms(),
                artifacts: output.artifacts,
            },
        );
        write_manifest(self.paths.root(), &manifest)?;
        Ok(StageOutcome {
            stage,
            verdict: StageVerdict::Executed,
            fingerprint,
            message: output.message,
        })
    }

    /// Check that `stage` completed, its artifacts are intact, and its
    /// inputs have not changed since.
    fn require(
        &self,
        manifest: &RunManifest,
        stage: Stage,
        expected: &BTreeMap<Stage, String>,
    ) -> Result<()> {
        let record = manifest.stages.get(&stage).ok_or_else(|| {
            PipelineError::Precondition(format!(
                "stage {stage} has not completed (run `gapval {stage}`)"
            ))
        })?;
        self.store.verify_record(record).map_err(|detail| {
            PipelineError::Precondition(format!("stage {stage} artifacts invalid: {detail}"))
        })?;
        if expected.get(&stage) != Some(&record.fingerprint) {
            return Err(PipelineError::Precondition(format!(
                "stage {stage} is stale: its inputs changed (rerun `gapval {stage}`)"
            )));
        }
        Ok(())
    }

    fn reusable(
        &self,
        manifest: &RunManifest,
        stage: Stage,
        group: Option<&str>,
        fingerprint: &str,
    ) -> Option<StageOutcome> {
        let reused = |message: Option<String>| StageOutcome {
            stage,
            verdict: StageVerdict::Reused,
            fingerprint: fingerprint.to_string(),
            message,
        };
        if let Some(record) = manifest.stages.get(&stage) {
            if record.fingerprint == fingerprint {
                match self.store.verify_record(record) {
                    Ok(()) => {
                        debug!(stage = %stage, "inputs unchanged; reusing artifacts");
                        return Some(reused(None));
                    }
                    Err(detail) => warn!(stage = %stage, %detail, "recorded artifacts invalid; re-executing"),
                }
            }
        }
        let (Some(group), Some(partial)) = (group, manifest.partial_enrich.as_ref()) else {
            return None;
        };
        if partial.fingerprint != fingerprint {
            return None;
        }
        let artifact = partial.groups.get(group)?;
        let intact = self.store.verify(artifact).is_ok() && self.store.verify(&partial.decisions).is_ok();
        intact.then(|| reused(Some(format!("group {group} already enriched"))))
    }
}

/// Input fingerprints for `through` and every stage before it.
///
/// Each fingerprint chains its upstream one, so a change invalidates the
/// first stage that reads the changed input and everything after it.
pub fn expected_fingerprints(config: &RunConfig, through: Stage) -> Result<BTreeMap<Stage, String>> {
    let mut out = BTreeMap::new();
    let mut upstream = init_fingerprint(config);
    out.insert(Stage::Init, upstream.clone());
    for stage in Stage::ALL.into_iter().filter(|stage| *stage > Stage::Init && *stage <= through) {
        let mut fp = Fingerprint::new(stage);
        fp.upstream(&upstream);
        match stage {
            Stage::Init => {}
            Stage::Check => {
                fp.json("tools", &config.tools)?;
                fp.json("draft_path", &config.draft_network)?;
                fp.json("reference_paths", &config.reference_networks)?;
                fp.json("proteins_path", &config.reference_proteins)?;
                fp.json("organisms", &config.organisms)?;
            }
            Stage::Files => {
                for (idx, path) in config.reference_networks.iter().enumerate() {
                    fp.file(&format!("reference[{idx}]"), path)?;
                }
                fp.file("proteins", &config.reference_proteins)?;
                for organism in &config.organisms {
                    fp.file(&format!("organism:{}", organism.id), &organism.sequences)?;
                }
            }
            Stage::Blastp => {
                fp.file("draft", &config.draft_network)?;
                fp.json("seeds", &config.seeds)?;
                fp.json("targets", &config.targets)?;
                fp.json("dispatch", &config.dispatch)?;
            }
            Stage::Enrich => {
                fp.json("thresholds", &config.thresholds)?;
            }
            Stage::Fill => {}
        }
        upstream = fp.finish();
        out.insert(stage, upstream.clone());
    }
    Ok(out)
}

/// The init fingerprint only identifies the run; settings are fingerprinted
/// by the stages that read them.
pub fn init_fingerprint(config: &RunConfig) -> String {
    Fingerprint::new(Stage::Init)
        .text("run_id", &config.run_id)
        .finish()
}

/// Load reference networks with unique labels derived from file stems.
pub(crate) fn load_references(
    config: &RunConfig,
    library: &dyn NetworkLibrary,
) -> Result<Vec<ReferenceNetwork>> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    let mut references = Vec::with_capacity(config.reference_networks.len());
    for path in &config.reference_networks {
        let network = library.load(path)?;
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| network.id.clone());
        let count = seen.entry(stem.clone()).or_insert(0);
        *count += 1;
        let label = if *count == 1 {
            stem
        } else {
            format!("{stem}#{count}")
        };
        references.push(ReferenceNetwork { label, network });
    }
    Ok(references)
}
