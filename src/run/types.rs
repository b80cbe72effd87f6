//! Typed JSON schema for run-owned files.
//!
//! `config.json`, `manifest.json` and `history.jsonl` mirror these types so
//! the orchestrator only ever operates on validated data.
use crate::align::AlignmentMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Pipeline stages in execution order.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Check,
    Files,
    Blastp,
    Enrich,
    Fill,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Init,
        Stage::Check,
        Stage::Files,
        Stage::Blastp,
        Stage::Enrich,
        Stage::Fill,
    ];

    /// Return the stable string identifier used in JSON artifacts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Check => "check",
            Stage::Files => "files",
            Stage::Blastp => "blastp",
            Stage::Enrich => "enrich",
            Stage::Fill => "fill",
        }
    }

    /// Stage whose artifacts this stage consumes.
    pub fn previous(&self) -> Option<Stage> {
        match self {
            Stage::Init => None,
            Stage::Check => Some(Stage::Init),
            Stage::Files => Some(Stage::Check),
            Stage::Blastp => Some(Stage::Files),
            Stage::Enrich => Some(Stage::Blastp),
            Stage::Fill => Some(Stage::Enrich),
        }
    }

    /// Stages that consume this stage's artifacts, directly or transitively.
    pub fn downstream(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL.into_iter().filter(move |stage| stage > self)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run state derived from the manifest's stage-completion set.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Uninitialized,
    InitDone,
    CheckDone,
    FilesDone,
    BlastpDone,
    EnrichDone,
    FillDone,
}

impl RunState {
    /// State after `stage` (and every stage before it) completed.
    pub fn after(stage: Option<Stage>) -> RunState {
        match stage {
            None => RunState::Uninitialized,
            Some(Stage::Init) => RunState::InitDone,
            Some(Stage::Check) => RunState::CheckDone,
            Some(Stage::Files) => RunState::FilesDone,
            Some(Stage::Blastp) => RunState::BlastpDone,
            Some(Stage::Enrich) => RunState::EnrichDone,
            Some(Stage::Fill) => RunState::FillDone,
        }
    }
}

/// Kind of sequence set provided for an organism of interest.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    /// Predicted proteome; searched with `blastp`.
    Protein,
    /// Genome assembly; searched with `tblastn`.
    Nucleotide,
}

impl SequenceKind {
    pub fn alignment_mode(&self) -> AlignmentMode {
        match self {
            SequenceKind::Protein => AlignmentMode::Blastp,
            SequenceKind::Nucleotide => AlignmentMode::Tblastn,
        }
    }
}

/// Organism whose genome or proteome provides homology evidence.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OrganismConfig {
    pub id: String,
    pub sequences: PathBuf,
    pub kind: SequenceKind,
}

/// Thresholds separating supporting from non-supporting alignment hits.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EvidenceThresholds {
    /// Minimum percent identity (0-100).
    pub min_identity: f64,
    /// Minimum fraction of the reference protein covered by the alignment (0-1).
    pub min_coverage: f64,
    pub max_evalue: f64,
}

/// Worker pool and retry settings for the alignment dispatcher.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    pub max_concurrency: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub timeout_secs: u64,
    /// E-value cutoff passed to the aligner itself.
    pub search_evalue: f64,
}

/// Command lines for the external collaborators.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    /// Solver command template; `{draft}`, `{repair}`, `{seeds}`, `{targets}`
    /// and `{output}` are substituted per invocation.
    pub solver: String,
    pub blastp: String,
    pub tblastn: String,
}

/// Run-owned configuration stored in `config.json`.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub schema_version: u32,
    pub run_id: String,
    pub draft_network: PathBuf,
    pub reference_networks: Vec<PathBuf>,
    pub reference_proteins: PathBuf,
    pub organisms: Vec<OrganismConfig>,
    #[serde(default)]
    pub seeds: Vec<String>,
    pub targets: Vec<String>,
    #[serde(default = "super::config::default_thresholds")]
    pub thresholds: EvidenceThresholds,
    #[serde(default = "super::config::default_dispatch")]
    pub dispatch: DispatchConfig,
    #[serde(default = "super::config::default_tools")]
    pub tools: ToolConfig,
}

/// Reference to a persisted artifact, relative to the run root.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub path: String,
    pub sha256: String,
}

/// Completion record for one stage.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StageRecord {
    pub fingerprint: String,
    pub completed_at_epoch_ms: u128,
    pub artifacts: Vec<ArtifactRef>,
}

/// Group-scoped enrichment progress, valid for one enrich fingerprint.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PartialEnrich {
    pub fingerprint: String,
    pub decisions: ArtifactRef,
    #[serde(default)]
    pub groups: BTreeMap<String, ArtifactRef>,
}

/// Stage-completion set and fingerprints stored in `manifest.json`.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RunManifest {
    pub schema_version: u32,
    pub run_id: String,
    #[serde(default)]
    pub stages: BTreeMap<Stage, StageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_enrich: Option<PartialEnrich>,
}

impl RunManifest {
    /// Highest stage whose predecessors all completed.
    pub fn state(&self) -> RunState {
        let mut last = None;
        for stage in Stage::ALL {
            if !self.stages.contains_key(&stage) {
                break;
            }
            last = Some(stage);
        }
        RunState::after(last)
    }

    /// Record a freshly executed stage and drop every downstream record.
    pub fn complete(&mut self, stage: Stage, record: StageRecord) {
        for later in stage.downstream() {
            self.stages.remove(&later);
        }
        // Group progress is superseded by a full enrich or any upstream rerun.
        if stage <= Stage::Enrich {
            self.partial_enrich = None;
        }
        self.stages.insert(stage, record);
    }
}

/// History entry appended after each stage invocation.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryEntry {
    pub schema_version: u32,
    pub started_at_epoch_ms: u128,
    pub finished_at_epoch_ms: u128,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub fingerprint: Option<String>,
    pub success: bool,
    pub reused: bool,
    pub message: Option<String>,
}
