//! CLI argument parsing for the gap-fill validation workflow.
//!
//! Each subcommand triggers one stage of the orchestrator; parsing stays
//! free of policy so the library can be driven the same way from tests.
use crate::error::PipelineError;
use crate::run::{
    default_dispatch, default_thresholds, default_tools, OrganismConfig, SequenceKind,
};
use crate::workflow::InitRequest;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "gapval",
    version,
    about = "Validate gap-filling candidates against homology evidence",
    after_help = "Commands:\n  init --run-dir <dir> ...        Create a run (config + manifest)\n  check --run-dir <dir>           Verify tools and input files\n  files --run-dir <dir>           Materialize sequence files for alignment\n  blastp --run-dir <dir>          Run the solver and dispatch alignments\n  enrich --run-dir <dir> [--group G]  Decide candidates (optionally one group)\n  fill --run-dir <dir>            Merge accepted reactions into the draft\n  workflow --run-dir <dir>        Run check through fill\n  status --run-dir <dir>          Summarize stage state and next action\n\nExamples:\n  gapval init --run-dir run1 --draft draft.json --reference metacyc.json \\\n    --proteins proteins.fasta --proteome sp=sp.faa --target M_TRP --seed M_GLC\n  gapval workflow --run-dir run1\n  gapval status --run-dir run1 --json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Log debug detail to stderr
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Init(InitArgs),
    Check(StageArgs),
    Files(StageArgs),
    Blastp(StageArgs),
    Enrich(EnrichArgs),
    Fill(StageArgs),
    Workflow(WorkflowArgs),
    Status(StatusArgs),
}

/// Run directory shared by every stage command.
#[derive(Args, Debug, Clone)]
pub struct StageArgs {
    /// Run directory created by `gapval init`
    #[arg(long, value_name = "DIR")]
    pub run_dir: PathBuf,
}

#[derive(Parser, Debug)]
#[command(about = "Create a run from a draft network and its inputs")]
pub struct InitArgs {
    #[command(flatten)]
    pub stage: StageArgs,

    #[command(flatten)]
    pub inputs: InputArgs,

    /// Overwrite an existing config.json
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Decide candidates from alignment evidence")]
pub struct EnrichArgs {
    #[command(flatten)]
    pub stage: StageArgs,

    /// Only enrich this minimal-completion group
    #[arg(long, value_name = "GROUP")]
    pub group: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Run check, files, blastp, enrich and fill in order")]
pub struct WorkflowArgs {
    #[command(flatten)]
    pub stage: StageArgs,

    /// Initialize the run first from these inputs
    #[command(flatten)]
    pub inputs: InputArgs,

    /// Overwrite an existing config.json when inputs are given
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Summarize stage state and the next action")]
pub struct StatusArgs {
    #[command(flatten)]
    pub stage: StageArgs,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

/// Run inputs; required for `init`, optional for `workflow`.
#[derive(Args, Debug, Clone, Default)]
pub struct InputArgs {
    /// Draft metabolic network (JSON)
    #[arg(long, value_name = "FILE")]
    pub draft: Option<PathBuf>,

    /// Reference network providing candidate reactions (repeatable)
    #[arg(long = "reference", value_name = "FILE")]
    pub references: Vec<PathBuf>,

    /// FASTA of the reference proteins annotated on reference reactions
    #[arg(long, value_name = "FILE")]
    pub proteins: Option<PathBuf>,

    /// Organism proteome searched with blastp (repeatable)
    #[arg(long = "proteome", value_name = "ID=FILE", value_parser = parse_organism_path)]
    pub proteomes: Vec<(String, PathBuf)>,

    /// Organism genome searched with tblastn (repeatable)
    #[arg(long = "genome", value_name = "ID=FILE", value_parser = parse_organism_path)]
    pub genomes: Vec<(String, PathBuf)>,

    /// Target metabolite to restore (repeatable)
    #[arg(long = "target", value_name = "ID")]
    pub targets: Vec<String>,

    /// Seed metabolite (repeatable)
    #[arg(long = "seed", value_name = "ID")]
    pub seeds: Vec<String>,

    /// Minimum percent identity for a supporting hit
    #[arg(long, value_name = "PCT")]
    pub min_identity: Option<f64>,

    /// Minimum query coverage (0-1) for a supporting hit
    #[arg(long, value_name = "FRACTION")]
    pub min_coverage: Option<f64>,

    /// Maximum e-value for a supporting hit
    #[arg(long, value_name = "EVALUE")]
    pub max_evalue: Option<f64>,

    /// Concurrent alignment units
    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Attempts per alignment unit for transient failures
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Per-unit aligner timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Solver command template ({draft} {repair} {seeds} {targets} {output});
    /// networks are JSON and seeds/targets are one id per line
    #[arg(long, value_name = "CMD")]
    pub solver_command: Option<String>,

    /// blastp command
    #[arg(long, value_name = "CMD")]
    pub blastp_command: Option<String>,

    /// tblastn command
    #[arg(long, value_name = "CMD")]
    pub tblastn_command: Option<String>,
}

impl InputArgs {
    /// Whether any input was given on the command line.
    pub fn is_empty(&self) -> bool {
        self.draft.is_none()
            && self.references.is_empty()
            && self.proteins.is_none()
            && self.proteomes.is_empty()
            && self.genomes.is_empty()
            && self.targets.is_empty()
    }

    pub fn to_request(
        &self,
        run_dir: PathBuf,
        force: bool,
    ) -> Result<InitRequest, PipelineError> {
        let draft = self
            .draft
            .clone()
            .ok_or_else(|| PipelineError::Config("--draft is required".to_string()))?;
        let proteins = self
            .proteins
            .clone()
            .ok_or_else(|| PipelineError::Config("--proteins is required".to_string()))?;
        let organisms = self
            .proteomes
            .iter()
            .map(|entry| (entry, SequenceKind::Protein))
            .chain(self.genomes.iter().map(|entry| (entry, SequenceKind::Nucleotide)))
            .map(|((id, path), kind)| OrganismConfig {
                id: id.clone(),
                sequences: path.clone(),
                kind,
            })
            .collect();

        let mut thresholds = default_thresholds();
        if let Some(value) = self.min_identity {
            thresholds.min_identity = value;
        }
        if let Some(value) = self.min_coverage {
            thresholds.min_coverage = value;
        }
        if let Some(value) = self.max_evalue {
            thresholds.max_evalue = value;
        }
        let mut dispatch = default_dispatch();
        if let Some(value) = self.max_concurrency {
            dispatch.max_concurrency = value;
        }
        if let Some(value) = self.max_attempts {
            dispatch.max_attempts = value;
        }
        if let Some(value) = self.timeout_secs {
            dispatch.timeout_secs = value;
        }
        let mut tools = default_tools();
        if let Some(value) = &self.solver_command {
            tools.solver = value.clone();
        }
        if let Some(value) = &self.blastp_command {
            tools.blastp = value.clone();
        }
        if let Some(value) = &self.tblastn_command {
            tools.tblastn = value.clone();
        }

        Ok(InitRequest {
            run_dir,
            draft,
            references: self.references.clone(),
            proteins,
            organisms,
            seeds: self.seeds.clone(),
            targets: self.targets.clone(),
            thresholds,
            dispatch,
            tools,
            force,
        })
    }
}

fn parse_organism_path(raw: &str) -> Result<(String, PathBuf), String> {
    let (id, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ID=FILE, got {raw:?}"))?;
    let id = id.trim();
    if id.is_empty() || path.is_empty() {
        return Err(format!("expected ID=FILE, got {raw:?}"));
    }
    Ok((id.to_string(), PathBuf::from(path)))
}
