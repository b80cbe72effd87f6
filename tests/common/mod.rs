//! Shared fixtures for integration tests: input files for a small run plus
//! in-process fakes for the solver and the aligner.
#![allow(dead_code)]

use gapval::align::{AlignFailure, AlignmentJob, AlignmentMode, Aligner};
use gapval::cancel::CancellationToken;
use gapval::error::{PipelineError, Result};
use gapval::network::JsonNetworkLibrary;
use gapval::run::{
    default_dispatch, default_thresholds, default_tools, OrganismConfig, SequenceKind,
};
use gapval::solver::{GapFillSolver, SolverReport, SolverRequest};
use gapval::workflow::{run_init, InitRequest, Orchestrator, Toolbox};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const P1_SEQUENCE: &str = "MKTAYIAKQRQISFVKSHFSRQ";
pub const P2_SEQUENCE: &str = "MAAGLLVVTTSSPPQQ";
pub const P3_SEQUENCE: &str = "MSTNPKPQRKTKRNTNRRPQDVKFPGG";

/// Input files for a run whose target `T` needs `R1` (A -> B, gene P1) and
/// `R2` (B -> T, gene P2) from the `metacyc` reference network.
pub struct Fixture {
    pub dir: TempDir,
    pub run_dir: PathBuf,
    pub draft: PathBuf,
    pub request: InitRequest,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let draft = root.join("draft.json");
        write(
            &draft,
            r#"{"id": "draft", "reactions": {
                "R0": {"reactants": [{"metabolite": "S"}], "products": [{"metabolite": "A"}]}
            }}"#,
        );
        let reference = root.join("metacyc.json");
        write(
            &reference,
            r#"{"id": "metacyc", "reactions": {
                "R1": {"reactants": [{"metabolite": "A"}], "products": [{"metabolite": "B"}], "genes": ["P1"]},
                "R2": {"reactants": [{"metabolite": "B"}], "products": [{"metabolite": "T"}], "genes": ["P2"]},
                "R3": {"reactants": [{"metabolite": "S"}], "products": [{"metabolite": "U"}], "genes": ["P3"]}
            }}"#,
        );
        let proteins = root.join("proteins.fasta");
        write(
            &proteins,
            &format!(">P1\n{P1_SEQUENCE}\n>P2\n{P2_SEQUENCE}\n>P3\n{P3_SEQUENCE}\n"),
        );
        let proteome = root.join("sp.faa");
        write(&proteome, ">sp_0001\nMKTAYIAKQRQISFVKSHFSRQ\n");

        let run_dir = root.join("run");
        let mut dispatch = default_dispatch();
        dispatch.retry_backoff_ms = 1;
        let request = InitRequest {
            run_dir: run_dir.clone(),
            draft: draft.clone(),
            references: vec![reference],
            proteins,
            organisms: vec![OrganismConfig {
                id: "sp".to_string(),
                sequences: proteome,
                kind: SequenceKind::Protein,
            }],
            seeds: vec!["S".to_string()],
            targets: vec!["T".to_string()],
            thresholds: default_thresholds(),
            dispatch,
            tools: default_tools(),
            force: false,
        };
        Self {
            dir,
            run_dir,
            draft,
            request,
        }
    }

    /// Add a second organism whose proteome file is `<id>.faa`.
    pub fn add_organism(&mut self, id: &str) {
        let path = self.dir.path().join(format!("{id}.faa"));
        write(&path, ">x_0001\nMSTNPK\n");
        self.request.organisms.push(OrganismConfig {
            id: id.to_string(),
            sequences: path,
            kind: SequenceKind::Protein,
        });
    }

    pub fn init(&self) {
        run_init(&self.request).expect("init");
    }

    pub fn orchestrator(&self, solver: &FakeSolver, aligner: &FakeAligner) -> Orchestrator {
        self.orchestrator_with_cancel(solver, aligner, CancellationToken::new())
    }

    pub fn orchestrator_with_cancel(
        &self,
        solver: &FakeSolver,
        aligner: &FakeAligner,
        cancel: CancellationToken,
    ) -> Orchestrator {
        let toolbox = Toolbox {
            solver: Box::new(solver.clone()),
            aligner: Box::new(aligner.clone()),
            network: Box::new(JsonNetworkLibrary),
        };
        Orchestrator::new(&self.run_dir, toolbox, cancel).expect("orchestrator")
    }

    /// Files under `stages/<stage>/`, relative to it, with their bytes.
    pub fn stage_files(&self, stage: &str) -> BTreeMap<String, Vec<u8>> {
        let base = self.run_dir.join("stages").join(stage);
        let mut out = BTreeMap::new();
        collect_files(&base, &base, &mut out);
        out
    }
}

fn collect_files(base: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries {
        let path = entry.expect("dir entry").path();
        if path.is_dir() {
            collect_files(base, &path, out);
        } else {
            let rel = path
                .strip_prefix(base)
                .expect("relative")
                .to_string_lossy()
                .to_string();
            out.insert(rel, fs::read(&path).expect("read artifact"));
        }
    }
}

pub fn write(path: &Path, text: &str) {
    fs::write(path, text).expect("write fixture file");
}

/// Solver returning a fixed report and counting invocations.
#[derive(Clone)]
pub struct FakeSolver {
    report: SolverReport,
    interrupt: Option<CancellationToken>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeSolver {
    pub fn new(report: serde_json::Value) -> Self {
        Self {
            report: serde_json::from_value(report).expect("solver report"),
            interrupt: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fires `token` and fails the way a solver killed by SIGINT does.
    pub fn interrupted(mut self, token: CancellationToken) -> Self {
        self.interrupt = Some(token);
        self
    }

    /// One group `{R1, R2}` restoring target `T`.
    pub fn single_group() -> Self {
        Self::new(serde_json::json!({
            "Unproducible targets": ["M_T"],
            "Reconstructable targets": ["M_T"],
            "One minimal completion": ["R_R1", "R_R2"]
        }))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GapFillSolver for FakeSolver {
    fn name(&self) -> &str {
        "fake-solver"
    }

    fn availability(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    fn solve(&self, _request: &SolverRequest) -> Result<SolverReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.interrupt {
            token.cancel();
            return Err(PipelineError::tool("solver", "signal: 2 (SIGINT)"));
        }
        Ok(self.report.clone())
    }
}

/// Aligner answering from a table keyed by (organism, query sequence).
///
/// The organism is the subject file stem. Unknown pairs yield no hits.
#[derive(Clone, Default)]
pub struct FakeAligner {
    outputs: Arc<Mutex<BTreeMap<(String, String), std::result::Result<String, AlignFailure>>>>,
    cancel_on_call: Option<CancellationToken>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeAligner {
    pub fn new() -> Self {
        Self::default()
    }

    /// P1 has a 98% identity, 1e-50 hit in `sp`; nothing else hits.
    pub fn p1_supported() -> Self {
        Self::new().with_output("sp", P1_SEQUENCE, "q0\tsp_0001\t98.0\t20\t1e-50\t200.5\n")
    }

    pub fn with_output(self, organism: &str, sequence: &str, output: &str) -> Self {
        self.with_result(organism, sequence, Ok(output.to_string()))
    }

    pub fn with_result(
        self,
        organism: &str,
        sequence: &str,
        result: std::result::Result<String, AlignFailure>,
    ) -> Self {
        self.outputs
            .lock()
            .expect("lock")
            .insert((organism.to_string(), sequence.to_string()), result);
        self
    }

    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Aligner for FakeAligner {
    fn availability(&self, _mode: AlignmentMode) -> std::result::Result<(), String> {
        Ok(())
    }

    fn run(
        &self,
        job: &AlignmentJob,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, AlignFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        if cancel.is_cancelled() {
            return Err(AlignFailure::cancelled());
        }
        let query = fs::read_to_string(&job.query).expect("query file");
        let sequence: String = query
            .lines()
            .filter(|line| !line.starts_with('>'))
            .collect();
        let organism = job
            .subject
            .file_stem()
            .expect("subject stem")
            .to_string_lossy()
            .to_string();
        self.outputs
            .lock()
            .expect("lock")
            .get(&(organism, sequence))
            .cloned()
            .unwrap_or_else(|| Ok(String::new()))
    }
}
