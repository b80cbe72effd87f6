//! Run status: which stages completed, and whether their records still
//! match the current inputs and on-disk artifacts.
//!
//! Status never writes to the run directory.
use super::expected_fingerprints;
use crate::error::Result;
use crate::run::{
    ensure_run_root, load_config, load_manifest, RunPaths, RunState, Stage,
};
use crate::store::ArtifactStore;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct StageStatus {
    pub stage: Stage,
    pub completed: bool,
    /// Recorded fingerprint equals the one current inputs produce.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fresh: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts_valid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StageStatus {
    fn usable(&self) -> bool {
        self.completed && self.fresh == Some(true) && self.artifacts_valid == Some(true)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub run_id: String,
    pub run_dir: String,
    pub state: RunState,
    pub stages: Vec<StageStatus>,
    /// Groups enriched so far when enrich ran group by group.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enriched_groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
}

impl StatusReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "run {} ({})", self.run_id, self.run_dir);
        let _ = writeln!(out, "state: {}", state_label(self.state));
        for status in &self.stages {
            let label = if !status.completed {
                "pending"
            } else if status.artifacts_valid == Some(false) {
                "invalid"
            } else if status.fresh != Some(true) {
                "stale"
            } else {
                "done"
            };
            let _ = write!(out, "  {:<7} {label}", status.stage.as_str());
            if let Some(fingerprint) = &status.fingerprint {
                let _ = write!(out, " {}", &fingerprint[..fingerprint.len().min(16)]);
            }
            if let Some(detail) = &status.detail {
                let _ = write!(out, " ({detail})");
            }
            out.push('\n');
        }
        if !self.enriched_groups.is_empty() {
            let _ = writeln!(out, "enriched groups: {}", self.enriched_groups.join(", "));
        }
        match &self.next_action {
            Some(action) => {
                let _ = writeln!(out, "next: {action}");
            }
            None => out.push_str("next: nothing to do\n"),
        }
        out
    }
}

fn state_label(state: RunState) -> &'static str {
    match state {
        RunState::Uninitialized => "UNINITIALIZED",
        RunState::InitDone => "INIT_DONE",
        RunState::CheckDone => "CHECK_DONE",
        RunState::FilesDone => "FILES_DONE",
        RunState::BlastpDone => "BLASTP_DONE",
        RunState::EnrichDone => "ENRICH_DONE",
        RunState::FillDone => "FILL_DONE",
    }
}

pub fn run_status(run_dir: &Path) -> Result<StatusReport> {
    let root = ensure_run_root(run_dir, false)?;
    let config = load_config(&root)?;
    let manifest = load_manifest(&root)?;
    let store = ArtifactStore::new(RunPaths::new(root.clone()));

    let mut stages = Vec::with_capacity(Stage::ALL.len());
    for stage in Stage::ALL {
        let Some(record) = manifest.stages.get(&stage) else {
            stages.push(StageStatus {
                stage,
                completed: false,
                fresh: None,
                artifacts_valid: None,
                fingerprint: None,
                detail: None,
            });
            continue;
        };
        let mut detail = None;
        let fresh = match expected_fingerprints(&config, stage) {
            Ok(expected) => Some(expected.get(&stage) == Some(&record.fingerprint)),
            Err(err) => {
                detail = Some(err.to_string());
                None
            }
        };
        let artifacts_valid = match store.verify_record(record) {
            Ok(()) => true,
            Err(reason) => {
                detail.get_or_insert(reason);
                false
            }
        };
        stages.push(StageStatus {
            stage,
            completed: true,
            fresh,
            artifacts_valid: Some(artifacts_valid),
            fingerprint: Some(record.fingerprint.clone()),
            detail,
        });
    }

    let next_action = stages
        .iter()
        .find(|status| !status.usable())
        .map(|status| match status.stage {
            Stage::Init => format!("gapval init --run-dir {} --force ...", root.display()),
            stage => format!("gapval {stage} --run-dir {}", root.display()),
        });
    let enriched_groups = manifest
        .partial_enrich
        .as_ref()
        .map(|partial| partial.groups.keys().cloned().collect())
        .unwrap_or_default();

    Ok(StatusReport {
        run_id: manifest.run_id.clone(),
        run_dir: root.display().to_string(),
        state: manifest.state(),
        stages,
        enriched_groups,
        next_action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{
        default_dispatch, default_thresholds, default_tools, write_config, write_manifest,
        OrganismConfig, RunConfig, RunManifest, SequenceKind, StageRecord, CONFIG_SCHEMA_VERSION,
        MANIFEST_SCHEMA_VERSION,
    };
    use crate::workflow::init_fingerprint;
    use std::collections::BTreeMap;

    fn setup(dir: &Path) -> RunConfig {
        let config = RunConfig {
            schema_version: CONFIG_SCHEMA_VERSION,
            run_id: "r1".to_string(),
            draft_network: dir.join("draft.json"),
            reference_networks: vec![dir.join("ref.json")],
            reference_proteins: dir.join("proteins.fasta"),
            organisms: vec![OrganismConfig {
                id: "sp".to_string(),
                sequences: dir.join("sp.faa"),
                kind: SequenceKind::Protein,
            }],
            seeds: Vec::new(),
            targets: vec!["T".to_string()],
            thresholds: default_thresholds(),
            dispatch: default_dispatch(),
            tools: default_tools(),
        };
        let mut stages = BTreeMap::new();
        stages.insert(
            Stage::Init,
            StageRecord {
                fingerprint: init_fingerprint(&config),
                completed_at_epoch_ms: 0,
                artifacts: Vec::new(),
            },
        );
        stages.insert(
            Stage::Check,
            StageRecord {
                fingerprint: "outdated".to_string(),
                completed_at_epoch_ms: 0,
                artifacts: Vec::new(),
            },
        );
        write_config(dir, &config).expect("config");
        write_manifest(
            dir,
            &RunManifest {
                schema_version: MANIFEST_SCHEMA_VERSION,
                run_id: "r1".to_string(),
                stages,
                partial_enrich: None,
            },
        )
        .expect("manifest");
        config
    }

    #[test]
    fn stale_stage_is_the_next_action() {
        let dir = tempfile::tempdir().expect("tempdir");
        setup(dir.path());
        let report = run_status(dir.path()).expect("status");
        assert_eq!(report.state, RunState::CheckDone);
        assert_eq!(report.stages[0].fresh, Some(true));
        assert_eq!(report.stages[1].fresh, Some(false));
        assert!(!report.stages[2].completed);
        let next = report.next_action.as_deref().expect("next action");
        assert!(next.starts_with("gapval check --run-dir"), "{next}");
        let text = report.render_text();
        assert!(text.contains("state: CHECK_DONE"));
        assert!(text.contains("check   stale"));
    }

    #[test]
    fn status_requires_an_initialized_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = run_status(dir.path()).expect_err("uninitialized");
        assert_eq!(err.kind(), "PreconditionError");
    }
}
