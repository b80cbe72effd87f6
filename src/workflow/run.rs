//! Composite workflow: CHECK through FILL on an initialized run.
//!
//! Each stage goes through the same precondition and reuse checks as its
//! standalone command, so an interrupted workflow resumes where it stopped.
use super::{Orchestrator, StageOutcome};
use crate::error::StageFailure;
use crate::run::Stage;
use tracing::info;

const WORKFLOW_STAGES: [Stage; 5] = [
    Stage::Check,
    Stage::Files,
    Stage::Blastp,
    Stage::Enrich,
    Stage::Fill,
];

pub(crate) fn run_workflow(
    orch: &Orchestrator,
    on_stage: &mut dyn FnMut(&StageOutcome),
) -> std::result::Result<Vec<StageOutcome>, StageFailure> {
    let mut outcomes = Vec::with_capacity(WORKFLOW_STAGES.len());
    for stage in WORKFLOW_STAGES {
        let outcome = orch.run_stage(stage, None)?;
        on_stage(&outcome);
        outcomes.push(outcome);
    }
    info!(run = %orch.paths().root().display(), "workflow complete");
    Ok(outcomes)
}
