//! CHECK stage: external tools and declared inputs are usable.
//!
//! Unmet checks fail the stage before anything is written.
use super::{StageArtifacts, StageContext};
use crate::align::AlignmentMode;
use crate::error::{PipelineError, Result};
use crate::run::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};

pub const CHECK_JSON: &str = "check.json";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CheckItem {
    pub name: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CheckReport {
    pub checks: Vec<CheckItem>,
}

impl CheckReport {
    pub fn failures(&self) -> Vec<&CheckItem> {
        self.checks.iter().filter(|item| !item.ok).collect()
    }
}

fn item(name: String, result: std::result::Result<(), String>) -> CheckItem {
    match result {
        Ok(()) => CheckItem {
            name,
            ok: true,
            detail: None,
        },
        Err(detail) => CheckItem {
            name,
            ok: false,
            detail: Some(detail),
        },
    }
}

fn file_present(path: &Path) -> std::result::Result<(), String> {
    if path.is_file() {
        Ok(())
    } else {
        Err(format!("{} not found", path.display()))
    }
}

pub(crate) fn build_report(ctx: &StageContext<'_>) -> CheckReport {
    let config = ctx.config;
    let mut checks = vec![item(
        format!("tool:{}", ctx.toolbox.solver.name()),
        ctx.toolbox.solver.availability(),
    )];
    let modes: BTreeSet<AlignmentMode> = config
        .organisms
        .iter()
        .map(|organism| organism.kind.alignment_mode())
        .collect();
    for mode in modes {
        checks.push(item(
            format!("tool:{mode}"),
            ctx.toolbox.aligner.availability(mode),
        ));
    }
    checks.push(item(
        "input:draft_network".to_string(),
        file_present(&config.draft_network),
    ));
    for (idx, path) in config.reference_networks.iter().enumerate() {
        checks.push(item(format!("input:reference_network[{idx}]"), file_present(path)));
    }
    checks.push(item(
        "input:reference_proteins".to_string(),
        file_present(&config.reference_proteins),
    ));
    for organism in &config.organisms {
        checks.push(item(
            format!("input:organism:{}", organism.id),
            file_present(&organism.sequences),
        ));
    }
    CheckReport { checks }
}

pub(crate) fn run_check(ctx: &StageContext<'_>) -> Result<StageArtifacts> {
    let report = build_report(ctx);
    let failures = report.failures();
    if !failures.is_empty() {
        let summary = failures
            .iter()
            .map(|item| {
                let detail = item.detail.as_deref().unwrap_or("failed");
                warn!(check = %item.name, %detail, "precondition unmet");
                format!("{} ({detail})", item.name)
            })
            .collect::<Vec<_>>()
            .join("; ");
        return Err(PipelineError::Precondition(format!(
            "unmet preconditions: {summary}"
        )));
    }
    debug!(checks = report.checks.len(), "all preconditions met");
    let mut writer = ctx.store.version(Stage::Check, ctx.fingerprint);
    writer.write_json(CHECK_JSON, &report)?;
    Ok(StageArtifacts {
        artifacts: writer.finish(),
        message: None,
    })
}
