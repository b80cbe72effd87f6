//! ENRICH stage: per-candidate verdicts and per-group merge checks.
//!
//! `enrich --group G` writes one group report and records it as partial
//! progress; the stage counts as complete once every group has a report.
use super::blastp::{CANDIDATES_JSON, EVIDENCE_JSON};
use super::{StageArtifacts, StageContext};
use crate::align::EvidenceRecord;
use crate::error::{PipelineError, Result};
use crate::evidence::{decide_all, Decision, Verdict};
use crate::merge::{merge_accepted, GroupCheck, ProvenanceEntry};
use crate::network::MetabolicNetwork;
use crate::run::{ArtifactRef, PartialEnrich, RunManifest, Stage, StageRecord};
use crate::solver::{CandidateSet, CompletionGroup, ReferenceNetwork};
use crate::store::{find_artifact, VersionWriter};
use crate::util::now_epoch_ms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

pub const DECISIONS_JSON: &str = "decisions.json";

/// Review unit for one minimal-completion group.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GroupReport {
    pub group: String,
    pub targets: Vec<String>,
    pub decisions: Vec<Decision>,
    pub check: GroupCheck,
    pub provenance: Vec<ProvenanceEntry>,
}

pub(crate) struct GroupProgress {
    group: String,
    decisions: ArtifactRef,
    report: ArtifactRef,
    all_groups: Vec<String>,
}

struct EnrichInputs {
    candidates: CandidateSet,
    decisions: Vec<Decision>,
    draft: MetabolicNetwork,
    references: Vec<ReferenceNetwork>,
}

fn load_inputs(ctx: &StageContext<'_>) -> Result<EnrichInputs> {
    let blastp = ctx.record(Stage::Blastp)?;
    let candidates: CandidateSet = ctx.store.read_json(find_artifact(blastp, CANDIDATES_JSON)?)?;
    let evidence: Vec<EvidenceRecord> = ctx.store.read_json(find_artifact(blastp, EVIDENCE_JSON)?)?;
    // The aggregator only starts once the whole evidence set is closed.
    let decisions = decide_all(&candidates.candidates, &evidence, &ctx.config.thresholds);
    let draft = ctx.toolbox.network.load(&ctx.config.draft_network)?;
    let references = ctx.references()?;
    Ok(EnrichInputs {
        candidates,
        decisions,
        draft,
        references,
    })
}

fn group_report(ctx: &StageContext<'_>, inputs: &EnrichInputs, group: &CompletionGroup) -> GroupReport {
    let outcome = merge_accepted(
        &inputs.draft,
        &inputs.candidates,
        &[group],
        &inputs.decisions,
        &inputs.references,
        &ctx.config.seeds,
        ctx.toolbox.network.as_ref(),
    );
    let decisions = inputs
        .decisions
        .iter()
        .filter(|decision| group.reactions.contains(&decision.reaction))
        .cloned()
        .collect();
    GroupReport {
        group: group.id.clone(),
        targets: group.targets.clone(),
        decisions,
        check: outcome.groups.into_iter().next().unwrap_or_else(|| GroupCheck {
            group: group.id.clone(),
            targets: group.targets.clone(),
            unproducible_targets: Vec::new(),
            accepted_reactions: Vec::new(),
            confirmed: true,
        }),
        provenance: outcome.provenance.into_values().collect(),
    }
}

/// Relative artifact name for a group report; ids are made path-safe.
pub fn group_file_name(group: &str) -> String {
    let safe: String = group
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!("groups/{safe}.json")
}

fn write_group(
    writer: &mut VersionWriter<'_>,
    ctx: &StageContext<'_>,
    inputs: &EnrichInputs,
    group: &CompletionGroup,
) -> Result<ArtifactRef> {
    let report = group_report(ctx, inputs, group);
    info!(
        group = %group.id,
        confirmed = report.check.confirmed,
        accepted = report.check.accepted_reactions.len(),
        "group enriched"
    );
    writer.write_json(&group_file_name(&group.id), &report)
}

fn verdict_summary(decisions: &[Decision]) -> String {
    let count = |verdict: Verdict| {
        decisions
            .iter()
            .filter(|decision| decision.verdict == verdict)
            .count()
    };
    format!(
        "accepted={} rejected={} uncertain={}",
        count(Verdict::Accepted),
        count(Verdict::Rejected),
        count(Verdict::Uncertain)
    )
}

pub(crate) fn run_enrich(ctx: &StageContext<'_>) -> Result<StageArtifacts> {
    let inputs = load_inputs(ctx)?;
    let mut writer = ctx.store.version(Stage::Enrich, ctx.fingerprint);
    writer.write_json(DECISIONS_JSON, &inputs.decisions)?;
    for group in &inputs.candidates.groups {
        write_group(&mut writer, ctx, &inputs, group)?;
    }
    Ok(StageArtifacts {
        artifacts: writer.finish(),
        message: Some(verdict_summary(&inputs.decisions)),
    })
}

pub(crate) fn run_enrich_group(ctx: &StageContext<'_>, group: &str) -> Result<GroupProgress> {
    let inputs = load_inputs(ctx)?;
    let selected = inputs.candidates.group(group).ok_or_else(|| {
        let known: Vec<&str> = inputs
            .candidates
            .groups
            .iter()
            .map(|known_group| known_group.id.as_str())
            .collect();
        PipelineError::Precondition(format!(
            "unknown completion group {group} (known: {})",
            if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            }
        ))
    })?;
    let mut writer = ctx.store.version(Stage::Enrich, ctx.fingerprint);
    let decisions = writer.write_json(DECISIONS_JSON, &inputs.decisions)?;
    let report = write_group(&mut writer, ctx, &inputs, selected)?;
    Ok(GroupProgress {
        group: group.to_string(),
        decisions,
        report,
        all_groups: inputs
            .candidates
            .groups
            .iter()
            .map(|known_group| known_group.id.clone())
            .collect(),
    })
}

/// Fold one group's report into the manifest, completing the stage once
/// every group is covered.
pub(crate) fn record_group(manifest: &mut RunManifest, fingerprint: &str, progress: GroupProgress) {
    let mut partial = match manifest.partial_enrich.take() {
        Some(partial) if partial.fingerprint == fingerprint => partial,
        _ => PartialEnrich {
            fingerprint: fingerprint.to_string(),
            decisions: progress.decisions.clone(),
            groups: BTreeMap::new(),
        },
    };
    partial.decisions = progress.decisions;
    partial.groups.insert(progress.group, progress.report);

    if progress
        .all_groups
        .iter()
        .all(|group| partial.groups.contains_key(group))
    {
        let mut artifacts = vec![partial.decisions.clone()];
        artifacts.extend(
            progress
                .all_groups
                .iter()
                .filter_map(|group| partial.groups.get(group).cloned()),
        );
        manifest.complete(
            Stage::Enrich,
            StageRecord {
                fingerprint: fingerprint.to_string(),
                completed_at_epoch_ms: now_epoch_ms(),
                artifacts,
            },
        );
    } else {
        manifest.stages.remove(&Stage::Enrich);
        manifest.stages.remove(&Stage::Fill);
        manifest.partial_enrich = Some(partial);
    }
}
