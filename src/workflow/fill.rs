//! FILL stage: the enriched network, its provenance and a solver recap.
use super::blastp::{CANDIDATES_JSON, SOLVER_REPORT_JSON};
use super::enrich::DECISIONS_JSON;
use super::{StageArtifacts, StageContext};
use crate::error::Result;
use crate::evidence::Decision;
use crate::merge::{merge_accepted, GroupCheck, MergeFlag, ProvenanceEntry};
use crate::run::Stage;
use crate::solver::{decode_coded_id, CandidateSet, CompletionGroup, SolverReport};
use crate::store::find_artifact;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::warn;

pub const NETWORK_JSON: &str = "network.json";
pub const PROVENANCE_JSON: &str = "provenance.json";
pub const STATS_TSV: &str = "stats.tsv";

/// Provenance for every accepted reaction plus the per-group checks.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FillProvenance {
    pub draft_network: String,
    pub reactions: BTreeMap<String, ProvenanceEntry>,
    pub groups: Vec<GroupCheck>,
}

pub(crate) fn run_fill(ctx: &StageContext<'_>) -> Result<StageArtifacts> {
    let blastp = ctx.record(Stage::Blastp)?;
    let enrich = ctx.record(Stage::Enrich)?;
    let candidates: CandidateSet = ctx.store.read_json(find_artifact(blastp, CANDIDATES_JSON)?)?;
    let report: SolverReport = ctx.store.read_json(find_artifact(blastp, SOLVER_REPORT_JSON)?)?;
    let decisions: Vec<Decision> = ctx.store.read_json(find_artifact(enrich, DECISIONS_JSON)?)?;
    let library = ctx.toolbox.network.as_ref();
    let draft = library.load(&ctx.config.draft_network)?;
    let references = ctx.references()?;

    let groups: Vec<&CompletionGroup> = candidates.groups.iter().collect();
    let outcome = merge_accepted(
        &draft,
        &candidates,
        &groups,
        &decisions,
        &references,
        &ctx.config.seeds,
        library,
    );

    let mut unconfirmed = 0usize;
    let mut refused = 0usize;
    for entry in outcome.provenance.values() {
        for flag in &entry.flags {
            match flag {
                MergeFlag::ProducibilityUnconfirmed => {
                    unconfirmed += 1;
                    warn!(reaction = %entry.reaction, "evidence-accepted but producibility-unconfirmed");
                }
                MergeFlag::AddFailed(detail) => {
                    refused += 1;
                    warn!(reaction = %entry.reaction, %detail, "accepted reaction not merged");
                }
            }
        }
    }

    let added = outcome.added_reactions().len();
    let provenance = FillProvenance {
        draft_network: draft.id.clone(),
        reactions: outcome.provenance,
        groups: outcome.groups,
    };
    let mut writer = ctx.store.version(Stage::Fill, ctx.fingerprint);
    writer.write_bytes(NETWORK_JSON, &library.encode(&outcome.network)?)?;
    writer.write_json(PROVENANCE_JSON, &provenance)?;
    writer.write_text(STATS_TSV, &render_stats(&report))?;
    Ok(StageArtifacts {
        artifacts: writer.finish(),
        message: Some(format!(
            "added={added} producibility_unconfirmed={unconfirmed} refused={refused}"
        )),
    })
}

/// Counts and lists of the solver's target and reaction sets.
pub(crate) fn render_stats(report: &SolverReport) -> String {
    let decode = |ids: &[String]| -> Vec<String> {
        ids.iter().map(|id| decode_coded_id(id)).collect()
    };
    let rows = [
        ("Not producible", decode(&report.unproducible_targets)),
        ("Not reconstructable", decode(&report.unreconstructable_targets)),
        ("Reconstructable", decode(&report.reconstructable_targets)),
        ("Essential", report.essential_reaction_ids()),
        ("Minimal", decode(&report.one_minimal_completion)),
        ("Intersection", decode(&report.intersection)),
        ("Union", decode(&report.union)),
    ];
    let mut out = String::from("category\tcount\titems\n");
    for (label, items) in rows {
        let _ = writeln!(out, "{label}\t{}\t{}", items.len(), items.join(", "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_decode_ids_and_merge_essentials() {
        let report: SolverReport = serde_json::from_value(serde_json::json!({
            "Unproducible targets": ["M_TRP"],
            "Reconstructable targets": ["M_TRP"],
            "Essential reactions": {"M_TRP": ["R_RXN__45__1"], "M_OTHER": ["R_RXN__45__1", "R_B"]},
            "One minimal completion": ["R_RXN__45__1", "R_B"]
        }))
        .expect("report");
        let stats = render_stats(&report);
        let lines: Vec<&str> = stats.lines().collect();
        assert_eq!(lines[0], "category\tcount\titems");
        assert_eq!(lines[1], "Not producible\t1\tTRP");
        assert_eq!(lines[2], "Not reconstructable\t0\t");
        assert_eq!(lines[4], "Essential\t2\tB, RXN-1");
        assert_eq!(lines[5], "Minimal\t2\tRXN-1, B");
    }
}
