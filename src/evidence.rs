//! Evidence aggregation: from alignment hits to a per-candidate verdict.
//!
//! A record supports a candidate when it meets every threshold. The verdict
//! is a total function of the candidate's genes and their records:
//!
//! - `accepted`: some gene has a supporting record;
//! - `rejected`: every gene has records, none supporting;
//! - `uncertain`: anything else (no annotation, failed or empty alignments).
use crate::align::EvidenceRecord;
use crate::run::EvidenceThresholds;
use crate::solver::CandidateReaction;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected,
    Uncertain,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accepted => "accepted",
            Verdict::Rejected => "rejected",
            Verdict::Uncertain => "uncertain",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    MinIdentity,
    MinCoverage,
    MaxEvalue,
}

/// One threshold compared against one record.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CriterionCheck {
    pub criterion: Criterion,
    pub threshold: f64,
    pub observed: f64,
    pub passed: bool,
}

/// Thresholds the best record satisfied or missed.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Rationale {
    pub evidence: String,
    pub checks: Vec<CriterionCheck>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    SupportingEvidence,
    NoSupportingEvidence,
    UnsupportedByAnnotation,
    /// At least one gene has no alignment records (no hits, failed or skipped).
    IncompleteEvidence,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Decision {
    pub reaction: String,
    pub verdict: Verdict,
    pub reason: DecisionReason,
    pub genes: Vec<String>,
    /// Genes with no alignment records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genes_without_results: Vec<String>,
    pub supporting_evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<Rationale>,
}

pub fn check_record(record: &EvidenceRecord, thresholds: &EvidenceThresholds) -> Vec<CriterionCheck> {
    vec![
        CriterionCheck {
            criterion: Criterion::MinIdentity,
            threshold: thresholds.min_identity,
            observed: record.identity,
            passed: record.identity >= thresholds.min_identity,
        },
        CriterionCheck {
            criterion: Criterion::MinCoverage,
            threshold: thresholds.min_coverage,
            observed: record.coverage,
            passed: record.coverage >= thresholds.min_coverage,
        },
        CriterionCheck {
            criterion: Criterion::MaxEvalue,
            threshold: thresholds.max_evalue,
            observed: record.evalue,
            passed: record.evalue <= thresholds.max_evalue,
        },
    ]
}

pub fn is_supporting(record: &EvidenceRecord, thresholds: &EvidenceThresholds) -> bool {
    check_record(record, thresholds)
        .iter()
        .all(|check| check.passed)
}

/// Strongest record first: bitscore, then e-value, identity, id.
fn strength_order(a: &EvidenceRecord, b: &EvidenceRecord) -> Ordering {
    b.bitscore
        .total_cmp(&a.bitscore)
        .then_with(|| a.evalue.total_cmp(&b.evalue))
        .then_with(|| b.identity.total_cmp(&a.identity))
        .then_with(|| a.id.cmp(&b.id))
}

/// Decide one candidate from the closed set of records for its genes.
///
/// Records whose query gene is not one of the candidate's genes are ignored.
pub fn decide(
    candidate: &CandidateReaction,
    evidence: &[EvidenceRecord],
    thresholds: &EvidenceThresholds,
) -> Decision {
    let genes: BTreeSet<&str> = candidate.genes.iter().map(String::as_str).collect();
    let mut relevant: Vec<&EvidenceRecord> = evidence
        .iter()
        .filter(|record| genes.contains(record.query_gene.as_str()))
        .collect();
    relevant.sort_by(|a, b| strength_order(a, b));

    let supporting: Vec<&EvidenceRecord> = relevant
        .iter()
        .copied()
        .filter(|record| is_supporting(record, thresholds))
        .collect();
    let with_results: BTreeSet<&str> = relevant
        .iter()
        .map(|record| record.query_gene.as_str())
        .collect();
    let genes_without_results: Vec<String> = genes
        .iter()
        .filter(|gene| !with_results.contains(*gene))
        .map(|gene| gene.to_string())
        .collect();

    let (verdict, reason) = if genes.is_empty() {
        (Verdict::Uncertain, DecisionReason::UnsupportedByAnnotation)
    } else if !supporting.is_empty() {
        (Verdict::Accepted, DecisionReason::SupportingEvidence)
    } else if genes_without_results.is_empty() {
        (Verdict::Rejected, DecisionReason::NoSupportingEvidence)
    } else {
        (Verdict::Uncertain, DecisionReason::IncompleteEvidence)
    };

    let best = supporting.first().or_else(|| relevant.first());
    Decision {
        reaction: candidate.id.clone(),
        verdict,
        reason,
        genes: candidate.genes.clone(),
        genes_without_results,
        supporting_evidence: supporting.iter().map(|record| record.id.clone()).collect(),
        rationale: best.map(|record| Rationale {
            evidence: record.id.clone(),
            checks: check_record(record, thresholds),
        }),
    }
}

/// Decide every candidate, in candidate order.
pub fn decide_all(
    candidates: &[CandidateReaction],
    evidence: &[EvidenceRecord],
    thresholds: &EvidenceThresholds,
) -> Vec<Decision> {
    candidates
        .iter()
        .map(|candidate| decide(candidate, evidence, thresholds))
        .collect()
}
