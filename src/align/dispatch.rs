//! Bounded, retrying dispatch of independent alignment units.
//!
//! One unit is one (organism, reference gene) pair. Units run on a rayon pool
//! sized by `max_concurrency`; results come back in unit order regardless of
//! completion order. A unit that exhausts its retries is recorded as failed
//! and never aborts its siblings.
use super::{parse_hits, AlignFailure, AlignmentJob, AlignmentMode, Aligner, EvidenceRecord, FailureKind};
use crate::cancel::CancellationToken;
use crate::error::{PipelineError, Result};
use crate::fasta::{self, FastaIndex};
use crate::run::DispatchConfig;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// An organism and the sequence file searched for it.
#[derive(Debug, Clone)]
pub struct OrganismTarget {
    pub id: String,
    pub sequences: PathBuf,
    pub mode: AlignmentMode,
}

/// Everything the dispatcher needs: organisms, genes and their sequences.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub organisms: Vec<OrganismTarget>,
    pub genes: BTreeSet<String>,
    pub sequences: FastaIndex,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Completed,
    Failed,
    /// No reference sequence was available for the gene.
    Skipped,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct UnitOutcome {
    pub organism: String,
    pub gene: String,
    pub mode: AlignmentMode,
    pub status: UnitStatus,
    pub attempts: u32,
    pub hits: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub units: Vec<UnitOutcome>,
    pub evidence: Vec<EvidenceRecord>,
}

impl DispatchReport {
    pub fn failures(&self) -> Vec<UnitOutcome> {
        self.units
            .iter()
            .filter(|unit| unit.status != UnitStatus::Completed)
            .cloned()
            .collect()
    }
}

struct Unit<'a> {
    organism: &'a OrganismTarget,
    gene: &'a str,
    query: Option<(PathBuf, usize)>,
}

enum UnitResult {
    Done(UnitOutcome, Vec<EvidenceRecord>),
    Cancelled,
}

/// Run every unit of `plan` and collect outcomes plus parsed evidence.
///
/// Returns [`PipelineError::Cancelled`] when the token fires; nothing from a
/// cancelled dispatch is returned to the caller.
pub fn dispatch(
    aligner: &dyn Aligner,
    plan: &DispatchPlan,
    settings: &DispatchConfig,
    cancel: &CancellationToken,
) -> Result<DispatchReport> {
    let scratch = tempfile::tempdir()
        .map_err(|err| PipelineError::io("create query scratch directory", err))?;
    let mut queries = Vec::with_capacity(plan.genes.len());
    for (idx, gene) in plan.genes.iter().enumerate() {
        let Some(sequence) = plan.sequences.get(gene) else {
            warn!(gene = %gene, "no reference sequence for gene");
            queries.push(None);
            continue;
        };
        let path = scratch.path().join(format!("q{idx}.fasta"));
        fasta::write_record(&path, &format!("q{idx}"), sequence)?;
        queries.push(Some((path, sequence.len())));
    }

    let units: Vec<Unit<'_>> = plan
        .organisms
        .iter()
        .flat_map(|organism| {
            plan.genes
                .iter()
                .zip(queries.iter())
                .map(move |(gene, query)| Unit {
                    organism,
                    gene,
                    query: query.clone(),
                })
        })
        .collect();
    info!(
        units = units.len(),
        max_concurrency = settings.max_concurrency,
        "dispatching alignment units"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.max_concurrency.max(1))
        .build()
        .map_err(|err| PipelineError::Config(format!("build worker pool: {err}")))?;
    let results: Vec<UnitResult> = pool.install(|| {
        units
            .par_iter()
            .map(|unit| run_unit(aligner, unit, settings, cancel))
            .collect()
    });

    if cancel.is_cancelled() {
        warn!("alignment dispatch cancelled; discarding partial results");
        return Err(PipelineError::Cancelled);
    }
    let mut report = DispatchReport::default();
    for result in results {
        match result {
            UnitResult::Done(outcome, evidence) => {
                report.units.push(outcome);
                report.evidence.extend(evidence);
            }
            UnitResult::Cancelled => return Err(PipelineError::Cancelled),
        }
    }
    Ok(report)
}

fn run_unit(
    aligner: &dyn Aligner,
    unit: &Unit<'_>,
    settings: &DispatchConfig,
    cancel: &CancellationToken,
) -> UnitResult {
    let organism = unit.organism;
    let outcome = |status: UnitStatus, attempts: u32, hits: usize, detail: Option<String>| UnitOutcome {
        organism: organism.id.clone(),
        gene: unit.gene.to_string(),
        mode: organism.mode,
        status,
        attempts,
        hits,
        detail,
    };
    let Some((query, query_length)) = &unit.query else {
        return UnitResult::Done(
            outcome(
                UnitStatus::Skipped,
                0,
                0,
                Some("no reference sequence".to_string()),
            ),
            Vec::new(),
        );
    };
    if cancel.is_cancelled() {
        return UnitResult::Cancelled;
    }

    let job = AlignmentJob {
        mode: organism.mode,
        query: query.clone(),
        subject: organism.sequences.clone(),
        evalue: settings.search_evalue,
        timeout: Duration::from_secs(settings.timeout_secs),
    };
    let mut attempt = 0;
    loop {
        attempt += 1;
        debug!(organism = %organism.id, gene = %unit.gene, attempt, "alignment attempt");
        let failure = match aligner.run(&job, cancel) {
            Ok(output) => {
                return match parse_hits(&output, &organism.id, unit.gene, *query_length, organism.mode) {
                    Ok(hits) => UnitResult::Done(
                        outcome(UnitStatus::Completed, attempt, hits.len(), None),
                        hits,
                    ),
                    Err(detail) => {
                        warn!(organism = %organism.id, gene = %unit.gene, %detail, "malformed aligner output");
                        UnitResult::Done(
                            outcome(
                                UnitStatus::Failed,
                                attempt,
                                0,
                                Some(format!("malformed output: {detail}")),
                            ),
                            Vec::new(),
                        )
                    }
                };
            }
            Err(failure) => failure,
        };
        let AlignFailure { kind, detail } = failure;
        match kind {
            FailureKind::Cancelled => return UnitResult::Cancelled,
            FailureKind::Transient if attempt < settings.max_attempts => {
                let backoff = backoff_delay(settings.retry_backoff_ms, attempt);
                warn!(
                    organism = %organism.id,
                    gene = %unit.gene,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    %detail,
                    "transient alignment failure; retrying"
                );
                if sleep_unless_cancelled(backoff, cancel) {
                    return UnitResult::Cancelled;
                }
            }
            _ => {
                warn!(organism = %organism.id, gene = %unit.gene, attempt, %detail, "alignment unit failed");
                return UnitResult::Done(
                    outcome(UnitStatus::Failed, attempt, 0, Some(detail)),
                    Vec::new(),
                );
            }
        }
    }
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at 64x.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(6);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Sleep in short slices; returns true if cancelled meanwhile.
fn sleep_unless_cancelled(total: Duration, cancel: &CancellationToken) -> bool {
    let slice = Duration::from_millis(25);
    let mut remaining = total;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return true;
        }
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining -= step;
    }
    cancel.is_cancelled()
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
