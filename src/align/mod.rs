//! Sequence alignment seam, hit parsing and the dispatcher.
//!
//! The aligner is an external executable. Its tabular output is parsed into
//! [`EvidenceRecord`]s immediately, so scoring never sees raw lines.
mod blast;
mod dispatch;

pub use blast::BlastCommand;
pub use dispatch::{dispatch, DispatchPlan, DispatchReport, OrganismTarget, UnitOutcome, UnitStatus};

use crate::cancel::CancellationToken;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Columns requested from the aligner (`-outfmt`).
pub const OUTFMT_COLUMNS: &str = "qseqid sseqid pident length evalue bitscore";

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMode {
    /// Protein query against a proteome.
    Blastp,
    /// Protein query against a translated genome.
    Tblastn,
}

impl AlignmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlignmentMode::Blastp => "blastp",
            AlignmentMode::Tblastn => "tblastn",
        }
    }
}

impl fmt::Display for AlignmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One aligner invocation.
#[derive(Debug, Clone)]
pub struct AlignmentJob {
    pub mode: AlignmentMode,
    pub query: PathBuf,
    pub subject: PathBuf,
    pub evalue: f64,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth retrying (timeout, signal, resource exhaustion).
    Transient,
    Permanent,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl AlignFailure {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            detail: detail.into(),
        }
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            detail: detail.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            detail: "cancelled".to_string(),
        }
    }
}

/// External aligner; returns raw tabular output on success.
pub trait Aligner: Send + Sync {
    fn availability(&self, mode: AlignmentMode) -> std::result::Result<(), String>;

    fn run(
        &self,
        job: &AlignmentJob,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, AlignFailure>;
}

/// One alignment hit of a reference gene against an organism.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EvidenceRecord {
    /// `<organism>/<gene>/<hit index>`, stable across reruns.
    pub id: String,
    pub query_gene: String,
    pub organism: String,
    pub subject: String,
    pub mode: AlignmentMode,
    pub identity: f64,
    pub length: u64,
    pub coverage: f64,
    pub evalue: f64,
    pub bitscore: f64,
}

/// Parse tabular hits for one unit. Any malformed line fails the whole unit.
pub fn parse_hits(
    output: &str,
    organism: &str,
    gene: &str,
    query_length: usize,
    mode: AlignmentMode,
) -> std::result::Result<Vec<EvidenceRecord>, String> {
    let mut records = Vec::new();
    for (idx, line) in output.lines().enumerate() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() != 6 {
            return Err(format!(
                "line {}: expected 6 tab-separated fields, found {}",
                idx + 1,
                fields.len()
            ));
        }
        let number = |pos: usize, name: &str| {
            fields[pos]
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| format!("line {}: invalid {name} {:?}", idx + 1, fields[pos]))
        };
        let identity = number(2, "pident")?;
        let length = fields[3]
            .parse::<u64>()
            .map_err(|_| format!("line {}: invalid length {:?}", idx + 1, fields[3]))?;
        let evalue = number(4, "evalue")?;
        let bitscore = number(5, "bitscore")?;
        let coverage = if query_length == 0 {
            0.0
        } else {
            (length as f64 / query_length as f64).min(1.0)
        };
        records.push(EvidenceRecord {
            id: format!("{organism}/{gene}/{}", records.len()),
            query_gene: gene.to_string(),
            organism: organism.to_string(),
            subject: fields[1].to_string(),
            mode,
            identity,
            length,
            coverage,
            evalue,
            bitscore,
        });
    }
    Ok(records)
}
