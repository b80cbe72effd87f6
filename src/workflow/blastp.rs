//! BLASTP stage: solver invocation, candidate resolution, alignment dispatch.
//!
//! Nothing is written until dispatch has finished, so a cancelled or failed
//! stage leaves no artifacts behind.
use super::files::{OrganismEntry, ORGANISMS_JSON, REFERENCE_PROTEINS_FASTA};
use super::{StageArtifacts, StageContext};
use crate::align::{dispatch, DispatchPlan, EvidenceRecord, OrganismTarget, UnitStatus};
use crate::error::{PipelineError, Result};
use crate::fasta::FastaIndex;
use crate::run::Stage;
use crate::solver::{resolve_candidates, CandidateSet, SolverRequest};
use crate::store::find_artifact;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use tracing::info;

pub const SOLVER_REPORT_JSON: &str = "solver_report.json";
pub const CANDIDATES_JSON: &str = "candidates.json";
pub const UNITS_JSON: &str = "units.json";
pub const EVIDENCE_JSON: &str = "evidence.json";
pub const FAILURES_JSON: &str = "failures.json";
pub const RXN_PROT_TSV: &str = "rxn_prot.tsv";
pub const BLAST_RESULTS_TSV: &str = "blast_results.tsv";

pub(crate) fn run_blastp(ctx: &StageContext<'_>) -> Result<StageArtifacts> {
    let config = ctx.config;
    let library = ctx.toolbox.network.as_ref();
    let files = ctx.record(Stage::Files)?;
    let fasta_text = ctx
        .store
        .read_text(find_artifact(files, REFERENCE_PROTEINS_FASTA)?)?;
    let sequences = FastaIndex::parse(&fasta_text).map_err(|detail| {
        PipelineError::Precondition(format!("{REFERENCE_PROTEINS_FASTA} is malformed: {detail}"))
    })?;
    let organisms: Vec<OrganismEntry> = ctx.store.read_json(find_artifact(files, ORGANISMS_JSON)?)?;

    // Structural check before handing the draft to the solver.
    library.load(&config.draft_network)?;
    let references = ctx.references()?;

    let scratch = tempfile::tempdir()
        .map_err(|err| PipelineError::io("create solver scratch directory", err))?;
    let repair = match config.reference_networks.as_slice() {
        [single] => single.clone(),
        _ => {
            let networks: Vec<_> = references
                .iter()
                .map(|reference| reference.network.clone())
                .collect();
            let union = crate::network::union_networks("repair", &networks);
            let path = scratch.path().join("repair.json");
            fs::write(&path, library.encode(&union)?)
                .map_err(|err| PipelineError::io(format!("write {}", path.display()), err))?;
            path
        }
    };
    let request = SolverRequest {
        draft: config.draft_network.clone(),
        repair,
        seeds: config.seeds.clone(),
        targets: config.targets.clone(),
        workdir: scratch.path().to_path_buf(),
    };
    if ctx.cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let solved = ctx.toolbox.solver.solve(&request);
    // An interrupt also kills the solver child; report it as a cancellation.
    if ctx.cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let report = solved?;
    let candidates = resolve_candidates(&report, &references, library)?;
    info!(
        groups = candidates.groups.len(),
        candidates = candidates.candidates.len(),
        "resolved solver candidates"
    );

    let plan = DispatchPlan {
        organisms: organisms
            .iter()
            .map(|organism| OrganismTarget {
                id: organism.id.clone(),
                sequences: organism.sequences.clone(),
                mode: organism.mode,
            })
            .collect(),
        genes: candidates.annotated_genes(),
        sequences,
    };
    let dispatched = dispatch(ctx.toolbox.aligner.as_ref(), &plan, &config.dispatch, ctx.cancel)?;
    let failures = dispatched.failures();
    let failed = failures
        .iter()
        .filter(|unit| unit.status == UnitStatus::Failed)
        .count();

    let mut writer = ctx.store.version(Stage::Blastp, ctx.fingerprint);
    writer.write_json(SOLVER_REPORT_JSON, &report)?;
    writer.write_json(CANDIDATES_JSON, &candidates)?;
    writer.write_json(UNITS_JSON, &dispatched.units)?;
    writer.write_json(EVIDENCE_JSON, &dispatched.evidence)?;
    writer.write_json(FAILURES_JSON, &failures)?;
    writer.write_text(RXN_PROT_TSV, &render_rxn_prot(&candidates))?;
    writer.write_text(
        BLAST_RESULTS_TSV,
        &render_blast_results(&candidates, &dispatched.evidence),
    )?;
    Ok(StageArtifacts {
        artifacts: writer.finish(),
        message: Some(format!(
            "{} candidates, {} units, {} failed, {} hits",
            candidates.candidates.len(),
            dispatched.units.len(),
            failed,
            dispatched.evidence.len()
        )),
    })
}

/// Reaction to annotated protein table.
pub(crate) fn render_rxn_prot(candidates: &CandidateSet) -> String {
    let mut out = String::from("reaction\tprotein_count\tproteins\n");
    for candidate in &candidates.candidates {
        let _ = writeln!(
            out,
            "{}\t{}\t{}",
            candidate.id,
            candidate.genes.len(),
            candidate.genes.join(";")
        );
    }
    out
}

/// One row per (reaction, hit), in candidate then unit order.
pub(crate) fn render_blast_results(candidates: &CandidateSet, evidence: &[EvidenceRecord]) -> String {
    let mut by_gene: BTreeMap<&str, Vec<&EvidenceRecord>> = BTreeMap::new();
    for record in evidence {
        by_gene
            .entry(record.query_gene.as_str())
            .or_default()
            .push(record);
    }
    let mut out = String::from(
        "reaction\tprotein\torganism\tsubject\tevalue\tbitscore\tidentity\tlength\tmethod\n",
    );
    for candidate in &candidates.candidates {
        for gene in &candidate.genes {
            for record in by_gene.get(gene.as_str()).into_iter().flatten() {
                let _ = writeln!(
                    out,
                    "{}\t{}\t{}\t{}\t{:e}\t{}\t{}\t{}\t{}",
                    candidate.id,
                    gene,
                    record.organism,
                    record.subject,
                    record.evalue,
                    record.bitscore,
                    record.identity,
                    record.length,
                    record.mode
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::AlignmentMode;
    use crate::solver::CandidateReaction;

    #[test]
    fn tables_list_candidates_and_hits() {
        let candidates = CandidateSet {
            candidates: vec![
                CandidateReaction {
                    id: "R1".to_string(),
                    source_network: "metacyc".to_string(),
                    genes: vec!["P1".to_string(), "P2".to_string()],
                    groups: vec!["completion".to_string()],
                },
                CandidateReaction {
                    id: "R2".to_string(),
                    source_network: "metacyc".to_string(),
                    genes: Vec::new(),
                    groups: vec!["completion".to_string()],
                },
            ],
            ..CandidateSet::default()
        };
        let evidence = vec![EvidenceRecord {
            id: "sp/P2/0".to_string(),
            query_gene: "P2".to_string(),
            organism: "sp".to_string(),
            subject: "sp_0001".to_string(),
            mode: AlignmentMode::Tblastn,
            identity: 98.0,
            length: 90,
            coverage: 0.9,
            evalue: 1e-50,
            bitscore: 200.5,
        }];
        assert_eq!(
            render_rxn_prot(&candidates),
            "reaction\tprotein_count\tproteins\nR1\t2\tP1;P2\nR2\t0\t\n"
        );
        let table = render_blast_results(&candidates, &evidence);
        let rows: Vec<&str> = table.lines().skip(1).collect();
        assert_eq!(rows, vec!["R1\tP2\tsp\tsp_0001\t1e-50\t200.5\t98\t90\ttblastn"]);
    }
}
