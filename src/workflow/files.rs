//! FILES stage: reference-side sequence extracts for alignment.
//!
//! Writes the reference proteins of every gene annotated in the reference
//! networks, a gene index, and the organism table with fixed alignment modes.
use super::{StageArtifacts, StageContext};
use crate::align::AlignmentMode;
use crate::error::{PipelineError, Result};
use crate::fasta::FastaIndex;
use crate::run::{SequenceKind, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

pub const REFERENCE_PROTEINS_FASTA: &str = "reference_proteins.fasta";
pub const GENE_INDEX_JSON: &str = "gene_index.json";
pub const ORGANISMS_JSON: &str = "organisms.json";

/// Annotation and sequence availability for one reference gene.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GeneEntry {
    /// `<network label>:<reaction>` pairs annotating the gene.
    pub reactions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_length: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OrganismEntry {
    pub id: String,
    pub sequences: PathBuf,
    pub kind: SequenceKind,
    pub mode: AlignmentMode,
}

pub(crate) fn run_files(ctx: &StageContext<'_>) -> Result<StageArtifacts> {
    let config = ctx.config;
    let references = ctx.references()?;
    let library = ctx.toolbox.network.as_ref();

    let mut index: BTreeMap<String, GeneEntry> = BTreeMap::new();
    for reference in &references {
        for reaction in reference.network.reactions.keys() {
            for gene in library.reaction_genes(&reference.network, reaction) {
                index
                    .entry(gene)
                    .or_insert_with(|| GeneEntry {
                        reactions: Vec::new(),
                        sequence_length: None,
                    })
                    .reactions
                    .push(format!("{}:{reaction}", reference.label));
            }
        }
    }

    let proteins = FastaIndex::load(&config.reference_proteins)?;
    let mut extract = FastaIndex::default();
    let mut missing = 0usize;
    for (gene, entry) in index.iter_mut() {
        match proteins.get(gene) {
            Some(sequence) => {
                entry.sequence_length = Some(sequence.len());
                extract.insert(gene.clone(), sequence);
            }
            None => missing += 1,
        }
    }
    if missing > 0 {
        warn!(missing, "annotated genes without a reference sequence");
    }

    let mut organisms = Vec::with_capacity(config.organisms.len());
    for organism in &config.organisms {
        if !organism.sequences.is_file() {
            return Err(PipelineError::Precondition(format!(
                "sequences for organism {} not found at {}",
                organism.id,
                organism.sequences.display()
            )));
        }
        organisms.push(OrganismEntry {
            id: organism.id.clone(),
            sequences: organism.sequences.clone(),
            kind: organism.kind,
            mode: organism.kind.alignment_mode(),
        });
    }

    let mut writer = ctx.store.version(Stage::Files, ctx.fingerprint);
    let fasta_bytes = extract
        .to_bytes()
        .map_err(|err| PipelineError::io(format!("render {REFERENCE_PROTEINS_FASTA}"), err))?;
    writer.write_bytes(REFERENCE_PROTEINS_FASTA, &fasta_bytes)?;
    writer.write_json(GENE_INDEX_JSON, &index)?;
    writer.write_json(ORGANISMS_JSON, &organisms)?;
    info!(
        genes = index.len(),
        sequences = extract.len(),
        organisms = organisms.len(),
        "materialized reference files"
    );
    Ok(StageArtifacts {
        artifacts: writer.finish(),
        message: Some(format!(
            "{} annotated genes, {} with sequence",
            index.len(),
            extract.len()
        )),
    })
}
