//! Evidence-driven validation of metabolic network gap-filling candidates.
//!
//! A run moves through INIT, CHECK, FILES, BLASTP, ENRICH and FILL; the
//! [`workflow::Orchestrator`] owns stage sequencing and reuse, while the
//! other modules hold the domain logic each stage calls into.
pub mod align;
pub mod cancel;
pub mod cli;
pub mod error;
pub mod evidence;
pub mod fasta;
pub mod merge;
pub mod network;
pub mod run;
pub mod solver;
pub mod store;
pub mod util;
pub mod workflow;
