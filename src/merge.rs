//! Merge accepted candidates into the draft network with provenance.
use crate::evidence::{Decision, Rationale, Verdict};
use crate::network::{MetabolicNetwork, NetworkLibrary};
use crate::solver::{CandidateSet, CompletionGroup, ReferenceNetwork};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case", tag = "flag", content = "detail")]
pub enum MergeFlag {
    /// Accepted on evidence, but its group's targets stay unproducible.
    ProducibilityUnconfirmed,
    /// The network library refused the reaction.
    AddFailed(String),
}

/// Why a reaction is in the enriched network.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProvenanceEntry {
    pub reaction: String,
    pub source_network: String,
    pub groups: Vec<String>,
    pub verdict: Verdict,
    pub supporting_evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<Rationale>,
    pub added: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<MergeFlag>,
}

/// Producibility of one group's targets after the merge.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GroupCheck {
    pub group: String,
    pub targets: Vec<String>,
    pub unproducible_targets: Vec<String>,
    pub accepted_reactions: Vec<String>,
    pub confirmed: bool,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub network: MetabolicNetwork,
    pub provenance: BTreeMap<String, ProvenanceEntry>,
    pub groups: Vec<GroupCheck>,
}

impl MergeOutcome {
    pub fn added_reactions(&self) -> Vec<&str> {
        self.provenance
            .values()
            .filter(|entry| entry.added)
            .map(|entry| entry.reaction.as_str())
            .collect()
    }
}

/// Add the accepted candidates of `groups` to `draft` and re-check each
/// group's targets with the library's reachability test.
///
/// A refused insertion is flagged, not fatal. Reactions of a group whose
/// targets remain unproducible stay in the network, flagged
/// [`MergeFlag::ProducibilityUnconfirmed`].
pub fn merge_accepted(
    draft: &MetabolicNetwork,
    candidates: &CandidateSet,
    groups: &[&CompletionGroup],
    decisions: &[Decision],
    references: &[ReferenceNetwork],
    seeds: &[String],
    library: &dyn NetworkLibrary,
) -> MergeOutcome {
    let decisions: BTreeMap<&str, &Decision> = decisions
        .iter()
        .map(|decision| (decision.reaction.as_str(), decision))
        .collect();
    let accepted: BTreeSet<&str> = groups
        .iter()
        .flat_map(|group| group.reactions.iter())
        .map(String::as_str)
        .filter(|reaction| {
            decisions
                .get(reaction)
                .is_some_and(|decision| decision.verdict == Verdict::Accepted)
        })
        .collect();

    let mut network = draft.clone();
    let mut provenance = BTreeMap::new();
    for reaction in &accepted {
        let Some(candidate) = candidates.candidate(reaction) else {
            continue;
        };
        let Some(decision) = decisions.get(reaction) else {
            continue;
        };
        let definition = references
            .iter()
            .find(|reference| reference.label == candidate.source_network)
            .and_then(|reference| reference.network.reaction(reaction));
        let mut flags = Vec::new();
        let added = match definition {
            Some(definition) => match library.add_reaction(&mut network, reaction, definition) {
                Ok(()) => true,
                Err(detail) => {
                    warn!(reaction = %reaction, %detail, "reaction could not be merged");
                    flags.push(MergeFlag::AddFailed(detail));
                    false
                }
            },
            None => {
                let detail = format!("not found in source network {}", candidate.source_network);
                warn!(reaction = %reaction, %detail, "reaction could not be merged");
                flags.push(MergeFlag::AddFailed(detail));
                false
            }
        };
        provenance.insert(
            reaction.to_string(),
            ProvenanceEntry {
                reaction: reaction.to_string(),
                source_network: candidate.source_network.clone(),
                groups: candidate.groups.clone(),
                verdict: decision.verdict,
                supporting_evidence: decision.supporting_evidence.clone(),
                rationale: decision.rationale.clone(),
                added,
                flags,
            },
        );
    }

    let mut checks = Vec::new();
    for group in groups {
        let unproducible = library.unproducible(&network, seeds, &group.targets);
        let accepted_reactions: Vec<String> = group
            .reactions
            .iter()
            .filter(|reaction| accepted.contains(reaction.as_str()))
            .cloned()
            .collect();
        let confirmed = !group.targets.is_empty() && unproducible.is_empty();
        if !confirmed {
            warn!(
                group = %group.id,
                unproducible = ?unproducible,
                "targets still unproducible after merge"
            );
            for reaction in &accepted_reactions {
                if let Some(entry) = provenance.get_mut(reaction) {
                    if !entry.flags.contains(&MergeFlag::ProducibilityUnconfirmed) {
                        entry.flags.push(MergeFlag::ProducibilityUnconfirmed);
                    }
                }
            }
        }
        checks.push(GroupCheck {
            group: group.id.clone(),
            targets: group.targets.clone(),
            unproducible_targets: unproducible.into_iter().collect(),
            accepted_reactions,
            confirmed,
        });
    }
    for entry in provenance.values_mut() {
        entry.flags.sort();
    }
    info!(
        accepted = accepted.len(),
        groups = checks.len(),
        "merged accepted candidates"
    );

    MergeOutcome {
        network,
        provenance,
        groups: checks,
    }
}

#[cfg(test)]
#[path = "merge_tests.rs"]
mod tests;
