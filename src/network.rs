//! Metabolic network model and the library seam used by resolver and merger.
//!
//! Networks are read from a JSON document of the form
//! `{"id": "...", "reactions": {"R1": {"reactants": [...], "products": [...],
//! "reversible": false, "genes": [...]}}}`. Structural queries (gene lookup,
//! producibility, reaction insertion) go through [`NetworkLibrary`] so the
//! pipeline never depends on one file format.
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// One metabolite with its stoichiometric coefficient.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Participant {
    pub metabolite: String,
    #[serde(default = "default_stoichiometry")]
    pub stoichiometry: f64,
}

fn default_stoichiometry() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Reaction {
    #[serde(default)]
    pub reactants: Vec<Participant>,
    #[serde(default)]
    pub products: Vec<Participant>,
    #[serde(default)]
    pub reversible: bool,
    /// Genes or protein ids annotated as catalyzing the reaction.
    #[serde(default)]
    pub genes: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetabolicNetwork {
    pub id: String,
    #[serde(default)]
    pub reactions: BTreeMap<String, Reaction>,
}

impl MetabolicNetwork {
    pub fn reaction(&self, id: &str) -> Option<&Reaction> {
        self.reactions.get(id)
    }
}

/// Structural operations over networks.
pub trait NetworkLibrary: Send + Sync {
    fn load(&self, path: &Path) -> Result<MetabolicNetwork>;

    /// Serialize a network to the library's file format.
    fn encode(&self, network: &MetabolicNetwork) -> Result<Vec<u8>>;

    /// Genes annotated on a reaction, sorted and deduplicated.
    fn reaction_genes(&self, network: &MetabolicNetwork, reaction: &str) -> Vec<String>;

    /// Targets not producible from `seeds` in `network`.
    fn unproducible(
        &self,
        network: &MetabolicNetwork,
        seeds: &[String],
        targets: &[String],
    ) -> BTreeSet<String>;

    /// Insert a reaction, keeping its stoichiometry and directionality.
    fn add_reaction(
        &self,
        network: &mut MetabolicNetwork,
        id: &str,
        reaction: &Reaction,
    ) -> std::result::Result<(), String>;
}

/// Default library for the JSON network format.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonNetworkLibrary;

impl NetworkLibrary for JsonNetworkLibrary {
    fn load(&self, path: &Path) -> Result<MetabolicNetwork> {
        let bytes = fs::read(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                PipelineError::Precondition(format!("network {} not found", path.display()))
            } else {
                PipelineError::io(format!("read network {}", path.display()), err)
            }
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|err| PipelineError::json(format!("parse network {}", path.display()), err))
    }

    fn encode(&self, network: &MetabolicNetwork) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(network)
            .map_err(|err| PipelineError::json(format!("serialize network {}", network.id), err))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn reaction_genes(&self, network: &MetabolicNetwork, reaction: &str) -> Vec<String> {
        let Some(reaction) = network.reaction(reaction) else {
            return Vec::new();
        };
        reaction
            .genes
            .iter()
            .map(|gene| gene.trim())
            .filter(|gene| !gene.is_empty())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn unproducible(
        &self,
        network: &MetabolicNetwork,
        seeds: &[String],
        targets: &[String],
    ) -> BTreeSet<String> {
        let scope = expand_scope(network, seeds);
        targets
            .iter()
            .filter(|target| !scope.contains(target.as_str()))
            .cloned()
            .collect()
    }

    fn add_reaction(
        &self,
        network: &mut MetabolicNetwork,
        id: &str,
        reaction: &Reaction,
    ) -> std::result::Result<(), String> {
        if network.reactions.contains_key(id) {
            return Err(format!("reaction {id} already present in {}", network.id));
        }
        if reaction.reactants.is_empty() && reaction.products.is_empty() {
            return Err(format!("reaction {id} has no participants"));
        }
        network.reactions.insert(id.to_string(), reaction.clone());
        Ok(())
    }
}

/// Metabolites reachable from `seeds` by network expansion.
///
/// A reaction fires once all of its reactants are in scope; reversible
/// reactions also fire backwards once all products are in scope.
pub fn expand_scope(network: &MetabolicNetwork, seeds: &[String]) -> BTreeSet<String> {
    let mut scope: BTreeSet<String> = seeds.iter().cloned().collect();
    let mut fired: BTreeSet<(&str, bool)> = BTreeSet::new();
    loop {
        let mut grew = false;
        for (id, reaction) in &network.reactions {
            let directions: &[bool] = if reaction.reversible {
                &[true, false]
            } else {
                &[true]
            };
            for &forward in directions {
                if fired.contains(&(id.as_str(), forward)) {
                    continue;
                }
                let (inputs, outputs) = if forward {
                    (&reaction.reactants, &reaction.products)
                } else {
                    (&reaction.products, &reaction.reactants)
                };
                if inputs
                    .iter()
                    .all(|participant| scope.contains(&participant.metabolite))
                {
                    fired.insert((id.as_str(), forward));
                    for participant in outputs {
                        grew |= scope.insert(participant.metabolite.clone());
                    }
                }
            }
        }
        if !grew {
            return scope;
        }
    }
}

/// Union of reference networks; the first network defining a reaction wins.
pub fn union_networks(id: &str, networks: &[MetabolicNetwork]) -> MetabolicNetwork {
    let mut reactions = BTreeMap::new();
    for network in networks {
        for (reaction_id, reaction) in &network.reactions {
            reactions
                .entry(reaction_id.clone())
                .or_insert_with(|| reaction.clone());
        }
    }
    MetabolicNetwork {
        id: id.to_string(),
        reactions,
    }
}
