//! Gap-filling solver seam and candidate resolution.
//!
//! The solver is an external command that reads the draft network, a repair
//! network, seeds and targets, and reports unproducible targets plus the
//! minimal reaction sets that restore them. Its loosely typed JSON report is
//! normalized here into [`CandidateSet`] before anything else sees it.
use crate::error::{PipelineError, Result};
use crate::network::{MetabolicNetwork, NetworkLibrary};
use crate::util::{first_line, truncate_bytes};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

const MAX_SOLVER_STDERR_BYTES: usize = 4 * 1024;

/// Group id used when the solver reports a single completion.
pub const DEFAULT_GROUP: &str = "completion";

/// Files handed to one solver invocation.
#[derive(Debug, Clone)]
pub struct SolverRequest {
    pub draft: PathBuf,
    pub repair: PathBuf,
    pub seeds: Vec<String>,
    pub targets: Vec<String>,
    /// Scratch directory owned by the caller for seed/target/output files.
    pub workdir: PathBuf,
}

pub trait GapFillSolver {
    fn name(&self) -> &str;

    /// Check the solver can be launched at all.
    fn availability(&self) -> std::result::Result<(), String>;

    fn solve(&self, request: &SolverRequest) -> Result<SolverReport>;
}

/// Raw solver report, keyed the way meneco writes its JSON output.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct SolverReport {
    #[serde(rename = "Unproducible targets", default)]
    pub unproducible_targets: Vec<String>,
    #[serde(rename = "Unreconstructable targets", default)]
    pub unreconstructable_targets: Vec<String>,
    #[serde(rename = "Reconstructable targets", default)]
    pub reconstructable_targets: Vec<String>,
    #[serde(rename = "Essential reactions", default)]
    pub essential_reactions: BTreeMap<String, Vec<String>>,
    #[serde(rename = "One minimal completion", default)]
    pub one_minimal_completion: Vec<String>,
    #[serde(rename = "Intersection of cardinality minimal completions", default)]
    pub intersection: Vec<String>,
    #[serde(rename = "Union of cardinality minimal completions", default)]
    pub union: Vec<String>,
    #[serde(
        rename = "Minimal completions",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub minimal_completions: Option<Vec<RawCompletion>>,
}

/// Per-target completion group, when the solver reports them separately.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RawCompletion {
    pub group: String,
    #[serde(default)]
    pub targets: Vec<String>,
    pub reactions: Vec<String>,
}

impl SolverReport {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| {
            PipelineError::tool("solver", format!("malformed report: {err}"))
        })
    }

    /// Sorted, decoded ids of every essential reaction across targets.
    pub fn essential_reaction_ids(&self) -> Vec<String> {
        decode_all(self.essential_reactions.values().flatten())
    }
}

/// Solver launched from a command template split with shell quoting rules.
#[derive(Debug, Clone)]
pub struct CommandSolver {
    template: String,
}

impl CommandSolver {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    fn argv(&self) -> std::result::Result<Vec<String>, String> {
        let argv = shell_words::split(&self.template)
            .map_err(|err| format!("invalid solver command {:?}: {err}", self.template))?;
        if argv.is_empty() {
            return Err("solver command is empty".to_string());
        }
        Ok(argv)
    }
}

impl GapFillSolver for CommandSolver {
    fn name(&self) -> &str {
        "solver"
    }

    fn availability(&self) -> std::result::Result<(), String> {
        let argv = self.argv()?;
        which::which(&argv[0])
            .map(|_| ())
            .map_err(|_| format!("solver executable {} not found on PATH", argv[0]))
    }

    fn solve(&self, request: &SolverRequest) -> Result<SolverReport> {
        let argv = self.argv().map_err(PipelineError::Config)?;
        let seeds_path = request.workdir.join("seeds.txt");
        let targets_path = request.workdir.join("targets.txt");
        let output_path = request.workdir.join("solver_output.json");
        write_lines(&seeds_path, &request.seeds)?;
        write_lines(&targets_path, &request.targets)?;

        let uses_output = self.template.contains("{output}");
        let substitute = |arg: &str| {
            arg.replace("{draft}", &request.draft.to_string_lossy())
                .replace("{repair}", &request.repair.to_string_lossy())
                .replace("{seeds}", &seeds_path.to_string_lossy())
                .replace("{targets}", &targets_path.to_string_lossy())
                .replace("{output}", &output_path.to_string_lossy())
        };
        let argv: Vec<String> = argv.iter().map(|arg| substitute(arg)).collect();
        info!(program = %argv[0], "invoking gap-filling solver");
        debug!(argv = ?argv, "solver command line");

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(&request.workdir)
            .output()
            .map_err(|err| PipelineError::tool("solver", format!("spawn {}: {err}", argv[0])))?;
        if !output.status.success() {
            let stderr = truncate_bytes(&output.stderr, MAX_SOLVER_STDERR_BYTES);
            return Err(PipelineError::tool(
                "solver",
                format!("{} ({})", output.status, first_line(&stderr)),
            ));
        }
        let text = if uses_output {
            fs::read_to_string(&output_path).map_err(|err| {
                PipelineError::tool(
                    "solver",
                    format!("no report at {}: {err}", output_path.display()),
                )
            })?
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        SolverReport::parse(&text)
    }
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut text = lines.join("\n");
    text.push('\n');
    fs::write(path, text).map_err(|err| PipelineError::io(format!("write {}", path.display()), err))
}

/// Decode an SBML-style coded id: drop the `R_`/`M_` prefix and turn
/// `__NN__` escapes back into the character with code NN.
pub fn decode_coded_id(raw: &str) -> String {
    let body = raw
        .strip_prefix("R_")
        .or_else(|| raw.strip_prefix("M_"))
        .unwrap_or(raw);
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(start) = rest.find("__") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let decoded = after.find("__").and_then(|end| {
            let code = &after[..end];
            if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            code.parse::<u32>()
                .ok()
                .and_then(char::from_u32)
                .map(|ch| (ch, end))
        });
        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("__");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_all<'a>(ids: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    ids.into_iter()
        .map(|id| decode_coded_id(id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// A reference network as seen by the resolver.
#[derive(Debug, Clone)]
pub struct ReferenceNetwork {
    /// Stable label (file stem) recorded as the candidate's source.
    pub label: String,
    pub network: MetabolicNetwork,
}

/// Smallest reaction set restoring producibility of its targets.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CompletionGroup {
    pub id: String,
    pub targets: Vec<String>,
    pub reactions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CandidateReaction {
    pub id: String,
    pub source_network: String,
    pub genes: Vec<String>,
    pub groups: Vec<String>,
}

/// Normalized solver result: groups plus their candidates.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct CandidateSet {
    pub unproducible_targets: Vec<String>,
    pub unreconstructable_targets: Vec<String>,
    pub groups: Vec<CompletionGroup>,
    pub candidates: Vec<CandidateReaction>,
}

impl CandidateSet {
    pub fn group(&self, id: &str) -> Option<&CompletionGroup> {
        self.groups.iter().find(|group| group.id == id)
    }

    pub fn candidate(&self, id: &str) -> Option<&CandidateReaction> {
        self.candidates
            .iter()
            .find(|candidate| candidate.id == id)
    }

    /// Sorted genes of every candidate that has annotations.
    pub fn annotated_genes(&self) -> BTreeSet<String> {
        self.candidates
            .iter()
            .flat_map(|candidate| candidate.genes.iter().cloned())
            .collect()
    }
}

/// Turn a solver report into candidates linked to their annotated genes.
///
/// Fails when a target that needs completion is covered by no group, or when
/// a proposed reaction exists in no reference network.
pub fn resolve_candidates(
    report: &SolverReport,
    references: &[ReferenceNetwork],
    library: &dyn NetworkLibrary,
) -> Result<CandidateSet> {
    let unproducible = decode_all(&report.unproducible_targets);
    let unreconstructable = decode_all(&report.unreconstructable_targets);
    let reconstructable = decode_all(&report.reconstructable_targets);

    let fallback_targets: Vec<String> = if reconstructable.is_empty() {
        unproducible
            .iter()
            .filter(|target| !unreconstructable.contains(target))
            .cloned()
            .collect()
    } else {
        reconstructable.clone()
    };

    let groups = match &report.minimal_completions {
        Some(raw) => {
            let mut groups = Vec::new();
            let mut seen = BTreeSet::new();
            for completion in raw {
                if !seen.insert(completion.group.clone()) {
                    return Err(PipelineError::Resolution(format!(
                        "solver reported group {} twice",
                        completion.group
                    )));
                }
                let mut targets = decode_all(&completion.targets);
                if targets.is_empty() {
                    debug!(
                        group = %completion.group,
                        "group names no targets; using the solver's reconstructable targets"
                    );
                    targets = fallback_targets.clone();
                }
                groups.push(CompletionGroup {
                    id: completion.group.clone(),
                    targets,
                    reactions: decode_all(&completion.reactions),
                });
            }
            groups.sort_by(|a, b| a.id.cmp(&b.id));
            groups
        }
        None if report.one_minimal_completion.is_empty() => Vec::new(),
        None => vec![CompletionGroup {
            id: DEFAULT_GROUP.to_string(),
            targets: fallback_targets.clone(),
            reactions: decode_all(&report.one_minimal_completion),
        }],
    };

    for group in &groups {
        if group.reactions.is_empty() {
            return Err(PipelineError::Resolution(format!(
                "group {} has no reactions",
                group.id
            )));
        }
        if group.targets.is_empty() {
            return Err(PipelineError::Resolution(format!(
                "group {} names no targets and the solver reported none to restore",
                group.id
            )));
        }
    }

    let covered: BTreeSet<&str> = groups
        .iter()
        .flat_map(|group| group.targets.iter().map(String::as_str))
        .collect();
    for target in &unproducible {
        if unreconstructable.contains(target) {
            warn!(target = %target, "solver reports target as unreconstructable");
            continue;
        }
        if !covered.contains(target.as_str()) {
            return Err(PipelineError::Resolution(format!(
                "solver returned no candidates for unproducible target {target}"
            )));
        }
    }

    let mut memberships: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for group in &groups {
        for reaction in &group.reactions {
            memberships
                .entry(reaction.as_str())
                .or_default()
                .push(group.id.clone());
        }
    }

    let mut candidates = Vec::new();
    for (reaction, groups) in memberships {
        let source = references
            .iter()
            .find(|reference| reference.network.reaction(reaction).is_some())
            .ok_or_else(|| {
                PipelineError::Resolution(format!(
                    "candidate {reaction} is not defined in any reference network"
                ))
            })?;
        let genes = library.reaction_genes(&source.network, reaction);
        if genes.is_empty() {
            info!(reaction = %reaction, "candidate has no gene annotation");
        }
        candidates.push(CandidateReaction {
            id: reaction.to_string(),
            source_network: source.label.clone(),
            genes,
            groups,
        });
    }

    Ok(CandidateSet {
        unproducible_targets: unproducible,
        unreconstructable_targets: unreconstructable,
        groups,
        candidates,
    })
}

#[cfg(test)]
#[path = "solver_tests.rs"]
mod tests;
