//! End-to-end stage tests driving the orchestrator with in-process fakes.

mod common;

use common::{FakeAligner, FakeSolver, Fixture, P1_SEQUENCE, P2_SEQUENCE, P3_SEQUENCE};
use gapval::align::{AlignFailure, EvidenceRecord, UnitOutcome, UnitStatus};
use gapval::cancel::CancellationToken;
use gapval::evidence::{Decision, DecisionReason, Verdict};
use gapval::merge::MergeFlag;
use gapval::network::MetabolicNetwork;
use gapval::run::{load_manifest, read_history, RunState, Stage};
use gapval::workflow::{FillProvenance, StageVerdict};

fn artifact(fixture: &Fixture, stage: &str, name: &str) -> Vec<u8> {
    let files = fixture.stage_files(stage);
    let matches: Vec<&Vec<u8>> = files
        .iter()
        .filter(|(path, _)| path.ends_with(&format!("/{name}")))
        .map(|(_, bytes)| bytes)
        .collect();
    assert_eq!(matches.len(), 1, "expected one {stage}/{name}, found {}", matches.len());
    matches[0].clone()
}

fn json<T: serde::de::DeserializeOwned>(fixture: &Fixture, stage: &str, name: &str) -> T {
    serde_json::from_slice(&artifact(fixture, stage, name)).expect("parse artifact")
}

fn decision<'a>(decisions: &'a [Decision], reaction: &str) -> &'a Decision {
    decisions
        .iter()
        .find(|decision| decision.reaction == reaction)
        .unwrap_or_else(|| panic!("no decision for {reaction}"))
}

#[test]
fn accepted_reaction_is_flagged_when_its_group_stays_unproducible() {
    let fixture = Fixture::new();
    fixture.init();
    let solver = FakeSolver::single_group();
    let aligner = FakeAligner::p1_supported();
    let orch = fixture.orchestrator(&solver, &aligner);

    let outcomes = orch.workflow(|_| {}).expect("workflow");
    let stages: Vec<Stage> = outcomes.iter().map(|outcome| outcome.stage).collect();
    assert_eq!(
        stages,
        vec![Stage::Check, Stage::Files, Stage::Blastp, Stage::Enrich, Stage::Fill]
    );
    assert!(outcomes
        .iter()
        .all(|outcome| outcome.verdict == StageVerdict::Executed));

    let decisions: Vec<Decision> = json(&fixture, "enrich", "decisions.json");
    let r1 = decision(&decisions, "R1");
    assert_eq!(r1.verdict, Verdict::Accepted);
    assert_eq!(r1.supporting_evidence, vec!["sp/P1/0"]);
    let r2 = decision(&decisions, "R2");
    assert_eq!(r2.verdict, Verdict::Uncertain);
    assert_eq!(r2.reason, DecisionReason::IncompleteEvidence);
    assert_eq!(r2.genes_without_results, vec!["P2"]);

    let provenance: FillProvenance = json(&fixture, "fill", "provenance.json");
    let entry = &provenance.reactions["R1"];
    assert!(entry.added);
    assert_eq!(entry.source_network, "metacyc");
    assert_eq!(entry.flags, vec![MergeFlag::ProducibilityUnconfirmed]);
    assert!(!provenance.reactions.contains_key("R2"));
    assert_eq!(provenance.groups.len(), 1);
    assert!(!provenance.groups[0].confirmed);
    assert_eq!(provenance.groups[0].unproducible_targets, vec!["T"]);

    let network: MetabolicNetwork = json(&fixture, "fill", "network.json");
    let ids: Vec<&str> = network.reactions.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["R0", "R1"]);

    let stats = String::from_utf8(artifact(&fixture, "fill", "stats.tsv")).expect("utf8");
    assert!(stats.contains("Minimal\t2\tR1, R2"), "{stats}");
    let manifest = load_manifest(&fixture.run_dir).expect("manifest");
    assert_eq!(manifest.state(), RunState::FillDone);
}

#[test]
fn unchanged_inputs_reuse_every_stage_without_invoking_tools() {
    let fixture = Fixture::new();
    fixture.init();
    let solver = FakeSolver::single_group();
    let aligner = FakeAligner::p1_supported();
    let orch = fixture.orchestrator(&solver, &aligner);

    orch.workflow(|_| {}).expect("first workflow");
    let before = fixture.stage_files("");
    let aligner_calls = aligner.calls();
    assert_eq!(solver.calls(), 1);
    assert_eq!(aligner_calls, 2);

    let mut reported = Vec::new();
    let outcomes = orch
        .workflow(|outcome| reported.push(outcome.report_line()))
        .expect("second workflow");
    assert!(outcomes
        .iter()
        .all(|outcome| outcome.verdict == StageVerdict::Reused));
    assert_eq!(reported[0], "stage=check verdict=reused");
    assert_eq!(solver.calls(), 1);
    assert_eq!(aligner.calls(), aligner_calls);
    assert_eq!(fixture.stage_files(""), before);

    let history = read_history(&fixture.run_dir).expect("history");
    // init plus two workflows of five stages
    assert_eq!(history.len(), 11);
    assert!(history.iter().skip(6).all(|entry| entry.reused && entry.success));
}

#[test]
fn draft_change_invalidates_blastp_and_later_only() {
    let fixture = Fixture::new();
    fixture.init();
    let solver = FakeSolver::single_group();
    let aligner = FakeAligner::p1_supported();
    let orch = fixture.orchestrator(&solver, &aligner);
    orch.workflow(|_| {}).expect("first workflow");
    let first = load_manifest(&fixture.run_dir).expect("manifest");

    common::write(
        &fixture.draft,
        r#"{"id": "draft", "reactions": {
            "R0": {"reactants": [{"metabolite": "S"}], "products": [{"metabolite": "A"}]},
            "R9": {"reactants": [{"metabolite": "S"}], "products": [{"metabolite": "Z"}]}
        }}"#,
    );

    let blocked = orch.run_stage(Stage::Enrich, None).expect_err("stale blastp");
    assert!(
        blocked.source.to_string().contains("stage blastp is stale"),
        "{}",
        blocked.source
    );

    let outcomes = orch.workflow(|_| {}).expect("second workflow");
    let verdicts: Vec<(Stage, StageVerdict)> = outcomes
        .iter()
        .map(|outcome| (outcome.stage, outcome.verdict))
        .collect();
    assert_eq!(
        verdicts,
        vec![
            (Stage::Check, StageVerdict::Reused),
            (Stage::Files, StageVerdict::Reused),
            (Stage::Blastp, StageVerdict::Executed),
            (Stage::Enrich, StageVerdict::Executed),
            (Stage::Fill, StageVerdict::Executed),
        ]
    );
    assert_eq!(solver.calls(), 2);

    let second = load_manifest(&fixture.run_dir).expect("manifest");
    for stage in [Stage::Check, Stage::Files] {
        assert_eq!(first.stages[&stage].fingerprint, second.stages[&stage].fingerprint);
    }
    assert_ne!(
        first.stages[&Stage::Blastp].fingerprint,
        second.stages[&Stage::Blastp].fingerprint
    );
    let network: MetabolicNetwork = recorded_network(&fixture, &second.stages[&Stage::Fill]);
    assert!(network.reactions.contains_key("R9"));
}

fn recorded_network(fixture: &Fixture, record: &gapval::run::StageRecord) -> MetabolicNetwork {
    let artifact = record
        .artifacts
        .iter()
        .find(|artifact| artifact.path.ends_with("/network.json"))
        .expect("network artifact");
    let bytes = std::fs::read(fixture.run_dir.join(&artifact.path)).expect("read network");
    serde_json::from_slice(&bytes).expect("parse network")
}

#[test]
fn one_failing_unit_does_not_stop_its_siblings() {
    let mut fixture = Fixture::new();
    fixture.add_organism("gx");
    fixture.init();
    let solver = FakeSolver::single_group();
    let aligner = FakeAligner::p1_supported()
        .with_output("gx", P1_SEQUENCE, "not a tabular line\n")
        .with_result(
            "gx",
            P2_SEQUENCE,
            Err(AlignFailure::permanent("database is corrupt")),
        );
    let orch = fixture.orchestrator(&solver, &aligner);
    orch.workflow(|_| {}).expect("workflow");

    let units: Vec<UnitOutcome> = json(&fixture, "blastp", "units.json");
    assert_eq!(units.len(), 4);
    let failures: Vec<UnitOutcome> = json(&fixture, "blastp", "failures.json");
    assert_eq!(failures.len(), 2);
    assert!(failures
        .iter()
        .all(|unit| unit.organism == "gx" && unit.status == UnitStatus::Failed));
    assert_eq!(
        units
            .iter()
            .filter(|unit| unit.status == UnitStatus::Completed)
            .count(),
        2
    );

    let decisions: Vec<Decision> = json(&fixture, "enrich", "decisions.json");
    assert_eq!(decision(&decisions, "R1").verdict, Verdict::Accepted);
    assert_eq!(decision(&decisions, "R2").verdict, Verdict::Uncertain);
}

#[test]
fn evidence_and_decisions_do_not_depend_on_concurrency() {
    let build = |concurrency: usize| {
        let mut fixture = Fixture::new();
        for id in ["gx", "gy", "gz"] {
            fixture.add_organism(id);
        }
        fixture.request.dispatch.max_concurrency = concurrency;
        fixture.init();
        let aligner = FakeAligner::p1_supported()
            .with_output("gy", P2_SEQUENCE, "q1\tgy_7\t35.0\t12\t1e-3\t30.0\n")
            .with_output(
                "gz",
                P1_SEQUENCE,
                "q0\tgz_2\t60.0\t18\t1e-20\t90.0\nq0\tgz_9\t99.0\t22\t1e-60\t250.0\n",
            );
        let orch = fixture.orchestrator(&FakeSolver::single_group(), &aligner);
        orch.workflow(|_| {}).expect("workflow");
        fixture
    };
    let serial = build(1);
    let parallel = build(8);
    for name in ["evidence.json", "units.json", "candidates.json", "blast_results.tsv"] {
        assert_eq!(
            artifact(&serial, "blastp", name),
            artifact(&parallel, "blastp", name),
            "{name} differs"
        );
    }
    assert_eq!(
        artifact(&serial, "enrich", "decisions.json"),
        artifact(&parallel, "enrich", "decisions.json")
    );
    let evidence: Vec<EvidenceRecord> = json(&serial, "blastp", "evidence.json");
    let ids: Vec<&str> = evidence.iter().map(|record| record.id.as_str()).collect();
    assert_eq!(ids, vec!["sp/P1/0", "gy/P2/0", "gz/P1/0", "gz/P1/1"]);
}

#[test]
fn cancelled_blastp_leaves_no_artifacts() {
    let fixture = Fixture::new();
    fixture.init();
    let token = CancellationToken::new();
    let solver = FakeSolver::single_group();
    let aligner = FakeAligner::p1_supported().cancelling(token.clone());
    let orch = fixture.orchestrator_with_cancel(&solver, &aligner, token);

    orch.run_stage(Stage::Check, None).expect("check");
    orch.run_stage(Stage::Files, None).expect("files");
    let failure = orch.run_stage(Stage::Blastp, None).expect_err("cancelled");
    assert_eq!(failure.stage, Stage::Blastp);
    assert_eq!(failure.source.kind(), "Cancelled");
    assert_eq!(failure.source.exit_code(), 130);
    assert!(!fixture.run_dir.join("stages").join("blastp").exists());
    let manifest = load_manifest(&fixture.run_dir).expect("manifest");
    assert_eq!(manifest.state(), RunState::FilesDone);
}

#[test]
fn interrupted_solver_reports_cancellation() {
    let fixture = Fixture::new();
    fixture.init();
    let token = CancellationToken::new();
    let solver = FakeSolver::single_group().interrupted(token.clone());
    let aligner = FakeAligner::p1_supported();
    let orch = fixture.orchestrator_with_cancel(&solver, &aligner, token);

    orch.run_stage(Stage::Check, None).expect("check");
    orch.run_stage(Stage::Files, None).expect("files");
    let failure = orch.run_stage(Stage::Blastp, None).expect_err("cancelled");
    assert_eq!(failure.source.kind(), "Cancelled");
    assert_eq!(failure.source.exit_code(), 130);
    assert_eq!(solver.calls(), 1);
    assert_eq!(aligner.calls(), 0);
    assert!(!fixture.run_dir.join("stages").join("blastp").exists());
}

#[test]
fn groups_can_be_enriched_one_at_a_time() {
    let mut fixture = Fixture::new();
    fixture.request.targets.push("U".to_string());
    fixture.init();
    let solver = FakeSolver::new(serde_json::json!({
        "Unproducible targets": ["M_T", "M_U"],
        "Reconstructable targets": ["M_T", "M_U"],
        "One minimal completion": ["R_R1", "R_R2", "R_R3"],
        "Minimal completions": [
            {"group": "g_t", "targets": ["M_T"], "reactions": ["R_R1", "R_R2"]},
            {"group": "g_u", "targets": ["M_U"], "reactions": ["R_R3"]}
        ]
    }));
    let aligner = FakeAligner::p1_supported().with_output(
        "sp",
        P3_SEQUENCE,
        "q2\tsp_0003\t88.0\t27\t1e-40\t150.0\n",
    );
    let orch = fixture.orchestrator(&solver, &aligner);
    for stage in [Stage::Check, Stage::Files, Stage::Blastp] {
        orch.run_stage(stage, None).expect("stage");
    }

    let first = orch.run_stage(Stage::Enrich, Some("g_t")).expect("enrich g_t");
    assert_eq!(first.verdict, StageVerdict::Executed);
    let manifest = load_manifest(&fixture.run_dir).expect("manifest");
    assert_eq!(manifest.state(), RunState::BlastpDone);
    let partial = manifest.partial_enrich.expect("partial enrich");
    assert_eq!(partial.groups.keys().collect::<Vec<_>>(), vec!["g_t"]);

    let blocked = orch.run_stage(Stage::Fill, None).expect_err("enrich incomplete");
    assert_eq!(blocked.source.kind(), "PreconditionError");

    let again = orch.run_stage(Stage::Enrich, Some("g_t")).expect("enrich g_t again");
    assert_eq!(again.verdict, StageVerdict::Reused);

    let unknown = orch.run_stage(Stage::Enrich, Some("g_x")).expect_err("unknown group");
    assert!(unknown.source.to_string().contains("unknown completion group g_x"));

    orch.run_stage(Stage::Enrich, Some("g_u")).expect("enrich g_u");
    let manifest = load_manifest(&fixture.run_dir).expect("manifest");
    assert_eq!(manifest.state(), RunState::EnrichDone);
    assert!(manifest.partial_enrich.is_none());

    orch.run_stage(Stage::Fill, None).expect("fill");
    let provenance: FillProvenance = json(&fixture, "fill", "provenance.json");
    assert!(provenance.reactions["R3"].flags.is_empty());
    assert_eq!(
        provenance.reactions["R1"].flags,
        vec![MergeFlag::ProducibilityUnconfirmed]
    );
    let confirmed: Vec<(&str, bool)> = provenance
        .groups
        .iter()
        .map(|group| (group.group.as_str(), group.confirmed))
        .collect();
    assert_eq!(confirmed, vec![("g_t", false), ("g_u", true)]);
}

#[test]
fn blastp_before_files_is_a_precondition_failure() {
    let fixture = Fixture::new();
    fixture.init();
    let solver = FakeSolver::single_group();
    let aligner = FakeAligner::p1_supported();
    let orch = fixture.orchestrator(&solver, &aligner);
    orch.run_stage(Stage::Check, None).expect("check");

    let failure = orch.run_stage(Stage::Blastp, None).expect_err("files missing");
    assert_eq!(
        failure.report_line(),
        "stage=blastp verdict=failure kind=PreconditionError \
         cause=stage files has not completed (run `gapval files`)"
    );
    assert_eq!(failure.source.exit_code(), 2);
    assert_eq!(solver.calls(), 0);
}

#[test]
fn uncovered_target_is_a_resolution_error() {
    let fixture = Fixture::new();
    fixture.init();
    let solver = FakeSolver::new(serde_json::json!({
        "Unproducible targets": ["M_T"]
    }));
    let aligner = FakeAligner::new();
    let orch = fixture.orchestrator(&solver, &aligner);
    let failure = orch.workflow(|_| {}).expect_err("resolution");
    assert_eq!(failure.stage, Stage::Blastp);
    assert_eq!(failure.source.kind(), "ResolutionError");
    assert_eq!(failure.source.exit_code(), 4);
    let manifest = load_manifest(&fixture.run_dir).expect("manifest");
    assert_eq!(manifest.state(), RunState::FilesDone);
    assert_eq!(aligner.calls(), 0);
}
