//! Binary entrypoint for the `gapval` stage workflow.
use anyhow::{Context, Result};
use clap::Parser;
use gapval::cancel::CancellationToken;
use gapval::cli::{Command, RootArgs, StageArgs, WorkflowArgs};
use gapval::error::StageFailure;
use gapval::run::{ensure_run_root, load_config, RunPaths, Stage};
use gapval::workflow::{run_init, run_status, Orchestrator, StageOutcome, Toolbox};
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.verbose);
    match dispatch(args.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("GAPVAL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn dispatch(command: Command) -> Result<ExitCode> {
    match command {
        Command::Init(args) => {
            let request = match args.inputs.to_request(args.stage.run_dir.clone(), args.force) {
                Ok(request) => request,
                Err(err) => return Ok(report_failure(&StageFailure::new(Stage::Init, err))),
            };
            Ok(report(run_init(&request)))
        }
        Command::Check(args) => run_one(&args, Stage::Check, None),
        Command::Files(args) => run_one(&args, Stage::Files, None),
        Command::Blastp(args) => run_one(&args, Stage::Blastp, None),
        Command::Enrich(args) => run_one(&args.stage, Stage::Enrich, args.group.as_deref()),
        Command::Fill(args) => run_one(&args, Stage::Fill, None),
        Command::Workflow(args) => run_workflow(&args),
        Command::Status(args) => {
            let report = match run_status(&args.stage.run_dir) {
                Ok(report) => report,
                Err(err) => {
                    eprintln!("error: {err}");
                    return Ok(ExitCode::from(exit_byte(err.exit_code())));
                }
            };
            if args.json {
                let text = serde_json::to_string_pretty(&report)
                    .context("serialize status report")?;
                println!("{text}");
            } else {
                print!("{}", report.render_text());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn orchestrator(run_dir: &Path) -> std::result::Result<Orchestrator, gapval::error::PipelineError> {
    let root = ensure_run_root(run_dir, false)?;
    let config = load_config(&root)?;
    Orchestrator::new(
        &root,
        Toolbox::from_config(&config.tools),
        CancellationToken::interruptible(),
    )
}

fn run_one(args: &StageArgs, stage: Stage, group: Option<&str>) -> Result<ExitCode> {
    let orch = match orchestrator(&args.run_dir) {
        Ok(orch) => orch,
        Err(err) => return Ok(report_failure(&StageFailure::new(stage, err))),
    };
    Ok(report(orch.run_stage(stage, group)))
}

fn run_workflow(args: &WorkflowArgs) -> Result<ExitCode> {
    let initialized = RunPaths::new(args.stage.run_dir.clone())
        .config_path()
        .is_file();
    if !initialized || !args.inputs.is_empty() {
        let request = match args
            .inputs
            .to_request(args.stage.run_dir.clone(), args.force)
        {
            Ok(request) => request,
            Err(err) => return Ok(report_failure(&StageFailure::new(Stage::Init, err))),
        };
        match run_init(&request) {
            Ok(outcome) => println!("{}", outcome.report_line()),
            Err(failure) => return Ok(report_failure(&failure)),
        }
    }
    let orch = match orchestrator(&args.stage.run_dir) {
        Ok(orch) => orch,
        Err(err) => return Ok(report_failure(&StageFailure::new(Stage::Check, err))),
    };
    let result = orch.workflow(|outcome| println!("{}", outcome.report_line()));
    Ok(match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(failure) => report_failure(&failure),
    })
}

fn report(result: std::result::Result<StageOutcome, StageFailure>) -> ExitCode {
    match result {
        Ok(outcome) => {
            println!("{}", outcome.report_line());
            ExitCode::SUCCESS
        }
        Err(failure) => report_failure(&failure),
    }
}

fn report_failure(failure: &StageFailure) -> ExitCode {
    println!("{}", failure.report_line());
    ExitCode::from(exit_byte(failure.source.exit_code()))
}

fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
