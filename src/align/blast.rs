//! BLAST+ command-line aligner.
use super::{AlignFailure, AlignmentJob, AlignmentMode, Aligner, OUTFMT_COLUMNS};
use crate::cancel::CancellationToken;
use crate::util::{first_line, truncate_string};
use regex::RegexSet;
use std::fs::{self, File};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const MAX_STDERR_CHARS: usize = 2 * 1024;

/// stderr patterns for failures that usually succeed on retry.
fn transient_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RegexSet::new([
            r"(?i)out of memory",
            r"(?i)cannot allocate memory",
            r"(?i)resource temporarily unavailable",
            r"(?i)too many open files",
            r"(?i)no space left on device",
            r"(?i)std::bad_alloc",
        ])
        .unwrap_or_else(|_| RegexSet::empty())
    })
}

pub fn is_transient_stderr(stderr: &str) -> bool {
    transient_patterns().is_match(stderr)
}

/// Runs `blastp`/`tblastn` with the reference protein as query and the
/// organism's sequences as `-subject`.
#[derive(Debug, Clone)]
pub struct BlastCommand {
    blastp: String,
    tblastn: String,
}

impl BlastCommand {
    pub fn new(blastp: impl Into<String>, tblastn: impl Into<String>) -> Self {
        Self {
            blastp: blastp.into(),
            tblastn: tblastn.into(),
        }
    }

    fn command_for(&self, mode: AlignmentMode) -> std::result::Result<Vec<String>, String> {
        let template = match mode {
            AlignmentMode::Blastp => &self.blastp,
            AlignmentMode::Tblastn => &self.tblastn,
        };
        let argv = shell_words::split(template)
            .map_err(|err| format!("invalid {mode} command {template:?}: {err}"))?;
        if argv.is_empty() {
            return Err(format!("{mode} command is empty"));
        }
        Ok(argv)
    }
}

impl Aligner for BlastCommand {
    fn availability(&self, mode: AlignmentMode) -> std::result::Result<(), String> {
        let argv = self.command_for(mode)?;
        which::which(&argv[0])
            .map(|_| ())
            .map_err(|_| format!("{mode} executable {} not found on PATH", argv[0]))
    }

    fn run(
        &self,
        job: &AlignmentJob,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, AlignFailure> {
        let argv = self.command_for(job.mode).map_err(AlignFailure::permanent)?;
        let scratch = tempfile::tempdir()
            .map_err(|err| AlignFailure::transient(format!("create scratch dir: {err}")))?;
        let out_path = scratch.path().join("hits.tsv");
        let err_path = scratch.path().join("stderr.txt");
        let stderr_file = File::create(&err_path)
            .map_err(|err| AlignFailure::transient(format!("create stderr file: {err}")))?;

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .arg("-query")
            .arg(&job.query)
            .arg("-subject")
            .arg(&job.subject)
            .arg("-evalue")
            .arg(job.evalue.to_string())
            .arg("-outfmt")
            .arg(format!("6 {OUTFMT_COLUMNS}"))
            .arg("-out")
            .arg(&out_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_file));
        debug!(mode = %job.mode, query = %job.query.display(), "spawn aligner");

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|err| {
            AlignFailure::permanent(format!("spawn {}: {err}", argv[0]))
        })?;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(AlignFailure::transient(format!("wait for aligner: {err}")));
                }
            }
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AlignFailure::cancelled());
            }
            if start.elapsed() > job.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AlignFailure::transient(format!(
                    "timed out after {}s",
                    job.timeout.as_secs()
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let stderr = fs::read_to_string(&err_path).unwrap_or_default();
        let stderr = truncate_string(&stderr, MAX_STDERR_CHARS);
        if !status.success() {
            let detail = format!("{} ({})", status, first_line(&stderr));
            // No exit code means the process died from a signal.
            if status.code().is_none() || is_transient_stderr(&stderr) {
                return Err(AlignFailure::transient(detail));
            }
            return Err(AlignFailure::permanent(detail));
        }
        fs::read_to_string(&out_path).or_else(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Ok(String::new())
            } else {
                Err(AlignFailure::transient(format!("read aligner output: {err}")))
            }
        })
    }
}
