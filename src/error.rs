//! Error taxonomy for pipeline stages.
//!
//! Stage code returns [`PipelineError`]; the orchestrator wraps it in a
//! [`StageFailure`] so every report names the stage that failed.
use crate::run::Stage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage was invoked before its dependencies were ready.
    #[error("{0}")]
    Precondition(String),

    /// The solver or aligner exited nonzero or produced unusable output.
    #[error("{tool} failed: {detail}")]
    ExternalTool { tool: String, detail: String },

    /// Solver output is inconsistent with the declared targets.
    #[error("{0}")]
    Resolution(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        PipelineError::Json {
            context: context.into(),
            source,
        }
    }

    pub fn tool(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        PipelineError::ExternalTool {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    /// Stable error kind printed on the CLI failure line.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Precondition(_) | PipelineError::Config(_) => "PreconditionError",
            PipelineError::ExternalTool { .. } => "ExternalToolError",
            PipelineError::Resolution(_) => "ResolutionError",
            PipelineError::Cancelled => "Cancelled",
            PipelineError::Io { .. } | PipelineError::Json { .. } => "IoError",
        }
    }

    /// Process exit code for a failure of this kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Precondition(_) | PipelineError::Config(_) => 2,
            PipelineError::ExternalTool { .. } => 3,
            PipelineError::Resolution(_) => 4,
            PipelineError::Cancelled => 130,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// A stage-level failure: the stage name plus the error that aborted it.
#[derive(Debug, Error)]
#[error("stage {stage} failed: {source}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub source: PipelineError,
}

impl StageFailure {
    pub fn new(stage: Stage, source: PipelineError) -> Self {
        Self { stage, source }
    }

    /// One-line report in the same `key=value` shape as success lines.
    pub fn report_line(&self) -> String {
        format!(
            "stage={} verdict=failure kind={} cause={}",
            self.stage,
            self.source.kind(),
            self.source
        )
    }
}
