//! Error types for graphforge-core.
//!
//! Every error a job can raise is a [`PipelineError`]. The scheduler turns
//! them into failed [`JobOutcome`](crate::scheduler::JobOutcome)s at the job
//! boundary, so none of these ever abort a batch.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Captured result of one external process invocation.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ProcessReport {
    /// The command line as it was launched.
    pub command: String,
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessReport {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Multi-line dump used when logging a failed invocation.
    pub fn diagnostics(&self) -> String {
        let mut out = format!("Command: {}\nReturn code: ", self.command);
        match self.exit_code {
            Some(code) => out.push_str(&code.to_string()),
            None => out.push_str("terminated by signal"),
        }
        if !self.stdout.is_empty() {
            out.push_str(&format!("\nStandard Output:\n{}", self.stdout));
        }
        if !self.stderr.is_empty() {
            out.push_str(&format!("\nStandard Error:\n{}", self.stderr));
        }
        out
    }
}

/// Failure of an external tool invocation.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The process could not be started at all.
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully.
    #[error("`{}` exited with {}", .0.command, exit_label(.0.exit_code))]
    NonZeroExit(ProcessReport),

    /// The process exceeded its time budget and was killed.
    ///
    /// `report` holds whatever output was captured before the kill.
    #[error("`{}` timed out after {:?}", .report.command, .timeout)]
    TimedOut {
        timeout: Duration,
        report: ProcessReport,
    },

    /// The process exited 0 but the artifact it should have written is absent.
    #[error("`{}` exited 0 but did not produce {}", .report.command, .path.display())]
    MissingOutput { path: PathBuf, report: ProcessReport },
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

impl ToolError {
    /// The command line that failed, for manual reproduction.
    pub fn command(&self) -> &str {
        match self {
            ToolError::Spawn { command, .. } => command,
            ToolError::NonZeroExit(report)
            | ToolError::TimedOut { report, .. }
            | ToolError::MissingOutput { report, .. } => &report.command,
        }
    }

    /// Captured process output, when the process got far enough to produce any.
    pub fn report(&self) -> Option<&ProcessReport> {
        match self {
            ToolError::NonZeroExit(report)
            | ToolError::TimedOut { report, .. }
            | ToolError::MissingOutput { report, .. } => Some(report),
            ToolError::Spawn { .. } => None,
        }
    }
}

/// Errors raised while reading corpus shards.
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("corpus root does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("failed to open shard {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read shard {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid sample at {path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that fail a single job.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The provenance URL does not have the `<path>#L<start>-L<end>` shape.
    #[error("malformed provenance url {url:?}: {reason}")]
    MalformedProvenance { url: String, reason: &'static str },

    /// The analyzer failed, or exited cleanly without writing IR.
    #[error("analyzer failure: {0}")]
    AnalyzerFailure(#[source] ToolError),

    /// The graph converter failed or left its outputs missing.
    #[error("converter failure: {0}")]
    ConverterFailure(#[source] ToolError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    CorpusRead(#[from] CorpusError),

    /// A job panicked; caught at the job boundary.
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-friendly name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MalformedProvenance { .. } => "malformed_provenance",
            PipelineError::AnalyzerFailure(_) => "analyzer_failure",
            PipelineError::ConverterFailure(_) => "converter_failure",
            PipelineError::Io { .. }
            | PipelineError::Json(_)
            | PipelineError::CorpusRead(_)
            | PipelineError::Panicked(_) => "unexpected_error",
        }
    }

    /// The tool error behind an analyzer or converter failure.
    pub fn tool_error(&self) -> Option<&ToolError> {
        match self {
            PipelineError::AnalyzerFailure(err) | PipelineError::ConverterFailure(err) => Some(err),
            _ => None,
        }
    }
}
