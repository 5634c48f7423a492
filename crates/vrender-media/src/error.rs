//! Error types for render operations.
//!
//! Each stage of a job has its own error type so callers can tell a bad input
//! (nothing spawned) from a failed process (diagnostics available).

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::ProcessRole;

/// Result type for command building.
pub type BuildResult<T> = Result<T, BuildError>;

/// Errors raised before any process is spawned.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Source unreadable: {path}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid output path: {0}")]
    InvalidOutputPath(PathBuf),

    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("FFprobe command failed: {message}")]
    ProbeFailed {
        message: String,
        stderr: Option<String>,
    },
}

impl BuildError {
    pub fn source_unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors starting the two processes.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Failed to spawn {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl SpawnError {
    pub(crate) fn from_io(program: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::ExecutableNotFound(program.to_string())
        } else {
            Self::Io {
                program: program.to_string(),
                source,
            }
        }
    }
}

/// Errors while the pipeline is running.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipe broken: {exited} exited while {survivor} was still running")]
    BrokenPipe {
        exited: ProcessRole,
        survivor: ProcessRole,
        diagnostics: String,
    },

    #[error("{role} exited with {}: {diagnostics}", describe_exit(.exit_code))]
    ProcessFailed {
        role: ProcessRole,
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("Failed to suspend pipeline: {0}")]
    Suspend(String),

    #[error("Failed to resume pipeline: {0}")]
    Resume(String),

    #[error("Failed to signal {role}: {message}")]
    Signal { role: ProcessRole, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

/// Errors creating or deleting the job workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Failed to create workspace under {root}: {source}")]
    Create {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove workspace {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Any job-scoped render failure.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl RenderError {
    /// Short stage label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::Build(_) => "build",
            RenderError::Spawn(_) => "spawn",
            RenderError::Pipeline(_) => "pipeline",
            RenderError::Workspace(_) => "workspace",
        }
    }
}
