//! Job identity, inputs and results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{JobStatus, RenderSettings};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a job within the process lifetime.
///
/// Ids are allocated from a monotonically increasing counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// Allocate the next job ID.
    pub fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied inputs for one render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    /// Source video
    pub source: PathBuf,

    /// Requested output path; derived from the source when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,

    /// Processing and encoding settings
    #[serde(default)]
    pub settings: RenderSettings,

    /// Config file handed to the generator instead of the global one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_override: Option<PathBuf>,
}

impl JobParams {
    /// Parameters with default settings and a derived output path.
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            output: None,
            settings: RenderSettings::default(),
            config_override: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_settings(mut self, settings: RenderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_config_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_override = Some(path.into());
        self
    }

    /// Source file stem, used as the job's display name.
    pub fn display_name(&self) -> String {
        self.source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.to_string_lossy().into_owned())
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Terminal result reported when a job finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Completed, Failed or Cancelled
    pub status: JobStatus,
    /// Failure description, including the diagnostic tail of the failing process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobOutcome {
    pub fn completed() -> Self {
        Self {
            status: JobStatus::Completed,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            error_message: Some(message.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: JobStatus::Cancelled,
            error_message: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}
