//! Job-scoped scratch directories.
//!
//! A workspace is removed when dropped unless it was explicitly retained, so
//! early returns on error paths never leak directories.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;
use vrender_models::JobId;

use crate::error::WorkspaceError;

/// File name of the preview frame the generator writes into the workspace.
pub const PREVIEW_FILE_NAME: &str = "preview.jpg";

/// Scratch directory for one job, named after its id.
#[derive(Debug)]
pub struct TempWorkspace {
    dir: TempDir,
}

impl TempWorkspace {
    /// Create `<root>/job-<id>-XXXXXX`, creating `root` if needed.
    pub fn create(root: &Path, job_id: JobId) -> Result<Self, WorkspaceError> {
        std::fs::create_dir_all(root).map_err(|source| WorkspaceError::Create {
            root: root.to_path_buf(),
            source,
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", job_id))
            .tempdir_in(root)
            .map_err(|source| WorkspaceError::Create {
                root: root.to_path_buf(),
                source,
            })?;

        debug!(job_id = %job_id, path = %dir.path().display(), "Created workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn preview_path(&self) -> PathBuf {
        self.dir.path().join(PREVIEW_FILE_NAME)
    }

    /// Delete the workspace and everything in it.
    pub fn cleanup(self) -> Result<(), WorkspaceError> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|source| WorkspaceError::Remove { path, source })
    }

    /// Keep the directory on disk (for diagnostics) and return its path.
    #[allow(deprecated)]
    pub fn retain(self) -> PathBuf {
        self.dir.into_path()
    }
}
