//! Render jobs as seen by the queue.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use vrender_media::{
    planned_output_path, planned_output_path_avoiding, VideoInfo, PREVIEW_FILE_NAME,
};
use vrender_models::{JobId, JobOutcome, JobParams, JobStatus, ProgressSnapshot};

/// Transition requested by a caller, read by the worker at checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlRequest {
    #[default]
    Run,
    Pause,
    /// Sticky: once requested, pause and resume are ignored
    Stop,
}

/// A render job, created by the caller and handed to the queue.
///
/// A job runs at most once; re-running means building a new job from the
/// same parameters.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    params: JobParams,
    name: String,
    output_path: PathBuf,
    video_info: Option<VideoInfo>,
    created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(params: JobParams) -> Self {
        Self {
            id: JobId::next(),
            name: params.display_name(),
            output_path: planned_output_path(&params),
            params,
            video_info: None,
            created_at: Utc::now(),
        }
    }

    /// Attach source metadata probed ahead of time so the builder can skip it.
    pub fn with_video_info(mut self, info: VideoInfo) -> Self {
        self.video_info = Some(info);
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    /// Display name (source file stem).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn video_info(&self) -> Option<&VideoInfo> {
        self.video_info.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn set_video_info(&mut self, info: VideoInfo) {
        self.video_info = Some(info);
    }

    /// Re-derive the output name so it differs from `reserved`. Returns false
    /// when the output was requested explicitly and cannot move.
    pub(crate) fn replan_output(&mut self, reserved: &[&Path]) -> bool {
        if self.params.output.is_some() {
            return false;
        }
        self.output_path = planned_output_path_avoiding(&self.params, reserved);
        true
    }
}

/// Copy of a job's state handed out to callers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub params: JobParams,
    pub status: JobStatus,
    pub output_path: PathBuf,
    /// Present while the job is active, and after a failure
    pub workspace: Option<PathBuf>,
    pub video_info: Option<VideoInfo>,
    pub progress: ProgressSnapshot,
    pub outcome: Option<JobOutcome>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    /// Preview artifact written by the generator, if the workspace exists.
    pub fn preview_path(&self) -> Option<PathBuf> {
        self.workspace
            .as_ref()
            .map(|ws| ws.join(PREVIEW_FILE_NAME))
    }
}

/// Queue-owned mutable state of one job.
#[derive(Debug)]
pub(crate) struct JobEntry {
    pub(crate) job: Job,
    pub(crate) status: JobStatus,
    pub(crate) progress: ProgressSnapshot,
    pub(crate) workspace: Option<PathBuf>,
    pub(crate) outcome: Option<JobOutcome>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) control: watch::Sender<ControlRequest>,
}

impl JobEntry {
    pub(crate) fn new(job: Job) -> Self {
        let (control, _) = watch::channel(ControlRequest::Run);
        Self {
            progress: ProgressSnapshot::pending(
                job.video_info().map(|info| info.frame_count).unwrap_or(0),
            ),
            job,
            status: JobStatus::Queued,
            workspace: None,
            outcome: None,
            started_at: None,
            finished_at: None,
            control,
        }
    }

    pub(crate) fn id(&self) -> JobId {
        self.job.id
    }

    /// Record a control request. Returns whether it changed anything.
    pub(crate) fn request(&self, request: ControlRequest) -> bool {
        self.control.send_if_modified(|current| {
            if *current == request || *current == ControlRequest::Stop {
                return false;
            }
            *current = request;
            true
        })
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.job.id,
            name: self.job.name.clone(),
            params: self.job.params.clone(),
            status: self.status,
            output_path: self.job.output_path.clone(),
            workspace: self.workspace.clone(),
            video_info: self.job.video_info.clone(),
            progress: self.progress,
            outcome: self.outcome.clone(),
            created_at: self.job.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_derives_name_and_output() {
        let job = Job::new(JobParams::new("/videos/match.mkv"));
        assert_eq!(job.name(), "match");
        assert_eq!(job.output_path(), Path::new("/videos/match - blur.mp4"));
        assert!(job.video_info().is_none());
    }

    #[test]
    fn test_job_ids_increase() {
        let a = Job::new(JobParams::new("a.mp4"));
        let b = Job::new(JobParams::new("b.mp4"));
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_replan_output() {
        let mut derived = Job::new(JobParams::new("/videos/match.mkv"));
        let taken = derived.output_path().to_path_buf();
        assert!(derived.replan_output(&[taken.as_path()]));
        assert_eq!(
            derived.output_path(),
            Path::new("/videos/match - blur (1).mp4")
        );

        let mut requested = Job::new(JobParams::new("/videos/match.mkv").with_output(&taken));
        assert!(!requested.replan_output(&[taken.as_path()]));
        assert_eq!(requested.output_path(), taken);
    }

    #[test]
    fn test_stop_is_sticky() {
        let entry = JobEntry::new(Job::new(JobParams::new("a.mp4")));
        let rx = entry.control.subscribe();

        assert!(entry.request(ControlRequest::Pause));
        assert!(!entry.request(ControlRequest::Pause));
        assert!(entry.request(ControlRequest::Stop));
        assert!(!entry.request(ControlRequest::Run));
        assert_eq!(*rx.borrow(), ControlRequest::Stop);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut entry = JobEntry::new(Job::new(JobParams::new("/v/a.mp4")));
        let before = entry.snapshot();
        entry.status = JobStatus::Preparing;
        entry.workspace = Some(PathBuf::from("/tmp/job-1-abc"));

        assert_eq!(before.status, JobStatus::Queued);
        assert!(before.preview_path().is_none());
        assert_eq!(
            entry.snapshot().preview_path(),
            Some(PathBuf::from("/tmp/job-1-abc/preview.jpg"))
        );
    }
}
