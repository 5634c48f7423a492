//! Render queue with a single background worker.
//!
//! All job state lives behind one mutex. Caller methods are synchronous, hold
//! the lock only to copy or flip a field, and may be called from any thread.
//! The worker is one tokio task that runs jobs in insertion order, one at a
//! time, and publishes every state change as a [`QueueEvent`].

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use vrender_media::{CommandBuilder, VideoInfo};
use vrender_models::{JobId, JobOutcome, JobStatus, ProgressSnapshot};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::events::{EventBus, QueueEvent, Subscription, SubscriptionId};
use crate::job::{ControlRequest, Job, JobEntry, JobSnapshot};
use crate::metrics;
use crate::runner::JobRunner;

/// Result of [`RenderQueue::request_stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The job had not started and was taken out of the queue
    Removed,
    /// The running job will be cancelled
    Requested,
    /// The job had already reached a terminal state
    AlreadyFinished,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: Vec<JobEntry>,
    current: Option<JobId>,
    shutting_down: bool,
}

impl QueueState {
    fn entry(&self, id: JobId) -> Option<&JobEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    fn entry_mut(&mut self, id: JobId) -> Option<&mut JobEntry> {
        self.entries.iter_mut().find(|e| e.id() == id)
    }

    /// Make sure `job` does not write an output an unfinished job will write.
    fn reserve_output(&self, job: &mut Job) -> QueueResult<()> {
        let unfinished = || self.entries.iter().filter(|e| !e.status.is_terminal());
        let Some(owner) = unfinished().find(|e| e.job.output_path() == job.output_path()) else {
            return Ok(());
        };
        let reserved: Vec<&Path> = unfinished().map(|e| e.job.output_path()).collect();
        if job.replan_output(&reserved) {
            debug!(
                job_id = %job.id(),
                output = %job.output_path().display(),
                "Output name in use, re-planned"
            );
            Ok(())
        } else {
            Err(QueueError::OutputInUse {
                path: job.output_path().to_path_buf(),
                owner: owner.id(),
            })
        }
    }

    fn pending(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == JobStatus::Queued)
            .count()
    }
}

enum Next {
    Run(Job, watch::Receiver<ControlRequest>),
    Idle,
    Shutdown,
}

/// State shared between the queue handle and the worker task.
pub(crate) struct Shared {
    state: Mutex<QueueState>,
    events: Arc<EventBus>,
    wakeup: Notify,
    config: QueueConfig,
    builder: Arc<dyn CommandBuilder>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub(crate) fn builder(&self) -> &dyn CommandBuilder {
        self.builder.as_ref()
    }

    fn publish(&self, event: QueueEvent) {
        self.events.publish(event);
    }

    /// Apply a validated status change and notify subscribers.
    pub(crate) fn set_status(&self, id: JobId, status: JobStatus) {
        {
            let mut state = self.state();
            let Some(entry) = state.entry_mut(id) else {
                return;
            };
            if entry.status == status {
                return;
            }
            match entry.status.transition(status) {
                Ok(next) => entry.status = next,
                Err(e) => {
                    error!(job_id = %id, "{}", e);
                    return;
                }
            }
        }
        debug!(job_id = %id, status = %status, "Job status changed");
        self.publish(QueueEvent::StatusChanged { job_id: id, status });
    }

    pub(crate) fn set_progress(&self, id: JobId, snapshot: ProgressSnapshot) {
        if let Some(entry) = self.state().entry_mut(id) {
            entry.progress = snapshot;
        }
        self.publish(QueueEvent::Progress {
            job_id: id,
            snapshot,
        });
    }

    pub(crate) fn set_workspace(&self, id: JobId, workspace: Option<PathBuf>) {
        if let Some(entry) = self.state().entry_mut(id) {
            entry.workspace = workspace;
        }
    }

    pub(crate) fn set_video_info(&self, id: JobId, info: VideoInfo) {
        if let Some(entry) = self.state().entry_mut(id) {
            entry.progress.total_frames = info.frame_count;
            entry.job.set_video_info(info);
        }
    }

    /// Pick the earliest queued job and mark it `Preparing`.
    fn begin_next(&self) -> Next {
        let (job, control) = {
            let mut state = self.state();
            if state.shutting_down {
                return Next::Shutdown;
            }
            let Some(entry) = state
                .entries
                .iter_mut()
                .find(|e| e.status == JobStatus::Queued)
            else {
                return Next::Idle;
            };
            entry.status = JobStatus::Preparing;
            entry.started_at = Some(Utc::now());
            let job = entry.job.clone();
            let control = entry.control.subscribe();
            state.current = Some(job.id());
            metrics::set_queue_length(state.pending());
            (job, control)
        };
        self.publish(QueueEvent::StatusChanged {
            job_id: job.id(),
            status: JobStatus::Preparing,
        });
        Next::Run(job, control)
    }

    /// Record the terminal outcome of the current job.
    fn finish(&self, id: JobId, outcome: JobOutcome) {
        let duration = {
            let mut state = self.state();
            state.current = None;
            let Some(entry) = state.entry_mut(id) else {
                return;
            };
            if let Err(e) = entry.status.transition(outcome.status) {
                error!(job_id = %id, "{}", e);
            }
            entry.status = outcome.status;
            entry.outcome = Some(outcome.clone());
            let finished = Utc::now();
            entry.finished_at = Some(finished);
            entry
                .started_at
                .map(|started| (finished - started).num_milliseconds().max(0) as f64 / 1000.0)
                .unwrap_or(0.0)
        };
        metrics::record_job_finished(outcome.status, duration);
        self.publish(QueueEvent::StatusChanged {
            job_id: id,
            status: outcome.status,
        });
        self.publish(QueueEvent::Finished {
            job_id: id,
            outcome,
        });
    }

    fn begin_shutdown(&self) {
        {
            let mut state = self.state();
            state.shutting_down = true;
            if let Some(current) = state.current {
                if let Some(entry) = state.entry(current) {
                    entry.request(ControlRequest::Stop);
                }
            }
        }
        self.wakeup.notify_one();
    }
}

async fn run_worker(shared: Arc<Shared>) {
    info!("Render worker started");
    loop {
        match shared.begin_next() {
            Next::Run(job, control) => {
                let id = job.id();
                let outcome = JobRunner::new(Arc::clone(&shared), job, control)
                    .run()
                    .await;
                shared.finish(id, outcome);
            }
            Next::Idle => shared.wakeup.notified().await,
            Next::Shutdown => break,
        }
    }
    info!("Render worker stopped");
}

/// Ordered render queue driven by one background worker.
///
/// Dropping the queue without [`shutdown`](Self::shutdown) still cancels the
/// current job; the worker finishes in the background.
pub struct RenderQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RenderQueue {
    /// Create the queue and spawn its worker. Must be called within a tokio
    /// runtime.
    pub fn start(config: QueueConfig, builder: Arc<dyn CommandBuilder>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            events: Arc::new(EventBus::default()),
            wakeup: Notify::new(),
            config,
            builder,
        });
        let worker = tokio::spawn(run_worker(Arc::clone(&shared)));
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Append a job. Returns immediately; execution happens on the worker.
    ///
    /// A derived output name already promised to an unfinished job is
    /// re-planned; a requested one is refused with [`QueueError::OutputInUse`].
    pub fn enqueue(&self, mut job: Job) -> QueueResult<JobId> {
        let id = job.id();
        {
            let mut state = self.shared.state();
            if state.shutting_down {
                return Err(QueueError::ShuttingDown);
            }
            state.reserve_output(&mut job)?;
            debug!(job_id = %id, name = %job.name(), "Job enqueued");
            state.entries.push(JobEntry::new(job));
            metrics::set_queue_length(state.pending());
        }
        metrics::record_job_enqueued();
        self.shared.wakeup.notify_one();
        self.shared.publish(QueueEvent::QueueChanged);
        Ok(id)
    }

    /// The job the worker is executing, if any.
    pub fn current(&self) -> Option<JobSnapshot> {
        let state = self.shared.state();
        state
            .current
            .and_then(|id| state.entry(id))
            .map(JobEntry::snapshot)
    }

    /// Every job in insertion order, including finished ones.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.shared
            .state()
            .entries
            .iter()
            .map(JobEntry::snapshot)
            .collect()
    }

    pub fn get(&self, id: JobId) -> QueueResult<JobSnapshot> {
        self.shared
            .state()
            .entry(id)
            .map(JobEntry::snapshot)
            .ok_or(QueueError::JobNotFound(id))
    }

    fn control(&self, id: JobId, request: ControlRequest) -> QueueResult<()> {
        let state = self.shared.state();
        let entry = state.entry(id).ok_or(QueueError::JobNotFound(id))?;
        if !entry.status.is_active() {
            return Err(QueueError::JobNotActive {
                id,
                status: entry.status,
            });
        }
        entry.request(request);
        Ok(())
    }

    /// Suspend the running job. No-op if it is already paused; a job still
    /// preparing is paused as soon as its processes start.
    pub fn pause(&self, id: JobId) -> QueueResult<()> {
        self.control(id, ControlRequest::Pause)
    }

    /// Continue a paused job. No-op if it is running.
    pub fn resume(&self, id: JobId) -> QueueResult<()> {
        self.control(id, ControlRequest::Run)
    }

    /// Cancel the running job, or drop a job that has not started yet.
    pub fn request_stop(&self, id: JobId) -> QueueResult<StopOutcome> {
        let outcome = {
            let mut state = self.shared.state();
            let index = state
                .entries
                .iter()
                .position(|e| e.id() == id)
                .ok_or(QueueError::JobNotFound(id))?;
            let status = state.entries[index].status;
            if status == JobStatus::Queued {
                state.entries.remove(index);
                metrics::set_queue_length(state.pending());
                StopOutcome::Removed
            } else if status.is_active() {
                state.entries[index].request(ControlRequest::Stop);
                StopOutcome::Requested
            } else {
                StopOutcome::AlreadyFinished
            }
        };
        match outcome {
            StopOutcome::Removed => {
                info!(job_id = %id, "Removed queued job");
                self.shared.publish(QueueEvent::QueueChanged);
            }
            StopOutcome::Requested => info!(job_id = %id, "Stop requested"),
            StopOutcome::AlreadyFinished => {}
        }
        Ok(outcome)
    }

    /// Delete a finished job from the history.
    pub fn remove(&self, id: JobId) -> QueueResult<JobSnapshot> {
        let removed = {
            let mut state = self.shared.state();
            let index = state
                .entries
                .iter()
                .position(|e| e.id() == id)
                .ok_or(QueueError::JobNotFound(id))?;
            let status = state.entries[index].status;
            if !status.is_terminal() {
                return Err(QueueError::JobActive { id, status });
            }
            state.entries.remove(index).snapshot()
        };
        self.shared.publish(QueueEvent::QueueChanged);
        Ok(removed)
    }

    /// Register an observer.
    pub fn subscribe(&self) -> Subscription {
        self.shared.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /// Cancel the current job, stop the worker and wait for it to exit.
    ///
    /// Jobs still queued stay in the history untouched.
    pub async fn shutdown(&self) -> QueueResult<()> {
        info!("Shutting down render queue");
        self.shared.begin_shutdown();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match worker {
            Some(worker) => worker
                .await
                .map_err(|e| QueueError::WorkerPanicked(e.to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for RenderQueue {
    fn drop(&mut self) {
        self.shared.begin_shutdown();
    }
}
