//! Execution of a single job, from workspace creation to a terminal outcome.
//!
//! Control requests are checked before spawning and whenever they change while
//! the processes run. The select loop polls control first, so a stop observed
//! before both exits are collected always yields `Cancelled`.

use std::io;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::ChildStderr;
use tokio::sync::watch;
use tracing::{debug, Instrument};
use vrender_media::{
    BuildRequest, OutputLines, PipelineError, PipelineHandle, ProcessPipeline, ProcessRole,
    ProgressMonitor, RenderError, TempWorkspace,
};
use vrender_models::{JobOutcome, JobStatus};

use crate::job::{ControlRequest, Job};
use crate::logging::JobLogger;
use crate::queue::Shared;

type StatusLines = OutputLines<ChildStderr>;

/// Why supervision ended before both processes exited cleanly.
enum Interrupt {
    Stop,
    Failed(PipelineError),
}

/// Processes and progress state of a job that reached `Running`.
struct ActiveRender {
    handle: PipelineHandle,
    monitor: ProgressMonitor,
    lines: Option<StatusLines>,
    /// Stream that kept failing; held open so the encoder is not hit by SIGPIPE
    unreadable: Option<StatusLines>,
    /// Last progress decile written to the log
    logged_decile: u64,
}

pub(crate) struct JobRunner {
    shared: Arc<Shared>,
    job: Job,
    control: watch::Receiver<ControlRequest>,
    logger: JobLogger,
}

impl JobRunner {
    pub(crate) fn new(
        shared: Arc<Shared>,
        job: Job,
        control: watch::Receiver<ControlRequest>,
    ) -> Self {
        let logger = JobLogger::new(job.id(), job.name());
        Self {
            shared,
            job,
            control,
            logger,
        }
    }

    /// Run the job to a terminal state. Never returns a non-terminal outcome.
    pub(crate) async fn run(mut self) -> JobOutcome {
        let span = self.logger.create_span();
        self.execute().instrument(span).await
    }

    fn stop_requested(&self) -> bool {
        *self.control.borrow() == ControlRequest::Stop
    }

    async fn execute(&mut self) -> JobOutcome {
        let config = self.shared.config().clone();
        let id = self.job.id();
        self.logger.log_start(&format!(
            "{} -> {}",
            self.job.params().source.display(),
            self.job.output_path().display()
        ));

        if self.stop_requested() {
            return self.cancelled();
        }

        let workspace = match TempWorkspace::create(&config.temp_root, id) {
            Ok(ws) => ws,
            Err(e) => return self.failed(RenderError::from(e)),
        };
        self.shared
            .set_workspace(id, Some(workspace.path().to_path_buf()));

        let preview_path = workspace.preview_path();
        let request = BuildRequest {
            job_id: id,
            params: self.job.params(),
            output_path: self.job.output_path(),
            workspace: workspace.path(),
            preview_path: &preview_path,
            video_info: self.job.video_info(),
        };
        let plan = match self.shared.builder().build(request).await {
            Ok(plan) => plan,
            Err(e) => {
                self.discard_workspace(workspace);
                return self.failed(RenderError::from(e));
            }
        };
        self.shared.set_video_info(id, plan.video_info.clone());

        if self.stop_requested() {
            self.discard_workspace(workspace);
            return self.cancelled();
        }

        let output_existed = self.job.output_path().exists();
        let mut handle = match ProcessPipeline::spawn(
            &plan.commands,
            workspace.path(),
            config.diagnostic_lines,
        ) {
            Ok(handle) => handle,
            Err(e) => {
                self.discard_workspace(workspace);
                return self.failed(RenderError::from(e));
            }
        };

        self.shared.set_status(id, JobStatus::Running);
        let mut monitor = ProgressMonitor::new(
            plan.video_info.frame_count,
            config.fps_window,
            config.diagnostic_lines,
        );
        monitor.start(Instant::now());
        let lines = handle.take_status_stream().map(OutputLines::new);
        let mut active = ActiveRender {
            handle,
            monitor,
            lines,
            unreadable: None,
            logged_decile: 0,
        };

        match self.supervise(&mut active).await {
            Ok(()) => {
                self.drain_status(&mut active).await;
                if !active.monitor.stream_ended() && active.unreadable.is_none() {
                    self.logger
                        .log_warning("encoder status stream still open after exit");
                }
                drop(active);
                self.discard_workspace(workspace);
                self.logger.log_completion(&format!(
                    "{} written",
                    self.job.output_path().display()
                ));
                JobOutcome::completed()
            }
            Err(Interrupt::Stop) => {
                if let Err(e) = active.handle.terminate(config.grace_period).await {
                    self.logger
                        .log_warning(&format!("Failed to reap processes: {e}"));
                }
                let reached_end = active.monitor.reached_end();
                drop(active);
                if !output_existed && !reached_end {
                    self.remove_partial_output(self.job.output_path());
                }
                self.discard_workspace(workspace);
                self.cancelled()
            }
            Err(Interrupt::Failed(error)) => {
                if let Err(e) = active.handle.terminate(config.grace_period).await {
                    self.logger
                        .log_warning(&format!("Failed to reap processes: {e}"));
                }
                drop(active);
                let kept = workspace.retain();
                self.logger
                    .log_warning(&format!("Workspace kept at {}", kept.display()));
                self.shared.set_workspace(id, Some(kept));
                self.failed(RenderError::from(error))
            }
        }
    }

    /// Watch control requests, the status stream and process exits until both
    /// processes have exited successfully.
    async fn supervise(&mut self, active: &mut ActiveRender) -> Result<(), Interrupt> {
        // A pause requested while preparing takes effect now
        self.apply_control(active)?;

        loop {
            if active.handle.exits().is_some() {
                return Ok(());
            }
            let reading = active.lines.is_some() && !active.monitor.is_paused();

            tokio::select! {
                biased;

                changed = self.control.changed() => {
                    if changed.is_err() {
                        return Err(Interrupt::Stop);
                    }
                    self.apply_control(active)?;
                }

                line = next_line(&mut active.lines), if reading => {
                    self.on_status_line(active, line);
                }

                exit = active.handle.wait_next_exit() => {
                    let (role, status) = exit.map_err(|e| Interrupt::Failed(e.into()))?;
                    self.on_exit(active, role, status).await?;
                }
            }
        }
    }

    fn apply_control(&mut self, active: &mut ActiveRender) -> Result<(), Interrupt> {
        let request = *self.control.borrow_and_update();
        let id = self.job.id();
        match request {
            ControlRequest::Stop => {
                self.logger.log_progress("stop requested");
                Err(Interrupt::Stop)
            }
            ControlRequest::Pause if !active.handle.is_suspended() => {
                active.handle.suspend().map_err(Interrupt::Failed)?;
                active.monitor.pause(Instant::now());
                self.shared.set_status(id, JobStatus::Paused);
                self.logger.log_progress("paused");
                Ok(())
            }
            ControlRequest::Run if active.handle.is_suspended() => {
                active.handle.resume().map_err(Interrupt::Failed)?;
                active.monitor.resume(Instant::now());
                self.shared.set_status(id, JobStatus::Running);
                self.logger.log_progress("resumed");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_exit(
        &mut self,
        active: &mut ActiveRender,
        role: ProcessRole,
        status: ExitStatus,
    ) -> Result<(), Interrupt> {
        // Something killed a suspended process; the job is no longer pausable
        if active.handle.is_suspended() {
            active.handle.resume().map_err(Interrupt::Failed)?;
            active.monitor.resume(Instant::now());
            self.shared.set_status(self.job.id(), JobStatus::Running);
        }

        if !status.success() {
            return Err(Interrupt::Failed(
                self.process_failed(active, role, status).await,
            ));
        }

        // The encoder finished first: the generator must follow on its own.
        if role == ProcessRole::Encoder && active.handle.exit_status(role.other()).is_none() {
            return self.await_generator(active).await;
        }
        Ok(())
    }

    /// Give the generator the drain timeout to exit after the encoder is done.
    /// Only a stop request is acted on while waiting.
    async fn await_generator(&mut self, active: &mut ActiveRender) -> Result<(), Interrupt> {
        let deadline = tokio::time::sleep(self.shared.config().drain_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;

                changed = self.control.changed() => {
                    let request = *self.control.borrow_and_update();
                    if changed.is_err() || request == ControlRequest::Stop {
                        self.logger.log_progress("stop requested");
                        return Err(Interrupt::Stop);
                    }
                }

                exit = active.handle.wait_next_exit() => {
                    let (role, status) = exit.map_err(|e| Interrupt::Failed(e.into()))?;
                    if status.success() {
                        return Ok(());
                    }
                    let error = self.process_failed(active, role, status).await;
                    return Err(Interrupt::Failed(error));
                }

                _ = &mut deadline => {
                    self.drain_status(active).await;
                    return Err(Interrupt::Failed(PipelineError::BrokenPipe {
                        exited: ProcessRole::Encoder,
                        survivor: ProcessRole::Generator,
                        diagnostics: describe_tail(active.monitor.diagnostics().joined()),
                    }));
                }
            }
        }
    }

    async fn process_failed(
        &self,
        active: &mut ActiveRender,
        role: ProcessRole,
        status: ExitStatus,
    ) -> PipelineError {
        let drain_timeout = self.shared.config().drain_timeout;
        let diagnostics = match role {
            ProcessRole::Generator => active
                .handle
                .generator_diagnostics(drain_timeout)
                .await
                .joined(),
            ProcessRole::Encoder => {
                self.drain_status(active).await;
                active.monitor.diagnostics().joined()
            }
        };
        PipelineError::ProcessFailed {
            role,
            exit_code: status.code(),
            diagnostics: describe_tail(diagnostics),
        }
    }

    /// Read what is left on the status stream, bounded by the drain timeout.
    async fn drain_status(&self, active: &mut ActiveRender) {
        let deadline = tokio::time::Instant::now() + self.shared.config().drain_timeout;
        while let Some(lines) = active.lines.as_mut() {
            match tokio::time::timeout_at(deadline, lines.next_line()).await {
                Ok(line) => self.on_status_line(active, line),
                Err(_) => {
                    debug!(job_id = %self.job.id(), "Status stream drain timed out");
                    break;
                }
            }
        }
    }

    fn on_status_line(&self, active: &mut ActiveRender, line: io::Result<Option<String>>) {
        match line {
            Ok(Some(line)) => self.observe(active, &line),
            Ok(None) => {
                active.lines = None;
                active.monitor.mark_stream_ended();
            }
            Err(e) => {
                self.logger
                    .log_warning(&format!("Encoder status stream unreadable: {e}"));
                active.unreadable = active.lines.take();
            }
        }
    }

    fn observe(&self, active: &mut ActiveRender, line: &str) {
        let Some(snapshot) = active.monitor.observe_line(line, Instant::now()) else {
            return;
        };
        self.shared.set_progress(self.job.id(), snapshot);

        let decile = snapshot.percentage().map(|pct| (pct / 10.0) as u64).unwrap_or(0);
        if decile > active.logged_decile {
            active.logged_decile = decile;
            self.logger.log_progress(&snapshot.to_string());
        }
    }

    fn discard_workspace(&self, workspace: TempWorkspace) {
        if let Err(e) = workspace.cleanup() {
            self.logger.log_warning(&e.to_string());
        }
        self.shared.set_workspace(self.job.id(), None);
    }

    fn remove_partial_output(&self, output: &Path) {
        match std::fs::remove_file(output) {
            Ok(()) => debug!(job_id = %self.job.id(), "Removed partial output {}", output.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => self.logger.log_warning(&format!(
                "Failed to remove partial output {}: {e}",
                output.display()
            )),
        }
    }

    fn cancelled(&self) -> JobOutcome {
        self.logger.log_completion("cancelled");
        JobOutcome::cancelled()
    }

    fn failed(&self, error: RenderError) -> JobOutcome {
        let message = error.to_string();
        self.logger
            .log_error(&format!("{} failed: {}", error.kind(), message));
        JobOutcome::failed(message)
    }
}

async fn next_line(lines: &mut Option<StatusLines>) -> io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

fn describe_tail(diagnostics: String) -> String {
    if diagnostics.is_empty() {
        "no diagnostic output".to_string()
    } else {
        diagnostics
    }
}
