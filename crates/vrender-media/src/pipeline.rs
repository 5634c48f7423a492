//! Two-process render pipeline.
//!
//! The generator's stdout is handed to the encoder as its stdin, so frames flow
//! through one anonymous OS pipe without passing through this process. Each
//! child leads its own process group; signals go to the whole group so helper
//! processes spawned by the tools are stopped and killed with them.

use std::fmt;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::{CommandPair, CommandSpec};
use crate::diagnostics::DiagnosticTail;
use crate::error::{PipelineError, SpawnError};
use crate::lines::OutputLines;

/// Which side of the pipe a process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    Generator,
    Encoder,
}

impl ProcessRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessRole::Generator => "generator",
            ProcessRole::Encoder => "encoder",
        }
    }

    pub fn other(&self) -> ProcessRole {
        match self {
            ProcessRole::Generator => ProcessRole::Encoder,
            ProcessRole::Encoder => ProcessRole::Generator,
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit statuses of both processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineExit {
    pub generator: ExitStatus,
    pub encoder: ExitStatus,
}

impl PipelineExit {
    pub fn success(&self) -> bool {
        self.generator.success() && self.encoder.success()
    }

    pub fn status(&self, role: ProcessRole) -> ExitStatus {
        match role {
            ProcessRole::Generator => self.generator,
            ProcessRole::Encoder => self.encoder,
        }
    }
}

/// Spawns generator/encoder pairs.
pub struct ProcessPipeline;

impl ProcessPipeline {
    /// Spawn both processes in `workdir` with the generator piped into the
    /// encoder.
    ///
    /// The generator's stderr is collected into a tail of `diagnostic_lines`
    /// lines. If the encoder cannot be started the generator is killed before
    /// returning.
    pub fn spawn(
        commands: &CommandPair,
        workdir: &Path,
        diagnostic_lines: usize,
    ) -> Result<PipelineHandle, SpawnError> {
        let mut generator = command_for(&commands.generator, workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SpawnError::from_io(&commands.generator.program_name(), e))?;
        let generator_pid = generator.id();

        let frames = generator
            .stdout
            .take()
            .map(|stdout| -> io::Result<Stdio> { stdout.try_into() });
        let frames = match frames {
            Some(Ok(stdio)) => stdio,
            Some(Err(e)) => {
                abandon(&mut generator, generator_pid);
                return Err(SpawnError::from_io(&commands.generator.program_name(), e));
            }
            None => {
                abandon(&mut generator, generator_pid);
                return Err(SpawnError::from_io(
                    &commands.generator.program_name(),
                    io::Error::new(io::ErrorKind::BrokenPipe, "generator stdout not captured"),
                ));
            }
        };

        // The command keeps a copy of the pipe's read end until it is dropped,
        // which would hide EOF from the encoder; it goes out of scope here.
        let encoder = {
            let mut command = command_for(&commands.encoder, workdir);
            command
                .stdin(frames)
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()
        };
        let mut encoder = match encoder {
            Ok(child) => child,
            Err(e) => {
                abandon(&mut generator, generator_pid);
                return Err(SpawnError::from_io(&commands.encoder.program_name(), e));
            }
        };
        let encoder_pid = encoder.id();

        let generator_tail = Arc::new(Mutex::new(DiagnosticTail::new(diagnostic_lines)));
        let generator_reader = generator
            .stderr
            .take()
            .map(|stderr| spawn_tail_reader(stderr, Arc::clone(&generator_tail)));
        let status_stream = encoder.stderr.take();

        debug!(
            generator_pid = ?generator_pid,
            encoder_pid = ?encoder_pid,
            "Spawned render pipeline"
        );

        Ok(PipelineHandle {
            generator,
            encoder,
            generator_pid,
            encoder_pid,
            generator_status: None,
            encoder_status: None,
            status_stream,
            generator_tail,
            generator_reader,
            suspended: false,
        })
    }
}

fn command_for(spec: &CommandSpec, workdir: &Path) -> Command {
    let mut command = Command::new(spec.program());
    command
        .args(spec.get_args())
        .current_dir(workdir)
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    command
}

/// Kill a child we are about to drop; tokio reaps it in the background.
fn abandon(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        let _ = signal_group(pid, Signal::Kill);
    }
    let _ = child.start_kill();
}

fn spawn_tail_reader(stderr: ChildStderr, tail: Arc<Mutex<DiagnosticTail>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = OutputLines::new(stderr);
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tail
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(&line),
                Ok(None) => break,
                Err(e) => {
                    warn!("Generator stderr unreadable: {}", e);
                    // Closing the read end would kill the generator with SIGPIPE
                    std::future::pending::<()>().await;
                }
            }
        }
    })
}

/// Owning handle to a running pipeline.
///
/// Dropping a handle whose processes have not been reaped kills both process
/// groups; tokio then reaps the children.
pub struct PipelineHandle {
    generator: Child,
    encoder: Child,
    generator_pid: Option<u32>,
    encoder_pid: Option<u32>,
    generator_status: Option<ExitStatus>,
    encoder_status: Option<ExitStatus>,
    status_stream: Option<ChildStderr>,
    generator_tail: Arc<Mutex<DiagnosticTail>>,
    generator_reader: Option<JoinHandle<()>>,
    suspended: bool,
}

impl fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("generator_pid", &self.generator_pid)
            .field("encoder_pid", &self.encoder_pid)
            .field("generator_status", &self.generator_status)
            .field("encoder_status", &self.encoder_status)
            .field("suspended", &self.suspended)
            .finish()
    }
}

impl PipelineHandle {
    /// Encoder stderr, carrying `-progress` output. Can be taken once.
    pub fn take_status_stream(&mut self) -> Option<ChildStderr> {
        self.status_stream.take()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn pid(&self, role: ProcessRole) -> Option<u32> {
        match role {
            ProcessRole::Generator => self.generator_pid,
            ProcessRole::Encoder => self.encoder_pid,
        }
    }

    pub fn exit_status(&self, role: ProcessRole) -> Option<ExitStatus> {
        match role {
            ProcessRole::Generator => self.generator_status,
            ProcessRole::Encoder => self.encoder_status,
        }
    }

    /// Both statuses, once both processes have been reaped.
    pub fn exits(&self) -> Option<PipelineExit> {
        Some(PipelineExit {
            generator: self.generator_status?,
            encoder: self.encoder_status?,
        })
    }

    fn live_roles(&self) -> impl Iterator<Item = ProcessRole> + '_ {
        [ProcessRole::Generator, ProcessRole::Encoder]
            .into_iter()
            .filter(|role| self.exit_status(*role).is_none())
    }

    fn signal(&self, role: ProcessRole, signal: Signal) -> Result<(), PipelineError> {
        let Some(pid) = self.pid(role) else {
            return Ok(());
        };
        signal_group(pid, signal).map_err(|message| PipelineError::Signal { role, message })
    }

    /// Stop both process groups. Either both end up stopped or neither does.
    pub fn suspend(&mut self) -> Result<(), PipelineError> {
        if self.suspended {
            return Ok(());
        }
        let mut stopped = Vec::with_capacity(2);
        for role in self.live_roles().collect::<Vec<_>>() {
            if let Err(e) = self.signal(role, Signal::Stop) {
                for done in stopped {
                    if let Err(rollback) = self.signal(done, Signal::Continue) {
                        warn!("Rollback after failed suspend: {}", rollback);
                    }
                }
                return Err(PipelineError::Suspend(e.to_string()));
            }
            stopped.push(role);
        }
        self.suspended = true;
        Ok(())
    }

    /// Continue both process groups after [`suspend`](Self::suspend).
    pub fn resume(&mut self) -> Result<(), PipelineError> {
        if !self.suspended {
            return Ok(());
        }
        let mut continued = Vec::with_capacity(2);
        for role in self.live_roles().collect::<Vec<_>>() {
            if let Err(e) = self.signal(role, Signal::Continue) {
                for done in continued {
                    if let Err(rollback) = self.signal(done, Signal::Stop) {
                        warn!("Rollback after failed resume: {}", rollback);
                    }
                }
                return Err(PipelineError::Resume(e.to_string()));
            }
            continued.push(role);
        }
        self.suspended = false;
        Ok(())
    }

    /// Collect exit statuses without blocking. `Some` once both have exited.
    pub fn poll_exit(&mut self) -> io::Result<Option<PipelineExit>> {
        if self.generator_status.is_none() {
            self.generator_status = self.generator.try_wait()?;
        }
        if self.encoder_status.is_none() {
            self.encoder_status = self.encoder.try_wait()?;
        }
        Ok(self.exits())
    }

    /// Wait for the next process to exit and record its status.
    ///
    /// Cancel safe. Pends forever once both have been reaped.
    pub async fn wait_next_exit(&mut self) -> io::Result<(ProcessRole, ExitStatus)> {
        let (role, status) = match (self.generator_status, self.encoder_status) {
            (None, None) => tokio::select! {
                status = self.generator.wait() => (ProcessRole::Generator, status?),
                status = self.encoder.wait() => (ProcessRole::Encoder, status?),
            },
            (None, Some(_)) => (ProcessRole::Generator, self.generator.wait().await?),
            (Some(_), None) => (ProcessRole::Encoder, self.encoder.wait().await?),
            (Some(_), Some(_)) => std::future::pending().await,
        };
        match role {
            ProcessRole::Generator => self.generator_status = Some(status),
            ProcessRole::Encoder => self.encoder_status = Some(status),
        }
        debug!(role = %role, status = %status, "Pipeline process exited");
        Ok((role, status))
    }

    /// Wait until both processes have exited.
    pub async fn wait(&mut self) -> io::Result<PipelineExit> {
        loop {
            if let Some(exits) = self.exits() {
                return Ok(exits);
            }
            self.wait_next_exit().await?;
        }
    }

    /// Ask both processes to stop, then force-kill whatever is left after
    /// `grace`. Both are always reaped before this returns.
    pub async fn terminate(&mut self, grace: Duration) -> io::Result<PipelineExit> {
        if let Some(exits) = self.poll_exit()? {
            return Ok(exits);
        }

        for role in self.live_roles().collect::<Vec<_>>() {
            if let Err(e) = self.signal(role, Signal::Terminate) {
                debug!("{}", e);
            }
            // Stopped processes only act on SIGTERM once continued
            if self.suspended {
                if let Err(e) = self.signal(role, Signal::Continue) {
                    debug!("{}", e);
                }
            }
        }
        self.suspended = false;

        if let Ok(result) = tokio::time::timeout(grace, self.wait()).await {
            return result;
        }

        warn!(
            grace_ms = grace.as_millis() as u64,
            "Pipeline ignored termination, killing"
        );
        for role in self.live_roles().collect::<Vec<_>>() {
            if let Err(e) = self.signal(role, Signal::Kill) {
                debug!("{}", e);
            }
        }
        if self.generator_status.is_none() {
            let _ = self.generator.start_kill();
        }
        if self.encoder_status.is_none() {
            let _ = self.encoder.start_kill();
        }
        self.wait().await
    }

    /// Last lines the generator wrote to stderr.
    ///
    /// Waits up to `timeout` for the generator's stderr to close so lines
    /// written just before exit are included.
    pub async fn generator_diagnostics(&mut self, timeout: Duration) -> DiagnosticTail {
        if let Some(reader) = self.generator_reader.take() {
            match tokio::time::timeout(timeout, reader).await {
                Ok(_) => {}
                Err(_) => debug!("Generator stderr still open, using partial diagnostics"),
            }
        }
        self.generator_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if let Some(reader) = self.generator_reader.take() {
            reader.abort();
        }
        for role in self.live_roles().collect::<Vec<_>>() {
            if let Some(pid) = self.pid(role) {
                let _ = signal_group(pid, Signal::Kill);
            }
        }
        // kill_on_drop covers the direct children; tokio reaps them.
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Stop,
    Continue,
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) -> Result<(), String> {
    use nix::sys::signal::{killpg, Signal as Sig};
    use nix::unistd::Pid;

    let sig = match signal {
        Signal::Stop => Sig::SIGSTOP,
        Signal::Continue => Sig::SIGCONT,
        Signal::Terminate => Sig::SIGTERM,
        Signal::Kill => Sig::SIGKILL,
    };
    let pid = i32::try_from(pid).map_err(|e| e.to_string())?;
    killpg(Pid::from_raw(pid), sig).map_err(|errno| format!("{sig:?}: {errno}"))
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, signal: Signal) -> Result<(), String> {
    Err(format!("{signal:?} is not supported on this platform"))
}
