//! vspipe/FFmpeg process plumbing for the render queue.
//!
//! This crate provides:
//! - Type-safe generator/encoder command building
//! - Source probing through ffprobe
//! - Job-scoped temp workspaces
//! - The two-process pipeline (generator stdout -> encoder stdin) with
//!   suspend/resume/terminate and guaranteed reaping
//! - Progress parsing from `-progress pipe:2`

pub mod command;
pub mod diagnostics;
pub mod error;
pub mod lines;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod workspace;

pub use command::{
    planned_output_path, planned_output_path_avoiding, validate_output_path, BuildRequest,
    CommandBuilder, CommandPair, CommandSpec, EncoderCommand, RenderPlan, ToolPaths,
    VapourSynthCommandBuilder,
};
pub use diagnostics::DiagnosticTail;
pub use error::{
    BuildError, BuildResult, PipelineError, RenderError, SpawnError, WorkspaceError,
};
pub use lines::OutputLines;
pub use pipeline::{PipelineExit, PipelineHandle, ProcessPipeline, ProcessRole};
pub use probe::{probe_video, VideoInfo};
pub use progress::ProgressMonitor;
pub use workspace::{TempWorkspace, PREVIEW_FILE_NAME};
