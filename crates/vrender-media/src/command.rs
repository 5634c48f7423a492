//! Generator/encoder command building.
//!
//! A render is two processes: a vspipe generator that writes y4m frames to
//! stdout, and an FFmpeg encoder that reads them from stdin and writes the
//! output file, reporting progress with `-progress pipe:2`.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;
use vrender_models::{JobId, JobParams, RenderSettings};

use crate::error::{BuildError, BuildResult};
use crate::probe::{ensure_readable, probe_video, VideoInfo};

/// Upper bound on ` (n)` suffixes tried when the derived output name is taken.
const MAX_OUTPUT_NAME_ATTEMPTS: u32 = 1000;

/// One executable plus its ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Program name for logs and error messages.
    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program_name()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

/// The generator and encoder command lines for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPair {
    pub generator: CommandSpec,
    pub encoder: CommandSpec,
}

/// Everything a builder needs to produce the commands for one job.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub job_id: JobId,
    pub params: &'a JobParams,
    pub output_path: &'a Path,
    pub workspace: &'a Path,
    pub preview_path: &'a Path,
    /// Metadata probed earlier, if any
    pub video_info: Option<&'a VideoInfo>,
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct RenderPlan {
    pub commands: CommandPair,
    pub video_info: VideoInfo,
}

/// Produces the two command lines for a job.
///
/// Implementations may read the filesystem (validation, probing) but must not
/// modify it.
#[async_trait]
pub trait CommandBuilder: Send + Sync {
    async fn build(&self, request: BuildRequest<'_>) -> BuildResult<RenderPlan>;
}

/// Builder for the FFmpeg encoder command reading frames from stdin.
#[derive(Debug, Clone)]
pub struct EncoderCommand {
    ffmpeg: PathBuf,
    /// Demuxer of the piped frames
    pipe_format: String,
    /// Secondary input providing the audio stream
    audio_source: Option<PathBuf>,
    output: PathBuf,
    output_args: Vec<String>,
    /// Log level
    log_level: String,
}

impl EncoderCommand {
    pub fn new(ffmpeg: impl Into<PathBuf>, output: impl AsRef<Path>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            pipe_format: "yuv4mpegpipe".to_string(),
            audio_source: None,
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            log_level: "error".to_string(),
        }
    }

    /// Map the audio stream of `source` into the output, if it has one.
    pub fn audio_from(mut self, source: impl AsRef<Path>) -> Self {
        self.audio_source = Some(source.as_ref().to_path_buf());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();

        args.extend(["-y", "-hide_banner", "-nostats", "-loglevel"].map(OsString::from));
        args.push(self.log_level.clone().into());

        // Machine-readable progress on stderr
        args.extend(["-progress", "pipe:2"].map(OsString::from));

        // Frames from the generator
        args.extend(["-f", self.pipe_format.as_str(), "-i", "-"].map(OsString::from));

        if let Some(audio) = &self.audio_source {
            args.push("-i".into());
            args.push(audio.as_os_str().to_owned());
            args.extend(["-map", "0:v", "-map", "1:a?"].map(OsString::from));
        }

        args.extend(self.output_args.iter().map(OsString::from));
        args.push(self.output.as_os_str().to_owned());
        args
    }

    pub fn into_spec(self) -> CommandSpec {
        let args = self.build_args();
        CommandSpec::new(self.ffmpeg).args(args)
    }
}

/// Locations of the external tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub vspipe: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    /// VapourSynth script run by the generator
    pub script: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            vspipe: PathBuf::from("vspipe"),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            script: PathBuf::from("blur.vpy"),
        }
    }
}

impl ToolPaths {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |key: &str, default: PathBuf| {
            std::env::var_os(key).map(PathBuf::from).unwrap_or(default)
        };
        Self {
            vspipe: var("VSPIPE_PATH", defaults.vspipe),
            ffmpeg: var("FFMPEG_PATH", defaults.ffmpeg),
            ffprobe: var("FFPROBE_PATH", defaults.ffprobe),
            script: var("RENDER_SCRIPT_PATH", defaults.script),
        }
    }

    /// Resolve every executable through PATH.
    pub fn resolved(self) -> BuildResult<Self> {
        let find = |tool: &Path| {
            which::which(tool).map_err(|_| BuildError::ToolNotFound(tool.display().to_string()))
        };
        Ok(Self {
            vspipe: find(&self.vspipe)?,
            ffmpeg: find(&self.ffmpeg)?,
            ffprobe: find(&self.ffprobe)?,
            script: self.script,
        })
    }
}

/// Output path for a job: the requested one, or `<stem><suffix>.<container>`
/// next to the source.
///
/// A derived name that is already taken by a file other than the source gets a
/// ` (n)` suffix. The source itself is never skipped here; the builder rejects
/// it.
pub fn planned_output_path(params: &JobParams) -> PathBuf {
    planned_output_path_avoiding(params, &[])
}

/// Like [`planned_output_path`], also skipping derived names in `reserved`
/// (outputs promised to jobs that have not written them yet).
pub fn planned_output_path_avoiding(params: &JobParams, reserved: &[&Path]) -> PathBuf {
    if let Some(output) = &params.output {
        return output.clone();
    }

    let settings: &RenderSettings = &params.settings;
    let dir = params
        .source
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let stem = params.display_name();
    let candidate = |n: u32| {
        let name = if n == 0 {
            format!("{}{}.{}", stem, settings.output_suffix, settings.container)
        } else {
            format!("{}{} ({}).{}", stem, settings.output_suffix, n, settings.container)
        };
        dir.join(name)
    };

    let taken = |path: &Path| path.exists() || reserved.contains(&path);

    let first = candidate(0);
    if !taken(&first) || same_file(&first, &params.source) {
        return first;
    }
    (1..MAX_OUTPUT_NAME_ATTEMPTS)
        .map(candidate)
        .find(|path| !taken(path))
        .unwrap_or(first)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Reject outputs that would overwrite the source or have nowhere to go.
pub fn validate_output_path(source: &Path, output: &Path) -> BuildResult<()> {
    if output.file_name().is_none() || same_file(source, output) {
        return Err(BuildError::InvalidOutputPath(output.to_path_buf()));
    }
    match output.parent() {
        Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => Ok(()),
        None => Ok(()),
        Some(_) => Err(BuildError::InvalidOutputPath(output.to_path_buf())),
    }
}

/// Default builder: vspipe running a VapourSynth script, piped into FFmpeg.
#[derive(Debug, Clone, Default)]
pub struct VapourSynthCommandBuilder {
    tools: ToolPaths,
}

impl VapourSynthCommandBuilder {
    pub fn new(tools: ToolPaths) -> Self {
        Self { tools }
    }

    /// Command lines for an already validated and probed job.
    pub fn commands_for(&self, request: &BuildRequest<'_>) -> CommandPair {
        let params = request.params;
        let settings = &params.settings;

        let mut generator = CommandSpec::new(&self.tools.vspipe)
            .args(["-c", "y4m"])
            .arg("-a")
            .arg(script_arg("video_path", &params.source))
            .arg("-a")
            .arg(format!("settings={}", settings.filters_json()))
            .arg("-a")
            .arg(script_arg("preview_path", request.preview_path));
        if let Some(config) = &params.config_override {
            generator = generator.arg("-a").arg(script_arg("config_path", config));
        }
        let generator = generator.arg(&self.tools.script).arg("-");

        let encoder = EncoderCommand::new(&self.tools.ffmpeg, request.output_path)
            .audio_from(&params.source)
            .output_args(settings.encoding.video_args())
            .output_args(settings.encoding.audio_args(settings.copy_audio))
            .into_spec();

        CommandPair { generator, encoder }
    }
}

fn script_arg(key: &str, path: &Path) -> OsString {
    let mut arg = OsString::from(format!("{key}="));
    arg.push(path.as_os_str());
    arg
}

#[async_trait]
impl CommandBuilder for VapourSynthCommandBuilder {
    async fn build(&self, request: BuildRequest<'_>) -> BuildResult<RenderPlan> {
        let source = &request.params.source;
        ensure_readable(source)?;
        validate_output_path(source, request.output_path)?;

        let video_info = match request.video_info {
            Some(info) => info.clone(),
            None => probe_video(&self.tools.ffprobe, source).await?,
        };
        if video_info.width == 0 || video_info.height == 0 {
            return Err(BuildError::UnsupportedFormat(format!(
                "{} has no usable video dimensions",
                source.display()
            )));
        }

        let commands = self.commands_for(&request);
        debug!(job_id = %request.job_id, "Generator: {}", commands.generator.display());
        debug!(job_id = %request.job_id, "Encoder: {}", commands.encoder.display());

        Ok(RenderPlan {
            commands,
            video_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vrender_models::EncodingConfig;

    fn sample_info() -> VideoInfo {
        VideoInfo {
            duration: 10.0,
            width: 1280,
            height: 720,
            fps: 60.0,
            frame_count: 600,
            codec: "h264".to_string(),
        }
    }

    fn args_of(spec: &CommandSpec) -> Vec<String> {
        spec.get_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_encoder_args() {
        let args: Vec<String> = EncoderCommand::new("ffmpeg", "out.mp4")
            .audio_from("in.mp4")
            .output_args(["-c:v", "libx264"])
            .build_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.windows(2).any(|w| w == ["-progress", "pipe:2"]));
        assert!(args.windows(4).any(|w| w == ["-f", "yuv4mpegpipe", "-i", "-"]));
        assert!(args.windows(2).any(|w| w == ["-i", "in.mp4"]));
        assert!(args.windows(2).any(|w| w == ["-map", "1:a?"]));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_derived_output_path() {
        let params = JobParams::new("/videos/match.mkv");
        assert_eq!(
            planned_output_path(&params),
            PathBuf::from("/videos/match - blur.mp4")
        );
    }

    #[test]
    fn test_requested_output_path_wins() {
        let params = JobParams::new("/videos/match.mkv").with_output("/out/final.mov");
        assert_eq!(planned_output_path(&params), PathBuf::from("/out/final.mov"));
    }

    #[test]
    fn test_derived_output_skips_existing_files() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"src").unwrap();
        std::fs::write(dir.path().join("clip - blur.mp4"), b"old").unwrap();

        let params = JobParams::new(&source);
        assert_eq!(
            planned_output_path(&params),
            dir.path().join("clip - blur (1).mp4")
        );
    }

    #[test]
    fn test_derived_output_skips_reserved_names() {
        let params = JobParams::new("/videos/match.mkv");
        let first = PathBuf::from("/videos/match - blur.mp4");
        let second = PathBuf::from("/videos/match - blur (1).mp4");

        assert_eq!(
            planned_output_path_avoiding(&params, &[first.as_path()]),
            second
        );
        assert_eq!(
            planned_output_path_avoiding(&params, &[first.as_path(), second.as_path()]),
            PathBuf::from("/videos/match - blur (2).mp4")
        );

        // A requested output is never renamed
        let requested = JobParams::new("/videos/match.mkv").with_output(&first);
        assert_eq!(
            planned_output_path_avoiding(&requested, &[first.as_path()]),
            first
        );
    }

    #[test]
    fn test_output_equal_to_source_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"src").unwrap();

        let mut settings = RenderSettings::default();
        settings.output_suffix.clear();
        let params = JobParams::new(&source).with_settings(settings);
        let output = planned_output_path(&params);

        assert_eq!(output, source);
        assert!(matches!(
            validate_output_path(&source, &output),
            Err(BuildError::InvalidOutputPath(_))
        ));
    }

    #[test]
    fn test_output_in_missing_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("clip.mp4");
        let output = dir.path().join("missing").join("out.mp4");
        assert!(matches!(
            validate_output_path(&source, &output),
            Err(BuildError::InvalidOutputPath(_))
        ));
    }

    #[test]
    fn test_commands_for_wires_paths_and_settings() {
        let builder = VapourSynthCommandBuilder::new(ToolPaths::default());
        let settings = RenderSettings::default()
            .with_filters(serde_json::json!({"blur": true}))
            .with_encoding(EncodingConfig::default().with_crf(20));
        let params = JobParams::new("/in/a.mp4")
            .with_settings(settings)
            .with_config_override("/cfg/override.cfg");
        let info = sample_info();
        let request = BuildRequest {
            job_id: JobId::next(),
            params: &params,
            output_path: Path::new("/in/a - blur.mp4"),
            workspace: Path::new("/tmp/ws"),
            preview_path: Path::new("/tmp/ws/preview.jpg"),
            video_info: Some(&info),
        };

        let pair = builder.commands_for(&request);
        let gen = args_of(&pair.generator);
        assert_eq!(pair.generator.program(), Path::new("vspipe"));
        assert!(gen.contains(&"video_path=/in/a.mp4".to_string()));
        assert!(gen.contains(&r#"settings={"blur":true}"#.to_string()));
        assert!(gen.contains(&"config_path=/cfg/override.cfg".to_string()));
        assert!(gen.contains(&"preview_path=/tmp/ws/preview.jpg".to_string()));
        assert_eq!(gen.last().map(String::as_str), Some("-"));

        let enc = args_of(&pair.encoder);
        assert_eq!(pair.encoder.program(), Path::new("ffmpeg"));
        assert!(enc.windows(2).any(|w| w == ["-crf", "20"]));
        assert!(enc.windows(2).any(|w| w == ["-c:a", "copy"]));
        assert_eq!(enc.last().map(String::as_str), Some("/in/a - blur.mp4"));
    }

    #[tokio::test]
    async fn test_build_rejects_missing_source() {
        let builder = VapourSynthCommandBuilder::default();
        let params = JobParams::new("/nope/missing.mp4");
        let request = BuildRequest {
            job_id: JobId::next(),
            params: &params,
            output_path: Path::new("/nope/out.mp4"),
            workspace: Path::new("/tmp"),
            preview_path: Path::new("/tmp/preview.jpg"),
            video_info: None,
        };
        let err = builder.build(request).await.unwrap_err();
        assert!(matches!(err, BuildError::SourceUnreadable { .. }));
    }

    #[tokio::test]
    async fn test_build_uses_cached_info() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.mp4");
        std::fs::write(&source, b"not really a video").unwrap();
        let output = dir.path().join("a - blur.mp4");
        let info = sample_info();
        let params = JobParams::new(&source);
        let request = BuildRequest {
            job_id: JobId::next(),
            params: &params,
            output_path: &output,
            workspace: dir.path(),
            preview_path: &dir.path().join("preview.jpg"),
            video_info: Some(&info),
        };

        // No ffprobe call happens because the metadata is already known.
        let plan = VapourSynthCommandBuilder::default()
            .build(request)
            .await
            .unwrap();
        assert_eq!(plan.video_info, info);
    }
}
