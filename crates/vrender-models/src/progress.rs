//! Render progress snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Point-in-time summary of a job's encoding progress.
///
/// Snapshots are plain copies; holding one never blocks the worker.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Last frame index reported by the encoder
    pub current_frame: u64,
    /// Expected frame count, 0 if unknown
    pub total_frames: u64,
    /// Smoothed frames per second, absent until two samples were seen
    pub fps: Option<f64>,
    /// Active render time, excluding time spent paused
    pub elapsed: Duration,
    /// Whether the encoder has reported at least one frame
    pub started: bool,
}

impl ProgressSnapshot {
    /// Snapshot for a job that has not produced frames yet.
    pub fn pending(total_frames: u64) -> Self {
        Self {
            total_frames,
            ..Default::default()
        }
    }

    /// Progress percentage, `None` when the total is unknown.
    pub fn percentage(&self) -> Option<f64> {
        if self.total_frames == 0 {
            return None;
        }
        Some((self.current_frame as f64 / self.total_frames as f64 * 100.0).min(100.0))
    }

    /// Whether every expected frame has been encoded.
    pub fn is_complete(&self) -> bool {
        self.total_frames > 0 && self.current_frame >= self.total_frames
    }

    /// Estimated remaining time at the smoothed frame rate.
    pub fn eta(&self) -> Option<Duration> {
        let fps = self.fps.filter(|fps| *fps > 0.0)?;
        if self.total_frames == 0 {
            return None;
        }
        let remaining = self.total_frames.saturating_sub(self.current_frame);
        Some(Duration::from_secs_f64(remaining as f64 / fps))
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.started {
            return write!(f, "waiting for frames");
        }

        match self.percentage() {
            Some(pct) => write!(
                f,
                "{}/{} frames ({:.1}%)",
                self.current_frame, self.total_frames, pct
            )?,
            None => write!(f, "{} frames", self.current_frame)?,
        }
        if let Some(fps) = self.fps {
            write!(f, ", {:.2} fps", fps)?;
        }
        write!(f, ", elapsed {}", format_duration(self.elapsed))?;
        if let Some(eta) = self.eta() {
            write!(f, ", eta {}", format_duration(eta))?;
        }
        Ok(())
    }
}
