//! Encoder progress parsing.
//!
//! The encoder runs with `-progress pipe:2`, so its stderr carries blocks of
//! `key=value` lines terminated by `progress=continue` or `progress=end`, mixed
//! with ordinary log output. Frame lines update the snapshot; anything that is
//! not `key=value` goes to the diagnostic tail.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use vrender_models::ProgressSnapshot;

use crate::diagnostics::DiagnosticTail;

/// Turns the encoder status stream into [`ProgressSnapshot`]s.
///
/// Time is passed in by the caller so the clock can be driven in tests.
#[derive(Debug)]
pub struct ProgressMonitor {
    snapshot: ProgressSnapshot,
    /// (frame, active time) pairs for the fps moving average
    samples: VecDeque<(u64, Duration)>,
    window: usize,
    tail: DiagnosticTail,
    /// Active time accumulated before the current run segment
    accumulated: Duration,
    /// Start of the current run segment, `None` while paused or not started
    running_since: Option<Instant>,
    paused: bool,
    saw_end: bool,
    stream_ended: bool,
}

impl ProgressMonitor {
    pub fn new(total_frames: u64, fps_window: usize, tail_lines: usize) -> Self {
        Self {
            snapshot: ProgressSnapshot::pending(total_frames),
            samples: VecDeque::with_capacity(fps_window.max(2)),
            window: fps_window.max(2),
            tail: DiagnosticTail::new(tail_lines),
            accumulated: Duration::ZERO,
            running_since: None,
            paused: false,
            saw_end: false,
            stream_ended: false,
        }
    }

    /// Start the elapsed-time clock. Called once the processes are spawned.
    pub fn start(&mut self, now: Instant) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    /// Feed one line observed at `now`.
    ///
    /// Returns the new snapshot when the line carried a frame index or the end
    /// marker. Frame updates are ignored while paused.
    pub fn observe_line(&mut self, line: &str, now: Instant) -> Option<ProgressSnapshot> {
        let line = line.trim();
        let Some((key, value)) = parse_key_value(line) else {
            self.tail.push(line);
            return None;
        };

        match key {
            "frame" => {
                if self.is_paused() {
                    return None;
                }
                let frame = value.parse::<u64>().ok()?;
                self.record_frame(frame, now);
                Some(self.snapshot)
            }
            "progress" if value == "end" => {
                self.saw_end = true;
                self.refresh_elapsed(now);
                Some(self.snapshot)
            }
            _ => None,
        }
    }

    fn record_frame(&mut self, frame: u64, now: Instant) {
        let elapsed = self.active_time(now);
        self.snapshot.elapsed = elapsed;
        self.snapshot.started = true;
        // Never move backwards
        self.snapshot.current_frame = self.snapshot.current_frame.max(frame);

        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back((self.snapshot.current_frame, elapsed));
        self.snapshot.fps = self.smoothed_fps();
    }

    fn smoothed_fps(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let (first_frame, first_time) = *self.samples.front()?;
        let (last_frame, last_time) = *self.samples.back()?;
        let span = last_time.checked_sub(first_time)?.as_secs_f64();
        if span <= 0.0 {
            return self.snapshot.fps;
        }
        Some((last_frame - first_frame) as f64 / span)
    }

    fn active_time(&self, now: Instant) -> Duration {
        match self.running_since {
            Some(since) => self.accumulated + now.saturating_duration_since(since),
            None => self.accumulated,
        }
    }

    fn refresh_elapsed(&mut self, now: Instant) {
        self.snapshot.elapsed = self.active_time(now);
    }

    /// Freeze the snapshot and stop the clock.
    pub fn pause(&mut self, now: Instant) {
        self.paused = true;
        if let Some(since) = self.running_since.take() {
            self.accumulated += now.saturating_duration_since(since);
            self.snapshot.elapsed = self.accumulated;
        }
    }

    /// Restart the clock after [`pause`](Self::pause).
    pub fn resume(&mut self, now: Instant) {
        if self.paused {
            self.paused = false;
            self.start(now);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot
    }

    /// Record that the status stream reached EOF.
    pub fn mark_stream_ended(&mut self) {
        self.stream_ended = true;
    }

    pub fn stream_ended(&self) -> bool {
        self.stream_ended
    }

    /// Whether the encoder reported `progress=end`.
    pub fn saw_end(&self) -> bool {
        self.saw_end
    }

    /// Whether output generation got through every frame.
    pub fn reached_end(&self) -> bool {
        self.saw_end || self.snapshot.is_complete()
    }

    /// Non-progress lines seen on the status stream.
    pub fn diagnostics(&self) -> &DiagnosticTail {
        &self.tail
    }
}

/// Split `key=value` where the key is a bare lowercase identifier.
fn parse_key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let is_key = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    is_key.then(|| (key, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn test_frame_lines_update_snapshot() {
        let base = Instant::now();
        let mut monitor = ProgressMonitor::new(100, 10, 5);
        monitor.start(base);

        let first = monitor.observe_line("frame=10", at(base, 1000)).unwrap();
        assert_eq!(first.current_frame, 10);
        assert!(first.started);
        assert_eq!(first.fps, None);

        let second = monitor.observe_line("frame=40", at(base, 2000)).unwrap();
        assert_eq!(second.current_frame, 40);
        assert!((second.fps.unwrap() - 30.0).abs() < 0.01);
        assert_eq!(second.elapsed, Duration::from_secs(2));
    }

    #[test]
    fn test_other_lines_are_ignored() {
        let base = Instant::now();
        let mut monitor = ProgressMonitor::new(0, 10, 5);
        monitor.start(base);

        assert!(monitor.observe_line("fps=29.97", base).is_none());
        assert!(monitor.observe_line("progress=continue", base).is_none());
        assert!(monitor.observe_line("frame=abc", base).is_none());
        assert!(monitor.observe_line("[mp4 @ 0x55] Starting second pass", base).is_none());
        assert!(!monitor.snapshot().started);
        assert_eq!(
            monitor.diagnostics().joined(),
            "[mp4 @ 0x55] Starting second pass"
        );
    }

    #[test]
    fn test_frames_never_regress() {
        let base = Instant::now();
        let mut monitor = ProgressMonitor::new(100, 10, 5);
        monitor.start(base);
        monitor.observe_line("frame=50", at(base, 100));
        let snap = monitor.observe_line("frame=20", at(base, 200)).unwrap();
        assert_eq!(snap.current_frame, 50);
    }

    #[test]
    fn test_pause_freezes_progress() {
        let base = Instant::now();
        let mut monitor = ProgressMonitor::new(100, 10, 5);
        monitor.start(base);
        monitor.observe_line("frame=10", at(base, 1000));

        monitor.pause(at(base, 1000));
        assert!(monitor.is_paused());
        assert!(monitor.observe_line("frame=90", at(base, 5000)).is_none());
        assert_eq!(monitor.snapshot().current_frame, 10);

        // Ten seconds paused do not count towards elapsed time or fps
        monitor.resume(at(base, 11_000));
        let snap = monitor.observe_line("frame=40", at(base, 12_000)).unwrap();
        assert_eq!(snap.elapsed, Duration::from_secs(2));
        assert!((snap.fps.unwrap() - 30.0).abs() < 0.01);
    }

    #[test]
    fn test_fps_uses_moving_window() {
        let base = Instant::now();
        let mut monitor = ProgressMonitor::new(0, 3, 5);
        monitor.start(base);
        // Slow start, then steady 10 fps
        monitor.observe_line("frame=0", at(base, 0));
        monitor.observe_line("frame=1", at(base, 1000));
        monitor.observe_line("frame=11", at(base, 2000));
        let snap = monitor.observe_line("frame=21", at(base, 3000)).unwrap();
        assert!((snap.fps.unwrap() - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_end_marker() {
        let base = Instant::now();
        let mut monitor = ProgressMonitor::new(100, 10, 5);
        monitor.start(base);
        monitor.observe_line("frame=60", at(base, 100));
        assert!(!monitor.reached_end());

        assert!(monitor.observe_line("progress=end", at(base, 200)).is_some());
        assert!(monitor.saw_end());
        assert!(monitor.reached_end());

        assert!(!monitor.stream_ended());
        monitor.mark_stream_ended();
        assert!(monitor.stream_ended());
    }
}
