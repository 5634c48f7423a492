//! Job lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle status of a render job.
///
/// ```text
/// Queued -> Preparing -> Running <-> Paused -> {Completed | Failed | Cancelled}
/// ```
///
/// `Preparing` may also go straight to `Failed` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue
    #[default]
    Queued,
    /// Workspace created, commands being built and spawned
    Preparing,
    /// Both processes alive and progressing
    Running,
    /// Both processes suspended
    Paused,
    /// Both processes exited successfully
    Completed,
    /// A process or preparation step failed
    Failed,
    /// Stopped on request
    Cancelled,
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl JobStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Preparing => "preparing",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states are sticky.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Running or Paused: the job owns live child processes.
    pub fn has_processes(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Paused)
    }

    /// Preparing, Running or Paused: the job is the one the worker executes.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Preparing | JobStatus::Running | JobStatus::Paused
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Preparing)
                | (Preparing, Running)
                | (Preparing, Failed)
                | (Preparing, Cancelled)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Failed)
                | (Paused, Cancelled)
        )
    }

    /// Validated transition.
    pub fn transition(self, next: JobStatus) -> Result<JobStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobStatus; 7] = [
        JobStatus::Queued,
        JobStatus::Preparing,
        JobStatus::Running,
        JobStatus::Paused,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    #[test]
    fn test_terminal_states_are_sticky() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn test_happy_path() {
        let status = JobStatus::Queued
            .transition(JobStatus::Preparing)
            .and_then(|s| s.transition(JobStatus::Running))
            .and_then(|s| s.transition(JobStatus::Paused))
            .and_then(|s| s.transition(JobStatus::Running))
            .and_then(|s| s.transition(JobStatus::Completed))
            .unwrap();
        assert_eq!(status, JobStatus::Completed);
    }

    #[test]
    fn test_paused_cannot_complete_directly() {
        let err = JobStatus::Paused.transition(JobStatus::Completed).unwrap_err();
        assert_eq!(err.from, JobStatus::Paused);
        assert_eq!(err.to.as_str(), "completed");
    }

    #[test]
    fn test_queued_cannot_skip_preparing() {
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn test_process_ownership_states() {
        assert!(JobStatus::Paused.has_processes());
        assert!(!JobStatus::Preparing.has_processes());
        assert!(JobStatus::Preparing.is_active());
        assert!(!JobStatus::Queued.is_active());
    }
}
