//! Structured job logging.
//!
//! Every lifecycle line carries the job id and display name so a single job
//! can be followed through interleaved worker output.

use tracing::{error, info, warn, Span};
use vrender_models::JobId;

/// Logs lifecycle events for one job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    name: String,
}

impl JobLogger {
    pub fn new(job_id: JobId, name: &str) -> Self {
        Self {
            job_id,
            name: name.to_string(),
        }
    }

    /// Log the start of a job.
    pub fn log_start(&self, message: &str) {
        info!(job_id = %self.job_id, name = %self.name, "Job started: {}", message);
    }

    /// Log a progress update.
    pub fn log_progress(&self, message: &str) {
        info!(job_id = %self.job_id, name = %self.name, "Job progress: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, name = %self.name, "Job warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(job_id = %self.job_id, name = %self.name, "Job error: {}", message);
    }

    /// Log the terminal state of a job.
    pub fn log_completion(&self, message: &str) {
        info!(job_id = %self.job_id, name = %self.name, "Job finished: {}", message);
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Span covering the job's execution.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, name = %self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let id = JobId::next();
        let logger = JobLogger::new(id, "match");
        assert_eq!(logger.job_id(), id);
        assert_eq!(logger.name(), "match");
    }
}
