//! Render queue metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! binary installs a recorder.

use metrics::{counter, gauge, histogram};
use vrender_models::JobStatus;

/// Metric names as constants for consistency.
pub mod names {
    pub const QUEUE_LENGTH: &str = "vrender_queue_length";
    pub const JOBS_ENQUEUED_TOTAL: &str = "vrender_jobs_enqueued_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vrender_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vrender_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "vrender_jobs_cancelled_total";
    pub const RENDER_DURATION_SECONDS: &str = "vrender_render_duration_seconds";
}

/// Update queue length gauge (jobs waiting to run).
pub fn set_queue_length(length: usize) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

/// Record job enqueued.
pub fn record_job_enqueued() {
    counter!(names::JOBS_ENQUEUED_TOTAL).increment(1);
}

/// Record a terminal job state and how long it ran.
pub fn record_job_finished(status: JobStatus, duration_secs: f64) {
    let name = match status {
        JobStatus::Completed => names::JOBS_COMPLETED_TOTAL,
        JobStatus::Failed => names::JOBS_FAILED_TOTAL,
        JobStatus::Cancelled => names::JOBS_CANCELLED_TOTAL,
        _ => return,
    };
    counter!(name).increment(1);

    let labels = [("status", status.as_str().to_string())];
    histogram!(names::RENDER_DURATION_SECONDS, &labels).record(duration_secs);
}
