//! Shared data models for the vrender render queue.
//!
//! This crate provides Serde-serializable types for:
//! - Job identity, parameters and lifecycle status
//! - Render and encoding settings
//! - Progress snapshots and terminal outcomes

pub mod encoding;
pub mod job;
pub mod progress;
pub mod settings;
pub mod status;

// Re-export common types
pub use encoding::EncodingConfig;
pub use job::{JobId, JobOutcome, JobParams};
pub use progress::ProgressSnapshot;
pub use settings::RenderSettings;
pub use status::{InvalidTransition, JobStatus};
