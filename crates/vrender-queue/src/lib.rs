//! Sequential render queue.
//!
//! This crate provides:
//! - [`Job`]: one render, created by the caller and handed to the queue
//! - [`RenderQueue`]: ordered jobs plus the single worker that executes them
//! - Event subscription for status, progress and finished notifications
//! - Queue configuration, job logging and metrics

pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod logging;
pub mod metrics;
pub mod queue;
mod runner;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use events::{QueueEvent, Subscription, SubscriptionId};
pub use job::{ControlRequest, Job, JobSnapshot};
pub use logging::JobLogger;
pub use queue::{RenderQueue, StopOutcome};
