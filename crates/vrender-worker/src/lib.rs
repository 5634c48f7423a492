//! Render worker library.
//!
//! Exposes the worker configuration so it can be tested apart from `main`.

pub mod config;

pub use config::WorkerConfig;
