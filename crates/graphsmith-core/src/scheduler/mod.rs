//! Task scheduling
//!
//! This module provides:
//! - The task registry read by status queries
//! - The per-task pipeline (schema check, extraction, merge)
//! - A bounded worker pool with explicit start and stop
//! - Progress callbacks and merge-lane counters

mod gauge;
mod manager;
mod pipeline;
mod progress;
mod registry;

pub use gauge::{MergeGauge, MergeGaugeSnapshot, MergeGuard};
pub use manager::TaskManager;
pub use pipeline::{SharedState, TaskPipeline};
pub use progress::{ProgressCallback, ProgressHub};
pub use registry::TaskRegistry;
