//! Graphsmith Core Library
//!
//! This crate provides the core functionality for Graphsmith, including:
//! - Schema registry with monotonic class growth and O(1) snapshots
//! - Graph store (entities, class nodes, class masters, counted relationships)
//! - Extraction pipeline (schema check, delimited record extraction)
//! - Structural and model-assisted merge with identity tie-break policies
//! - Task scheduler with a bounded worker pool and a single merge lane
//! - Checksummed snapshots
//! - LLM integration (OpenAI-compatible chat completions)

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod llm;
pub mod prompts;
pub mod scheduler;
pub mod storage;

pub use engine::{EngineStatistics, KnowledgeEngine, KnowledgeEngineBuilder};
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::KnowledgeBase;
    pub use crate::domain::merge::{MergeReport, MergeStrategy, TieBreak};
    pub use crate::domain::task::{ProgressUpdate, Stage, TaskState, TaskStatus};
    pub use crate::engine::KnowledgeEngine;
    pub use crate::error::{Error, Result};
    pub use crate::llm::{FormatHint, ScriptedGenerator, TextGenerator};
}
