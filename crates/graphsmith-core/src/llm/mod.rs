//! Text-generation integration
//!
//! This module provides:
//! - The `TextGenerator` contract consumed by the extraction and merge stages
//! - An OpenAI-compatible HTTP client implementing it
//! - A scripted generator for tests and offline runs
//! - Retry with exponential backoff

mod client;
mod generator;
mod retry;
mod scripted;
mod types;

pub use client::{LlmClient, LlmClientBuilder};
pub use generator::{FormatHint, TextGenerator};
pub use retry::RetryPolicy;
pub use scripted::ScriptedGenerator;
pub use types::{ChatRequest, ChatResponse, FinishReason, LlmResponse, Message, MessageRole};
