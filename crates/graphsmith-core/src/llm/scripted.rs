//! Deterministic text generator for tests and offline runs
//!
//! Answers are looked up by `FormatHint`: queued answers are consumed first,
//! then a responder closure, then a fixed default.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::generator::{FormatHint, TextGenerator};

type Responder = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

enum Step {
    Text(String),
    Fail(Error),
}

#[derive(Default)]
struct Script {
    queued: HashMap<FormatHint, VecDeque<Step>>,
    calls: HashMap<FormatHint, Vec<String>>,
}

/// A `TextGenerator` that replays canned answers
#[derive(Default)]
pub struct ScriptedGenerator {
    script: Mutex<Script>,
    responders: HashMap<FormatHint, Responder>,
    defaults: HashMap<FormatHint, String>,
    latency: Option<Duration>,
}

impl std::fmt::Debug for ScriptedGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedGenerator")
            .field("defaults", &self.defaults.keys().collect::<Vec<_>>())
            .field("responders", &self.responders.keys().collect::<Vec<_>>())
            .field("latency", &self.latency)
            .finish()
    }
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot answer
    pub fn push_text(self, hint: FormatHint, text: impl Into<String>) -> Self {
        self.push_step(hint, Step::Text(text.into()))
    }

    /// Queue a one-shot transient failure
    pub fn push_transient(self, hint: FormatHint, message: impl Into<String>) -> Self {
        self.push_step(hint, Step::Fail(Error::Transient(message.into())))
    }

    /// Queue a one-shot failure of any kind
    pub fn push_failure(self, hint: FormatHint, error: Error) -> Self {
        self.push_step(hint, Step::Fail(error))
    }

    /// Answer computed from the prompt, used once the queue is drained
    pub fn with_responder<F>(mut self, hint: FormatHint, responder: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        self.responders.insert(hint, Arc::new(responder));
        self
    }

    /// Fixed answer used when nothing else applies
    pub fn with_default(mut self, hint: FormatHint, text: impl Into<String>) -> Self {
        self.defaults.insert(hint, text.into());
        self
    }

    /// Simulated service latency per call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of calls made with the given hint
    pub fn call_count(&self, hint: FormatHint) -> usize {
        self.lock()
            .calls
            .get(&hint)
            .map(|prompts| prompts.len())
            .unwrap_or(0)
    }

    /// Prompts received with the given hint, oldest first
    pub fn prompts(&self, hint: FormatHint) -> Vec<String> {
        self.lock().calls.get(&hint).cloned().unwrap_or_default()
    }

    fn push_step(self, hint: FormatHint, step: Step) -> Self {
        self.lock().queued.entry(hint).or_default().push_back(step);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(&self, prompt: &str, hint: FormatHint) -> Result<String> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let step = {
            let mut script = self.lock();
            script
                .calls
                .entry(hint)
                .or_default()
                .push(prompt.to_string());
            script.queued.get_mut(&hint).and_then(VecDeque::pop_front)
        };

        match step {
            Some(Step::Text(text)) => Ok(text),
            Some(Step::Fail(error)) => Err(error),
            None => {
                if let Some(responder) = self.responders.get(&hint) {
                    responder(prompt)
                } else if let Some(text) = self.defaults.get(&hint) {
                    Ok(text.clone())
                } else {
                    Err(Error::LLMError(format!(
                        "no scripted response for {}",
                        hint
                    )))
                }
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
