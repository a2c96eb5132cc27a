//! Progress callback plumbing

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use crate::domain::task::{ProgressUpdate, Stage};

/// Called at every stage boundary with `(task_id, stage, update)`
pub type ProgressCallback = Arc<dyn Fn(&str, Stage, &ProgressUpdate) + Send + Sync>;

/// Holds the registered progress callback, if any
#[derive(Clone, Default)]
pub struct ProgressHub {
    callback: Arc<RwLock<Option<ProgressCallback>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, callback: ProgressCallback) {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub fn clear(&self) {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_set(&self) -> bool {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Invoke the callback
    ///
    /// The lock is released before the call so the callback may re-register
    /// itself or talk to the engine. A panicking callback is logged and
    /// otherwise ignored.
    pub fn emit(&self, task_id: &str, stage: Stage, update: &ProgressUpdate) {
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(callback) = callback else {
            return;
        };

        if catch_unwind(AssertUnwindSafe(|| callback(task_id, stage, update))).is_err() {
            warn!(task_id = %task_id, stage = %stage, "Progress callback panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_emit_reaches_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hub = ProgressHub::new();
        let sink = seen.clone();
        hub.set(Arc::new(move |id, stage, update| {
            sink.lock().unwrap().push((id.to_string(), stage, update.percent));
        }));

        hub.emit("t1", Stage::Extraction, &ProgressUpdate::new(Stage::Extraction, "extracting"));

        assert_eq!(*seen.lock().unwrap(), vec![("t1".to_string(), Stage::Extraction, 60)]);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let hub = ProgressHub::new();
        hub.set(Arc::new(|_, _, _| panic!("callback bug")));
        hub.emit("t1", Stage::Started, &ProgressUpdate::new(Stage::Started, "started"));
        assert!(hub.is_set());

        hub.clear();
        assert!(!hub.is_set());
        hub.emit("t1", Stage::Started, &ProgressUpdate::new(Stage::Started, "started"));
    }
}
