//! Current-model bookkeeping.
//!
//! One model name is "current" for the whole process. Chat handlers read it on
//! every dispatch, the `/model` endpoint replaces it. The value lives behind an
//! `ArcSwap`, so readers never observe a half-written name.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Holds the process-wide current model name.
#[derive(Debug)]
pub struct ModelRegistry {
    current: ArcSwap<String>,
    switches: AtomicU64,
}

impl ModelRegistry {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            current: ArcSwap::from_pointee(default_model.into()),
            switches: AtomicU64::new(0),
        }
    }

    /// The model every chat request is currently dispatched to.
    pub fn current(&self) -> Arc<String> {
        self.current.load_full()
    }

    /// Replace the current model, returning the previous one.
    pub fn set(&self, model: impl Into<String>) -> Arc<String> {
        let previous = self.current.swap(Arc::new(model.into()));
        self.switches.fetch_add(1, Ordering::Relaxed);
        previous
    }

    /// Number of times `set` has been called.
    pub fn switch_count(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }
}
