//! Shared display slot.
//!
//! `ResultSink` is the write half, owned by the session controller. Presentation
//! code holds `DisplayWatch` read handles and never writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::state::DisplayState;

#[derive(Default)]
struct Slot {
    state: RwLock<DisplayState>,
    version: AtomicU64,
}

pub struct ResultSink {
    slot: Arc<Slot>,
}

impl Default for ResultSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Slot::default()),
        }
    }

    pub fn watch(&self) -> DisplayWatch {
        DisplayWatch {
            slot: Arc::clone(&self.slot),
        }
    }

    pub(crate) fn publish(&self, state: &DisplayState) {
        match self.slot.state.write() {
            Ok(mut guard) => *guard = state.clone(),
            Err(poisoned) => *poisoned.into_inner() = state.clone(),
        }
        self.slot.version.fetch_add(1, Ordering::SeqCst);
    }
}

/// Read handle on the last published display state.
#[derive(Clone)]
pub struct DisplayWatch {
    slot: Arc<Slot>,
}

impl DisplayWatch {
    pub fn current(&self) -> DisplayState {
        match self.slot.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Incremented on every publish; compare to detect updates without diffing.
    pub fn version(&self) -> u64 {
        self.slot.version.load(Ordering::SeqCst)
    }
}
