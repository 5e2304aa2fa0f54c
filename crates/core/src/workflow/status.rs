use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    /// Waiting for the start trigger.
    Armed,
    Running,
    /// Safe state unconfirmed; guard held until the operator cancels.
    Holding,
    Finished,
}

/// What the dashboard shows. Written by the worker only.
#[derive(Debug, Clone, Default)]
pub struct RunStatus {
    pub state: RunState,
    pub phase: String,
    pub iteration: u32,
    pub loops: u32,
    pub slot: Option<usize>,
    pub slots: usize,
    pub guard_engaged: bool,
    pub items_this_run: u64,
    pub recoveries_this_run: u64,
    pub eta: Option<Duration>,
    pub last_outcome: Option<String>,
    pub lifetime_loops: u64,
    pub lifetime_items: u64,
}

/// Shared, read-mostly status snapshot.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<RunStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunStatus> {
        // A panicked writer leaves a usable snapshot behind.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn update(&self, f: impl FnOnce(&mut RunStatus)) {
        f(&mut self.lock());
    }

    pub fn snapshot(&self) -> RunStatus {
        self.lock().clone()
    }
}
