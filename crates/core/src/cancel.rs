use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::WorkflowError;
use crate::logger;

/// Longest uninterrupted sleep slice. Bounds how long a raised panic signal
/// can go unnoticed inside a wait.
const SLICE: Duration = Duration::from_millis(10);

/// Operator panic signal.
///
/// Once raised it stays raised for the life of the run. Every wait and
/// every input action checks it first.
#[derive(Debug, Clone, Default)]
pub struct Cancel {
    flag: Arc<AtomicBool>,
}

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a flag shared with a hotkey listener or the TUI.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_panic_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Callback for process interrupts (Ctrl+C, SIGTERM). Raising the signal
    /// lets the run stop through its normal exit path, which releases the
    /// guard and flushes stats.
    pub fn interrupt_handler(&self) -> impl Fn() + Send + 'static {
        let cancel = self.clone();
        move || {
            if !cancel.is_panic_set() {
                logger::warn("interrupted, stopping");
            }
            cancel.raise();
        }
    }

    /// `Err(Cancelled)` once the signal is raised.
    pub fn check(&self) -> Result<(), WorkflowError> {
        if self.is_panic_set() {
            Err(WorkflowError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `d`, waking early with `Cancelled` when the signal is raised.
    pub fn sleep(&self, d: Duration) -> Result<(), WorkflowError> {
        let deadline = Instant::now() + d;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(SLICE.min(deadline - now));
        }
    }

    pub fn sleep_secs(&self, secs: f64) -> Result<(), WorkflowError> {
        self.sleep(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// Operator start signal. Fires once, never resets.
#[derive(Debug, Clone, Default)]
pub struct StartSignal {
    flag: Arc<AtomicBool>,
}

impl StartSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    pub fn fire(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_fired(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_signal_is_sticky() {
        let cancel = Cancel::new();
        assert!(cancel.check().is_ok());
        cancel.clone().raise();
        assert!(cancel.is_panic_set());
        assert!(matches!(cancel.check(), Err(WorkflowError::Cancelled)));
        assert!(matches!(cancel.check(), Err(WorkflowError::Cancelled)));
    }

    #[test]
    fn interrupt_handler_raises_the_shared_signal() {
        let cancel = Cancel::new();
        let handler = cancel.interrupt_handler();
        assert!(!cancel.is_panic_set());
        handler();
        assert!(matches!(cancel.check(), Err(WorkflowError::Cancelled)));
        // Repeated interrupts are harmless.
        handler();
        assert!(cancel.is_panic_set());
    }

    #[test]
    fn sleep_wakes_within_a_slice_of_the_signal() {
        let cancel = Cancel::new();
        let remote = cancel.clone();
        let raiser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.raise();
        });
        let started = Instant::now();
        let res = cancel.sleep(Duration::from_secs(10));
        raiser.join().unwrap();
        assert!(matches!(res, Err(WorkflowError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn sleep_runs_to_completion_without_signal() {
        let cancel = Cancel::new();
        let started = Instant::now();
        cancel.sleep(Duration::from_millis(30)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn start_signal_shares_its_flag() {
        let start = StartSignal::new();
        let other = StartSignal::from_flag(start.flag());
        assert!(!start.is_fired());
        other.fire();
        assert!(start.is_fired());
    }
}
