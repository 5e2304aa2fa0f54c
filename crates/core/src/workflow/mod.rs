//! The run state machine.
//!
//! One controller drives the target through
//! `[EnsureOnline] (AcquisitionLoop -> ReturnToSafeState -> PersistState -> EnsureOnline)*`
//! on a single thread. The network guard is engaged inside the acquisition
//! loop and released only once the safe state is confirmed, or on the way
//! out of the run.

mod acquire;
mod online;
mod persist;
mod safe;
pub mod status;

use std::fmt;
use std::time::{Duration, Instant};

use crate::cancel::{Cancel, StartSignal};
use crate::config::Config;
use crate::error::WorkflowError;
use crate::guard::NetworkGuard;
use crate::logger;
use crate::platform::{self, WindowHandle};
use crate::probe::{ProbeRequest, Vision};
use crate::region::NamedRegion;
use crate::stats::RunStats;
use crate::types::MouseButton;

pub use acquire::AcquisitionReport;
pub use status::{RunState, RunStatus, StatusBoard};

/// Template roles the workflow looks for. Files are `<role>.png`.
pub mod templates {
    pub const MENU_ENTRY: &str = "menu_entry";
    pub const SESSION_CHOICE: &str = "session_choice";
    pub const CONFIRM_PROMPT: &str = "confirm_prompt";
    pub const LOADING: &str = "loading";
    pub const ONLINE_HUD: &str = "online_hud";
    pub const SAFE_MENU: &str = "safe_menu";
    pub const BROWSER_HOME: &str = "browser_home";
    pub const ADDRESS_FIELD: &str = "address_field";
    pub const LISTINGS_LINK: &str = "listings_link";
    pub const SORT_ASCENDING: &str = "sort_ascending";
    pub const SORT_DESCENDING: &str = "sort_descending";
    pub const ITEM: &str = "item";
    pub const ACQUIRE: &str = "acquire";
    pub const CONFIRM_MENU: &str = "confirm_menu";
    pub const RETURN_LINK: &str = "return_link";

    /// Roles a run cannot start without. The rest are looked for when present.
    pub const REQUIRED: [&str; 13] = [
        SAFE_MENU,
        MENU_ENTRY,
        SESSION_CHOICE,
        CONFIRM_PROMPT,
        ONLINE_HUD,
        BROWSER_HOME,
        ADDRESS_FIELD,
        LISTINGS_LINK,
        SORT_ASCENDING,
        ITEM,
        ACQUIRE,
        CONFIRM_MENU,
        RETURN_LINK,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitStart,
    EnsureOnline,
    Acquisition { slot: usize },
    ReturnToSafeState,
    PersistState,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::AwaitStart => write!(f, "await start"),
            Phase::EnsureOnline => write!(f, "ensure online"),
            Phase::Acquisition { slot } => write!(f, "acquisition (slot {})", slot + 1),
            Phase::ReturnToSafeState => write!(f, "return to safe state"),
            Phase::PersistState => write!(f, "persist state"),
        }
    }
}

/// Attempt counter for one invocation of a sub-step.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    step: &'static str,
    attempt: u32,
    max: u32,
}

impl RetryBudget {
    pub fn new(step: &'static str, max: u32) -> Self {
        Self { step, attempt: 0, max: max.max(1) }
    }

    /// Begin the next attempt. False once the budget is spent.
    pub fn next(&mut self) -> bool {
        if self.attempt >= self.max {
            return false;
        }
        self.attempt += 1;
        true
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn is_last(&self) -> bool {
        self.attempt >= self.max
    }

    pub fn exhausted(&self) -> WorkflowError {
        WorkflowError::RetriesExhausted { step: self.step, attempts: self.attempt }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunPlan {
    pub loops: u32,
    /// The target is already in online mode; skip the first transition.
    pub start_online: bool,
    /// Wait in `AwaitStart` for the start trigger.
    pub wait_for_start: bool,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    /// Ended by a terminal error. The guard was released.
    Failed(WorkflowError),
    /// Safe state unconfirmed; the guard was held until the operator cancelled.
    Held,
}

#[derive(Debug)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub iterations: u32,
    pub items: u64,
    pub recoveries: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn exit_code(&self) -> u8 {
        match self.outcome {
            RunOutcome::Completed | RunOutcome::Cancelled => 0,
            RunOutcome::Failed(_) | RunOutcome::Held => 1,
        }
    }
}

type HaltHook = Box<dyn Fn() + Send>;

pub struct Controller {
    cfg: Config,
    vision: Box<dyn Vision>,
    win: Box<dyn WindowHandle>,
    guard: NetworkGuard,
    cancel: Cancel,
    stats: RunStats,
    board: StatusBoard,
    on_halt: Option<HaltHook>,
    phase: Phase,
    iterations: u32,
    items: u64,
    recoveries: u64,
}

impl Controller {
    pub fn new(cfg: Config, vision: Box<dyn Vision>, win: Box<dyn WindowHandle>, guard: NetworkGuard) -> Self {
        Self {
            cfg,
            vision,
            win,
            guard,
            cancel: Cancel::new(),
            stats: RunStats::in_memory(),
            board: StatusBoard::new(),
            on_halt: None,
            phase: Phase::AwaitStart,
            iterations: 0,
            items: 0,
            recoveries: 0,
        }
    }

    pub fn with_cancel(mut self, cancel: Cancel) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_stats(mut self, stats: RunStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_board(mut self, board: StatusBoard) -> Self {
        self.board = board;
        self
    }

    /// Called when the run stops on a failure or starts holding the guard.
    pub fn with_halt_hook(mut self, hook: impl Fn() + Send + 'static) -> Self {
        self.on_halt = Some(Box::new(hook));
        self
    }

    pub fn guard(&self) -> &NetworkGuard {
        &self.guard
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Drive the whole run. Every exit path releases the guard and flushes stats.
    pub fn run(&mut self, plan: &RunPlan, start: &StartSignal) -> RunSummary {
        let began = Instant::now();
        let (slots, lifetime_loops, lifetime_items) = (
            self.cfg.slots,
            self.stats.total_loops_completed,
            self.stats.total_items_acquired,
        );
        self.board.update(|s| {
            s.loops = plan.loops;
            s.slots = slots;
            s.lifetime_loops = lifetime_loops;
            s.lifetime_items = lifetime_items;
        });

        let outcome = match self.drive(plan, start) {
            Ok(()) => RunOutcome::Completed,
            Err(WorkflowError::Cancelled) => {
                logger::warn_p("flow", "cancelled by operator");
                RunOutcome::Cancelled
            }
            Err(WorkflowError::SafeStateUnconfirmed) => {
                self.halt();
                self.hold();
                RunOutcome::Held
            }
            Err(e) => {
                logger::error_p("flow", &format!("run aborted: {:#}", e));
                self.halt();
                RunOutcome::Failed(e)
            }
        };

        self.guard.force_release();
        self.sync_guard();
        if let Err(e) = self.stats.flush() {
            logger::warn_p("stats", &format!("flush failed: {:#}", e));
        }

        let summary = RunSummary {
            outcome,
            iterations: self.iterations,
            items: self.items,
            recoveries: self.recoveries,
            elapsed: began.elapsed(),
        };
        self.log_summary(&summary);
        let label = match &summary.outcome {
            RunOutcome::Completed => "completed".to_string(),
            RunOutcome::Cancelled => "cancelled".to_string(),
            RunOutcome::Failed(e) => format!("failed: {}", e),
            RunOutcome::Held => "held until cancelled".to_string(),
        };
        self.board.update(|s| {
            s.state = RunState::Finished;
            s.last_outcome = Some(label);
            s.slot = None;
        });
        summary
    }

    fn drive(&mut self, plan: &RunPlan, start: &StartSignal) -> Result<(), WorkflowError> {
        if plan.wait_for_start {
            self.await_start(start)?;
        }
        self.board.update(|s| s.state = RunState::Running);
        self.win.activate();

        if plan.start_online {
            logger::info_p("flow", "already online, skipping the first transition");
        } else {
            self.ensure_online()?;
        }

        let loops_began = Instant::now();
        for i in 0..plan.loops {
            self.cancel.check()?;
            logger::info_p("flow", &format!("==== loop {} / {} ====", i + 1, plan.loops));
            self.board.update(|s| s.iteration = i + 1);

            match self.iteration() {
                Ok(()) => {
                    self.iterations += 1;
                    self.record(1, 0, 0);
                    self.report_progress(i + 1, plan.loops, loops_began.elapsed());
                }
                Err(e) if e.is_recoverable() => {
                    logger::error_p("flow", &format!("loop {} failed: {:#}", i + 1, e));
                    self.guard.force_release();
                    self.sync_guard();
                    self.record(0, 0, 1);
                    self.cancel.sleep_secs(self.cfg.timings.cooldown_secs)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn iteration(&mut self) -> Result<(), WorkflowError> {
        self.acquisition_loop()?;
        self.return_to_safe_state()?;
        self.persist_state()?;
        self.ensure_online()
    }

    fn await_start(&mut self, start: &StartSignal) -> Result<(), WorkflowError> {
        self.enter(Phase::AwaitStart);
        self.board.update(|s| s.state = RunState::Armed);
        logger::info_p("flow", "armed: F1 or 's' starts, Ctrl/Cmd+Shift+Q or 'q' stops");
        while !start.is_fired() {
            self.cancel.sleep(Duration::from_millis(50))?;
        }
        logger::info_p("flow", "start trigger received");
        Ok(())
    }

    /// Keep the guard engaged, alerting periodically, until the operator cancels.
    fn hold(&mut self) {
        self.board.update(|s| s.state = RunState::Holding);
        logger::error_p(
            "flow",
            "safe state NOT confirmed: network guard stays engaged until you cancel",
        );
        let period = self.cfg.timings.hold_alert_secs.max(0.05);
        while self.cancel.sleep_secs(period).is_ok() {
            logger::warn_p("flow", "still holding the network guard, cancel to release it");
        }
        logger::info_p("flow", "hold cancelled by operator");
    }

    fn halt(&self) {
        if let Some(hook) = &self.on_halt {
            hook();
        }
    }

    fn report_progress(&mut self, done: u32, total: u32, elapsed: Duration) {
        let avg = elapsed / done.max(1);
        let eta = avg * total.saturating_sub(done);
        logger::info_p(
            "flow",
            &format!(
                "loop {} complete, avg {:.1} min, ETA remaining {:.1} min",
                done,
                avg.as_secs_f64() / 60.0,
                eta.as_secs_f64() / 60.0
            ),
        );
        self.board.update(|s| s.eta = Some(eta));
    }

    fn log_summary(&self, summary: &RunSummary) {
        let minutes = summary.elapsed.as_secs_f64() / 60.0;
        let avg = if summary.iterations > 0 { minutes / summary.iterations as f64 } else { 0.0 };
        logger::info("==================== SESSION COMPLETE ====================");
        logger::info(&format!("  loops completed: {}", summary.iterations));
        logger::info(&format!("  items this run:  {}", summary.items));
        logger::info(&format!("  recoveries:      {}", summary.recoveries));
        logger::info(&format!("  total time:      {:.1} min (avg {:.1} min/loop)", minutes, avg));
        logger::info(&format!("  items all time:  {}", self.stats.total_items_acquired));
    }

    // --- phase and guard bookkeeping ---

    fn enter(&mut self, phase: Phase) {
        if phase != self.phase {
            logger::info_p("flow", &format!("phase: {}", phase));
        }
        self.phase = phase;
        let label = phase.to_string();
        let slot = match phase {
            Phase::Acquisition { slot } => Some(slot),
            _ => None,
        };
        self.board.update(|s| {
            s.phase = label;
            s.slot = slot;
        });
    }

    fn sync_guard(&self) {
        let engaged = self.guard.is_engaged();
        self.board.update(|s| s.guard_engaged = engaged);
    }

    fn engage_guard(&mut self) -> Result<(), WorkflowError> {
        self.guard.engage()?;
        self.sync_guard();
        Ok(())
    }

    fn release_guard(&mut self) -> Result<(), WorkflowError> {
        self.guard.release()?;
        self.sync_guard();
        Ok(())
    }

    fn record(&mut self, loops: u64, items: u64, errors: u64) {
        self.items += items;
        self.recoveries += errors;
        if let Err(e) = self.stats.record(loops, items, errors) {
            logger::warn_p("stats", &format!("flush failed: {:#}", e));
        }
        let (lifetime_loops, lifetime_items, run_items, run_recoveries) = (
            self.stats.total_loops_completed,
            self.stats.total_items_acquired,
            self.items,
            self.recoveries,
        );
        self.board.update(|s| {
            s.lifetime_loops = lifetime_loops;
            s.lifetime_items = lifetime_items;
            s.items_this_run = run_items;
            s.recoveries_this_run = run_recoveries;
        });
    }

    /// A retry budget ran dry: keep a capture of the screen and let go of the guard.
    fn give_up(&mut self, budget: &RetryBudget) -> WorkflowError {
        let label = budget.step.replace(' ', "_");
        self.vision.record_failure(self.win.as_mut(), NamedRegion::Full, &label);
        self.guard.force_release();
        self.sync_guard();
        budget.exhausted()
    }

    // --- probes and input, each behind a cancellation check ---

    /// Run one probe. Optional templates that are not loaded count as absent.
    /// A hard miss releases the guard before it propagates.
    fn look(&mut self, mut req: ProbeRequest) -> Result<bool, WorkflowError> {
        if !req.fatal && !self.vision.has_template(&req.template) {
            logger::debug_p("flow", &format!("'{}' not loaded, treated as absent", req.template));
            return Ok(false);
        }
        req.post_delay = req.post_delay.mul_f64(self.cfg.timings.settle_scale);
        match self.vision.probe(self.win.as_mut(), &self.cancel, &req) {
            Ok(outcome) => Ok(outcome.found),
            Err(e @ WorkflowError::HardMiss { .. }) => {
                self.guard.force_release();
                self.sync_guard();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Fixed delay between steps, scaled by `timings.settle_scale`.
    fn settle(&self, secs: f64) -> Result<(), WorkflowError> {
        self.cancel.sleep_secs(secs * self.cfg.timings.settle_scale)
    }

    fn press(&mut self, key: &str) -> Result<(), WorkflowError> {
        self.cancel.check()?;
        platform::press(self.win.as_mut(), key, self.cfg.timings.key_hold())?;
        self.cancel.sleep_secs(self.cfg.timings.key_gap_secs)
    }

    fn press_n(&mut self, key: &str, count: usize) -> Result<(), WorkflowError> {
        for _ in 0..count {
            self.press(key)?;
            self.settle(0.05)?;
        }
        Ok(())
    }

    /// Tap each key in order with `gap` seconds between them.
    fn sequence(&mut self, keys: &[String], gap: f64) -> Result<(), WorkflowError> {
        for key in keys {
            self.press(key)?;
            self.settle(gap)?;
        }
        Ok(())
    }

    fn chord(&mut self, keys: &[String]) -> Result<(), WorkflowError> {
        self.cancel.check()?;
        let hold = Duration::from_secs_f64(0.1 * self.cfg.timings.settle_scale);
        platform::chord(self.win.as_mut(), keys, hold)?;
        Ok(())
    }

    fn right_click(&mut self) -> Result<(), WorkflowError> {
        self.cancel.check()?;
        platform::click_here(self.win.as_mut(), MouseButton::Right, self.cfg.timings.key_hold())?;
        self.cancel.sleep_secs(self.cfg.timings.key_gap_secs)
    }

    fn type_text(&mut self, text: &str) -> Result<(), WorkflowError> {
        logger::info_p("flow", &format!("typing '{}'", text));
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            self.cancel.check()?;
            self.win.type_text(ch.encode_utf8(&mut buf))?;
            self.cancel.sleep_secs(self.cfg.timings.type_gap_secs)?;
        }
        Ok(())
    }
}

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s.max(0.0))
}
