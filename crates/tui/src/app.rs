use std::sync::mpsc;

use lockstep_core::cancel::{Cancel, StartSignal};
use lockstep_core::workflow::{RunState, RunStatus, StatusBoard};

use crate::confirm::ConfirmDialog;

/// Log lines kept in memory for the panel.
const LOG_CAPACITY: usize = 2000;

pub struct App {
    pub board: StatusBoard,
    pub status: RunStatus,
    pub cancel: Cancel,
    pub start: StartSignal,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // offset from the bottom, 0 = latest
    pub log_rx: mpsc::Receiver<String>,
    pub confirm: Option<ConfirmDialog>,
    pub should_quit: bool,
}

impl App {
    pub fn new(board: StatusBoard, cancel: Cancel, start: StartSignal, log_rx: mpsc::Receiver<String>) -> Self {
        let status = board.snapshot();
        Self {
            board,
            status,
            cancel,
            start,
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            confirm: None,
            should_quit: false,
        }
    }

    /// Pull new log lines and the latest status snapshot.
    pub fn tick(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
        }
        if self.log_messages.len() > LOG_CAPACITY {
            let excess = self.log_messages.len() - LOG_CAPACITY;
            self.log_messages.drain(..excess);
        }
        self.status = self.board.snapshot();

        // A pending quit goes through once the worker has let go of the guard.
        if self.confirm.is_some() && self.cancel.is_panic_set() && !self.status.guard_engaged {
            self.confirm = None;
            self.should_quit = true;
        }
        // Stopped from outside the dashboard (hotkey or signal).
        if self.cancel.is_panic_set() && self.status.state == RunState::Finished {
            self.should_quit = true;
        }
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    pub fn start_run(&mut self) {
        if self.status.state == RunState::Armed && !self.start.is_fired() {
            self.start.fire();
        }
    }

    /// Raise the panic signal. The worker stops before its next action.
    pub fn panic(&mut self) {
        if !self.cancel.is_panic_set() {
            self.cancel.raise();
        }
    }

    /// Panic, then leave. With the guard still engaged, ask first.
    pub fn request_quit(&mut self) {
        self.panic();
        if self.status.guard_engaged {
            self.confirm = Some(ConfirmDialog::new("Guard still engaged. Quit anyway?"));
        } else {
            self.should_quit = true;
        }
    }

    pub fn answer_confirm(&mut self, yes: bool) {
        self.confirm = None;
        if yes {
            self.should_quit = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> (App, mpsc::Sender<String>) {
        let (tx, rx) = mpsc::channel();
        (App::new(StatusBoard::new(), Cancel::new(), StartSignal::new(), rx), tx)
    }

    #[test]
    fn start_only_fires_while_armed() {
        let (mut app, _tx) = app();
        app.start_run();
        assert!(!app.start.is_fired());

        app.board.update(|s| s.state = RunState::Armed);
        app.tick();
        app.start_run();
        assert!(app.start.is_fired());
    }

    #[test]
    fn outside_panic_closes_the_dashboard_once_finished() {
        let (mut app, _tx) = app();
        app.board.update(|s| s.state = RunState::Running);
        app.cancel.clone().raise();
        app.tick();
        assert!(!app.should_quit);

        app.board.update(|s| s.state = RunState::Finished);
        app.tick();
        assert!(app.should_quit);
    }

    #[test]
    fn quit_with_guard_engaged_asks_first() {
        let (mut app, _tx) = app();
        app.board.update(|s| s.guard_engaged = true);
        app.tick();

        app.request_quit();
        assert!(app.cancel.is_panic_set());
        assert!(app.confirm.is_some());
        assert!(!app.should_quit);

        // The worker releases; the pending quit completes on its own.
        app.board.update(|s| s.guard_engaged = false);
        app.tick();
        assert!(app.should_quit);
    }

    #[test]
    fn quit_without_guard_is_immediate() {
        let (mut app, _tx) = app();
        app.request_quit();
        assert!(app.should_quit);
        assert!(app.cancel.is_panic_set());
    }

    #[test]
    fn log_buffer_is_bounded() {
        let (mut app, tx) = app();
        for i in 0..LOG_CAPACITY + 10 {
            tx.send(format!("line {}", i)).unwrap();
        }
        app.tick();
        assert_eq!(app.log_messages.len(), LOG_CAPACITY);
        assert_eq!(app.log_messages[0], "line 10");
    }
}
