use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cancel::Cancel;
use crate::error::WorkflowError;
use crate::platform::{self, WindowHandle};
use crate::types::MouseButton;

use super::{Action, ProbeOutcome, ProbeRequest, Vision};

/// One answered probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRecord {
    pub call: usize,
    pub template: String,
    pub found: bool,
}

type Hook = Box<dyn FnMut(usize) + Send>;

/// Vision that answers from a script instead of the screen.
///
/// Each template has a queue of answers; once it runs dry the template's
/// fixed answer applies, then the global default. A found click lands on
/// the window center so the input journal still shows it.
pub struct ScriptedVision {
    queues: HashMap<String, VecDeque<bool>>,
    fixed: HashMap<String, bool>,
    default: bool,
    journal: Arc<Mutex<Vec<ProbeRecord>>>,
    calls: usize,
    hook: Option<Hook>,
}

impl ScriptedVision {
    /// Every template answers `default` unless scripted otherwise.
    pub fn new(default: bool) -> Self {
        Self {
            queues: HashMap::new(),
            fixed: HashMap::new(),
            default,
            journal: Arc::new(Mutex::new(Vec::new())),
            calls: 0,
            hook: None,
        }
    }

    /// Queue answers for the next probes of `template`.
    pub fn then(mut self, template: &str, answers: &[bool]) -> Self {
        self.queues
            .entry(template.to_string())
            .or_default()
            .extend(answers.iter().copied());
        self
    }

    /// Answer `found` for `template` once its queue is empty.
    pub fn always(mut self, template: &str, found: bool) -> Self {
        self.fixed.insert(template.to_string(), found);
        self
    }

    /// Run `hook` with the call number at the start of every probe, after
    /// the first cancel check.
    pub fn on_probe(mut self, hook: impl FnMut(usize) + Send + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn journal(&self) -> Arc<Mutex<Vec<ProbeRecord>>> {
        Arc::clone(&self.journal)
    }

    fn answer(&mut self, template: &str) -> bool {
        if let Some(found) = self.queues.get_mut(template).and_then(VecDeque::pop_front) {
            return found;
        }
        self.fixed.get(template).copied().unwrap_or(self.default)
    }
}

impl Vision for ScriptedVision {
    fn probe(
        &mut self,
        win: &mut dyn WindowHandle,
        cancel: &Cancel,
        req: &ProbeRequest,
    ) -> Result<ProbeOutcome, WorkflowError> {
        cancel.check()?;
        self.calls += 1;
        if let Some(hook) = self.hook.as_mut() {
            hook(self.calls);
        }
        // The poll loop checks again before it reads the screen.
        cancel.check()?;

        let found = self.answer(&req.template);
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(ProbeRecord { call: self.calls, template: req.template.clone(), found });
        }

        if found {
            if req.action == Action::Click {
                let center = win.region().map(|r| (r.cx, r.cy)).unwrap_or_default();
                cancel.check()?;
                platform::click(win, center.0, center.1, MouseButton::Left, Duration::ZERO)?;
            }
            return Ok(ProbeOutcome { found: true, best_confidence: 1.0 });
        }
        if req.fatal {
            return Err(WorkflowError::HardMiss {
                template: req.template.clone(),
                region: req.region,
                best: 0.0,
            });
        }
        Ok(ProbeOutcome { found: false, best_confidence: 0.0 })
    }

    fn has_template(&self, _name: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::stub::StubWindow;

    #[test]
    fn queue_then_fixed_then_default() {
        let mut vision = ScriptedVision::new(true)
            .then("item", &[false, false])
            .always("item", true)
            .always("loading", false);
        let mut win = StubWindow::new(1, 10, 10, 0);
        let cancel = Cancel::new();

        let mut ask = |name: &str| vision.probe(&mut win, &cancel, &ProbeRequest::new(name)).unwrap().found;
        assert!(!ask("item"));
        assert!(!ask("item"));
        assert!(ask("item"));
        assert!(!ask("loading"));
        assert!(ask("anything"));
    }

    #[test]
    fn hook_can_cancel_before_the_answer() {
        let cancel = Cancel::new();
        let remote = cancel.clone();
        let mut vision = ScriptedVision::new(true).on_probe(move |n| {
            if n == 2 {
                remote.raise();
            }
        });
        let journal = vision.journal();
        let mut win = StubWindow::new(1, 10, 10, 0);

        assert!(vision.probe(&mut win, &cancel, &ProbeRequest::new("a")).is_ok());
        let err = vision.probe(&mut win, &cancel, &ProbeRequest::new("b")).unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled));
        assert_eq!(journal.lock().unwrap().len(), 1);
    }
}
