use crate::error::WorkflowError;
use crate::logger;
use crate::probe::ProbeRequest;

use super::{Controller, Phase};

impl Controller {
    /// Walk the interaction menu to force the target to save, then back out.
    /// Missing menu entries are logged and skipped.
    pub(super) fn persist_state(&mut self) -> Result<(), WorkflowError> {
        self.enter(Phase::PersistState);
        let keys = self.cfg.keys.clone();
        let path = self.cfg.persist_path.clone();

        logger::info_p("flow", "forcing a save");
        self.press(&keys.interaction)?;
        self.settle(0.5)?;

        for step in &path {
            if self.look(ProbeRequest::new(step).click())? {
                self.press(&keys.confirm)?;
                self.settle(0.2)?;
            } else {
                logger::warn_p("flow", &format!("'{}' not found in the interaction menu", step));
            }
        }

        self.settle(0.2)?;
        self.press_n(&keys.back, 3)?;
        logger::info_p("flow", "waiting for the save to settle");
        self.cancel.sleep_secs(self.cfg.timings.persist_settle_secs)
    }
}
