use std::time::Instant;

use crate::config::OnlinePolicy;
use crate::error::WorkflowError;
use crate::logger;
use crate::probe::ProbeRequest;
use crate::region::NamedRegion;

use super::templates::{CONFIRM_PROMPT, LOADING, MENU_ENTRY, ONLINE_HUD, SESSION_CHOICE};
use super::{secs, Controller, Phase, RetryBudget};

impl Controller {
    /// Move the target from story mode into an online session and wait
    /// until the online marker shows.
    pub(super) fn ensure_online(&mut self) -> Result<(), WorkflowError> {
        self.enter(Phase::EnsureOnline);
        let keys = self.cfg.keys.clone();

        let mut budget = RetryBudget::new("select session", self.cfg.retries.session_attempts);
        loop {
            if !budget.next() {
                logger::error_p("flow", &format!("session choice not found after {} attempt(s)", budget.attempt()));
                return self.online_unconfirmed();
            }
            if !self.look(ProbeRequest::new(MENU_ENTRY).timeout(1.0))? {
                logger::info_p("flow", "opening menu");
                self.press(&keys.menu)?;
                self.settle(1.0)?;
            }
            self.look(ProbeRequest::new(MENU_ENTRY).click().fatal())?;
            self.settle(0.5)?;
            self.sequence(&keys.select_mode, 0.1)?;
            self.settle(1.0)?;

            if self.look(ProbeRequest::new(SESSION_CHOICE).click())? {
                break;
            }
            logger::warn_p(
                "flow",
                &format!("session choice not found (attempt {}/{}), backing out", budget.attempt(), budget.max()),
            );
            self.press_n(&keys.back, 4)?;
            self.settle(1.0)?;
        }

        self.press(&keys.confirm)?;
        if self.look(ProbeRequest::new(CONFIRM_PROMPT))? {
            self.press(&keys.confirm)?;
        }
        self.wait_for_online()
    }

    fn wait_for_online(&mut self) -> Result<(), WorkflowError> {
        logger::info_p("flow", "waiting for online load");
        let deadline = Instant::now() + secs(self.cfg.timings.online_load_secs);
        let mut loading_seen = false;
        loop {
            self.cancel.check()?;
            let loading = ProbeRequest::new(LOADING).within(NamedRegion::BottomRight).timeout(0.2).post_delay(0.0);
            if self.look(loading)? {
                if !loading_seen {
                    logger::debug_p("flow", "loading screen visible");
                    loading_seen = true;
                }
            } else {
                let hud = ProbeRequest::new(ONLINE_HUD).within(NamedRegion::HudCorner).timeout(0.2).post_delay(0.0);
                if self.look(hud)? {
                    logger::info_p("flow", "online marker detected");
                    self.settle(0.5)?;
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                logger::warn_p("flow", "online load bound reached without the online marker");
                return self.online_unconfirmed();
            }
            self.settle(0.5)?;
        }
    }

    fn online_unconfirmed(&mut self) -> Result<(), WorkflowError> {
        self.record(0, 0, 1);
        match self.cfg.online_policy {
            OnlinePolicy::BestEffort => {
                logger::warn_p("flow", "online mode not confirmed, continuing anyway");
                Ok(())
            }
            OnlinePolicy::FailFast => Err(WorkflowError::OnlineUnconfirmed),
        }
    }
}
