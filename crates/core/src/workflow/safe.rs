use std::time::Instant;

use crate::error::WorkflowError;
use crate::logger;
use crate::probe::ProbeRequest;
use crate::region::NamedRegion;

use super::templates::{CONFIRM_PROMPT, ONLINE_HUD, SAFE_MENU};
use super::{secs, Controller, Phase};

impl Controller {
    /// Leave the online session for story mode. The guard is released only
    /// after the safe menu is seen; on timeout it stays engaged.
    pub(super) fn return_to_safe_state(&mut self) -> Result<(), WorkflowError> {
        self.enter(Phase::ReturnToSafeState);
        let keys = self.cfg.keys.clone();

        self.close_browser()?;

        logger::info_p("flow", "switching to story mode");
        self.chord(&keys.safe_mode_chord)?;
        if self.look(ProbeRequest::new(CONFIRM_PROMPT).fatal())? {
            self.press(&keys.confirm)?;
        }

        self.confirm_safe_state()?;
        self.release_guard()?;
        logger::info_p("flow", "safe state confirmed");
        Ok(())
    }

    fn close_browser(&mut self) -> Result<(), WorkflowError> {
        logger::info_p("flow", "closing browser");
        let deadline = Instant::now() + secs(self.cfg.timings.browser_close_secs);
        loop {
            self.cancel.check()?;
            for _ in 0..9 {
                self.right_click()?;
            }
            let hud = ProbeRequest::new(ONLINE_HUD).within(NamedRegion::HudCorner).timeout(1.0).post_delay(0.0);
            if self.look(hud)? {
                logger::info_p("flow", "browser closed");
                return Ok(());
            }
            if Instant::now() >= deadline {
                logger::warn_p("flow", "online marker not back, the browser may still be open");
                return Ok(());
            }
        }
    }

    fn confirm_safe_state(&mut self) -> Result<(), WorkflowError> {
        let keys = self.cfg.keys.clone();
        let deadline = Instant::now() + secs(self.cfg.timings.safe_state_secs);
        let mut attempt = 0u32;
        loop {
            self.cancel.check()?;
            attempt += 1;

            if self.look(ProbeRequest::new(SAFE_MENU).timeout(0.2).post_delay(0.0))? {
                logger::info_p("flow", &format!("safe menu detected (check {})", attempt));
                return Ok(());
            }
            self.press(&keys.menu)?;
            self.settle(1.2)?;
            if self.look(ProbeRequest::new(SAFE_MENU).timeout(0.3).post_delay(0.0))? {
                logger::info_p("flow", &format!("safe menu detected after opening the menu (check {})", attempt));
                return Ok(());
            }
            if self.look(ProbeRequest::new(CONFIRM_PROMPT).timeout(0.2).post_delay(0.0))? {
                logger::warn_p("flow", "stuck on a confirmation prompt, confirming");
                self.press(&keys.confirm)?;
                self.settle(5.0)?;
            }

            if Instant::now() >= deadline {
                logger::error_p("flow", &format!("safe menu not seen after {} checks", attempt));
                self.record(0, 0, 1);
                return Err(WorkflowError::SafeStateUnconfirmed);
            }
        }
    }
}
