use crate::error::WorkflowError;
use crate::logger;
use crate::probe::ProbeRequest;

use super::templates::{
    ACQUIRE, ADDRESS_FIELD, BROWSER_HOME, CONFIRM_MENU, ITEM, LISTINGS_LINK, RETURN_LINK,
    SORT_ASCENDING, SORT_DESCENDING,
};
use super::{Controller, Phase, RetryBudget};

/// Slots acquired in order, and the slot of every recovery taken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionReport {
    pub acquired: Vec<usize>,
    pub recoveries: Vec<usize>,
}

impl Controller {
    /// Open the listings, engage the guard and acquire every slot in order.
    pub(super) fn acquisition_loop(&mut self) -> Result<AcquisitionReport, WorkflowError> {
        self.enter(Phase::Acquisition { slot: 0 });
        self.open_listings()?;

        self.engage_guard()?;
        self.settle(1.0)?;

        let mut report = AcquisitionReport::default();
        let slots = self.cfg.slots;
        for slot in 0..slots {
            self.cancel.check()?;
            self.enter(Phase::Acquisition { slot });
            logger::info_p("flow", &format!("slot {}/{}", slot + 1, slots));

            self.select_slot(slot, &mut report)?;
            self.confirm_slot(slot)?;

            report.acquired.push(slot);
            self.record(0, 1, 0);
        }
        logger::info_p("flow", &format!("batch complete: {} acquired", report.acquired.len()));
        Ok(report)
    }

    fn open_listings(&mut self) -> Result<(), WorkflowError> {
        let keys = self.cfg.keys.clone();
        let address = self.cfg.text.address.clone();

        logger::info_p("flow", "opening browser");
        self.sequence(&keys.open_browser, 0.3)?;
        self.settle(1.0)?;
        self.look(ProbeRequest::new(BROWSER_HOME).fatal())?;

        self.look(ProbeRequest::new(ADDRESS_FIELD).click().fatal())?;
        self.settle(1.5)?;
        self.type_text(&address)?;
        self.settle(0.3)?;
        self.press(&keys.confirm)?;
        self.settle(1.5)?;

        self.look(ProbeRequest::new(LISTINGS_LINK).timeout(10.0).click().post_delay(1.0).fatal())?;
        self.look(ProbeRequest::new(SORT_ASCENDING).timeout(8.0).click().fatal())?;
        self.settle(0.5)
    }

    /// Pick the item and press acquire, recovering between attempts.
    fn select_slot(&mut self, slot: usize, report: &mut AcquisitionReport) -> Result<(), WorkflowError> {
        let mut budget = RetryBudget::new("select item", self.cfg.retries.select_attempts);
        while budget.next() {
            self.cancel.check()?;
            if !self.look(ProbeRequest::new(ITEM).timeout(3.0).click())? {
                logger::warn_p(
                    "flow",
                    &format!("item not found (attempt {}/{})", budget.attempt(), budget.max()),
                );
            } else if self.look(ProbeRequest::new(ACQUIRE).timeout(4.0).click())? {
                return Ok(());
            } else {
                logger::warn_p(
                    "flow",
                    &format!("acquire button not found (attempt {}/{})", budget.attempt(), budget.max()),
                );
            }
            // The last failed attempt gives up without recovering.
            if !budget.is_last() {
                self.recover(slot, report)?;
            }
        }
        logger::error_p("flow", &format!("slot {} could not be selected", slot + 1));
        Err(self.give_up(&budget))
    }

    /// Choose the slot in the confirmation menu and return to the listings.
    /// The last attempt's probe is fatal, so leaving the loop means the menu
    /// is up.
    fn confirm_slot(&mut self, slot: usize) -> Result<(), WorkflowError> {
        let keys = self.cfg.keys.clone();
        let mut budget = RetryBudget::new("confirm acquisition", self.cfg.retries.confirm_attempts);
        while budget.next() {
            let menu = ProbeRequest::new(CONFIRM_MENU).fatal_if(budget.is_last());
            if self.look(menu)? {
                break;
            }
            logger::warn_p(
                "flow",
                &format!("confirmation menu not found (attempt {}/{})", budget.attempt(), budget.max()),
            );
        }
        self.press_n(&keys.down, slot)?;
        self.press(&keys.confirm)?;
        self.settle(0.2)?;
        self.press(&keys.confirm)?;
        self.settle(0.5)?;

        self.look(ProbeRequest::new(RETURN_LINK).timeout(60.0).click().fatal())?;
        self.settle(0.2)?;
        self.reset_ordering(3.0)
    }

    /// Back out one level and re-apply the ordering filter.
    fn recover(&mut self, slot: usize, report: &mut AcquisitionReport) -> Result<(), WorkflowError> {
        logger::warn_p("flow", &format!("recovering slot {}", slot + 1));
        report.recoveries.push(slot);
        self.record(0, 0, 1);
        self.right_click()?;
        self.settle(1.0)?;
        self.reset_ordering(2.0)
    }

    fn reset_ordering(&mut self, timeout: f64) -> Result<(), WorkflowError> {
        self.look(ProbeRequest::new(SORT_DESCENDING).timeout(timeout).click())?;
        self.settle(0.2)?;
        self.look(ProbeRequest::new(SORT_ASCENDING).timeout(timeout).click())?;
        self.settle(0.5)
    }
}
