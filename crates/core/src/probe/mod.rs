//! The polling primitive: look for one template in one region for a bounded
//! time, optionally click it, optionally treat a miss as fatal.

pub mod scripted;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Local;

use crate::assets::AssetStore;
use crate::cancel::Cancel;
use crate::error::WorkflowError;
use crate::logger;
use crate::matcher::TemplateMatcher;
use crate::platform::{self, WindowHandle};
use crate::region::{self, NamedRegion};
use crate::types::{MouseButton, ScreenRect};

/// A non-fatal miss above this best confidence is logged as borderline.
const BORDERLINE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Click,
}

#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub template: String,
    pub region: NamedRegion,
    pub timeout: Duration,
    /// Overrides the template's registered threshold.
    pub threshold: Option<f32>,
    pub action: Action,
    pub post_delay: Duration,
    pub fatal: bool,
}

impl ProbeRequest {
    /// Full-window search, 5 s, no action, 100 ms post delay, non-fatal.
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
            region: NamedRegion::Full,
            timeout: Duration::from_secs(5),
            threshold: None,
            action: Action::None,
            post_delay: Duration::from_millis(100),
            fatal: false,
        }
    }

    pub fn within(mut self, region: NamedRegion) -> Self {
        self.region = region;
        self
    }

    pub fn timeout(mut self, secs: f64) -> Self {
        self.timeout = Duration::from_secs_f64(secs.max(0.0));
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn click(mut self) -> Self {
        self.action = Action::Click;
        self
    }

    pub fn post_delay(mut self, secs: f64) -> Self {
        self.post_delay = Duration::from_secs_f64(secs.max(0.0));
        self
    }

    pub fn fatal(self) -> Self {
        self.fatal_if(true)
    }

    pub fn fatal_if(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub found: bool,
    /// Highest confidence seen over every attempt.
    pub best_confidence: f32,
}

/// Seam between the workflow and whatever answers its visual questions.
pub trait Vision: Send {
    fn probe(
        &mut self,
        win: &mut dyn WindowHandle,
        cancel: &Cancel,
        req: &ProbeRequest,
    ) -> Result<ProbeOutcome, WorkflowError>;

    fn has_template(&self, name: &str) -> bool;

    /// Persist what `region` shows right now, for a failure that did not
    /// come from a fatal probe. No-op by default.
    fn record_failure(&mut self, _win: &mut dyn WindowHandle, _region: NamedRegion, _label: &str) {}
}

/// Screen-reading implementation over the template cache.
pub struct VisualProbe {
    assets: AssetStore,
    matcher: TemplateMatcher,
    poll: Duration,
    click_hold: Duration,
    debug_dir: Option<PathBuf>,
}

impl VisualProbe {
    pub fn new(assets: AssetStore) -> Self {
        Self {
            assets,
            matcher: TemplateMatcher::default(),
            poll: Duration::from_millis(10),
            click_hold: Duration::from_millis(60),
            debug_dir: None,
        }
    }

    pub fn with_timings(mut self, poll: Duration, click_hold: Duration) -> Self {
        self.poll = poll;
        self.click_hold = click_hold;
        self
    }

    /// Where failure captures go. Without one, hard misses write nothing.
    pub fn with_debug_dir(mut self, dir: &Path) -> Self {
        self.debug_dir = Some(dir.to_path_buf());
        self
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    /// Capture `rect` again and write it as `FAIL_<template>_<HHMMSS>.png`.
    fn dump_failure(&self, win: &mut dyn WindowHandle, rect: ScreenRect, template: &str) -> Option<PathBuf> {
        let dir = self.debug_dir.as_ref()?;
        let path = dir.join(format!("FAIL_{}_{}.png", template, Local::now().format("%H%M%S")));
        let written = std::fs::create_dir_all(dir)
            .context("creating debug dir")
            .and_then(|_| win.capture(rect))
            .and_then(|cap| cap.to_rgb().save(&path).context("writing png"));
        match written {
            Ok(()) => {
                logger::info_p("probe", &format!("failure capture saved: {}", path.display()));
                Some(path)
            }
            Err(e) => {
                logger::error_p("probe", &format!("failed to save failure capture: {:#}", e));
                None
            }
        }
    }
}

impl Vision for VisualProbe {
    fn probe(
        &mut self,
        win: &mut dyn WindowHandle,
        cancel: &Cancel,
        req: &ProbeRequest,
    ) -> Result<ProbeOutcome, WorkflowError> {
        let template = self
            .assets
            .get(&req.template)
            .ok_or_else(|| WorkflowError::MissingAsset(req.template.clone()))?;
        let threshold = req.threshold.unwrap_or(template.threshold);
        let deadline = Instant::now() + req.timeout;
        let mut best = 0.0f32;
        let mut last_rect = None;

        // At least one attempt, even with a zero timeout.
        loop {
            cancel.check()?;
            win.update();

            match win.region() {
                Some(window) => {
                    // Resolved on every attempt: the window may have moved.
                    let rect = region::resolve(req.region, &window);
                    last_rect = Some(rect);
                    match win.capture(rect) {
                        Ok(capture) => {
                            let frame = capture.to_luma();
                            if let Some(m) = self.matcher.locate(&frame, &template.pixels) {
                                best = best.max(m.confidence);
                                if m.confidence >= threshold {
                                    if req.action == Action::Click {
                                        let (cx, cy) = m.center();
                                        let x = rect.left + cx as i32;
                                        let y = rect.top + cy as i32;
                                        logger::info_p(
                                            "probe",
                                            &format!(
                                                "clicking '{}' at ({}, {}) [conf {:.2}]",
                                                req.template, x, y, m.confidence
                                            ),
                                        );
                                        cancel.check()?;
                                        platform::click(win, x, y, MouseButton::Left, self.click_hold)?;
                                    } else {
                                        logger::debug_p(
                                            "probe",
                                            &format!("found '{}' [conf {:.2}]", req.template, m.confidence),
                                        );
                                    }
                                    cancel.sleep(req.post_delay)?;
                                    return Ok(ProbeOutcome { found: true, best_confidence: best });
                                }
                            }
                        }
                        Err(e) => logger::debug_p("probe", &format!("scan error: {:#}", e)),
                    }
                }
                None => logger::debug_p("probe", "target window not found"),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            cancel.sleep(self.poll.min(deadline - now))?;
        }

        if req.fatal {
            if let Some(rect) = last_rect {
                self.dump_failure(win, rect, &req.template);
            }
            logger::error_p(
                "probe",
                &format!(
                    "'{}' not found after {:.1}s (best {:.2})",
                    req.template,
                    req.timeout.as_secs_f64(),
                    best
                ),
            );
            return Err(WorkflowError::HardMiss {
                template: req.template.clone(),
                region: req.region,
                best,
            });
        }

        if best > BORDERLINE {
            logger::debug_p("probe", &format!("miss '{}' (best {:.2})", req.template, best));
        }
        Ok(ProbeOutcome { found: false, best_confidence: best })
    }

    fn has_template(&self, name: &str) -> bool {
        self.assets.get(name).is_some()
    }

    fn record_failure(&mut self, win: &mut dyn WindowHandle, area: NamedRegion, label: &str) {
        win.update();
        if let Some(window) = win.region() {
            self.dump_failure(win, region::resolve(area, &window), label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::stub::StubWindow;
    use crate::region::ScaleFactor;
    use crate::types::InputEvent;
    use image::{GrayImage, Luma};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(w: u32, h: u32, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        GrayImage::from_fn(w, h, |_, _| Luma([rng.gen()]))
    }

    fn probe_with(name: &str, tpl: &GrayImage) -> VisualProbe {
        let mut assets = AssetStore::new(ScaleFactor::UNITY);
        assets.insert(name, tpl.clone(), 0.8);
        VisualProbe::new(assets).with_timings(Duration::from_millis(1), Duration::ZERO)
    }

    #[test]
    fn click_lands_on_the_center_of_the_match() {
        let tpl = noise(24, 16, 42);
        let mut win = StubWindow::new(1, 200, 120, 1).at(300, 400);
        win.paint(&tpl, 150, 90);
        let events = win.events();

        let mut vision = probe_with("acquire", &tpl);
        let req = ProbeRequest::new("acquire").within(NamedRegion::BottomRight).click().post_delay(0.0);
        let out = vision.probe(&mut win, &Cancel::new(), &req).unwrap();

        assert!(out.found);
        assert!(out.best_confidence >= 0.99);
        // BottomRight of a 200x120 window at (300, 400) starts at (440, 484).
        // The match sits at (150, 90) in the window, its center 12 and 8 further.
        assert_eq!(
            events.lock().unwrap().first(),
            Some(&InputEvent::Move(300 + 150 + 12, 400 + 90 + 8))
        );
        assert_eq!(events.lock().unwrap().len(), 3);
    }

    #[test]
    fn zero_timeout_miss_makes_one_attempt_and_no_input() {
        let tpl = noise(24, 16, 42);
        let captures = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = captures.clone();
        let mut win = StubWindow::new(1, 200, 120, 1).with_capture_hook(move |_, _| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        let events = win.events();

        let mut vision = probe_with("acquire", &tpl);
        let req = ProbeRequest::new("acquire").timeout(0.0).click();
        let out = vision.probe(&mut win, &Cancel::new(), &req).unwrap();

        assert!(!out.found);
        assert!(out.best_confidence < 0.8);
        assert_eq!(captures.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn fatal_miss_writes_a_failure_capture() {
        let dir = tempfile::tempdir().unwrap();
        let tpl = noise(24, 16, 42);
        let mut win = StubWindow::new(1, 200, 120, 1);

        let mut vision = probe_with("return_link", &tpl).with_debug_dir(dir.path());
        let req = ProbeRequest::new("return_link").within(NamedRegion::Center).timeout(0.05).fatal();
        let err = vision.probe(&mut win, &Cancel::new(), &req).unwrap_err();

        assert!(matches!(err, WorkflowError::HardMiss { ref template, region: NamedRegion::Center, .. } if template == "return_link"));
        let written: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(written.len(), 1);
        let name = written[0].file_name().to_string_lossy().to_string();
        assert!(name.starts_with("FAIL_return_link_") && name.ends_with(".png"));
        let img = image::open(written[0].path()).unwrap();
        assert_eq!((img.width(), img.height()), (80, 48));
    }

    #[test]
    fn recorded_failure_captures_the_named_region() {
        let dir = tempfile::tempdir().unwrap();
        let mut win = StubWindow::new(1, 200, 120, 1);
        let mut vision = probe_with("item", &noise(8, 8, 1)).with_debug_dir(dir.path());

        vision.record_failure(&mut win, NamedRegion::TopHalf, "select_item");
        let written: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(written.len(), 1);
        assert!(written[0].file_name().to_string_lossy().starts_with("FAIL_select_item_"));
        let img = image::open(written[0].path()).unwrap();
        assert_eq!((img.width(), img.height()), (200, 60));
    }

    #[test]
    fn template_appearing_later_is_found_before_timeout() {
        let tpl = noise(24, 16, 42);
        let late = tpl.clone();
        let mut win = StubWindow::new(1, 200, 120, 1).with_capture_hook(move |n, canvas| {
            if n == 5 {
                image::imageops::replace(canvas, &late, 20, 30);
            }
        });

        let mut vision = probe_with("loading", &tpl);
        let req = ProbeRequest::new("loading").timeout(5.0).post_delay(0.0);
        let out = vision.probe(&mut win, &Cancel::new(), &req).unwrap();
        assert!(out.found);
    }

    #[test]
    fn raised_cancel_stops_polling_without_input() {
        let tpl = noise(24, 16, 42);
        let cancel = Cancel::new();
        let remote = cancel.clone();
        let mut win = StubWindow::new(1, 200, 120, 1).with_capture_hook(move |n, _| {
            if n == 3 {
                remote.raise();
            }
        });
        let events = win.events();

        let mut vision = probe_with("item", &tpl);
        let req = ProbeRequest::new("item").timeout(10.0).click();
        let err = vision.probe(&mut win, &cancel, &req).unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_template_is_a_missing_asset() {
        let mut vision = VisualProbe::new(AssetStore::new(ScaleFactor::UNITY));
        let mut win = StubWindow::new(1, 20, 20, 0);
        let err = vision.probe(&mut win, &Cancel::new(), &ProbeRequest::new("ghost")).unwrap_err();
        assert!(matches!(err, WorkflowError::MissingAsset(ref n) if n == "ghost"));
        assert!(!vision.has_template("ghost"));
    }
}
