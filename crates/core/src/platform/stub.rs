use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use image::imageops;
use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::*;
use crate::logger;
use super::{Platform, WindowHandle};

/// In-memory platform: one noise-filled display, no real input.
pub struct StubPlatform;

impl Platform for StubPlatform {
    fn get_instances(&self, pattern: &str) -> Vec<(WindowId, String)> {
        logger::info_p("stub", &format!("get_instances(\"{}\")", pattern));
        vec![(1, "Stub display".into())]
    }

    fn create_window(&self, pattern: &str, window_id: WindowId) -> Box<dyn WindowHandle> {
        logger::info_p("stub", &format!("create_window(\"{}\", {})", pattern, window_id));
        Box::new(StubWindow::new(window_id, 1920, 1080, window_id))
    }
}

type CaptureHook = Box<dyn FnMut(usize, &mut GrayImage) + Send>;

/// Window backed by a grayscale canvas.
///
/// Inputs are appended to a shared journal. Captures crop the canvas, and an
/// optional hook sees every capture first, so a test can change the screen
/// or raise a signal at a chosen poll.
pub struct StubWindow {
    window_id: WindowId,
    title: String,
    region: Region,
    canvas: GrayImage,
    events: Arc<Mutex<Vec<InputEvent>>>,
    captures: usize,
    on_capture: Option<CaptureHook>,
}

impl StubWindow {
    /// `w` x `h` window at the display origin, filled with seeded noise.
    pub fn new(window_id: WindowId, w: u32, h: u32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let canvas = GrayImage::from_fn(w, h, |_, _| Luma([rng.gen()]));
        Self {
            window_id,
            title: format!("Stub-{}", window_id),
            region: Region::new(0, 0, w as i32, h as i32),
            canvas,
            events: Arc::new(Mutex::new(Vec::new())),
            captures: 0,
            on_capture: None,
        }
    }

    /// Place the window at (`l`, `t`) on the display.
    pub fn at(mut self, l: i32, t: i32) -> Self {
        self.move_to(l, t);
        self
    }

    /// Move the window; its content moves with it.
    pub fn move_to(&mut self, l: i32, t: i32) {
        self.region = Region::new(l, t, self.region.w, self.region.h);
    }

    pub fn with_capture_hook(mut self, hook: impl FnMut(usize, &mut GrayImage) + Send + 'static) -> Self {
        self.on_capture = Some(Box::new(hook));
        self
    }

    /// Draw `img` with its top-left at window-relative (`x`, `y`).
    pub fn paint(&mut self, img: &GrayImage, x: u32, y: u32) {
        imageops::replace(&mut self.canvas, img, x as i64, y as i64);
    }

    /// Shared handle on the input journal.
    pub fn events(&self) -> Arc<Mutex<Vec<InputEvent>>> {
        Arc::clone(&self.events)
    }

    fn record(&self, event: InputEvent) {
        logger::debug_p("stub", &format!("win({}) {:?}", self.window_id, event));
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl WindowHandle for StubWindow {
    fn id(&self) -> WindowId { self.window_id }
    fn title(&self) -> &str { &self.title }
    fn region(&self) -> Option<Region> { Some(self.region) }

    fn update(&mut self) {}

    fn activate(&mut self) {
        logger::info_p("stub", &format!("win({}).activate()", self.window_id));
    }

    fn move_pointer(&mut self, x: i32, y: i32) -> Result<()> {
        self.record(InputEvent::Move(x, y));
        Ok(())
    }

    fn button_down(&mut self, button: MouseButton) -> Result<()> {
        self.record(InputEvent::ButtonDown(button));
        Ok(())
    }

    fn button_up(&mut self, button: MouseButton) -> Result<()> {
        self.record(InputEvent::ButtonUp(button));
        Ok(())
    }

    fn key_down(&mut self, key: &str) -> Result<()> {
        self.record(InputEvent::KeyDown(key.to_string()));
        Ok(())
    }

    fn key_up(&mut self, key: &str) -> Result<()> {
        self.record(InputEvent::KeyUp(key.to_string()));
        Ok(())
    }

    fn type_text(&mut self, text: &str) -> Result<()> {
        self.record(InputEvent::Text(text.to_string()));
        Ok(())
    }

    fn capture(&mut self, rect: ScreenRect) -> Result<Capture> {
        self.captures += 1;
        if let Some(hook) = self.on_capture.as_mut() {
            hook(self.captures, &mut self.canvas);
        }

        let x = rect.left - self.region.l;
        let y = rect.top - self.region.t;
        if rect.is_empty()
            || x < 0
            || y < 0
            || x as u32 + rect.width > self.canvas.width()
            || y as u32 + rect.height > self.canvas.height()
        {
            bail!("capture {:?} outside window {:?}", rect, self.region);
        }
        let crop = imageops::crop_imm(&self.canvas, x as u32, y as u32, rect.width, rect.height).to_image();
        Ok(Capture::from_gray(&crop))
    }
}
