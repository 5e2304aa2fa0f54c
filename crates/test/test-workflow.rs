//! End-to-end scenarios: the real matcher and probe against a stub display.
//!
//! Run with `cargo run -p lockstep-test --bin test-workflow`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use libtest_mimic::{Arguments, Failed, Trial};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lockstep_core::assets::AssetStore;
use lockstep_core::cancel::{Cancel, StartSignal};
use lockstep_core::config::{Config, Timings};
use lockstep_core::error::WorkflowError;
use lockstep_core::guard::{NetworkGuard, StubFilter};
use lockstep_core::platform::stub::StubWindow;
use lockstep_core::platform::WindowHandle;
use lockstep_core::probe::{ProbeRequest, Vision, VisualProbe};
use lockstep_core::region::{self, NamedRegion, ScaleFactor};
use lockstep_core::types::InputEvent;
use lockstep_core::workflow::{templates, Controller, RunOutcome, RunPlan};

const RULE: &str = "LOCKSTEP_OUTBOUND_BLOCK";

fn main() {
    let args = Arguments::from_args();
    let tests = vec![
        Trial::test("full_loop_with_real_matching", full_loop_with_real_matching),
        Trial::test("cancel_mid_poll_releases_guard", cancel_mid_poll_releases_guard),
        Trial::test("hard_miss_writes_region_capture", hard_miss_writes_region_capture),
        Trial::test("scaled_templates_match_resized_window", scaled_templates_match_resized_window),
        Trial::test("moved_window_is_followed", moved_window_is_followed),
    ];
    libtest_mimic::run(&args, tests).exit();
}

fn ensure(cond: bool, msg: impl Into<String>) -> Result<(), Failed> {
    if cond {
        Ok(())
    } else {
        let msg: String = msg.into();
        Err(msg.into())
    }
}

/// Noise in `block`-pixel squares, so it survives downscaling.
fn blocky(seed: u64, w: u32, h: u32, block: u32) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let cols = w.div_ceil(block);
    let cells: Vec<u8> = (0..cols * h.div_ceil(block)).map(|_| rng.gen()).collect();
    GrayImage::from_fn(w, h, |x, y| Luma([cells[((y / block) * cols + x / block) as usize]]))
}

fn fast_config(slots: usize) -> Config {
    let mut cfg = Config::default();
    cfg.slots = slots;
    cfg.guard.remote_ips = vec!["192.0.2.1".into()];
    cfg.timings = Timings {
        poll_secs: 0.0,
        click_hold_secs: 0.0,
        key_hold_secs: 0.0,
        key_gap_secs: 0.0,
        type_gap_secs: 0.0,
        online_load_secs: 1.0,
        safe_state_secs: 1.0,
        browser_close_secs: 1.0,
        persist_settle_secs: 0.0,
        cooldown_secs: 0.0,
        hold_alert_secs: 0.05,
        settle_scale: 0.0,
    };
    cfg
}

/// A 640x360 display with every workflow template painted on it.
struct Scene {
    win: StubWindow,
    assets: AssetStore,
    placed: HashMap<&'static str, (u32, u32)>,
}

fn scene() -> Scene {
    let mut win = StubWindow::new(1, 640, 360, 99);
    let mut assets = AssetStore::new(ScaleFactor::UNITY);
    let mut placed = HashMap::new();

    let mut names: Vec<&'static str> = templates::REQUIRED
        .iter()
        .copied()
        .filter(|name| *name != templates::ONLINE_HUD)
        .collect();
    names.push(templates::SORT_DESCENDING);
    names.extend(["persist_step_1", "persist_step_2", "persist_step_3"]);

    for (i, name) in names.iter().enumerate() {
        let i = i as u32;
        let patch = blocky(i as u64 + 1, 32, 24, 4);
        let (x, y) = (40 + 64 * (i % 8), 20 + 60 * (i / 8));
        win.paint(&patch, x, y);
        assets.insert(name, patch, 0.8);
        placed.insert(*name, (x, y));
    }

    // The online marker lives in the HUD corner.
    let hud = blocky(100, 32, 24, 4);
    win.paint(&hud, 40, 300);
    assets.insert(templates::ONLINE_HUD, hud, 0.8);
    placed.insert(templates::ONLINE_HUD, (40, 300));

    Scene { win, assets, placed }
}

fn guard_with_journal(cfg: &Config) -> (NetworkGuard, Arc<Mutex<Vec<String>>>) {
    let stub = StubFilter::new();
    let journal = stub.calls();
    let guard = NetworkGuard::new(Box::new(stub), &cfg.guard.rule_name, cfg.guard.remote_ips.clone());
    (guard, journal)
}

fn full_loop_with_real_matching() -> Result<(), Failed> {
    let Scene { win, assets, placed } = scene();
    let events = win.events();
    let cfg = fast_config(2);
    let (guard, journal) = guard_with_journal(&cfg);

    let vision = VisualProbe::new(assets);
    let mut ctl = Controller::new(cfg, Box::new(vision), Box::new(win), guard);
    let plan = RunPlan { loops: 1, start_online: true, wait_for_start: false };
    let summary = ctl.run(&plan, &StartSignal::new());

    ensure(matches!(summary.outcome, RunOutcome::Completed), format!("outcome {:?}", summary.outcome))?;
    ensure(summary.items == 2, format!("items {}", summary.items))?;
    ensure(
        *journal.lock().unwrap()
            == vec![format!("delete {}", RULE), format!("add {} 192.0.2.1", RULE), format!("delete {}", RULE)],
        format!("guard journal {:?}", journal.lock().unwrap()),
    )?;

    let (ix, iy) = placed[templates::ITEM];
    let item_center = InputEvent::Move(ix as i32 + 16, iy as i32 + 12);
    let clicks = events.lock().unwrap().iter().filter(|e| **e == item_center).count();
    ensure(clicks == 2, format!("item clicked {} time(s)", clicks))
}

fn cancel_mid_poll_releases_guard() -> Result<(), Failed> {
    let Scene { win, assets, .. } = scene();
    let events = win.events();
    let cancel = Cancel::new();
    let at_cancel = Arc::new(Mutex::new(None));

    let (remote, watch, mark) = (cancel.clone(), win.events(), Arc::clone(&at_cancel));
    // Capture 6 is the first slot's acquire button, after the guard is engaged.
    let win = win.with_capture_hook(move |n, _| {
        if n == 6 && !remote.is_panic_set() {
            *mark.lock().unwrap() = Some(watch.lock().unwrap().len());
            remote.raise();
        }
    });

    let cfg = fast_config(3);
    let (guard, journal) = guard_with_journal(&cfg);
    let mut ctl = Controller::new(cfg, Box::new(VisualProbe::new(assets)), Box::new(win), guard)
        .with_cancel(cancel);
    let plan = RunPlan { loops: 2, start_online: true, wait_for_start: false };
    let summary = ctl.run(&plan, &StartSignal::new());

    ensure(matches!(summary.outcome, RunOutcome::Cancelled), format!("outcome {:?}", summary.outcome))?;
    let recorded = at_cancel.lock().unwrap().ok_or("cancel was never raised")?;
    let total = events.lock().unwrap().len();
    ensure(total == recorded, format!("{} input event(s) after cancel", total - recorded))?;
    ensure(!ctl.guard().is_engaged(), "guard still engaged")?;
    let journal = journal.lock().unwrap();
    ensure(journal.len() == 3, format!("guard journal {:?}", *journal))?;
    ensure(journal[2] == format!("delete {}", RULE), format!("guard journal {:?}", *journal))
}

fn hard_miss_writes_region_capture() -> Result<(), Failed> {
    let debug = tempfile::tempdir()?;
    let mut win = StubWindow::new(1, 640, 360, 5);
    let mut assets = AssetStore::new(ScaleFactor::UNITY);
    assets.insert("ghost", blocky(7, 32, 24, 4), 0.8);

    let mut vision = VisualProbe::new(assets).with_debug_dir(debug.path());
    let req = ProbeRequest::new("ghost").within(NamedRegion::Center).timeout(0.0).fatal();
    match vision.probe(&mut win, &Cancel::new(), &req) {
        Err(WorkflowError::HardMiss { template, best, .. }) => {
            ensure(template == "ghost", format!("template {}", template))?;
            ensure(best < 0.8, format!("best {:.2}", best))?;
        }
        other => return Err(format!("expected a hard miss, got {:?}", other).into()),
    }

    let files: Vec<_> = std::fs::read_dir(debug.path())?.flatten().map(|e| e.path()).collect();
    ensure(files.len() == 1, format!("{} file(s) written", files.len()))?;
    let name = files[0].file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    ensure(name.starts_with("FAIL_ghost_") && name.ends_with(".png"), format!("file {}", name))?;

    let window = win.region().ok_or("stub window has no region")?;
    let rect = region::resolve(NamedRegion::Center, &window);
    let dump = image::open(&files[0])?;
    ensure(
        (dump.width(), dump.height()) == (rect.width, rect.height),
        format!("capture {}x{}, region {}x{}", dump.width(), dump.height(), rect.width, rect.height),
    )
}

fn scaled_templates_match_resized_window() -> Result<(), Failed> {
    let dir = tempfile::tempdir()?;
    let reference = blocky(11, 64, 48, 8);
    reference.save(dir.path().join("badge.png"))?;

    // Window at 3/4 of the 1280x720 reference resolution.
    let mut win = StubWindow::new(1, 960, 540, 3);
    let shown = imageops::resize(&reference, 48, 36, FilterType::Triangle);
    win.paint(&shown, 400, 240);
    let events = win.events();

    let window = win.region().ok_or("stub window has no region")?;
    let scale = ScaleFactor::between(&window, 1280, 720);
    let mut assets = AssetStore::new(scale);
    let report = assets.load(dir.path(), |_| 0.8)?;
    ensure(report.loaded == 1, format!("loaded {}", report.loaded))?;

    let mut vision = VisualProbe::new(assets).with_timings(Default::default(), Default::default());
    let outcome = vision.probe(&mut win, &Cancel::new(), &ProbeRequest::new("badge").click().post_delay(0.0))?;
    ensure(outcome.found, format!("not found, best {:.2}", outcome.best_confidence))?;

    let events = events.lock().unwrap();
    match events.first() {
        Some(InputEvent::Move(x, y)) => ensure(
            (x - 424).abs() <= 1 && (y - 258).abs() <= 1,
            format!("clicked ({}, {}), expected (424, 258)", x, y),
        ),
        other => Err(format!("expected a pointer move, got {:?}", other).into()),
    }
}

fn moved_window_is_followed() -> Result<(), Failed> {
    let mut win = StubWindow::new(1, 640, 360, 8).at(200, 100);
    let patch = blocky(21, 32, 24, 4);
    win.paint(&patch, 100, 60);
    let events = win.events();

    let mut assets = AssetStore::new(ScaleFactor::UNITY);
    assets.insert("marker", patch, 0.8);
    let mut vision = VisualProbe::new(assets).with_timings(Default::default(), Default::default());
    let req = ProbeRequest::new("marker").click().post_delay(0.0);

    let first = vision.probe(&mut win, &Cancel::new(), &req)?;
    ensure(first.found, "marker not found before the move")?;
    win.move_to(40, 20);
    let second = vision.probe(&mut win, &Cancel::new(), &req)?;
    ensure(second.found, "marker not found after the move")?;

    let moves: Vec<InputEvent> = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, InputEvent::Move(..)))
        .cloned()
        .collect();
    ensure(
        moves == vec![InputEvent::Move(316, 172), InputEvent::Move(156, 92)],
        format!("expected clicks at (316, 172) then (156, 92), got {:?}", moves),
    )
}
