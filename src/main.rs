use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use lockstep_core::assets::AssetStore;
use lockstep_core::cancel::{Cancel, StartSignal};
use lockstep_core::config::Config;
use lockstep_core::guard::{create_filter, NetworkGuard};
use lockstep_core::logger;
use lockstep_core::platform::hotkey::{self, HotkeyFlags};
use lockstep_core::platform::create_platform;
use lockstep_core::probe::VisualProbe;
use lockstep_core::region::ScaleFactor;
use lockstep_core::stats::RunStats;
use lockstep_core::workflow::{templates, Controller, RunPlan, RunSummary, StatusBoard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StartMode {
    /// Already in an online session.
    Online,
    /// In story mode; go online first.
    Safe,
}

/// Screen-driven acquisition runner with a network guard interlock.
#[derive(Debug, Parser)]
#[command(name = "lockstep", version)]
struct Cli {
    /// Number of loop iterations.
    #[arg(long, default_value_t = 1)]
    loops: u32,

    /// Mode the target is in when the run begins.
    #[arg(long, value_enum, default_value_t = StartMode::Safe)]
    start: StartMode,

    #[arg(long, default_value = "lockstep.json")]
    config: PathBuf,

    /// Stub platform and network filter: no real input, no firewall rules.
    #[arg(long)]
    stub: bool,

    /// Log to stdout instead of drawing the dashboard.
    #[arg(long)]
    headless: bool,

    /// Start immediately instead of waiting for the start trigger.
    #[arg(long)]
    now: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let cfg = Config::load(&cli.config)?;
    logger::init(&cfg.logs_dir)?;
    logger::set_echo(cli.headless);
    logger::info(&format!("lockstep {} starting, config {}", env!("CARGO_PKG_VERSION"), cli.config.display()));

    // Target window
    let platform = create_platform(cli.stub);
    let instances = platform.get_instances(&cfg.window_pattern);
    let Some((window_id, title)) = instances.into_iter().next() else {
        bail!("no window matches '{}'", cfg.window_pattern);
    };
    let win = platform.create_window(&cfg.window_pattern, window_id);
    let region = win.region().with_context(|| format!("window '{}' has no geometry", title))?;
    let scale = ScaleFactor::between(&region, cfg.reference_resolution.width, cfg.reference_resolution.height);
    logger::info(&format!(
        "target '{}' at {}x{}, template scale {:.3}x{:.3}",
        title, region.w, region.h, scale.x, scale.y
    ));

    // Templates
    let mut assets = AssetStore::new(scale);
    assets.load(&cfg.assets_dir, |name| cfg.threshold_for(name))?;
    let missing = assets.missing(templates::REQUIRED);
    if !missing.is_empty() {
        bail!("missing required templates: {}", missing.join(", "));
    }
    let vision = VisualProbe::new(assets)
        .with_timings(cfg.timings.poll(), cfg.timings.click_hold())
        .with_debug_dir(&cfg.debug_dir);

    let guard = NetworkGuard::new(create_filter(cli.stub), &cfg.guard.rule_name, cfg.guard.remote_ips.clone());
    let stats = RunStats::load(&cfg.stats_file);

    // Operator signals, shared with the global hotkeys
    let start_flag = Arc::new(AtomicBool::new(false));
    let panic_flag = Arc::new(AtomicBool::new(false));
    hotkey::start_hotkey_listener(HotkeyFlags { start: Arc::clone(&start_flag), panic: Arc::clone(&panic_flag) });
    let cancel = Cancel::from_flag(panic_flag);
    let start = StartSignal::from_flag(start_flag);
    // Ctrl+C and SIGTERM stop the run like the panic hotkey does
    ctrlc::set_handler(cancel.interrupt_handler()).context("installing the interrupt handler")?;
    let board = StatusBoard::new();

    let plan = RunPlan {
        loops: cli.loops,
        start_online: cli.start == StartMode::Online,
        wait_for_start: !cli.now,
    };
    let mut controller = Controller::new(cfg, Box::new(vision), win, guard)
        .with_cancel(cancel.clone())
        .with_stats(stats)
        .with_board(board.clone())
        .with_halt_hook(hotkey::activate_terminal);

    // Route logs to the dashboard before the worker starts talking
    let log_rx = if cli.headless {
        None
    } else {
        let (log_tx, log_rx) = mpsc::channel::<String>();
        logger::set_tui_sender(log_tx);
        Some(log_rx)
    };

    let worker_start = start.clone();
    let worker = thread::spawn(move || controller.run(&plan, &worker_start));

    let dashboard = match log_rx {
        Some(log_rx) => {
            let mut app = lockstep_tui::App::new(board, cancel.clone(), start, log_rx);
            let result = run_dashboard(&mut app);
            if !worker.is_finished() {
                cancel.raise();
            }
            result
        }
        None => Ok(()),
    };

    // The worker releases the guard on its way out; wait for it even when
    // the dashboard failed.
    let summary = worker.join().map_err(|_| anyhow!("workflow thread panicked"))?;
    print_summary(&summary);
    dashboard?;
    Ok(ExitCode::from(summary.exit_code()))
}

fn run_dashboard(app: &mut lockstep_tui::App) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = lockstep_tui::run(&mut terminal, app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    result
}

fn print_summary(summary: &RunSummary) {
    println!(
        "{:?}: {} loop(s), {} item(s), {} recovery(ies) in {:.1} min",
        summary.outcome,
        summary.iterations,
        summary.items,
        summary.recoveries,
        summary.elapsed.as_secs_f64() / 60.0
    );
}
