use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::logger;

/// Run configuration, read from `lockstep.json`.
///
/// Every field has a default, so a partial file only overrides what it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub assets_dir: PathBuf,
    pub debug_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub stats_file: PathBuf,
    /// Resolution the templates were cut at.
    pub reference_resolution: Resolution,
    /// Case-insensitive regex matched against window titles.
    pub window_pattern: String,
    pub default_threshold: f32,
    pub templates: BTreeMap<String, TemplateSpec>,
    pub timings: Timings,
    pub retries: Retries,
    pub slots: usize,
    pub online_policy: OnlinePolicy,
    pub guard: GuardConfig,
    pub keys: Keys,
    pub text: TextConfig,
    /// Templates clicked in order to force the target to commit its state.
    pub persist_path: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSpec {
    pub threshold: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub poll_secs: f64,
    pub click_hold_secs: f64,
    pub key_hold_secs: f64,
    pub key_gap_secs: f64,
    pub type_gap_secs: f64,
    pub online_load_secs: f64,
    pub safe_state_secs: f64,
    pub browser_close_secs: f64,
    pub persist_settle_secs: f64,
    pub cooldown_secs: f64,
    pub hold_alert_secs: f64,
    /// Multiplier on every fixed settle delay between workflow steps.
    pub settle_scale: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Retries {
    pub select_attempts: u32,
    pub session_attempts: u32,
    pub confirm_attempts: u32,
}

/// What `EnsureOnline` does when the online marker never shows up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnlinePolicy {
    /// Log, count an error, and carry on.
    #[default]
    BestEffort,
    /// End the run with `OnlineUnconfirmed`.
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Stable across runs so a stale rule can always be removed.
    pub rule_name: String,
    pub remote_ips: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Keys {
    pub back: String,
    pub menu: String,
    pub confirm: String,
    pub up: String,
    pub down: String,
    pub interaction: String,
    /// Held in order, released in reverse.
    pub safe_mode_chord: Vec<String>,
    /// Tapped after the menu entry to pick the online mode.
    pub select_mode: Vec<String>,
    /// Tapped to bring up the in-target browser.
    pub open_browser: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Typed into the browser address field.
    pub address: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("assets"),
            debug_dir: PathBuf::from("debug_errors"),
            logs_dir: PathBuf::from("logs"),
            stats_file: PathBuf::from("stats.json"),
            reference_resolution: Resolution { width: 1920, height: 1080 },
            window_pattern: ".".into(),
            default_threshold: 0.8,
            templates: BTreeMap::new(),
            timings: Timings::default(),
            retries: Retries::default(),
            slots: 10,
            online_policy: OnlinePolicy::default(),
            guard: GuardConfig::default(),
            keys: Keys::default(),
            text: TextConfig::default(),
            persist_path: vec![
                "persist_step_1".into(),
                "persist_step_2".into(),
                "persist_step_3".into(),
            ],
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self { width: 1920, height: 1080 }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_secs: 0.01,
            click_hold_secs: 0.06,
            key_hold_secs: 0.02,
            key_gap_secs: 0.03,
            type_gap_secs: 0.05,
            online_load_secs: 180.0,
            safe_state_secs: 120.0,
            browser_close_secs: 30.0,
            persist_settle_secs: 2.0,
            cooldown_secs: 2.0,
            hold_alert_secs: 30.0,
            settle_scale: 1.0,
        }
    }
}

impl Timings {
    pub fn poll(&self) -> Duration {
        secs(self.poll_secs)
    }

    pub fn click_hold(&self) -> Duration {
        secs(self.click_hold_secs)
    }

    pub fn key_hold(&self) -> Duration {
        secs(self.key_hold_secs)
    }
}

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s.max(0.0))
}

impl Default for Retries {
    fn default() -> Self {
        Self { select_attempts: 3, session_attempts: 3, confirm_attempts: 1 }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self { rule_name: "LOCKSTEP_OUTBOUND_BLOCK".into(), remote_ips: Vec::new() }
    }
}

impl Default for Keys {
    fn default() -> Self {
        Self {
            back: "esc".into(),
            menu: "esc".into(),
            confirm: "enter".into(),
            up: "up".into(),
            down: "down".into(),
            interaction: "m".into(),
            safe_mode_chord: vec!["alt".into(), "f5".into()],
            select_mode: vec!["up".into(), "enter".into()],
            open_browser: vec!["up".into(), "down".into(), "enter".into()],
        }
    }
}

impl Default for TextConfig {
    fn default() -> Self {
        Self { address: "www.example.com".into() }
    }
}

impl Config {
    /// Read `path`. A missing file yields defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                logger::info(&format!("{} not found, using defaults", path.display()));
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let cfg: Config = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let in_range = |t: f32| t > 0.0 && t <= 1.0;
        if !in_range(self.default_threshold) {
            bail!("default_threshold {} outside (0, 1]", self.default_threshold);
        }
        for (name, spec) in &self.templates {
            if let Some(t) = spec.threshold {
                if !in_range(t) {
                    bail!("threshold {} for '{}' outside (0, 1]", t, name);
                }
            }
        }
        if self.slots == 0 {
            bail!("slots must be at least 1");
        }
        if self.timings.settle_scale < 0.0 {
            bail!("timings.settle_scale must not be negative");
        }
        if self.guard.rule_name.trim().is_empty() {
            bail!("guard.rule_name must not be empty");
        }
        regex::Regex::new(&self.window_pattern)
            .with_context(|| format!("window_pattern '{}'", self.window_pattern))?;
        Ok(())
    }

    /// Registered threshold for `name`, or the default.
    pub fn threshold_for(&self, name: &str) -> f32 {
        self.templates
            .get(name)
            .and_then(|spec| spec.threshold)
            .unwrap_or(self.default_threshold)
    }
}
