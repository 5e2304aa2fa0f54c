use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::logger;

/// Lifetime counters, persisted as pretty JSON after every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStats {
    pub total_loops_completed: u64,
    pub total_items_acquired: u64,
    pub errors_recovered: u64,
    pub session_start: Option<String>,
    pub last_run: Option<String>,

    #[serde(skip)]
    path: Option<PathBuf>,
}

impl RunStats {
    /// Read `path`, falling back to zeroed counters when it is absent or unreadable.
    pub fn load(path: &Path) -> Self {
        let mut stats = match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<RunStats>(&text) {
                Ok(s) => {
                    logger::info_p(
                        "stats",
                        &format!(
                            "loaded: {} loop(s), {} item(s)",
                            s.total_loops_completed, s.total_items_acquired
                        ),
                    );
                    s
                }
                Err(e) => {
                    logger::warn_p("stats", &format!("ignoring malformed {}: {}", path.display(), e));
                    RunStats::default()
                }
            },
            Err(_) => RunStats::default(),
        };
        stats.path = Some(path.to_path_buf());
        stats.session_start = Some(Local::now().to_rfc3339());
        stats
    }

    /// Counters that are never written anywhere.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Add to the counters and flush.
    pub fn record(&mut self, loops: u64, items: u64, errors: u64) -> Result<()> {
        self.total_loops_completed += loops;
        self.total_items_acquired += items;
        self.errors_recovered += errors;
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.last_run = Some(Local::now().to_rfc3339());
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }
}
