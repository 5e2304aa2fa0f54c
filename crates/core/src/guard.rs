//! Outbound network block toggled in lockstep with the workflow.
//!
//! The guard owns the only handle to the host filter. `engage` and
//! `release` are idempotent, and a guard that is dropped while engaged
//! releases itself, so every exit path of the owning thread ends unblocked.

use std::process::Command;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

use crate::logger;

/// Host network filter collaborator.
pub trait NetFilter: Send {
    /// Add an outbound block rule named `rule` for the `remote` address ranges.
    fn add_block_rule(&mut self, rule: &str, remote: &[String]) -> Result<()>;
    /// Delete every rule named `rule`.
    fn delete_rule(&mut self, rule: &str) -> Result<()>;
}

/// Windows Defender Firewall through `netsh advfirewall`.
pub struct NetshFilter;

impl NetshFilter {
    fn run(args: &[String]) -> Result<()> {
        logger::debug_p("guard", &format!("netsh {}", args.join(" ")));
        let output = Command::new("netsh").args(args).output()?;
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("netsh exited with {}: {} {}", output.status, stdout.trim(), stderr.trim());
        }
        Ok(())
    }
}

impl NetFilter for NetshFilter {
    fn add_block_rule(&mut self, rule: &str, remote: &[String]) -> Result<()> {
        if remote.is_empty() {
            bail!("no remote addresses configured for rule {}", rule);
        }
        Self::run(&[
            "advfirewall".into(),
            "firewall".into(),
            "add".into(),
            "rule".into(),
            format!("name={}", rule),
            "dir=out".into(),
            "action=block".into(),
            format!("remoteip={}", remote.join(",")),
            "enable=yes".into(),
        ])
    }

    fn delete_rule(&mut self, rule: &str) -> Result<()> {
        Self::run(&[
            "advfirewall".into(),
            "firewall".into(),
            "delete".into(),
            "rule".into(),
            format!("name={}", rule),
        ])
    }
}

/// Filter that only records and logs what it would do.
#[derive(Default, Clone)]
pub struct StubFilter {
    calls: Arc<Mutex<Vec<String>>>,
}

impl StubFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared journal of `add <rule> <remote>` / `delete <rule>` lines.
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, line: String) {
        logger::info_p("stub", &line);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(line);
        }
    }
}

impl NetFilter for StubFilter {
    fn add_block_rule(&mut self, rule: &str, remote: &[String]) -> Result<()> {
        self.record(format!("add {} {}", rule, remote.join(",")));
        Ok(())
    }

    fn delete_rule(&mut self, rule: &str) -> Result<()> {
        self.record(format!("delete {}", rule));
        Ok(())
    }
}

/// Pick the host filter: `netsh` on Windows, the recording stub elsewhere.
pub fn create_filter(force_stub: bool) -> Box<dyn NetFilter> {
    if !force_stub && cfg!(target_os = "windows") {
        return Box::new(NetshFilter);
    }
    if !force_stub {
        logger::warn_p("guard", "no network filter on this platform, guard runs as a stub");
    }
    Box::new(StubFilter::new())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GuardState {
    pub blocked: bool,
}

pub struct NetworkGuard {
    filter: Box<dyn NetFilter>,
    rule_name: String,
    remote: Vec<String>,
    state: GuardState,
}

impl NetworkGuard {
    /// Build the guard and remove any rule a previous run left behind.
    pub fn new(mut filter: Box<dyn NetFilter>, rule_name: &str, remote: Vec<String>) -> Self {
        match filter.delete_rule(rule_name) {
            Ok(()) => logger::info_p("guard", &format!("cleared stale rule {}", rule_name)),
            Err(e) => logger::debug_p("guard", &format!("no stale rule {}: {:#}", rule_name, e)),
        }
        Self {
            filter,
            rule_name: rule_name.to_string(),
            remote,
            state: GuardState::default(),
        }
    }

    pub fn engage(&mut self) -> Result<()> {
        if self.state.blocked {
            logger::debug_p("guard", "already engaged");
            return Ok(());
        }
        logger::info_p("guard", &format!("engaging {} ({})", self.rule_name, self.remote.join(",")));
        self.filter.add_block_rule(&self.rule_name, &self.remote)?;
        self.state.blocked = true;
        Ok(())
    }

    pub fn release(&mut self) -> Result<()> {
        if !self.state.blocked {
            return Ok(());
        }
        logger::info_p("guard", &format!("releasing {}", self.rule_name));
        self.filter.delete_rule(&self.rule_name)?;
        self.state.blocked = false;
        Ok(())
    }

    /// Release, logging instead of returning a failure.
    pub fn force_release(&mut self) {
        if let Err(e) = self.release() {
            logger::error_p("guard", &format!("release of {} failed: {:#}", self.rule_name, e));
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.state.blocked
    }
}

impl Drop for NetworkGuard {
    fn drop(&mut self) {
        if self.state.blocked {
            self.force_release();
        }
    }
}
