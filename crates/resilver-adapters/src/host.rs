//! Host-level probes and cleanup.

use crate::command::CommandRunner;
use async_trait::async_trait;
use resilver_core::{GeneratorReaper, HostProbe};
use resilver_proto::{AdminError, Error};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Reads the 1-minute load average from `/proc/loadavg`.
#[derive(Debug, Clone)]
pub struct ProcLoadAverage {
    path: PathBuf,
}

impl ProcLoadAverage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcLoadAverage {
    fn default() -> Self {
        Self::new("/proc/loadavg")
    }
}

impl HostProbe for ProcLoadAverage {
    fn load_average(&self) -> Option<f64> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => parse_load_average(&text),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Load average unavailable");
                None
            }
        }
    }
}

/// First field of a `/proc/loadavg` line.
pub fn parse_load_average(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

/// Kills stray generators by process name with `pkill`.
#[derive(Debug, Clone)]
pub struct PkillReaper {
    runner: CommandRunner,
    pattern: String,
}

impl PkillReaper {
    pub fn new(runner: CommandRunner, pattern: impl Into<String>) -> Self {
        Self {
            runner,
            pattern: pattern.into(),
        }
    }

    pub fn fio(runner: CommandRunner) -> Self {
        Self::new(runner, "fio")
    }
}

#[async_trait]
impl GeneratorReaper for PkillReaper {
    async fn reap(&mut self) {
        match self.runner.run("pkill", &[self.pattern.clone()]).await {
            Ok(_) => info!(pattern = %self.pattern, "Killed stray processes"),
            // pkill exits 1 when nothing matched
            Err(Error::Admin(AdminError::CommandFailed { exit_code: Some(1), .. })) => {
                debug!(pattern = %self.pattern, "No stray processes");
            }
            Err(e) => warn!(pattern = %self.pattern, error = %e, "pkill failed"),
        }
    }
}
