//! Typed resilver status snapshot.
//!
//! A `ResilverStatus` is re-derived from the raw status report on every poll
//! and never cached between polls.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A throughput normalized to megabytes per second (decimal units).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Throughput(f64);

impl Throughput {
    pub fn from_mb_per_sec(mb: f64) -> Self {
        Self(mb)
    }

    pub fn mb_per_sec(self) -> f64 {
        self.0
    }

    /// Parses a rate such as `2.34G/s`, `789M/s` or `1.1T/s`.
    ///
    /// Tera-, giga- and mega-scale suffixes are normalized to MB/s. Kilo-scale
    /// and bare byte rates also appear at the very start and end of a resilver
    /// and are accepted so they do not look like torn reports.
    pub fn parse(text: &str) -> Option<Self> {
        let value = text.trim().strip_suffix("/s")?;
        let split = value.find(|c: char| !(c.is_ascii_digit() || c == '.'))?;
        let (number, unit) = value.split_at(split);
        let number: f64 = number.parse().ok()?;
        let scale = match unit {
            "T" => 1_000_000.0,
            "G" => 1_000.0,
            "M" => 1.0,
            "K" => 0.001,
            "B" => 0.000_001,
            _ => return None,
        };
        Some(Self(number * scale))
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}M/s", self.0)
    }
}

/// Progress of an in-flight resilver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilverProgress {
    /// Scan rate. Parity and mirror families never report one.
    pub scan_rate: Option<Throughput>,
    /// Issue rate. Absent during the first seconds of a resilver.
    pub issue_rate: Option<Throughput>,
    /// Completion in percent, `0.0..=100.0`.
    pub percent_done: f64,
    /// Estimated time remaining; zero once progress reaches 100%.
    pub eta: Duration,
}

/// Totals reported once a resilver has finished while the fault is still active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResilverCompletion {
    /// Total elapsed resilver time.
    pub elapsed: Duration,
    /// Amount scanned, e.g. `1.23T`. Only distributed-spare layouts report it.
    pub scanned: Option<String>,
    /// Amount issued (resilvered), e.g. `456G`.
    pub issued: String,
}

/// Resilver state of the pool at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResilverStatus {
    /// No fault active and no recovery in progress.
    Healthy,
    Resilvering(ResilverProgress),
    Complete(ResilverCompletion),
}

impl ResilverStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ResilverStatus::Healthy => "healthy",
            ResilverStatus::Resilvering(_) => "resilvering",
            ResilverStatus::Complete(_) => "complete",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, ResilverStatus::Healthy)
    }
}
