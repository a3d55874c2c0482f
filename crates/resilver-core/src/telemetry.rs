//! Per-tick telemetry recorder.
//!
//! Writes one JSON line per monitor tick (plus case start/end markers) so a
//! run can be analysed or plotted after the fact. Every line is flushed
//! immediately; a crash loses at most the tick in flight.

use crate::monitor::TickObservation;
use crate::supervisor::TickSamples;
use resilver_proto::Configuration;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::sync::Mutex;

/// A timestamped line in the telemetry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unix timestamp in milliseconds.
    pub ts: i64,

    /// Record kind (`case.start`, `resilver.tick`, `case.end`).
    pub event: String,

    pub data: serde_json::Value,
}

impl Record {
    pub fn new(event: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            event: event.into(),
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Body of a `resilver.tick` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickRecord {
    pub test_index: String,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub percent_done: f64,
    pub scan_rate_mbps: Option<f64>,
    pub issue_rate_mbps: Option<f64>,
    pub eta_secs: u64,
    pub samples: TickSamples,
}

impl TickRecord {
    pub fn from_observation(test_index: &str, obs: &TickObservation) -> Self {
        Self {
            test_index: test_index.to_string(),
            tick: obs.tick,
            elapsed_secs: obs.elapsed.as_secs_f64(),
            percent_done: obs.progress.percent_done,
            scan_rate_mbps: obs.progress.scan_rate.map(|r| r.mb_per_sec()),
            issue_rate_mbps: obs.progress.issue_rate.map(|r| r.mb_per_sec()),
            eta_secs: obs.progress.eta.as_secs(),
            samples: obs.samples.clone(),
        }
    }
}

/// Appends telemetry records to a writer.
pub struct TelemetryRecorder<W> {
    writer: Mutex<W>,
}

impl<W: Write> TelemetryRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn record_case_start(&self, test_index: &str, config: &Configuration) -> io::Result<()> {
        self.write_record(&Record::new(
            "case.start",
            serde_json::json!({ "test_index": test_index, "configuration": config }),
        ))
    }

    pub fn record_tick(&self, test_index: &str, obs: &TickObservation) -> io::Result<()> {
        self.write_record(&Record::new(
            "resilver.tick",
            TickRecord::from_observation(test_index, obs),
        ))
    }

    pub fn record_case_end(&self, test_index: &str, resilver_secs: u64) -> io::Result<()> {
        self.write_record(&Record::new(
            "case.end",
            serde_json::json!({ "test_index": test_index, "resilver_secs": resilver_secs }),
        ))
    }

    fn write_record(&self, record: &Record) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::other("telemetry writer lock poisoned"))?;
        let json = serde_json::to_string(record)?;
        writeln!(writer, "{json}")?;
        writer.flush()
    }

    /// Consumes the recorder and returns the writer.
    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
