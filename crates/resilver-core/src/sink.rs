//! Result sink.
//!
//! One [`ResultRow`] is produced per test case. The CSV sink appends to an
//! existing results file when its header is recognised, rotates a foreign file
//! out of the way otherwise, and flushes after every row.

use crate::human::format_hms;
use crate::reliability::ReliabilitySweep;
use resilver_proto::{Configuration, PoolSnapshot, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// First header column; its presence marks a file this sink wrote.
pub const HEADER_MARKER: &str = "Test Index";

const BASE_COLUMNS: [&str; 26] = [
    HEADER_MARKER,
    "Layout",
    "Width",
    "Recordsize",
    "Target Fill %",
    "Used (bytes)",
    "Used (TiB)",
    "Available (bytes)",
    "Available (TiB)",
    "Used Percent",
    "Pool Size (bytes)",
    "Pool Size (TiB)",
    "Frag. Percent",
    "Disk Size",
    "Frag. Level",
    "CPU Stress",
    "Disk Stress",
    "Resilver Time",
    "Resilver Time (sec.)",
    "Scanned",
    "Scan Speed (M/s)",
    "Issued",
    "Issue Speed (M/s)",
    "Fill Speed",
    "1m Load Avg. Baseline",
    "1m Load Avg. During",
];

const GENERATOR_COLUMNS: [&str; 6] = [
    "Read Latency (us)",
    "Write Latency (us)",
    "Disk Stress IOPS",
    "Disk Stress BW (KiB/s)",
    "CPU User %",
    "CPU Sys %",
];

/// Disk AFRs and multipliers of the reliability columns.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepAxes {
    pub disk_afrs: Vec<f64>,
    pub multipliers: Vec<f64>,
}

impl SweepAxes {
    /// Column names, multiplier-major to match [`ReliabilitySweep::compute`].
    pub fn columns(&self) -> Vec<String> {
        self.multipliers
            .iter()
            .flat_map(|m| {
                self.disk_afrs
                    .iter()
                    .map(move |afr| format!("Pool AFR (disk {:.0}%, x{m})", afr * 100.0))
            })
            .collect()
    }
}

/// Every measured value of one test case.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub test_index: String,
    pub config: Configuration,
    pub fill_target_percent: f64,
    pub snapshot: PoolSnapshot,
    pub disk_size: String,
    pub resilver_time: Duration,
    pub scanned: Option<String>,
    pub scan_rate: Option<f64>,
    pub issued: String,
    pub issue_rate: Option<f64>,
    /// Fill throughput in GB/s; absent when the pool was not filled in this run.
    pub fill_rate_gbps: Option<f64>,
    pub load_baseline: Option<f64>,
    pub load_during: Option<f64>,
    pub read_latency_us: Option<f64>,
    pub write_latency_us: Option<f64>,
    pub disk_stress_iops: Option<f64>,
    pub disk_stress_bw_kib: Option<f64>,
    pub cpu_user_pct: Option<f64>,
    pub cpu_sys_pct: Option<f64>,
    pub sweep: ReliabilitySweep,
}

fn opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

impl ResultRow {
    pub fn header(axes: &SweepAxes) -> Vec<String> {
        BASE_COLUMNS
            .iter()
            .chain(GENERATOR_COLUMNS.iter())
            .map(|c| (*c).to_string())
            .chain(axes.columns())
            .collect()
    }

    pub fn fields(&self) -> Vec<String> {
        let s = &self.snapshot;
        let mut fields = vec![
            self.test_index.clone(),
            self.config.layout.layout.clone(),
            self.config.layout.width.to_string(),
            self.config.record_size.clone(),
            format!("{}%", self.fill_target_percent),
            s.used_bytes.to_string(),
            format!("{:.2}", s.used_tib()),
            s.available_bytes.to_string(),
            format!("{:.2}", s.available_tib()),
            format!("{:.1}%", s.used_percent()),
            s.total_bytes().to_string(),
            format!("{:.2}", s.total_tib()),
            s.fragmentation_percent
                .map_or_else(|| "-".to_string(), |p| format!("{p}%")),
            self.disk_size.clone(),
            self.config.frag.as_str().to_string(),
            self.config.stress.cpu.as_str().to_string(),
            self.config.stress.disk.as_str().to_string(),
            format_hms(self.resilver_time),
            self.resilver_time.as_secs().to_string(),
            self.scanned.clone().unwrap_or_else(|| "-".to_string()),
            opt(self.scan_rate, 2),
            self.issued.clone(),
            opt(self.issue_rate, 2),
            self.fill_rate_gbps
                .map_or_else(|| "N/A".to_string(), |r| format!("{r:.2} GB/s")),
            opt(self.load_baseline, 2),
            opt(self.load_during, 2),
            opt(self.read_latency_us, 1),
            opt(self.write_latency_us, 1),
            opt(self.disk_stress_iops, 1),
            opt(self.disk_stress_bw_kib, 1),
            opt(self.cpu_user_pct, 1),
            opt(self.cpu_sys_pct, 1),
        ];
        fields.extend(self.sweep.points.iter().map(|p| format!("{:e}", p.pool_afr)));
        fields
    }
}

/// Destination of completed test cases.
pub trait ResultSink: Send {
    fn write_row(&mut self, row: &ResultRow) -> Result<()>;
}

/// Quotes a field if it contains a separator, quote or newline.
pub fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn write_record<W: Write>(writer: &mut W, fields: &[String]) -> std::io::Result<()> {
    let line = fields
        .iter()
        .map(|f| escape_field(f))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(writer, "{line}")?;
    writer.flush()
}

/// CSV file sink.
pub struct CsvResultSink {
    path: PathBuf,
    file: File,
}

impl CsvResultSink {
    /// Opens the results file, appending when it already carries our header.
    pub fn open(path: impl Into<PathBuf>, axes: &SweepAxes) -> Result<Self> {
        let path = path.into();
        let append = match File::open(&path) {
            Ok(existing) => {
                let mut first = String::new();
                BufReader::new(existing).read_line(&mut first)?;
                if first.contains(HEADER_MARKER) {
                    true
                } else {
                    let rotated = rotated_path(&path);
                    warn!(path = %path.display(), rotated = %rotated.display(), "Results file has no header, rotating");
                    std::fs::rename(&path, &rotated)?;
                    false
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        let mut file = if append {
            OpenOptions::new().append(true).open(&path)?
        } else {
            let mut file = File::create(&path)?;
            write_record(&mut file, &ResultRow::header(axes))?;
            file
        };
        file.flush()?;
        info!(path = %path.display(), append, "Results file ready");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for CsvResultSink {
    fn write_row(&mut self, row: &ResultRow) -> Result<()> {
        write_record(&mut self.file, &row.fields())?;
        Ok(())
    }
}

/// `results.csv` -> `results.csv.old`
pub fn rotated_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".old");
    PathBuf::from(name)
}
