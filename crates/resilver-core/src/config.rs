//! Benchmark configuration.
//!
//! Loaded from `resilver.yml`. Every field has a default, so a partial file
//! (or no file at all) yields the reference test plan.

use crate::lifecycle::LifecycleSettings;
use crate::matrix::Matrix;
use crate::monitor::MonitorSettings;
use crate::reliability::{DEFAULT_DISK_AFRS, DEFAULT_MULTIPLIERS};
use crate::sink::SweepAxes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub disks: DiskConfig,

    #[serde(default)]
    pub fill: FillConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub probes: ProbeConfig,

    #[serde(default)]
    pub destroy: DestroyConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub reliability: ReliabilityConfig,

    #[serde(default)]
    pub matrix: Matrix,
}

/// Pool and dataset naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_pool_name")]
    pub name: String,

    #[serde(default = "default_dataset")]
    pub dataset: String,

    /// Mountpoint of the pool; the dataset mounts below it.
    #[serde(default = "default_mountpoint")]
    pub mountpoint: PathBuf,

    #[serde(default = "default_ashift")]
    pub ashift: u32,

    #[serde(default = "default_true")]
    pub autoreplace: bool,
}

fn default_pool_name() -> String {
    "tank".to_string()
}

fn default_dataset() -> String {
    "test".to_string()
}

fn default_mountpoint() -> PathBuf {
    PathBuf::from("/mnt/tank")
}

fn default_ashift() -> u32 {
    12
}

fn default_true() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: default_pool_name(),
            dataset: default_dataset(),
            mountpoint: default_mountpoint(),
            ashift: default_ashift(),
            autoreplace: true,
        }
    }
}

impl PoolConfig {
    /// `tank/test`
    pub fn dataset_name(&self) -> String {
        format!("{}/{}", self.name, self.dataset)
    }

    /// Mount path of the test dataset.
    pub fn dataset_path(&self) -> PathBuf {
        self.mountpoint.join(&self.dataset)
    }
}

/// Disk selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Size `lsblk` reports for eligible disks, e.g. `7.3T`.
    #[serde(default = "default_physical_size")]
    pub physical_size: String,

    /// Whether pool members are partitions (`/dev/sdX1`) rather than whole disks.
    #[serde(default = "default_true")]
    pub partitioned: bool,

    /// Partition size, reported as the disk size when partitioned.
    #[serde(default = "default_partition_size")]
    pub partition_size: String,

    /// Device taken offline for every test.
    #[serde(default = "default_target")]
    pub target: String,
}

fn default_physical_size() -> String {
    "7.3T".to_string()
}

fn default_partition_size() -> String {
    "100G".to_string()
}

fn default_target() -> String {
    "sdbz".to_string()
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            physical_size: default_physical_size(),
            partitioned: true,
            partition_size: default_partition_size(),
            target: default_target(),
        }
    }
}

impl DiskConfig {
    /// Disk size as written to the results.
    pub fn size_label(&self) -> &str {
        if self.partitioned {
            &self.partition_size
        } else {
            &self.physical_size
        }
    }
}

/// Fill phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillConfig {
    #[serde(default = "default_fill_percent")]
    pub target_percent: f64,

    #[serde(default = "default_fill_poll_secs")]
    pub poll_secs: u64,

    #[serde(default = "default_max_runs")]
    pub max_runs: u32,

    #[serde(default = "default_overshoot")]
    pub prune_overshoot_percent: f64,

    /// Fixed seed for prune selection.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_fill_percent() -> f64 {
    70.0
}

fn default_fill_poll_secs() -> u64 {
    10
}

fn default_max_runs() -> u32 {
    16
}

fn default_overshoot() -> f64 {
    5.0
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            target_percent: default_fill_percent(),
            poll_secs: default_fill_poll_secs(),
            max_runs: default_max_runs(),
            prune_overshoot_percent: default_overshoot(),
            seed: None,
        }
    }
}

/// Monitor loop and test case timing, all in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Per-generator read timeout within a tick.
    #[serde(default = "default_sample_timeout")]
    pub sample_timeout_secs: u64,

    #[serde(default = "default_parse_retry")]
    pub parse_retry_delay_secs: u64,

    /// Pause between taking the device offline and the first poll.
    #[serde(default = "default_fault_grace")]
    pub fault_grace_secs: u64,

    /// Generator warm-up before fault injection.
    #[serde(default = "default_settle")]
    pub settle_secs: u64,

    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Resilver time after which the during-resilver load average is taken.
    #[serde(default = "default_load_avg_delay")]
    pub load_avg_delay_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub health_poll_secs: u64,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_sample_timeout() -> u64 {
    5
}

fn default_parse_retry() -> u64 {
    2
}

fn default_fault_grace() -> u64 {
    5
}

fn default_settle() -> u64 {
    65
}

fn default_cooldown() -> u64 {
    30
}

fn default_load_avg_delay() -> u64 {
    120
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            sample_timeout_secs: default_sample_timeout(),
            parse_retry_delay_secs: default_parse_retry(),
            fault_grace_secs: default_fault_grace(),
            settle_secs: default_settle(),
            cooldown_secs: default_cooldown(),
            load_avg_delay_secs: default_load_avg_delay(),
            health_poll_secs: default_poll_interval(),
        }
    }
}

/// Optional latency probes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub read_latency: bool,

    #[serde(default)]
    pub write_latency: bool,
}

/// Bounded retries for destroy and device restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyConfig {
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

fn default_attempts() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    5
}

impl Default for DestroyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

/// Output file locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_results")]
    pub results: PathBuf,

    #[serde(default = "default_log")]
    pub log: PathBuf,

    /// Per-tick JSONL telemetry; disabled when unset.
    #[serde(default = "default_telemetry")]
    pub telemetry: Option<PathBuf>,

    #[serde(default = "default_checkpoint")]
    pub checkpoint: PathBuf,
}

fn default_results() -> PathBuf {
    PathBuf::from("output.csv")
}

fn default_log() -> PathBuf {
    PathBuf::from("resilver.log")
}

#[allow(clippy::unnecessary_wraps)]
fn default_telemetry() -> Option<PathBuf> {
    Some(PathBuf::from("resilver-telemetry.jsonl"))
}

fn default_checkpoint() -> PathBuf {
    PathBuf::from("resilver-checkpoint.json")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results: default_results(),
            log: default_log(),
            telemetry: default_telemetry(),
            checkpoint: default_checkpoint(),
        }
    }
}

/// Reliability sweep axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    #[serde(default = "default_disk_afrs")]
    pub disk_afrs: Vec<f64>,

    #[serde(default = "default_multipliers")]
    pub multipliers: Vec<f64>,
}

fn default_disk_afrs() -> Vec<f64> {
    DEFAULT_DISK_AFRS.to_vec()
}

fn default_multipliers() -> Vec<f64> {
    DEFAULT_MULTIPLIERS.to_vec()
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            disk_afrs: default_disk_afrs(),
            multipliers: default_multipliers(),
        }
    }
}

impl BenchConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        Self::parse_yaml(&content)
    }

    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        debug!(
            pool = %config.pool.name,
            cases = config.matrix.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Returns warnings for suspicious but usable values, and an error for
    /// values the benchmark cannot run with.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut warnings = Vec::new();

        let dims = self.matrix.dims();
        for (field, len) in [
            ("matrix.layouts", dims.layout),
            ("matrix.frag_levels", dims.frag),
            ("matrix.record_sizes", dims.record_size),
            ("matrix.stress_profiles", dims.stress),
        ] {
            if len == 0 {
                return Err(invalid(field, "must not be empty"));
            }
        }
        for layout in &self.matrix.layouts {
            if layout.family().is_none() {
                return Err(invalid(
                    "matrix.layouts",
                    format!("unknown redundancy family in '{}'", layout.layout),
                ));
            }
            if layout.width == 0 {
                return Err(invalid("matrix.layouts", format!("'{}' has zero width", layout.layout)));
            }
        }

        if !(1.0..=99.0).contains(&self.fill.target_percent) {
            return Err(invalid(
                "fill.target_percent",
                format!("{} is outside 1..=99", self.fill.target_percent),
            ));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(invalid("monitor.poll_interval_secs", "must be positive"));
        }
        if self.fill.poll_secs == 0 {
            return Err(invalid("fill.poll_secs", "must be positive"));
        }
        if self.reliability.disk_afrs.iter().any(|a| !(0.0..=1.0).contains(a)) {
            return Err(invalid("reliability.disk_afrs", "values must be fractions in 0..=1"));
        }

        if self.monitor.sample_timeout_secs >= self.monitor.poll_interval_secs {
            warnings.push(ConfigWarning::InvalidValue {
                field: "monitor.sample_timeout_secs".to_string(),
                message: "a stalled generator will delay every tick past the poll interval".to_string(),
            });
        }
        if self.fill.target_percent > 90.0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "fill.target_percent".to_string(),
                message: "fills above 90% leave little room for fragmentation pruning".to_string(),
            });
        }
        if self.destroy.max_attempts == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "destroy.max_attempts".to_string(),
                message: "treated as a single attempt".to_string(),
            });
        }

        Ok(warnings)
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_secs(self.monitor.poll_interval_secs),
            parse_retry_delay: Duration::from_secs(self.monitor.parse_retry_delay_secs),
        }
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            target_device: self.disks.target.clone(),
            partitioned: self.disks.partitioned,
            fill_target_percent: self.fill.target_percent,
            fill_poll: Duration::from_secs(self.fill.poll_secs),
            max_fill_runs: self.fill.max_runs,
            prune_overshoot_percent: self.fill.prune_overshoot_percent,
            prune_seed: self.fill.seed,
            destroy_attempts: self.destroy.max_attempts,
            retry_delay: Duration::from_secs(self.destroy.retry_delay_secs),
            health_poll: Duration::from_secs(self.monitor.health_poll_secs),
        }
    }

    pub fn sweep_axes(&self) -> SweepAxes {
        SweepAxes {
            disk_afrs: self.reliability.disk_afrs.clone(),
            multipliers: self.reliability.multipliers.clone(),
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.into(),
    }
}

/// A usable but suspicious configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    InvalidValue { field: String, message: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::InvalidValue { field, message } => {
                write!(f, "Warning [{field}]: {message}")
            }
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}
