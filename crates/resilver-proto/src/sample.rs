//! Load-generator roles and the telemetry they produce.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Background telemetry producers supervised during a test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorRole {
    CpuStress,
    DiskStress,
    ReadLatencyProbe,
    WriteLatencyProbe,
}

impl GeneratorRole {
    /// All roles in lock-step sampling order.
    pub const ALL: [GeneratorRole; 4] = [
        GeneratorRole::CpuStress,
        GeneratorRole::DiskStress,
        GeneratorRole::ReadLatencyProbe,
        GeneratorRole::WriteLatencyProbe,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GeneratorRole::CpuStress => "cpu_stress",
            GeneratorRole::DiskStress => "disk_stress",
            GeneratorRole::ReadLatencyProbe => "read_latency_probe",
            GeneratorRole::WriteLatencyProbe => "write_latency_probe",
        }
    }

    /// Latency probes report lifetime averages that must be de-cumulated per tick.
    pub fn reports_lifetime_mean(self) -> bool {
        matches!(
            self,
            GeneratorRole::ReadLatencyProbe | GeneratorRole::WriteLatencyProbe
        )
    }
}

impl fmt::Display for GeneratorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured record from a generator's output stream.
///
/// Bandwidth is in KiB/s and latency in microseconds, as the generator reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub read_iops: f64,
    pub write_iops: f64,
    pub read_bw_kib: f64,
    pub write_bw_kib: f64,
    pub read_lat_mean_us: f64,
    pub write_lat_mean_us: f64,
    pub cpu_user_pct: f64,
    pub cpu_sys_pct: f64,
}
