//! fio job definitions.
//!
//! Every supervised generator reports in terse v3 format once per status
//! interval, so its stdout is one parseable record per monitor tick. Fill jobs
//! run silently and are judged by pool usage alone.

use resilver_proto::{FragLevel, GeneratorRole, StressLevel};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Runtime long enough that a generator only ends when terminated.
const FOREVER: &str = "100D";

/// One fio invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FioJob {
    name: String,
    args: Vec<String>,
}

impl FioJob {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            args: vec![format!("--name={name}")],
            name,
        }
    }

    /// Adds `--key=value`.
    pub fn opt(mut self, key: &str, value: impl std::fmt::Display) -> Self {
        self.args.push(format!("--{key}={value}"));
        self
    }

    /// Adds a bare `--key`.
    pub fn flag(mut self, key: &str) -> Self {
        self.args.push(format!("--{key}"));
        self
    }

    /// Periodic terse v3 records every `interval`.
    pub fn terse(self, interval: Duration) -> Self {
        self.opt("output-format", "terse")
            .opt("terse-version", 3)
            .opt("status-interval", interval.as_secs().max(1))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// How fio is launched.
///
/// `prefix` arguments go before the job arguments, which lets a wrapper
/// (`sudo`, `sh -c`) stand in front of the real binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FioBinary {
    program: PathBuf,
    prefix: Vec<String>,
}

impl FioBinary {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix: Vec::new(),
        }
    }

    pub fn wrapped(program: impl Into<PathBuf>, prefix: Vec<String>) -> Self {
        Self {
            program: program.into(),
            prefix,
        }
    }

    pub fn command(&self, job: &FioJob) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix).args(job.args());
        cmd
    }

    /// Command line for logs.
    pub fn render(&self, job: &FioJob) -> String {
        let args: Vec<String> = self.prefix.iter().chain(job.args()).cloned().collect();
        crate::command::render(&self.program.display().to_string(), &args)
    }
}

impl Default for FioBinary {
    fn default() -> Self {
        Self::new("fio")
    }
}

/// Where and how generator jobs run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FioPlan {
    /// Mount path of the test dataset.
    pub dataset_path: PathBuf,
    pub cpus: usize,
    /// Reporting interval of supervised generators; matches the monitor tick.
    pub status_interval: Duration,
}

impl FioPlan {
    pub fn new(dataset_path: impl Into<PathBuf>, status_interval: Duration) -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            dataset_path: dataset_path.into(),
            cpus,
            status_interval,
        }
    }

    pub fn fill_dir(&self) -> PathBuf {
        self.dataset_path.join("fill")
    }

    pub fn disk_stress_dir(&self) -> PathBuf {
        self.dataset_path.join("diskstress")
    }

    pub fn probe_dir(&self) -> PathBuf {
        self.dataset_path.join("probe")
    }

    /// Job for a generator role, or `None` when the level means "not started".
    ///
    /// Latency probes have a single intensity; any active level starts them.
    pub fn generator_job(&self, role: GeneratorRole, level: StressLevel) -> Option<FioJob> {
        if !level.is_active() {
            return None;
        }
        let job = match role {
            GeneratorRole::CpuStress => {
                let load = if level == StressLevel::High { 80 } else { 50 };
                FioJob::new("cpuburn")
                    .opt("ioengine", "cpuio")
                    .flag("group_reporting")
                    .opt("numjobs", self.cpus)
                    .opt("cpuload", load)
            }
            GeneratorRole::DiskStress => {
                let (jobs, bs) = if level == StressLevel::High { (256, "4Ki") } else { (1, "1Mi") };
                FioJob::new("diskstress")
                    .opt("rw", "write")
                    .opt("ioengine", "io_uring")
                    .opt("runtime", FOREVER)
                    .opt("time_based", 1)
                    .opt("directory", dir_arg(&self.disk_stress_dir()))
                    .flag("group_reporting")
                    .opt("numjobs", jobs)
                    .opt("bs", bs)
                    .opt("filesize", "1Mi")
            }
            GeneratorRole::ReadLatencyProbe => self
                .probe("readprobe", "randread")
                .opt("filename", self.probe_dir().join("read.dat").display()),
            GeneratorRole::WriteLatencyProbe => self
                .probe("writeprobe", "randwrite")
                .opt("sync", 1)
                .opt("filename", self.probe_dir().join("write.dat").display()),
        };
        Some(job.terse(self.status_interval))
    }

    fn probe(&self, name: &str, rw: &str) -> FioJob {
        FioJob::new(name)
            .opt("rw", rw)
            .opt("ioengine", "io_uring")
            .opt("bs", "4Ki")
            .opt("iodepth", 1)
            .opt("size", "1Gi")
            .opt("runtime", FOREVER)
            .opt("time_based", 1)
    }

    /// Fill run `run`. Fragmented levels write small unaligned files so
    /// that later pruning leaves scattered holes.
    pub fn fill_job(&self, frag: FragLevel, run: u32) -> FioJob {
        let job = FioJob::new(format!("fill{run}"))
            .opt("rw", "write")
            .opt("ioengine", "io_uring")
            .opt("directory", dir_arg(&self.fill_dir()))
            .opt("filename_format", "$jobname/$jobnum/$filenum")
            .flag("group_reporting")
            .opt("nrfiles", 2000)
            .opt("openfiles", 100)
            .opt("file_service_type", "sequential")
            .opt("fallocate", "none");
        match frag {
            FragLevel::High => job
                .opt("numjobs", 128)
                .flag("bs_unaligned")
                .opt("bsrange", "4Ki-128Ki")
                .opt("filesize", "4Ki-128Ki"),
            FragLevel::Med => job
                .opt("numjobs", 128)
                .flag("bs_unaligned")
                .opt("bsrange", "128Ki-1Mi")
                .opt("filesize", "128Ki-1Mi"),
            FragLevel::None => job.opt("numjobs", 8).opt("bs", "1Mi").opt("filesize", "100Mi"),
        }
    }
}

/// Directories are passed with a trailing slash.
fn dir_arg(path: &Path) -> String {
    format!("{}/", path.display())
}
