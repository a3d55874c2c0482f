//! Resilver monitor loop.
//!
//! Polls the pool status on a fixed tick schedule while a fault is active,
//! folds the reported rates and the lock-step generator samples into running
//! averages, and returns once the pool reports completion.

use crate::admin::PoolAdmin;
use crate::running_average::RunningAverage;
use crate::status_parser::StatusParser;
use crate::supervisor::{TelemetrySource, TickSamples};
use resilver_proto::{
    Error, GeneratorRole, ResilverCompletion, ResilverProgress, ResilverStatus, Result,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Tick schedule of the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// Delay before the single retry of a transient parse failure.
    pub parse_retry_delay: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            parse_retry_delay: Duration::from_secs(2),
        }
    }
}

/// What the loop saw on one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickObservation {
    /// 1-based tick number.
    pub tick: u64,
    /// Time since the loop started.
    pub elapsed: Duration,
    pub progress: ResilverProgress,
    pub samples: TickSamples,
}

/// Averages of the generator metrics the benchmark reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorAverages {
    pub cpu_user_pct: RunningAverage,
    pub cpu_sys_pct: RunningAverage,
    pub disk_write_iops: RunningAverage,
    pub disk_write_bw_kib: RunningAverage,
    pub read_latency_us: RunningAverage,
    pub write_latency_us: RunningAverage,
}

impl GeneratorAverages {
    /// Folds one tick of samples. Absent roles leave their averages untouched.
    pub fn observe(&mut self, samples: &TickSamples) {
        if let Some(cpu) = samples.get(GeneratorRole::CpuStress) {
            self.cpu_user_pct.push(cpu.cpu_user_pct);
            self.cpu_sys_pct.push(cpu.cpu_sys_pct);
        }
        if let Some(disk) = samples.get(GeneratorRole::DiskStress) {
            self.disk_write_iops.push(disk.write_iops);
            self.disk_write_bw_kib.push(disk.write_bw_kib);
        }
        // Probe latencies arrive already de-cumulated by their handle.
        if let Some(probe) = samples.get(GeneratorRole::ReadLatencyProbe) {
            self.read_latency_us.push(probe.read_lat_mean_us);
        }
        if let Some(probe) = samples.get(GeneratorRole::WriteLatencyProbe) {
            self.write_latency_us.push(probe.write_lat_mean_us);
        }
    }
}

/// Result of a completed monitor run.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorOutcome {
    pub completion: ResilverCompletion,
    /// Ticks that observed an in-progress resilver.
    pub ticks: u64,
    pub scan_rate: RunningAverage,
    pub issue_rate: RunningAverage,
    pub generators: GeneratorAverages,
}

impl MonitorOutcome {
    /// Average scan rate in MB/s, if any non-zero rate was observed.
    pub fn avg_scan_rate(&self) -> Option<f64> {
        self.scan_rate.reportable()
    }

    pub fn avg_issue_rate(&self) -> Option<f64> {
        self.issue_rate.reportable()
    }
}

/// Polls a faulted pool until the resilver completes.
#[derive(Debug, Clone)]
pub struct ResilverMonitor {
    settings: MonitorSettings,
    parser: StatusParser,
}

impl ResilverMonitor {
    pub fn new(settings: MonitorSettings, parser: StatusParser) -> Self {
        Self { settings, parser }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Queries and parses the current status, retrying once on a transient parse failure.
    pub async fn poll_status<A: PoolAdmin + ?Sized>(&self, admin: &A) -> Result<ResilverStatus> {
        let text = admin.query_status_text().await?;
        match self.parser.parse(&text) {
            Ok(status) => Ok(status),
            Err(e) if e.is_transient() => {
                warn!(error = %e, retry_in_ms = self.settings.parse_retry_delay.as_millis(), "Retrying status parse");
                tokio::time::sleep(self.settings.parse_retry_delay).await;
                let text = admin.query_status_text().await?;
                Ok(self.parser.parse(&text)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs the loop until the pool reports completion.
    ///
    /// Every tick that observes an in-progress resilver takes one lock-step
    /// read from `telemetry` and hands the observation to `on_tick`. A pool
    /// that reports healthy while a fault is active is an invariant violation.
    pub async fn run<A, T, F>(&self, admin: &A, telemetry: &mut T, mut on_tick: F) -> Result<MonitorOutcome>
    where
        A: PoolAdmin + ?Sized,
        T: TelemetrySource + ?Sized,
        F: FnMut(&TickObservation),
    {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut ticks = 0_u64;
        let mut scan_rate = RunningAverage::new();
        let mut issue_rate = RunningAverage::new();
        let mut generators = GeneratorAverages::default();

        loop {
            ticker.tick().await;
            match self.poll_status(admin).await? {
                ResilverStatus::Resilvering(progress) => {
                    ticks += 1;
                    scan_rate.push_opt(progress.scan_rate.map(|r| r.mb_per_sec()));
                    issue_rate.push_opt(progress.issue_rate.map(|r| r.mb_per_sec()));

                    let samples = telemetry.read_tick().await;
                    generators.observe(&samples);
                    debug!(
                        tick = ticks,
                        percent = progress.percent_done,
                        sampled = samples.samples.len(),
                        "Resilver tick"
                    );

                    on_tick(&TickObservation {
                        tick: ticks,
                        elapsed: started.elapsed(),
                        progress,
                        samples,
                    });
                }
                ResilverStatus::Complete(completion) => {
                    info!(
                        ticks,
                        elapsed_secs = completion.elapsed.as_secs(),
                        issued = %completion.issued,
                        "Resilver complete"
                    );
                    return Ok(MonitorOutcome {
                        completion,
                        ticks,
                        scan_rate,
                        issue_rate,
                        generators,
                    });
                }
                ResilverStatus::Healthy => {
                    return Err(Error::LifecycleInvariant(
                        "pool reports healthy while a fault is active".into(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedPool, ScriptedSpawner, StreamScript};
    use crate::supervisor::{LoadGeneratorSupervisor, NoTelemetry};
    use resilver_proto::{Sample, StressLevel};

    const RESILVERING_50: &str = "  pool: tank
 state: DEGRADED
status: One or more devices is currently being resilvered.  The pool will
\tcontinue to function, possibly in a degraded state.
  scan: resilver (draid2:8d:82c:2s-0) in progress since Sun Oct 19 10:00:00 2026
\t1.50T scanned at 100M/s, 700G issued at 50.0M/s, 3.00T total
\t350G resilvered, 50.00% done, 01:00:00 to go
config:
\tNAME                  STATE     READ WRITE CKSUM
\ttank                  DEGRADED     0     0     0
\t  draid2:8d:82c:2s-0  DEGRADED     0     0     0
";

    const COMPLETE: &str = "  pool: tank
 state: DEGRADED
status: One or more devices are faulted in response to persistent errors.
  scan: resilvered (draid2:8d:82c:2s-0) 3.00T in 00:01:00 with 0 errors on Sun Oct 19 10:01:00 2026
config:
\tNAME                  STATE     READ WRITE CKSUM
\ttank                  DEGRADED     0     0     0
\t  draid2:8d:82c:2s-0  DEGRADED     0     0     0
";

    const HEALTHY: &str = "  pool: tank
 state: ONLINE
config:
\tNAME                  STATE     READ WRITE CKSUM
\ttank                  ONLINE       0     0     0
\t  draid2:8d:82c:2s-0  ONLINE       0     0     0
errors: No known data errors
";

    fn monitor() -> ResilverMonitor {
        ResilverMonitor::new(
            MonitorSettings {
                poll_interval: Duration::from_secs(30),
                parse_retry_delay: Duration::from_secs(2),
            },
            StatusParser::new(),
        )
    }

    #[test]
    fn test_generator_averages_fold_probe_latency() {
        let mut averages = GeneratorAverages::default();
        for latency in [10.0, 20.0, 30.0] {
            let mut tick = TickSamples::default();
            tick.samples.insert(
                GeneratorRole::ReadLatencyProbe,
                Sample {
                    read_lat_mean_us: latency,
                    ..Sample::default()
                },
            );
            averages.observe(&tick);
        }
        assert_eq!(averages.read_latency_us.mean(), 20.0);
        assert_eq!(averages.write_latency_us.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_complete() {
        let pool = ScriptedPool::new().with_statuses([RESILVERING_50, RESILVERING_50, COMPLETE]);
        let mut seen = Vec::new();

        let outcome = monitor()
            .run(&pool, &mut NoTelemetry, |obs| seen.push(obs.tick))
            .await
            .unwrap();

        assert_eq!(seen, vec![1, 2]);
        assert_eq!(outcome.ticks, 2);
        assert_eq!(outcome.avg_scan_rate(), Some(100.0));
        assert_eq!(outcome.avg_issue_rate(), Some(50.0));
        assert_eq!(outcome.completion.elapsed, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_while_faulted_is_invariant_violation() {
        let pool = ScriptedPool::new().with_statuses([RESILVERING_50, HEALTHY]);
        let err = monitor().run(&pool, &mut NoTelemetry, |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::LifecycleInvariant(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_parse_failure_retried_once() {
        let pool = ScriptedPool::new().with_statuses(["", COMPLETE]);
        let outcome = monitor().run(&pool, &mut NoTelemetry, |_| {}).await.unwrap();
        assert_eq!(outcome.ticks, 0);
        assert_eq!(pool.status_queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_transient_failure_propagates() {
        let pool = ScriptedPool::new().with_statuses(["", ""]);
        let err = monitor().run(&pool, &mut NoTelemetry, |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Parse(ref p) if p.is_transient()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_step_generator_reads() {
        let spawner = ScriptedSpawner::new().with_script(
            GeneratorRole::DiskStress,
            StreamScript::new()
                .record(Sample {
                    write_iops: 1_000.0,
                    ..Sample::default()
                })
                .every(Duration::from_secs(30))
                .repeat_last(),
        );
        let mut supervisor = LoadGeneratorSupervisor::new(spawner, Duration::from_secs(5));
        supervisor
            .start(GeneratorRole::DiskStress, StressLevel::High)
            .await
            .unwrap();
        supervisor
            .start(GeneratorRole::CpuStress, StressLevel::None)
            .await
            .unwrap();

        let pool = ScriptedPool::new().with_statuses([RESILVERING_50, RESILVERING_50, RESILVERING_50, COMPLETE]);
        let outcome = monitor().run(&pool, &mut supervisor, |_| {}).await.unwrap();

        assert_eq!(outcome.ticks, 3);
        assert_eq!(outcome.generators.disk_write_iops.mean(), 1_000.0);
        assert!(outcome.generators.disk_write_iops.count() >= 2);
        assert_eq!(outcome.generators.cpu_user_pct.count(), 0);
        supervisor.stop_all().await;
    }
}
