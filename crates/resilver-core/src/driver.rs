//! Test matrix driver.
//!
//! Iterates the matrix from a checkpoint. A pool is built (created, filled,
//! exported and re-imported) whenever the layout, fragmentation level or
//! record size changes; every stress profile then runs on that pool:
//!
//! 1. start the stress generators and probes, let them settle
//! 2. sample the baseline load average, take the target device offline
//! 3. run the monitor loop to completion
//! 4. stop the generators, compute the reliability sweep, restore the device
//! 5. write the result row and the next checkpoint, cool down

use crate::admin::{PoolAdmin, SyncPolicy};
use crate::config::{BenchConfig, ProbeConfig};
use crate::fill::FillBackend;
use crate::human::format_dhms;
use crate::lifecycle::PoolLifecycle;
use crate::matrix::{Checkpoint, CheckpointFile, CheckpointStore, Matrix};
use crate::monitor::{MonitorOutcome, MonitorSettings, ResilverMonitor};
use crate::reliability::ReliabilitySweep;
use crate::sink::{ResultRow, ResultSink, SweepAxes};
use crate::status_parser::StatusParser;
use crate::supervisor::{GeneratorSpawner, LoadGeneratorSupervisor};
use crate::telemetry::TelemetryRecorder;
use resilver_proto::{
    Configuration, Error, GeneratorRole, PoolSnapshot, Result, StressLevel,
};
use std::io::Write;
use std::time::Duration;
use tracing::{info, warn};

/// Host statistics sampled around each resilver.
pub trait HostProbe: Send + Sync {
    /// 1-minute load average, if readable.
    fn load_average(&self) -> Option<f64>;
}

/// Timing and reporting knobs of the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    pub settle: Duration,
    pub fault_grace: Duration,
    pub cooldown: Duration,
    pub load_avg_delay: Duration,
    pub fill_target_percent: f64,
    pub disk_size: String,
    pub probes: ProbeConfig,
    pub sweep: SweepAxes,
    pub monitor: MonitorSettings,
}

impl DriverSettings {
    pub fn from_config(config: &BenchConfig) -> Self {
        Self {
            settle: Duration::from_secs(config.monitor.settle_secs),
            fault_grace: Duration::from_secs(config.monitor.fault_grace_secs),
            cooldown: Duration::from_secs(config.monitor.cooldown_secs),
            load_avg_delay: Duration::from_secs(config.monitor.load_avg_delay_secs),
            fill_target_percent: config.fill.target_percent,
            disk_size: config.disks.size_label().to_string(),
            probes: config.probes.clone(),
            sweep: config.sweep_axes(),
            monitor: config.monitor_settings(),
        }
    }
}

/// Output side of a run.
pub struct RunContext {
    pub sink: Box<dyn ResultSink>,
    pub telemetry: Option<TelemetryRecorder<Box<dyn Write + Send>>>,
    pub checkpoints: Option<CheckpointStore>,
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub last: Option<Checkpoint>,
}

/// Measurements shared by every case on one pool.
#[derive(Debug, Clone)]
struct PoolContext {
    config: Configuration,
    snapshot: PoolSnapshot,
    fill_rate_gbps: Option<f64>,
    vdev_count: u32,
    monitor: ResilverMonitor,
}

/// Orchestrates the whole benchmark.
pub struct TestMatrixDriver<A, S, F> {
    settings: DriverSettings,
    matrix: Matrix,
    lifecycle: PoolLifecycle<A>,
    supervisor: LoadGeneratorSupervisor<S>,
    fill: F,
    host: Box<dyn HostProbe>,
    context: RunContext,
}

impl<A, S, F> TestMatrixDriver<A, S, F>
where
    A: PoolAdmin,
    S: GeneratorSpawner,
    F: FillBackend,
{
    pub fn new(
        settings: DriverSettings,
        matrix: Matrix,
        lifecycle: PoolLifecycle<A>,
        supervisor: LoadGeneratorSupervisor<S>,
        fill: F,
        host: Box<dyn HostProbe>,
        context: RunContext,
    ) -> Self {
        Self {
            settings,
            matrix,
            lifecycle,
            supervisor,
            fill,
            host,
            context,
        }
    }

    pub fn lifecycle(&self) -> &PoolLifecycle<A> {
        &self.lifecycle
    }

    /// Runs every case from `start` to the end of the matrix.
    ///
    /// With `skip_pool_setup`, the first pool is assumed to exist already
    /// filled and is only brought back to health.
    pub async fn run(&mut self, start: Checkpoint, skip_pool_setup: bool) -> Result<RunSummary> {
        let cases: Vec<(Checkpoint, Configuration)> = self.matrix.cursor(start)?.collect();
        let total = self.matrix.len();
        info!(start = %start, cases = cases.len(), total, "Starting test matrix");

        let mut pool: Option<PoolContext> = None;
        let mut adopt = skip_pool_setup;
        let mut summary = RunSummary {
            completed: 0,
            last: None,
        };

        for (checkpoint, config) in cases {
            let reuse = pool
                .as_ref()
                .is_some_and(|p| p.config.shares_pool_with(&config));
            if !reuse {
                pool = Some(self.prepare_pool(&config, adopt).await?);
                adopt = false;
            }
            let Some(current) = pool.as_ref() else {
                continue;
            };

            let row = self.run_case(checkpoint, &config, current).await?;
            self.context.sink.write_row(&row)?;
            summary.completed += 1;
            summary.last = Some(checkpoint);
            self.save_checkpoint(checkpoint, summary.completed)?;

            info!(test_index = %checkpoint, cooldown_secs = self.settings.cooldown.as_secs(), "Cooling down");
            tokio::time::sleep(self.settings.cooldown).await;
        }

        info!(completed = summary.completed, "Test matrix finished");
        Ok(summary)
    }

    async fn prepare_pool(&mut self, config: &Configuration, adopt: bool) -> Result<PoolContext> {
        let family = config.layout.family().ok_or_else(|| {
            Error::Config(format!("unknown redundancy family in '{}'", config.layout.layout))
        })?;
        let monitor = ResilverMonitor::new(self.settings.monitor, StatusParser::new().with_family(family));

        let fill_rate_gbps = if adopt {
            info!(layout = %config.layout, "Using existing pool");
            self.lifecycle.adopt_existing(&config.layout, &monitor).await?;
            None
        } else {
            self.lifecycle.create(&config.layout, &config.record_size).await?;
            let report = self.lifecycle.fill(&mut self.fill, config.frag).await?;
            Some(report.fill_rate_gbps())
        };

        let snapshot = self.lifecycle.admin().query_capacity().await?;
        info!(
            used_tib = %format!("{:.2}", snapshot.used_tib()),
            total_tib = %format!("{:.2}", snapshot.total_tib()),
            used_percent = %format!("{:.1}", snapshot.used_percent()),
            frag_percent = ?snapshot.fragmentation_percent,
            "Pool ready"
        );
        // Drop cached data so the resilver reads from disk.
        self.lifecycle.admin().export_import().await?;

        let vdev_count = self
            .lifecycle
            .plan()
            .map(|p| p.vdev_count())
            .ok_or_else(|| Error::LifecycleInvariant("pool has no assembly plan".into()))?;

        Ok(PoolContext {
            config: config.clone(),
            snapshot,
            fill_rate_gbps,
            vdev_count,
            monitor,
        })
    }

    async fn run_case(
        &mut self,
        checkpoint: Checkpoint,
        config: &Configuration,
        pool: &PoolContext,
    ) -> Result<ResultRow> {
        let test_index = checkpoint.to_string();
        info!(
            test_index = %test_index,
            layout = %config.layout,
            frag = %config.frag,
            record_size = %config.record_size,
            cpu = %config.stress.cpu,
            disk = %config.stress.disk,
            "Starting test case"
        );
        if let Some(telemetry) = &self.context.telemetry
            && let Err(e) = telemetry.record_case_start(&test_index, config)
        {
            warn!(error = %e, "Failed to record telemetry");
        }

        let measured = self.measure(&test_index, config, pool).await;
        self.supervisor.stop_all().await;
        let (outcome, load_baseline, load_during) = measured?;

        self.lifecycle.restore().await?;

        let resilver_secs = outcome.completion.elapsed.as_secs();
        info!(
            test_index = %test_index,
            resilver = %format_dhms(outcome.completion.elapsed),
            scan_rate = ?outcome.avg_scan_rate(),
            issue_rate = ?outcome.avg_issue_rate(),
            "Test case complete"
        );
        if let Some(telemetry) = &self.context.telemetry
            && let Err(e) = telemetry.record_case_end(&test_index, resilver_secs)
        {
            warn!(error = %e, "Failed to record telemetry");
        }

        let parity = config.layout.parity_level().unwrap_or(1);
        let sweep = ReliabilitySweep::compute(
            config.layout.width,
            parity,
            pool.vdev_count,
            resilver_secs as f64,
            &self.settings.sweep.disk_afrs,
            &self.settings.sweep.multipliers,
        );

        let generators = &outcome.generators;
        Ok(ResultRow {
            test_index,
            config: config.clone(),
            fill_target_percent: self.settings.fill_target_percent,
            snapshot: pool.snapshot,
            disk_size: self.settings.disk_size.clone(),
            resilver_time: outcome.completion.elapsed,
            scanned: outcome.completion.scanned.clone(),
            scan_rate: outcome.avg_scan_rate(),
            issued: outcome.completion.issued.clone(),
            issue_rate: outcome.avg_issue_rate(),
            fill_rate_gbps: pool.fill_rate_gbps,
            load_baseline,
            load_during,
            read_latency_us: generators.read_latency_us.reportable(),
            write_latency_us: generators.write_latency_us.reportable(),
            disk_stress_iops: generators.disk_write_iops.reportable(),
            disk_stress_bw_kib: generators.disk_write_bw_kib.reportable(),
            cpu_user_pct: generators.cpu_user_pct.reportable(),
            cpu_sys_pct: generators.cpu_sys_pct.reportable(),
            sweep,
        })
    }

    /// Stress, fault and monitor one case. Generators are left running for the caller to stop.
    async fn measure(
        &mut self,
        test_index: &str,
        config: &Configuration,
        pool: &PoolContext,
    ) -> Result<(MonitorOutcome, Option<f64>, Option<f64>)> {
        let Self {
            settings,
            lifecycle,
            supervisor,
            host,
            context,
            ..
        } = self;

        if config.stress.disk.is_active() {
            lifecycle.admin().set_sync(SyncPolicy::Always).await?;
        }
        supervisor.start(GeneratorRole::CpuStress, config.stress.cpu).await?;
        supervisor.start(GeneratorRole::DiskStress, config.stress.disk).await?;
        if settings.probes.read_latency {
            supervisor.start(GeneratorRole::ReadLatencyProbe, StressLevel::Med).await?;
        }
        if settings.probes.write_latency {
            supervisor.start(GeneratorRole::WriteLatencyProbe, StressLevel::Med).await?;
        }

        info!(settle_secs = settings.settle.as_secs(), "Letting generators settle");
        tokio::time::sleep(settings.settle).await;
        let load_baseline = host.load_average();

        lifecycle.inject_fault().await?;
        tokio::time::sleep(settings.fault_grace).await;

        let load_delay = settings.load_avg_delay;
        let telemetry = context.telemetry.as_ref();
        let mut load_during = None;
        let outcome = lifecycle
            .await_resilver(&pool.monitor, supervisor, |obs| {
                info!(
                    test_index,
                    percent = %format!("{:.2}", obs.progress.percent_done),
                    eta = %format_dhms(obs.progress.eta),
                    scan_rate = ?obs.progress.scan_rate.map(|r| r.mb_per_sec()),
                    issue_rate = ?obs.progress.issue_rate.map(|r| r.mb_per_sec()),
                    elapsed = %format_dhms(obs.elapsed),
                    "Resilvering"
                );
                if let Some(telemetry) = telemetry
                    && let Err(e) = telemetry.record_tick(test_index, obs)
                {
                    warn!(error = %e, "Failed to record telemetry");
                }
                if load_during.is_none() && obs.elapsed >= load_delay {
                    load_during = host.load_average();
                }
            })
            .await?;

        let load_during = load_during.or_else(|| host.load_average());
        Ok((outcome, load_baseline, load_during))
    }

    fn save_checkpoint(&self, done: Checkpoint, completed: usize) -> Result<()> {
        let Some(store) = &self.context.checkpoints else {
            return Ok(());
        };
        let mut next = done;
        let next = next.advance(self.matrix.dims()).then_some(next);
        store.save(&CheckpointFile { next, completed })
    }

    /// Stops every generator and reaps strays. Used on interrupt.
    pub async fn shutdown(&mut self) {
        warn!("Shutting down, stopping load generators");
        self.supervisor.stop_all().await;
        self.lifecycle.reap_generators().await;
    }
}
