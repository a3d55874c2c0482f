//! Pool lifecycle controller.
//!
//! Owns the pool's state machine:
//!
//! ```text
//! Uninitialized ─create─▶ Created ─fill─▶ Filled ─inject_fault─▶ FaultInjected
//!       ▲                                   │                        │
//!       │                                   ▼                   await_resilver
//!   Destroyed ◀─destroy── (any)          Healthy ◀─restore── Resilvering
//! ```
//!
//! A healthy pool may take another fault, so one pool serves every stress
//! profile of a (layout, fragmentation, record size) combination.

use crate::admin::{DestroyOutcome, PoolAdmin, PoolPlan, SyncPolicy, device_path};
use crate::fill::{FillBackend, FillReport, fill_ceiling, plan_prune};
use crate::human::format_dhms;
use crate::monitor::{MonitorOutcome, ResilverMonitor, TickObservation};
use crate::supervisor::TelemetrySource;
use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use resilver_proto::{Error, FragLevel, LayoutSpec, ResilverStatus, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the pool under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Uninitialized,
    Created,
    Filled,
    FaultInjected,
    Resilvering,
    Healthy,
    Destroyed,
}

impl PoolState {
    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(self, to: PoolState) -> bool {
        matches!(
            (self, to),
            (PoolState::Uninitialized | PoolState::Destroyed, PoolState::Created)
                | (PoolState::Created, PoolState::Filled)
                | (PoolState::Filled | PoolState::Healthy, PoolState::FaultInjected)
                | (PoolState::FaultInjected, PoolState::Resilvering)
                | (PoolState::Resilvering | PoolState::Uninitialized, PoolState::Healthy)
                | (_, PoolState::Destroyed)
        )
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolState::Uninitialized => "uninitialized",
            PoolState::Created => "created",
            PoolState::Filled => "filled",
            PoolState::FaultInjected => "fault_injected",
            PoolState::Resilvering => "resilvering",
            PoolState::Healthy => "healthy",
            PoolState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Forcibly terminates stray load generators that could hold the pool busy.
#[async_trait]
pub trait GeneratorReaper: Send {
    async fn reap(&mut self);
}

/// Knobs of the lifecycle controller.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleSettings {
    /// Device faulted for every test, as configured (`sdbz`).
    pub target_device: String,
    pub partitioned: bool,
    pub fill_target_percent: f64,
    pub fill_poll: Duration,
    pub max_fill_runs: u32,
    /// Extra selection probability, in percent, applied when pruning.
    pub prune_overshoot_percent: f64,
    /// Seed for prune selection; random when unset.
    pub prune_seed: Option<u64>,
    pub destroy_attempts: u32,
    pub retry_delay: Duration,
    /// Poll interval while waiting for an existing pool to turn healthy.
    pub health_poll: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            target_device: "sdbz".into(),
            partitioned: true,
            fill_target_percent: 70.0,
            fill_poll: Duration::from_secs(10),
            max_fill_runs: 16,
            prune_overshoot_percent: 5.0,
            prune_seed: None,
            destroy_attempts: 5,
            retry_delay: Duration::from_secs(5),
            health_poll: Duration::from_secs(30),
        }
    }
}

/// Drives the pool through create, fill, fault, recover and destroy.
pub struct PoolLifecycle<A> {
    admin: A,
    reaper: Box<dyn GeneratorReaper>,
    settings: LifecycleSettings,
    state: PoolState,
    history: Vec<PoolState>,
    faulted: Option<String>,
    plan: Option<PoolPlan>,
}

impl<A: PoolAdmin> PoolLifecycle<A> {
    pub fn new(admin: A, reaper: Box<dyn GeneratorReaper>, settings: LifecycleSettings) -> Self {
        Self {
            admin,
            reaper,
            settings,
            state: PoolState::Uninitialized,
            history: vec![PoolState::Uninitialized],
            faulted: None,
            plan: None,
        }
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Every state the pool has been in, oldest first.
    pub fn history(&self) -> &[PoolState] {
        &self.history
    }

    pub fn admin(&self) -> &A {
        &self.admin
    }

    /// Assembly of the current pool, if this controller created it.
    pub fn plan(&self) -> Option<&PoolPlan> {
        self.plan.as_ref()
    }

    /// Device path of the fault target.
    pub fn target_path(&self) -> String {
        device_path(&self.settings.target_device, self.settings.partitioned)
    }

    fn transition(&mut self, to: PoolState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::LifecycleInvariant(format!(
                "illegal pool transition {} -> {to}",
                self.state
            )));
        }
        info!(from = %self.state, to = %to, "Pool state transition");
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// Destroys the pool, killing stray generators before each attempt.
    ///
    /// Retries in a bounded loop; exhausting the attempts is fatal.
    pub async fn destroy(&mut self) -> Result<()> {
        let attempts = self.settings.destroy_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.reaper.reap().await;
            match self.admin.destroy().await {
                Ok(outcome) => {
                    if outcome == DestroyOutcome::NotPresent {
                        debug!("No pool to destroy");
                    }
                    self.faulted = None;
                    self.plan = None;
                    return self.transition(PoolState::Destroyed);
                }
                Err(e) if attempt < attempts => {
                    warn!(attempt, attempts, error = %e, "Pool destroy failed, retrying");
                    tokio::time::sleep(self.settings.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(attempts, error = %e, "Pool destroy failed");
                    return Err(e);
                }
            }
        }
    }

    /// Creates a pool for `spec`, destroying any previous one first.
    pub async fn create(&mut self, spec: &LayoutSpec, record_size: &str) -> Result<&PoolPlan> {
        if !matches!(self.state, PoolState::Uninitialized | PoolState::Destroyed) {
            self.destroy().await?;
        }

        let disks = self.admin.list_disks().await?;
        let plan = PoolPlan::assemble(spec, &disks, self.settings.partitioned)?;
        info!(
            layout = %spec.layout,
            disks = disks.len(),
            vdevs = plan.vdev_count(),
            spares = plan.spares.len(),
            record_size,
            "Creating pool"
        );
        self.admin.create(&plan, record_size).await?;
        self.transition(PoolState::Created)?;
        Ok(self.plan.insert(plan))
    }

    /// Fills a freshly created pool, pruning afterwards for fragmented levels.
    pub async fn fill(&mut self, backend: &mut dyn FillBackend, frag: FragLevel) -> Result<FillReport> {
        if self.state != PoolState::Created {
            return Err(Error::LifecycleInvariant(format!(
                "fill requires a freshly created pool, state is {}",
                self.state
            )));
        }
        self.admin.set_sync(SyncPolicy::Disabled).await?;
        backend.prepare().await?;

        let target = self.settings.fill_target_percent;
        let ceiling = fill_ceiling(frag, target);
        let started = Instant::now();
        let initial = self.admin.query_capacity().await?;
        let mut last_used = initial.used_bytes;
        let mut runs = 0_u32;

        'runs: loop {
            if runs >= self.settings.max_fill_runs {
                return Err(Error::Generator(format!(
                    "pool fill stopped at {:.1}% after {runs} runs",
                    self.admin.query_capacity().await?.used_percent()
                )));
            }
            let used_before_run = last_used;
            backend.start_run(frag, runs).await?;
            runs += 1;

            loop {
                tokio::time::sleep(self.settings.fill_poll).await;
                let snapshot = self.admin.query_capacity().await?;
                last_used = snapshot.used_bytes;
                let percent = snapshot.used_percent();
                let secs = started.elapsed().as_secs_f64();
                let written = snapshot.used_bytes.saturating_sub(initial.used_bytes) as f64;
                let rate = if secs > 0.0 { written / secs } else { 0.0 };
                let remaining = (ceiling / 100.0 * snapshot.total_bytes() as f64 - snapshot.used_bytes as f64).max(0.0);
                let eta = if rate > 0.0 {
                    format_dhms(Duration::from_secs_f64(remaining / rate))
                } else {
                    "unknown".to_string()
                };
                info!(
                    percent = %format!("{percent:.1}"),
                    rate_gbps = %format!("{:.2}", rate / 1e9),
                    %eta,
                    "Filling pool"
                );

                if percent >= ceiling {
                    backend.stop_run().await?;
                    break 'runs;
                }
                if backend.run_finished().await? {
                    // A run that ends without adding data means the pool is out of space.
                    if frag.is_fragmented() && last_used <= used_before_run {
                        break 'runs;
                    }
                    continue 'runs;
                }
            }
        }

        let elapsed = started.elapsed();
        let bytes_written = last_used.saturating_sub(initial.used_bytes);
        let (pruned_files, pruned_bytes) = if frag.is_fragmented() {
            self.prune(backend, target).await?
        } else {
            (0, 0)
        };

        self.transition(PoolState::Filled)?;
        let report = FillReport {
            elapsed,
            runs,
            bytes_written,
            pruned_files,
            pruned_bytes,
        };
        info!(
            runs,
            elapsed = %format_dhms(elapsed),
            rate_gbps = %format!("{:.2}", report.fill_rate_gbps()),
            pruned_files,
            "Pool filled"
        );
        Ok(report)
    }

    async fn prune(&mut self, backend: &mut dyn FillBackend, target_percent: f64) -> Result<(usize, u64)> {
        let snapshot = self.admin.query_capacity().await?;
        let prune_percent = (100.0 - target_percent).max(0.0);
        let prune_bytes = (snapshot.total_bytes() as f64 * prune_percent / 100.0) as u64;
        let probability = (prune_percent + self.settings.prune_overshoot_percent) / 100.0;

        let files = backend.list_files().await?;
        let mut rng = match self.settings.prune_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let picks = plan_prune(&files, prune_bytes, probability, &mut rng);
        info!(files = files.len(), selected = picks.len(), prune_bytes, "Pruning fill files");

        let mut freed = 0_u64;
        for idx in &picks {
            let file = &files[*idx];
            backend.remove_file(&file.path).await?;
            freed += file.size;
        }
        Ok((picks.len(), freed))
    }

    /// Takes the target device offline. Idempotent for the same device.
    pub async fn inject_fault(&mut self) -> Result<()> {
        let target = self.target_path();
        match &self.faulted {
            Some(device) if *device == target => {
                debug!(device = %target, "Fault already injected");
                return Ok(());
            }
            Some(device) => {
                return Err(Error::LifecycleInvariant(format!(
                    "{device} is already faulted, refusing to fault {target}"
                )));
            }
            None => {}
        }
        if !self.state.can_transition_to(PoolState::FaultInjected) {
            return Err(Error::LifecycleInvariant(format!(
                "cannot inject a fault while the pool is {}",
                self.state
            )));
        }

        info!(device = %target, "Injecting fault");
        self.admin.set_device_offline(&target).await?;
        self.faulted = Some(target);
        self.transition(PoolState::FaultInjected)
    }

    /// Runs the monitor loop until the resilver completes.
    pub async fn await_resilver<T, F>(
        &mut self,
        monitor: &ResilverMonitor,
        telemetry: &mut T,
        on_tick: F,
    ) -> Result<MonitorOutcome>
    where
        T: TelemetrySource + ?Sized,
        F: FnMut(&TickObservation),
    {
        self.transition(PoolState::Resilvering)?;
        monitor.run(&self.admin, telemetry, on_tick).await
    }

    /// Brings the faulted device back and clears fault markers.
    pub async fn restore(&mut self) -> Result<()> {
        if self.state != PoolState::Resilvering {
            return Err(Error::LifecycleInvariant(format!(
                "restore requires a completed resilver, state is {}",
                self.state
            )));
        }
        let target = self.faulted.clone().unwrap_or_else(|| self.target_path());
        self.reattach(&target).await?;
        self.faulted = None;
        self.transition(PoolState::Healthy)
    }

    /// Onlines and clears a device, retrying in a bounded loop.
    async fn reattach(&mut self, device: &str) -> Result<()> {
        let attempts = self.settings.destroy_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match self.admin.set_device_online(device).await {
                Ok(()) => self.admin.clear_faults().await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(attempt, attempts, device, error = %e, "Device restore failed, retrying");
                    self.reaper.reap().await;
                    tokio::time::sleep(self.settings.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Adopts an existing, already filled pool built for `spec` and waits until it is healthy.
    pub async fn adopt_existing(&mut self, spec: &LayoutSpec, monitor: &ResilverMonitor) -> Result<()> {
        if self.state != PoolState::Uninitialized {
            return Err(Error::LifecycleInvariant(format!(
                "only a fresh controller can adopt a pool, state is {}",
                self.state
            )));
        }
        let disks = self.admin.list_disks().await?;
        self.plan = Some(PoolPlan::assemble(spec, &disks, self.settings.partitioned)?);

        let mut status = monitor.poll_status(&self.admin).await?;
        if !status.is_healthy() {
            let target = self.target_path();
            info!(device = %target, state = status.label(), "Existing pool is not healthy, restoring device");
            self.reattach(&target).await?;
        }
        while !status.is_healthy() {
            if let ResilverStatus::Resilvering(progress) = &status {
                info!(
                    percent = progress.percent_done,
                    eta = %format_dhms(progress.eta),
                    "Waiting for existing pool to recover"
                );
            }
            tokio::time::sleep(self.settings.health_poll).await;
            status = monitor.poll_status(&self.admin).await?;
        }
        self.transition(PoolState::Healthy)
    }

    /// Kills stray generators without touching the pool.
    pub async fn reap_generators(&mut self) {
        self.reaper.reap().await;
    }
}
