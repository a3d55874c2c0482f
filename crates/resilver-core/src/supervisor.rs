//! Load-generator supervision.
//!
//! The supervisor owns one [`GeneratorHandle`] per role. Each live handle wraps
//! a background producer and the channel carrying its output lines. Once per
//! monitoring tick the supervisor reads every handle concurrently with the same
//! bounded timeout, so a stalled producer costs at most one timeout per tick
//! and never starves its siblings.

use crate::fio_terse;
use crate::running_average::LifetimeMeanTracker;
use async_trait::async_trait;
use resilver_proto::{Error, GeneratorRole, Result, Sample, StressLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};

/// A running background producer.
#[async_trait]
pub trait GeneratorProcess: Send {
    /// OS process id, if the producer is a process.
    fn id(&self) -> Option<u32>;

    /// Terminates the producer. Must be safe to call on an already-exited producer.
    async fn terminate(&mut self) -> std::io::Result<()>;
}

/// Output of a successful spawn: the producer and its line stream.
pub struct SpawnedGenerator {
    pub lines: mpsc::Receiver<String>,
    pub process: Box<dyn GeneratorProcess>,
}

/// Starts producers for a role at a given intensity.
#[async_trait]
pub trait GeneratorSpawner: Send {
    async fn spawn(&mut self, role: GeneratorRole, level: StressLevel) -> Result<SpawnedGenerator>;
}

struct LiveGenerator {
    lines: mpsc::Receiver<String>,
    process: Box<dyn GeneratorProcess>,
    closed: bool,
    /// Present for roles whose latency fields are lifetime means.
    latency: Option<LatencyTrackers>,
}

/// Per-interval latency recovery. Every decoded record passes through here,
/// including the ones a drain discards, so the interval count matches the producer's.
#[derive(Debug, Default)]
struct LatencyTrackers {
    read: LifetimeMeanTracker,
    write: LifetimeMeanTracker,
}

impl LatencyTrackers {
    fn decumulate(&mut self, mut sample: Sample) -> Sample {
        sample.read_lat_mean_us = self.read.observe(sample.read_lat_mean_us);
        sample.write_lat_mean_us = self.write.observe(sample.write_lat_mean_us);
        sample
    }
}

impl LiveGenerator {
    fn accept(&mut self, role: GeneratorRole, line: &str) -> Option<Sample> {
        let Some(sample) = fio_terse::decode(line) else {
            debug!(%role, line = %line, "Skipping non-record generator output");
            return None;
        };
        Some(match self.latency.as_mut() {
            Some(trackers) => trackers.decumulate(sample),
            None => sample,
        })
    }
}

/// Handle to one supervised producer. A null handle stands for a role started at intensity `none`.
pub struct GeneratorHandle {
    role: GeneratorRole,
    live: Option<LiveGenerator>,
}

impl GeneratorHandle {
    /// A handle that never yields samples.
    pub fn null(role: GeneratorRole) -> Self {
        Self { role, live: None }
    }

    fn live(role: GeneratorRole, spawned: SpawnedGenerator) -> Self {
        Self {
            role,
            live: Some(LiveGenerator {
                lines: spawned.lines,
                process: spawned.process,
                closed: false,
                latency: role.reports_lifetime_mean().then(LatencyTrackers::default),
            }),
        }
    }

    pub fn role(&self) -> GeneratorRole {
        self.role
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Reads the freshest sample, waiting at most `timeout` if none is queued.
    ///
    /// Lines queued since the previous tick are drained and the newest record
    /// wins. Diagnostics, a closed stream and a timeout all yield `None`.
    /// Latency probe samples carry the latency of their own interval, not the
    /// lifetime mean the producer printed.
    pub async fn read_sample(&mut self, timeout: Duration) -> Option<Sample> {
        let role = self.role;
        let live = self.live.as_mut()?;

        let mut latest = None;
        loop {
            match live.lines.try_recv() {
                Ok(line) => {
                    if let Some(sample) = live.accept(role, &line) {
                        latest = Some(sample);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !live.closed {
                        warn!(%role, "Generator output stream closed");
                    }
                    live.closed = true;
                    break;
                }
            }
        }
        if latest.is_some() || live.closed {
            return latest;
        }

        match tokio::time::timeout(timeout, live.lines.recv()).await {
            Ok(Some(line)) => live.accept(role, &line),
            Ok(None) => {
                warn!(%role, "Generator output stream closed");
                live.closed = true;
                None
            }
            Err(_) => {
                debug!(%role, timeout_ms = timeout.as_millis(), "Generator sample timed out");
                None
            }
        }
    }

    /// Terminates the producer. The handle becomes null.
    pub async fn stop(&mut self) {
        if let Some(mut live) = self.live.take() {
            let pid = live.process.id();
            match live.process.terminate().await {
                Ok(()) => info!(role = %self.role, ?pid, "Generator terminated"),
                Err(e) => warn!(role = %self.role, ?pid, error = %e, "Failed to terminate generator"),
            }
        }
    }
}

/// Samples gathered from every active handle within one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickSamples {
    pub samples: BTreeMap<GeneratorRole, Sample>,
}

impl TickSamples {
    pub fn get(&self, role: GeneratorRole) -> Option<&Sample> {
        self.samples.get(&role)
    }
}

/// Source of one lock-step observation per tick.
#[async_trait]
pub trait TelemetrySource: Send {
    async fn read_tick(&mut self) -> TickSamples;
}

/// Telemetry source with no generators.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTelemetry;

#[async_trait]
impl TelemetrySource for NoTelemetry {
    async fn read_tick(&mut self) -> TickSamples {
        TickSamples::default()
    }
}

/// Starts, samples, and stops the background producers of one test case.
pub struct LoadGeneratorSupervisor<S> {
    spawner: S,
    handles: BTreeMap<GeneratorRole, GeneratorHandle>,
    sample_timeout: Duration,
}

impl<S: GeneratorSpawner> LoadGeneratorSupervisor<S> {
    pub fn new(spawner: S, sample_timeout: Duration) -> Self {
        Self {
            spawner,
            handles: BTreeMap::new(),
            sample_timeout,
        }
    }

    /// Starts a role. Intensity `none` installs a null handle without spawning anything.
    ///
    /// A role that is already live is stopped first, so at most one producer per role exists.
    pub async fn start(&mut self, role: GeneratorRole, level: StressLevel) -> Result<()> {
        if let Some(mut previous) = self.handles.remove(&role)
            && previous.is_live()
        {
            warn!(%role, "Replacing a generator that was still running");
            previous.stop().await;
        }

        let handle = if level.is_active() {
            info!(%role, %level, "Starting generator");
            let spawned = self
                .spawner
                .spawn(role, level)
                .await
                .map_err(|e| Error::Generator(format!("failed to start {role}: {e}")))?;
            GeneratorHandle::live(role, spawned)
        } else {
            GeneratorHandle::null(role)
        };
        self.handles.insert(role, handle);
        Ok(())
    }

    /// Reads one sample from a role; unknown and null roles are absent immediately.
    pub async fn read_sample(&mut self, role: GeneratorRole, timeout: Duration) -> Option<Sample> {
        self.handles.get_mut(&role)?.read_sample(timeout).await
    }

    /// Stops one role.
    pub async fn stop(&mut self, role: GeneratorRole) {
        if let Some(mut handle) = self.handles.remove(&role) {
            handle.stop().await;
        }
    }

    /// Stops every role. Safe to call repeatedly.
    pub async fn stop_all(&mut self) {
        for (_, mut handle) in std::mem::take(&mut self.handles) {
            handle.stop().await;
        }
    }

    /// Roles with a running producer.
    pub fn live_roles(&self) -> Vec<GeneratorRole> {
        self.handles
            .values()
            .filter(|h| h.is_live())
            .map(|h| h.role())
            .collect()
    }
}

#[async_trait]
impl<S: GeneratorSpawner> TelemetrySource for LoadGeneratorSupervisor<S> {
    /// Reads every handle concurrently with the shared timeout.
    async fn read_tick(&mut self) -> TickSamples {
        let timeout = self.sample_timeout;
        let reads = self
            .handles
            .values_mut()
            .map(|handle| async move { (handle.role(), handle.read_sample(timeout).await) });

        let samples = futures::future::join_all(reads)
            .await
            .into_iter()
            .filter_map(|(role, sample)| sample.map(|s| (role, s)))
            .collect();
        TickSamples { samples }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedSpawner, StreamScript};
    use std::time::Instant;

    fn cpu_sample(user: f64) -> Sample {
        Sample {
            cpu_user_pct: user,
            ..Sample::default()
        }
    }

    #[tokio::test]
    async fn test_none_intensity_is_null_handle() {
        let spawner = ScriptedSpawner::new();
        let mut supervisor = LoadGeneratorSupervisor::new(spawner.clone(), Duration::from_millis(50));

        supervisor.start(GeneratorRole::CpuStress, StressLevel::None).await.unwrap();

        assert!(supervisor.live_roles().is_empty());
        assert_eq!(spawner.spawn_count(), 0);
        assert!(
            supervisor
                .read_sample(GeneratorRole::CpuStress, Duration::from_secs(10))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_first_line_diagnostic_is_absent_then_records_flow() {
        let spawner = ScriptedSpawner::new().with_script(
            GeneratorRole::CpuStress,
            StreamScript::new()
                .diagnostic("fio: cpuio engine is a cpu burner")
                .record(cpu_sample(50.0)),
        );
        let mut supervisor = LoadGeneratorSupervisor::new(spawner, Duration::from_millis(200));
        supervisor.start(GeneratorRole::CpuStress, StressLevel::Med).await.unwrap();

        // Both lines are already queued, so the newest record wins.
        let sample = supervisor
            .read_sample(GeneratorRole::CpuStress, Duration::from_millis(200))
            .await;
        assert_eq!(sample.unwrap().cpu_user_pct, 50.0);
    }

    #[tokio::test]
    async fn test_stalled_generator_does_not_block_siblings() {
        let spawner = ScriptedSpawner::new()
            .with_script(GeneratorRole::CpuStress, StreamScript::new().stall())
            .with_script(
                GeneratorRole::DiskStress,
                StreamScript::new().record(Sample {
                    write_iops: 900.0,
                    ..Sample::default()
                }),
            );
        let mut supervisor = LoadGeneratorSupervisor::new(spawner, Duration::from_millis(100));
        supervisor.start(GeneratorRole::CpuStress, StressLevel::High).await.unwrap();
        supervisor.start(GeneratorRole::DiskStress, StressLevel::High).await.unwrap();

        let started = Instant::now();
        let tick = supervisor.read_tick().await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(tick.get(GeneratorRole::CpuStress).is_none());
        assert_eq!(tick.get(GeneratorRole::DiskStress).unwrap().write_iops, 900.0);
    }

    fn read_probe(lifetime_mean: f64) -> Sample {
        Sample {
            read_lat_mean_us: lifetime_mean,
            ..Sample::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_latency_counts_intervals_emitted_before_first_read() {
        // Per-interval latencies 10, 20, 30, 40 printed as lifetime means.
        let spawner = ScriptedSpawner::new().with_script(
            GeneratorRole::ReadLatencyProbe,
            StreamScript::new()
                .record(read_probe(10.0))
                .record(read_probe(15.0))
                .record(read_probe(20.0))
                .record(read_probe(25.0))
                .every(Duration::from_secs(1)),
        );
        let mut supervisor = LoadGeneratorSupervisor::new(spawner, Duration::from_millis(100));
        supervisor.start(GeneratorRole::ReadLatencyProbe, StressLevel::Med).await.unwrap();

        // Three records queue up before anyone reads.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        let mut averages = crate::monitor::GeneratorAverages::default();
        let first = supervisor.read_tick().await;
        assert_eq!(first.get(GeneratorRole::ReadLatencyProbe).unwrap().read_lat_mean_us, 30.0);
        averages.observe(&first);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = supervisor.read_tick().await;
        assert_eq!(second.get(GeneratorRole::ReadLatencyProbe).unwrap().read_lat_mean_us, 40.0);
        averages.observe(&second);

        assert_eq!(averages.read_latency_us.mean(), 35.0);
    }

    #[tokio::test]
    async fn test_stress_latency_is_passed_through() {
        let stress = |lat: f64| Sample {
            write_lat_mean_us: lat,
            ..Sample::default()
        };
        let spawner = ScriptedSpawner::new().with_script(
            GeneratorRole::DiskStress,
            StreamScript::new().record(stress(500.0)).record(stress(700.0)),
        );
        let mut supervisor = LoadGeneratorSupervisor::new(spawner, Duration::from_millis(100));
        supervisor.start(GeneratorRole::DiskStress, StressLevel::High).await.unwrap();

        let sample = supervisor
            .read_sample(GeneratorRole::DiskStress, Duration::from_millis(100))
            .await;
        assert_eq!(sample.unwrap().write_lat_mean_us, 700.0);
    }

    #[tokio::test]
    async fn test_stop_all_terminates_every_live_generator() {
        let spawner = ScriptedSpawner::new();
        let mut supervisor = LoadGeneratorSupervisor::new(spawner.clone(), Duration::from_millis(10));
        supervisor.start(GeneratorRole::CpuStress, StressLevel::Med).await.unwrap();
        supervisor.start(GeneratorRole::DiskStress, StressLevel::Med).await.unwrap();
        supervisor.start(GeneratorRole::ReadLatencyProbe, StressLevel::None).await.unwrap();

        assert_eq!(supervisor.live_roles().len(), 2);
        supervisor.stop_all().await;

        assert!(supervisor.live_roles().is_empty());
        assert_eq!(spawner.terminated_count(), 2);
        // Idempotent.
        supervisor.stop_all().await;
        assert_eq!(spawner.terminated_count(), 2);
    }

    #[tokio::test]
    async fn test_restart_replaces_running_generator() {
        let spawner = ScriptedSpawner::new();
        let mut supervisor = LoadGeneratorSupervisor::new(spawner.clone(), Duration::from_millis(10));
        supervisor.start(GeneratorRole::DiskStress, StressLevel::Med).await.unwrap();
        supervisor.start(GeneratorRole::DiskStress, StressLevel::High).await.unwrap();

        assert_eq!(spawner.spawn_count(), 2);
        assert_eq!(spawner.terminated_count(), 1);
        assert_eq!(supervisor.live_roles(), vec![GeneratorRole::DiskStress]);
    }
}
