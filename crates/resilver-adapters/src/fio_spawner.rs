//! Spawns fio load generators and streams their terse output.

use crate::command::terminate_child;
use crate::fio::{FioBinary, FioPlan};
use async_trait::async_trait;
use resilver_core::{GeneratorProcess, GeneratorSpawner, SpawnedGenerator};
use resilver_proto::{AdminError, Error, GeneratorRole, Result, StressLevel};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Lines buffered per generator before new ones are dropped.
const LINE_BUFFER: usize = 1024;

const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// [`GeneratorSpawner`] backed by fio processes.
#[derive(Debug, Clone)]
pub struct FioSpawner {
    binary: FioBinary,
    plan: FioPlan,
}

impl FioSpawner {
    pub fn new(binary: FioBinary, plan: FioPlan) -> Self {
        Self { binary, plan }
    }

    /// Creates the working directory a role writes into.
    async fn prepare(&self, role: GeneratorRole) -> Result<()> {
        match role {
            GeneratorRole::CpuStress => Ok(()),
            GeneratorRole::DiskStress => recreate_dir(&self.plan.disk_stress_dir()).await,
            GeneratorRole::ReadLatencyProbe | GeneratorRole::WriteLatencyProbe => {
                tokio::fs::create_dir_all(self.plan.probe_dir()).await?;
                Ok(())
            }
        }
    }
}

/// Empties a directory left over from an earlier case.
async fn recreate_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

#[async_trait]
impl GeneratorSpawner for FioSpawner {
    async fn spawn(&mut self, role: GeneratorRole, level: StressLevel) -> Result<SpawnedGenerator> {
        let job = self
            .plan
            .generator_job(role, level)
            .ok_or_else(|| Error::Generator(format!("{role} has no job at level {level}")))?;
        self.prepare(role).await?;

        let line = self.binary.render(&job);
        info!(%role, %level, command = %line, "Starting load generator");

        let mut child = self
            .binary
            .command(&job)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AdminError::Spawn { command: line, source })?;

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let pump = tokio::spawn(async move {
            let Some(stdout) = stdout else { return };
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match tx.try_send(line) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => debug!(%role, "Line buffer full, dropping record"),
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            debug!(%role, "Generator stdout closed");
        });

        let diagnostics = tokio::spawn(async move {
            let Some(stderr) = stderr else { return };
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(%role, stderr = %line, "Generator diagnostic");
            }
        });

        Ok(SpawnedGenerator {
            lines: rx,
            process: Box::new(FioProcess {
                child,
                role,
                tasks: vec![pump, diagnostics],
            }),
        })
    }
}

/// A running fio generator.
struct FioProcess {
    child: Child,
    role: GeneratorRole,
    tasks: Vec<JoinHandle<()>>,
}

#[async_trait]
impl GeneratorProcess for FioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self) -> std::io::Result<()> {
        debug!(role = %self.role, pid = ?self.child.id(), "Terminating load generator");
        let result = terminate_child(&mut self.child, TERMINATION_GRACE).await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resilver_core::fio_terse;
    use resilver_proto::Sample;
    use std::path::PathBuf;

    /// A stand-in for fio: prints one record, then idles until killed.
    fn fake_fio(script: &str) -> FioBinary {
        FioBinary::wrapped("sh", vec!["-c".into(), script.into(), "fio".into()])
    }

    fn plan(dir: &Path) -> FioPlan {
        FioPlan {
            dataset_path: dir.to_path_buf(),
            cpus: 2,
            status_interval: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_spawned_generator_streams_records() {
        let dir = tempfile::tempdir().unwrap();
        let sample = Sample {
            cpu_user_pct: 41.0,
            cpu_sys_pct: 9.0,
            ..Sample::default()
        };
        let script = format!("echo 'fio: starting'; echo '{}'; sleep 30", fio_terse::encode(&sample));
        let mut spawner = FioSpawner::new(fake_fio(&script), plan(dir.path()));

        let mut spawned = spawner
            .spawn(GeneratorRole::CpuStress, StressLevel::Med)
            .await
            .unwrap();
        assert!(spawned.process.id().is_some());

        let first = spawned.lines.recv().await.unwrap();
        assert!(fio_terse::decode(&first).is_none());
        let second = spawned.lines.recv().await.unwrap();
        assert_eq!(fio_terse::decode(&second), Some(sample));

        spawned.process.terminate().await.unwrap();
        // Safe to call again on an exited process
        spawned.process.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_disk_stress_starts_with_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("diskstress").join("old.0.0");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, b"left over").unwrap();

        let mut spawner = FioSpawner::new(fake_fio("exit 0"), plan(dir.path()));
        let mut spawned = spawner
            .spawn(GeneratorRole::DiskStress, StressLevel::High)
            .await
            .unwrap();

        assert!(dir.path().join("diskstress").is_dir());
        assert!(!stale.exists());
        // Stream ends when the process exits
        assert!(spawned.lines.recv().await.is_none());
        spawned.process.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_inactive_level_is_rejected() {
        let mut spawner = FioSpawner::new(FioBinary::default(), plan(&PathBuf::from("/nonexistent")));
        let err = spawner
            .spawn(GeneratorRole::CpuStress, StressLevel::None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Generator(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut spawner = FioSpawner::new(FioBinary::new("resilver-no-such-fio"), plan(dir.path()));
        let err = spawner
            .spawn(GeneratorRole::ReadLatencyProbe, StressLevel::Med)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Admin(AdminError::Spawn { .. })));
        assert!(dir.path().join("probe").is_dir());
    }
}
