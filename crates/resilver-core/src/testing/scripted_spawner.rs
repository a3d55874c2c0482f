//! A generator spawner whose producers emit canned fio lines.

use super::lock;
use crate::fio_terse;
use crate::supervisor::{GeneratorProcess, GeneratorSpawner, SpawnedGenerator};
use async_trait::async_trait;
use resilver_proto::{GeneratorRole, Result, Sample, StressLevel};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lines one scripted producer emits.
///
/// Without [`every`](Self::every) all lines are queued at spawn time. With
/// it, lines are sent one per interval starting immediately. A producer that
/// runs out of lines stays alive and silent, like a stalled process.
#[derive(Debug, Clone, Default)]
pub struct StreamScript {
    lines: Vec<String>,
    interval: Option<Duration>,
    repeat_last: bool,
}

impl StreamScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A non-record line, such as a startup warning.
    pub fn diagnostic(mut self, line: &str) -> Self {
        self.lines.push(line.to_string());
        self
    }

    pub fn record(mut self, sample: Sample) -> Self {
        self.lines.push(fio_terse::encode(&sample));
        self
    }

    /// A producer that never emits anything.
    pub fn stall(mut self) -> Self {
        self.lines.clear();
        self.repeat_last = false;
        self
    }

    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Keeps re-sending the last line each interval.
    pub fn repeat_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    spawned: Vec<(GeneratorRole, StressLevel)>,
    terminated: usize,
}

/// Scripted [`GeneratorSpawner`]. Roles without a script get a silent producer.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSpawner {
    scripts: BTreeMap<GeneratorRole, StreamScript>,
    counters: Arc<Mutex<Counters>>,
}

impl ScriptedSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, role: GeneratorRole, script: StreamScript) -> Self {
        self.scripts.insert(role, script);
        self
    }

    pub fn spawn_count(&self) -> usize {
        lock(&self.counters).spawned.len()
    }

    /// Every (role, level) spawned, in order.
    pub fn spawned(&self) -> Vec<(GeneratorRole, StressLevel)> {
        lock(&self.counters).spawned.clone()
    }

    pub fn terminated_count(&self) -> usize {
        lock(&self.counters).terminated
    }
}

struct ScriptedProcess {
    pid: u32,
    sender: Option<mpsc::Sender<String>>,
    task: Option<JoinHandle<()>>,
    counters: Arc<Mutex<Counters>>,
    terminated: bool,
}

#[async_trait]
impl GeneratorProcess for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn terminate(&mut self) -> std::io::Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.sender = None;
        if !self.terminated {
            self.terminated = true;
            lock(&self.counters).terminated += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl GeneratorSpawner for ScriptedSpawner {
    async fn spawn(&mut self, role: GeneratorRole, level: StressLevel) -> Result<SpawnedGenerator> {
        let pid = {
            let mut counters = lock(&self.counters);
            counters.spawned.push((role, level));
            40_000 + counters.spawned.len() as u32
        };
        let script = self.scripts.get(&role).cloned().unwrap_or_default();
        let (tx, rx) = mpsc::channel(256);

        let (sender, task) = match script.interval {
            None => {
                for line in script.lines {
                    let _ = tx.try_send(line);
                }
                (Some(tx), None)
            }
            Some(interval) => {
                let task = tokio::spawn(async move {
                    let last = script.lines.last().cloned();
                    for line in script.lines {
                        if tx.send(line).await.is_err() {
                            return;
                        }
                        tokio::time::sleep(interval).await;
                    }
                    match last {
                        Some(line) if script.repeat_last => loop {
                            if tx.send(line.clone()).await.is_err() {
                                return;
                            }
                            tokio::time::sleep(interval).await;
                        },
                        // Hold the channel open like a live process.
                        _ => std::future::pending::<()>().await,
                    }
                });
                (None, Some(task))
            }
        };

        Ok(SpawnedGenerator {
            lines: rx,
            process: Box::new(ScriptedProcess {
                pid,
                sender,
                task,
                counters: Arc::clone(&self.counters),
                terminated: false,
            }),
        })
    }
}
