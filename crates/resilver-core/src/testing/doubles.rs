//! In-memory fill backend, reaper, host probe and result sink.

use super::{ScriptedPool, lock};
use crate::driver::HostProbe;
use crate::fill::{FillBackend, FillFile};
use crate::lifecycle::GeneratorReaper;
use crate::sink::{ResultRow, ResultSink};
use async_trait::async_trait;
use resilver_proto::{FragLevel, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Fill backend writing fixed-size files into a [`ScriptedPool`].
///
/// Each `run_finished` poll of a running fill writes one file; a full pool
/// ends the run.
#[derive(Debug)]
pub struct MemoryFillBackend {
    pool: ScriptedPool,
    file_size: u64,
    running: bool,
    run: u32,
    files: Vec<FillFile>,
}

impl MemoryFillBackend {
    pub fn new(pool: ScriptedPool, file_size: u64) -> Self {
        Self {
            pool,
            file_size,
            running: false,
            run: 0,
            files: Vec::new(),
        }
    }

    pub fn files(&self) -> &[FillFile] {
        &self.files
    }
}

#[async_trait]
impl FillBackend for MemoryFillBackend {
    async fn prepare(&mut self) -> Result<()> {
        self.files.clear();
        Ok(())
    }

    async fn start_run(&mut self, _frag: FragLevel, run: u32) -> Result<()> {
        self.running = true;
        self.run = run;
        Ok(())
    }

    async fn run_finished(&mut self) -> Result<bool> {
        if !self.running {
            return Ok(true);
        }
        if self.pool.allocate(self.file_size) {
            let path = PathBuf::from(format!("/mnt/tank/test/fill/fill{}.0.{}", self.run, self.files.len()));
            self.files.push(FillFile {
                path,
                size: self.file_size,
            });
            Ok(false)
        } else {
            self.running = false;
            Ok(true)
        }
    }

    async fn stop_run(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    async fn list_files(&mut self) -> Result<Vec<FillFile>> {
        Ok(self.files.clone())
    }

    async fn remove_file(&mut self, path: &Path) -> Result<()> {
        let idx = self
            .files
            .iter()
            .position(|f| f.path == path)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.display().to_string()))?;
        let file = self.files.remove(idx);
        self.pool.release(file.size);
        Ok(())
    }
}

/// Reaper that only counts invocations.
#[derive(Debug, Clone, Default)]
pub struct RecordingReaper {
    count: Arc<AtomicUsize>,
}

impl RecordingReaper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reap_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeneratorReaper for RecordingReaper {
    async fn reap(&mut self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Host probe returning a fixed load average.
#[derive(Debug, Clone, Copy)]
pub struct FixedHostProbe {
    load: Option<f64>,
}

impl FixedHostProbe {
    pub fn new(load: Option<f64>) -> Self {
        Self { load }
    }
}

impl HostProbe for FixedHostProbe {
    fn load_average(&self) -> Option<f64> {
        self.load
    }
}

/// Sink keeping rows in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    rows: Arc<Mutex<Vec<ResultRow>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<ResultRow> {
        lock(&self.rows).clone()
    }
}

impl ResultSink for MemorySink {
    fn write_row(&mut self, row: &ResultRow) -> Result<()> {
        lock(&self.rows).push(row.clone());
        Ok(())
    }
}
