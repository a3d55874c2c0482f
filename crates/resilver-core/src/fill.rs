//! Pool fill and fragmentation.
//!
//! A fill writes files into the test dataset until the pool reaches a target
//! usage. Fragmented fills go to 100% and then randomly delete files until
//! usage drops back to the target, leaving holes spread across the pool.

use async_trait::async_trait;
use rand::Rng;
use resilver_proto::{FragLevel, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One file written by a fill run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Writer of fill data. Runs are numbered from zero.
#[async_trait]
pub trait FillBackend: Send {
    /// Prepares the fill directory on a freshly created pool.
    async fn prepare(&mut self) -> Result<()>;

    /// Starts fill run `run` in the background.
    async fn start_run(&mut self, frag: FragLevel, run: u32) -> Result<()>;

    /// Returns true once the current run has exited on its own.
    async fn run_finished(&mut self) -> Result<bool>;

    /// Stops the current run. No-op if none is running.
    async fn stop_run(&mut self) -> Result<()>;

    async fn list_files(&mut self) -> Result<Vec<FillFile>>;

    async fn remove_file(&mut self, path: &Path) -> Result<()>;
}

/// Summary of a completed fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReport {
    pub elapsed: Duration,
    pub runs: u32,
    pub bytes_written: u64,
    pub pruned_files: usize,
    pub pruned_bytes: u64,
}

impl FillReport {
    /// Average fill throughput in GB/s.
    pub fn fill_rate_gbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes_written as f64 / secs / 1e9
    }
}

/// Usage percentage a fill of the given level writes to before pruning.
pub fn fill_ceiling(frag: FragLevel, target_percent: f64) -> f64 {
    if frag.is_fragmented() { 100.0 } else { target_percent }
}

/// Picks files to delete so that roughly `prune_bytes` are freed.
///
/// Each pass walks the files in order and selects each unselected one with
/// probability `select_probability`. Selection stops before the file that
/// would bring the freed total to or past `prune_bytes`. Returns indices into
/// `files` in selection order.
pub fn plan_prune<R: Rng>(
    files: &[FillFile],
    prune_bytes: u64,
    select_probability: f64,
    rng: &mut R,
) -> Vec<usize> {
    const MAX_PASSES: usize = 1_000;

    let mut picks = Vec::new();
    if prune_bytes == 0 || files.is_empty() {
        return picks;
    }
    let probability = select_probability.clamp(0.01, 1.0);
    let mut selected = vec![false; files.len()];
    let mut freed = 0_u64;

    for _ in 0..MAX_PASSES {
        for (idx, file) in files.iter().enumerate() {
            if selected[idx] || !rng.gen_bool(probability) {
                continue;
            }
            if freed + file.size >= prune_bytes {
                return picks;
            }
            selected[idx] = true;
            freed += file.size;
            picks.push(idx);
        }
        if picks.len() == files.len() {
            break;
        }
    }
    picks
}
