//! A pool that replays status reports and records administrative calls.

use super::lock;
use crate::admin::{DestroyOutcome, PoolAdmin, PoolPlan, SyncPolicy};
use async_trait::async_trait;
use resilver_proto::{AdminError, PoolSnapshot, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const DEFAULT_STATUS: &str = "  pool: tank
 state: ONLINE
config:
\tNAME        STATE     READ WRITE CKSUM
\ttank        ONLINE       0     0     0
\t  raidz2-0  ONLINE       0     0     0
errors: No known data errors
";

/// A state-changing call made against a [`ScriptedPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCall {
    Destroy,
    Create {
        layout: String,
        vdevs: u32,
        record_size: String,
    },
    Offline(String),
    Online(String),
    Clear,
    ExportImport,
    SetSync(SyncPolicy),
}

#[derive(Debug, Default)]
struct State {
    statuses: VecDeque<String>,
    status_queries: usize,
    calls: Vec<AdminCall>,
    disks: Vec<String>,
    capacity: u64,
    used: u64,
    fragmentation: Option<u32>,
    destroy_failures: u32,
    fail_create: bool,
    exists: bool,
}

/// Scripted [`PoolAdmin`].
///
/// Status reports are served in order; the last one repeats once the script
/// runs dry. Capacity is tracked in memory and shared with
/// [`MemoryFillBackend`](super::MemoryFillBackend).
#[derive(Debug, Clone, Default)]
pub struct ScriptedPool {
    state: Arc<Mutex<State>>,
}

impl ScriptedPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_disks(self, disks: Vec<String>) -> Self {
        lock(&self.state).disks = disks;
        self
    }

    pub fn with_capacity(self, bytes: u64) -> Self {
        lock(&self.state).capacity = bytes;
        self
    }

    pub fn with_fragmentation(self, percent: u32) -> Self {
        lock(&self.state).fragmentation = Some(percent);
        self
    }

    pub fn with_statuses<I, T>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        lock(&self.state).statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Makes the next `n` destroy attempts fail.
    pub fn fail_destroys(self, n: u32) -> Self {
        lock(&self.state).destroy_failures = n;
        self
    }

    pub fn fail_create(self) -> Self {
        lock(&self.state).fail_create = true;
        self
    }

    /// Appends status reports to the script.
    pub fn push_statuses<I, T>(&self, statuses: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        lock(&self.state)
            .statuses
            .extend(statuses.into_iter().map(Into::into));
    }

    pub fn calls(&self) -> Vec<AdminCall> {
        lock(&self.state).calls.clone()
    }

    pub fn status_queries(&self) -> usize {
        lock(&self.state).status_queries
    }

    pub fn used_bytes(&self) -> u64 {
        lock(&self.state).used
    }

    pub fn used_percent(&self) -> f64 {
        let state = lock(&self.state);
        if state.capacity == 0 {
            return 0.0;
        }
        state.used as f64 / state.capacity as f64 * 100.0
    }

    /// Claims `bytes` of free space. Returns false when the pool is full.
    pub fn allocate(&self, bytes: u64) -> bool {
        let mut state = lock(&self.state);
        if state.used + bytes > state.capacity {
            return false;
        }
        state.used += bytes;
        true
    }

    pub fn release(&self, bytes: u64) {
        let mut state = lock(&self.state);
        state.used = state.used.saturating_sub(bytes);
    }

    fn record(&self, call: AdminCall) {
        lock(&self.state).calls.push(call);
    }
}

fn busy(command: &str) -> AdminError {
    AdminError::CommandFailed {
        command: command.to_string(),
        exit_code: Some(1),
        stderr: "pool is busy".to_string(),
    }
}

#[async_trait]
impl PoolAdmin for ScriptedPool {
    async fn destroy(&self) -> Result<DestroyOutcome> {
        self.record(AdminCall::Destroy);
        let mut state = lock(&self.state);
        if state.destroy_failures > 0 {
            state.destroy_failures -= 1;
            return Err(busy("zpool destroy tank").into());
        }
        let existed = std::mem::take(&mut state.exists);
        state.used = 0;
        Ok(if existed {
            DestroyOutcome::Destroyed
        } else {
            DestroyOutcome::NotPresent
        })
    }

    async fn create(&self, plan: &PoolPlan, record_size: &str) -> Result<()> {
        self.record(AdminCall::Create {
            layout: plan.layout.clone(),
            vdevs: plan.vdev_count(),
            record_size: record_size.to_string(),
        });
        let mut state = lock(&self.state);
        if state.fail_create {
            return Err(busy("zpool create tank").into());
        }
        state.exists = true;
        state.used = 0;
        Ok(())
    }

    async fn set_device_offline(&self, device: &str) -> Result<()> {
        self.record(AdminCall::Offline(device.to_string()));
        Ok(())
    }

    async fn set_device_online(&self, device: &str) -> Result<()> {
        self.record(AdminCall::Online(device.to_string()));
        Ok(())
    }

    async fn clear_faults(&self) -> Result<()> {
        self.record(AdminCall::Clear);
        Ok(())
    }

    async fn query_capacity(&self) -> Result<PoolSnapshot> {
        let state = lock(&self.state);
        Ok(PoolSnapshot {
            used_bytes: state.used,
            available_bytes: state.capacity.saturating_sub(state.used),
            fragmentation_percent: state.fragmentation,
        })
    }

    async fn query_status_text(&self) -> Result<String> {
        let mut state = lock(&self.state);
        state.status_queries += 1;
        let text = if state.statuses.len() > 1 {
            state.statuses.pop_front()
        } else {
            state.statuses.front().cloned()
        };
        Ok(text.unwrap_or_else(|| DEFAULT_STATUS.to_string()))
    }

    async fn export_import(&self) -> Result<()> {
        self.record(AdminCall::ExportImport);
        Ok(())
    }

    async fn set_sync(&self, policy: SyncPolicy) -> Result<()> {
        self.record(AdminCall::SetSync(policy));
        Ok(())
    }

    async fn list_disks(&self) -> Result<Vec<String>> {
        Ok(lock(&self.state).disks.clone())
    }
}
