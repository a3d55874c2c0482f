//! Pool administrative interface and pool assembly.
//!
//! The engine never runs storage commands itself; it drives a [`PoolAdmin`]
//! and interprets the results.

use async_trait::async_trait;
use resilver_proto::{Error, LayoutSpec, PoolSnapshot, Result};
use serde::{Deserialize, Serialize};

/// Outcome of a destroy request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    Destroyed,
    /// There was no pool to destroy.
    NotPresent,
}

/// Dataset write-sync policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Every write is synchronous, so disk stress is not absorbed by memory.
    Always,
    /// Writes are buffered, for fast fills.
    Disabled,
}

impl SyncPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncPolicy::Always => "always",
            SyncPolicy::Disabled => "disabled",
        }
    }
}

/// Narrow administrative interface to the pool under test.
///
/// Methods take `&self`: implementations are command executors without
/// per-call state, which lets the monitor poll status while the lifecycle
/// controller holds the interface.
#[async_trait]
pub trait PoolAdmin: Send + Sync {
    /// Destroys the pool. Succeeds with [`DestroyOutcome::NotPresent`] when no pool exists.
    async fn destroy(&self) -> Result<DestroyOutcome>;

    /// Creates the pool and its test dataset. Not idempotent.
    async fn create(&self, plan: &PoolPlan, record_size: &str) -> Result<()>;

    async fn set_device_offline(&self, device: &str) -> Result<()>;

    async fn set_device_online(&self, device: &str) -> Result<()>;

    /// Clears residual fault markers and error counters.
    async fn clear_faults(&self) -> Result<()>;

    async fn query_capacity(&self) -> Result<PoolSnapshot>;

    async fn query_status_text(&self) -> Result<String>;

    /// Exports and re-imports the pool, dropping cached data.
    async fn export_import(&self) -> Result<()>;

    async fn set_sync(&self, policy: SyncPolicy) -> Result<()>;

    /// Whole disks eligible for the pool, in stable order.
    async fn list_disks(&self) -> Result<Vec<String>>;
}

/// Resolves a configured device name to the path handed to the pool tools.
///
/// `sdbz` becomes `/dev/sdbz`, or `/dev/sdbz1` on partitioned disks.
pub fn device_path(name: &str, partitioned: bool) -> String {
    let base = if name.starts_with("/dev/") {
        name.to_string()
    } else {
        format!("/dev/{name}")
    };
    if partitioned { format!("{base}1") } else { base }
}

/// Assignment of disks to vdevs and spares for one `zpool create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPlan {
    pub layout: String,
    pub vdevs: Vec<Vec<String>>,
    pub spares: Vec<String>,
}

impl PoolPlan {
    /// Groups disks into vdevs.
    ///
    /// The first `min_spares` disks are set aside as spares, the rest form
    /// `floor(remaining / width)` vdevs, and leftovers join the spares.
    pub fn assemble(spec: &LayoutSpec, disks: &[String], partitioned: bool) -> Result<Self> {
        if spec.width == 0 {
            return Err(Error::Config(format!("layout {} has zero width", spec.layout)));
        }
        let width = spec.width as usize;
        let reserved = (spec.min_spares as usize).min(disks.len());
        let (spare_disks, pool_disks) = disks.split_at(reserved);

        let vdev_count = pool_disks.len() / width;
        if vdev_count == 0 {
            return Err(Error::Config(format!(
                "{} disks left after {} spares cannot form a {}-wide {} vdev",
                pool_disks.len(),
                reserved,
                spec.width,
                spec.layout
            )));
        }

        let as_path = |d: &String| device_path(d, partitioned);
        let vdevs = pool_disks
            .chunks_exact(width)
            .map(|chunk| chunk.iter().map(as_path).collect())
            .collect();
        let spares = spare_disks
            .iter()
            .chain(pool_disks.chunks_exact(width).remainder())
            .map(as_path)
            .collect();

        Ok(Self {
            layout: spec.layout.clone(),
            vdevs,
            spares,
        })
    }

    pub fn vdev_count(&self) -> u32 {
        self.vdevs.len() as u32
    }

    /// Vdev and spare arguments for `zpool create`, after the pool name and options.
    pub fn create_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for vdev in &self.vdevs {
            args.push(self.layout.clone());
            args.extend(vdev.iter().cloned());
        }
        if !self.spares.is_empty() {
            args.push("spare".to_string());
            args.extend(self.spares.iter().cloned());
        }
        args
    }
}
