//! `zpool`/`zfs` implementation of [`PoolAdmin`].

use crate::command::{CommandRunner, render};
use crate::disks::{eligible_disks, lsblk_args};
use async_trait::async_trait;
use resilver_core::{DestroyOutcome, DiskConfig, PoolAdmin, PoolConfig, PoolPlan, SyncPolicy};
use resilver_proto::{AdminError, PoolSnapshot, Result};
use tracing::{debug, info};

const ZPOOL: &str = "zpool";
const ZFS: &str = "zfs";
const LSBLK: &str = "lsblk";

/// Pool administration through the ZFS command-line tools.
#[derive(Debug, Clone)]
pub struct ZfsAdmin {
    runner: CommandRunner,
    pool: PoolConfig,
    disks: DiskConfig,
}

impl ZfsAdmin {
    pub fn new(runner: CommandRunner, pool: PoolConfig, disks: DiskConfig) -> Self {
        Self { runner, pool, disks }
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    async fn zpool(&self, args: &[&str]) -> Result<String> {
        self.runner.run(ZPOOL, &owned(args)).await
    }

    async fn zfs(&self, args: &[&str]) -> Result<String> {
        self.runner.run(ZFS, &owned(args)).await
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_string()).collect()
}

/// `zpool create` arguments for a plan.
pub fn create_pool_args(pool: &PoolConfig, plan: &PoolPlan) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "-f".to_string(),
        pool.name.clone(),
        "-o".to_string(),
        format!("ashift={}", pool.ashift),
        "-o".to_string(),
        format!("autoreplace={}", if pool.autoreplace { "on" } else { "off" }),
        "-m".to_string(),
        pool.mountpoint.display().to_string(),
    ];
    args.extend(plan.create_args());
    args
}

/// `zfs create` arguments for the test dataset.
pub fn create_dataset_args(pool: &PoolConfig, record_size: &str) -> Vec<String> {
    vec![
        "create".to_string(),
        "-o".to_string(),
        "compression=off".to_string(),
        "-o".to_string(),
        format!("recordsize={record_size}"),
        pool.dataset_name(),
    ]
}

/// Builds a snapshot from `zfs list -Hpo used,available` and `zpool list -Hpo frag`.
///
/// Fragmentation may be reported as `12`, `12%` or `-`; the latter means unknown.
pub fn parse_capacity(usage: &str, frag: &str) -> std::result::Result<PoolSnapshot, String> {
    let mut cols = usage.split_whitespace();
    let mut next_bytes = |what: &str| -> std::result::Result<u64, String> {
        let text = cols.next().ok_or_else(|| format!("missing {what}"))?;
        text.parse().map_err(|_| format!("bad {what} '{text}'"))
    };
    let used_bytes = next_bytes("used")?;
    let available_bytes = next_bytes("available")?;
    let fragmentation_percent = frag.trim().trim_end_matches('%').parse().ok();
    Ok(PoolSnapshot {
        used_bytes,
        available_bytes,
        fragmentation_percent,
    })
}

fn is_missing_pool(stderr: &str) -> bool {
    stderr.contains("no such pool")
}

#[async_trait]
impl PoolAdmin for ZfsAdmin {
    async fn destroy(&self) -> Result<DestroyOutcome> {
        let args = owned(&["destroy", &self.pool.name]);
        let output = self.runner.output(ZPOOL, &args).await?;
        if output.success() {
            info!(pool = %self.pool.name, "Pool destroyed");
            Ok(DestroyOutcome::Destroyed)
        } else if is_missing_pool(&output.stderr) {
            Ok(DestroyOutcome::NotPresent)
        } else {
            Err(AdminError::CommandFailed {
                command: render(ZPOOL, &args),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            }
            .into())
        }
    }

    async fn create(&self, plan: &PoolPlan, record_size: &str) -> Result<()> {
        self.runner.run(ZPOOL, &create_pool_args(&self.pool, plan)).await?;
        self.runner
            .run(ZFS, &create_dataset_args(&self.pool, record_size))
            .await?;
        Ok(())
    }

    async fn set_device_offline(&self, device: &str) -> Result<()> {
        // -f faults the device instead of merely offlining it
        self.zpool(&["offline", "-f", &self.pool.name, device]).await?;
        Ok(())
    }

    async fn set_device_online(&self, device: &str) -> Result<()> {
        self.zpool(&["online", &self.pool.name, device]).await?;
        Ok(())
    }

    async fn clear_faults(&self) -> Result<()> {
        self.zpool(&["clear", &self.pool.name]).await?;
        Ok(())
    }

    async fn query_capacity(&self) -> Result<PoolSnapshot> {
        let dataset = self.pool.dataset_name();
        let usage = self.zfs(&["list", &dataset, "-Hpo", "used,available"]).await?;
        let frag = self.zpool(&["list", "-Hpo", "frag", &self.pool.name]).await?;
        parse_capacity(&usage, &frag).map_err(|reason| {
            AdminError::UnexpectedOutput {
                command: format!("zfs list {dataset} -Hpo used,available"),
                output: reason,
            }
            .into()
        })
    }

    async fn query_status_text(&self) -> Result<String> {
        self.zpool(&["status", &self.pool.name]).await
    }

    async fn export_import(&self) -> Result<()> {
        debug!(pool = %self.pool.name, "Exporting and importing pool");
        self.zpool(&["export", &self.pool.name]).await?;
        self.zpool(&["import", &self.pool.name]).await?;
        Ok(())
    }

    async fn set_sync(&self, policy: SyncPolicy) -> Result<()> {
        let setting = format!("sync={}", policy.as_str());
        self.zfs(&["set", &setting, &self.pool.dataset_name()]).await?;
        Ok(())
    }

    async fn list_disks(&self) -> Result<Vec<String>> {
        let listing = self.runner.run(LSBLK, &lsblk_args()).await?;
        Ok(eligible_disks(&listing, &self.disks.physical_size))
    }
}
