//! fio-backed [`FillBackend`].

use crate::command::terminate_child;
use crate::fio::{FioBinary, FioPlan};
use async_trait::async_trait;
use resilver_core::{FillBackend, FillFile};
use resilver_proto::{AdminError, Error, FragLevel, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, info};

const STOP_GRACE: Duration = Duration::from_secs(10);

/// Writes fill data with fio into `<dataset>/fill`.
#[derive(Debug)]
pub struct FioFillBackend {
    binary: FioBinary,
    plan: FioPlan,
    child: Option<Child>,
}

impl FioFillBackend {
    pub fn new(binary: FioBinary, plan: FioPlan) -> Self {
        Self {
            binary,
            plan,
            child: None,
        }
    }
}

#[async_trait]
impl FillBackend for FioFillBackend {
    async fn prepare(&mut self) -> Result<()> {
        tokio::fs::create_dir_all(self.plan.fill_dir()).await?;
        Ok(())
    }

    async fn start_run(&mut self, frag: FragLevel, run: u32) -> Result<()> {
        if self.child.is_some() {
            return Err(Error::Generator(format!("fill run {run} started while another is running")));
        }
        let job = self.plan.fill_job(frag, run);
        let line = self.binary.render(&job);
        info!(run, frag = %frag, "Starting fill run");
        debug!(command = %line, "Fill command");

        let child = self
            .binary
            .command(&job)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AdminError::Spawn { command: line, source })?;
        self.child = Some(child);
        Ok(())
    }

    async fn run_finished(&mut self) -> Result<bool> {
        let Some(child) = self.child.as_mut() else {
            return Ok(true);
        };
        match child.try_wait()? {
            Some(status) => {
                // fio exits non-zero when the pool runs out of space, which is expected here
                debug!(?status, "Fill run exited");
                self.child = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn stop_run(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            terminate_child(&mut child, STOP_GRACE).await?;
        }
        Ok(())
    }

    async fn list_files(&mut self) -> Result<Vec<FillFile>> {
        let mut files = Vec::new();
        collect_files(self.plan.fill_dir(), &mut files).await?;
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn remove_file(&mut self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }
}

/// Walks `root` iteratively, collecting regular files with their sizes.
async fn collect_files(root: PathBuf, out: &mut Vec<FillFile>) -> Result<()> {
    let mut pending = vec![root];
    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else if meta.is_file() {
                out.push(FillFile {
                    path: entry.path(),
                    size: meta.len(),
                });
            }
        }
    }
    Ok(())
}
