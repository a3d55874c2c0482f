//! Log initialization.

use anyhow::{Context, Result};
use resilver_core::rotated_path;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Level used when `RUST_LOG` is unset.
fn default_level(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level(verbose)))
}

/// Logs to stderr only, keeping stdout for the report. Used by the read-only subcommands.
pub fn init_console(verbose: bool) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Failed to initialize logging")
}

/// Logs to stdout and to `log_path`, moving a previous log to `<name>.old`.
pub fn init_with_file(verbose: bool, log_path: &Path) -> Result<()> {
    rotate(log_path)?;
    let file = File::create(log_path)
        .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .context("Failed to initialize logging")
}

fn rotate(log_path: &Path) -> Result<()> {
    if log_path.exists() {
        let old = rotated_path(log_path);
        std::fs::rename(log_path, &old)
            .with_context(|| format!("Failed to rotate {} to {}", log_path.display(), old.display()))?;
    }
    Ok(())
}
