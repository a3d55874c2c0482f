//! Text output of the read-only subcommands.

use anyhow::{Context, Result};
use resilver_core::{Checkpoint, Matrix, ReliabilitySweep, human};
use resilver_proto::{LayoutSpec, ResilverStatus};
use std::fmt::Write as _;
use std::time::Duration;

/// One line per case from `start` onward, prefixed with its test index.
pub fn render_plan(matrix: &Matrix, start: Checkpoint) -> Result<String> {
    let dims = matrix.dims();
    let mut out = String::new();
    for (checkpoint, config) in matrix.cursor(start)? {
        let _ = writeln!(
            out,
            "{:<16} {:<22} frag={:<5} recordsize={:<5} {}",
            checkpoint.to_string(),
            config.layout.to_string(),
            config.frag,
            config.record_size,
            config.stress
        );
    }
    let remaining = dims.total() - dims.ordinal(start);
    let _ = writeln!(out, "{remaining} of {} cases", dims.total());
    Ok(out)
}

/// Accepts `HH:MM:SS`, `N days HH:MM:SS` or plain seconds.
pub fn parse_resilver_time(text: &str) -> Option<Duration> {
    human::parse_hms(text)
        .or_else(|| text.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Pool AFR for each multiplier and disk AFR.
pub fn render_sweep(
    layout: &LayoutSpec,
    vdev_count: u32,
    resilver: Duration,
    disk_afrs: &[f64],
    multipliers: &[f64],
) -> Result<String> {
    let parity = layout
        .parity_level()
        .with_context(|| format!("Unknown redundancy family in '{}'", layout.layout))?;
    let sweep = ReliabilitySweep::compute(
        layout.width,
        parity,
        vdev_count,
        resilver.as_secs_f64(),
        disk_afrs,
        multipliers,
    );

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{layout}, parity {parity}, {vdev_count} vdev(s), resilver {}",
        human::format_dhms(resilver)
    );
    for &multiplier in multipliers {
        let _ = writeln!(out, "resilver time x{multiplier}:");
        for point in sweep.series(multiplier) {
            let _ = writeln!(
                out,
                "  disk AFR {:>5.1}%  pool AFR {:.6e}",
                point.disk_afr * 100.0,
                point.pool_afr
            );
        }
    }
    Ok(out)
}

pub fn render_status(status: &ResilverStatus) -> Result<String> {
    serde_json::to_string_pretty(status).context("Failed to encode status")
}
