//! # resilver-cli
//!
//! Binary entry point for the resilver benchmark.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Logging to stdout and a rotated log file
//! - Signal handling that stops load generators before exiting
//! - The `run` and `resume` entry points to the test matrix driver
//! - Read-only `plan`, `afr` and `status` subcommands

mod logging;
mod report;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use resilver_adapters::{
    CommandRunner, FioBinary, FioFillBackend, FioPlan, FioSpawner, PkillReaper, ProcLoadAverage, ZfsAdmin,
};
use resilver_core::{
    BenchConfig, Checkpoint, CheckpointStore, CsvResultSink, DriverSettings, LoadGeneratorSupervisor, PoolAdmin,
    PoolLifecycle, RunContext, StatusParser, TelemetryRecorder, TestMatrixDriver,
};
use resilver_proto::LayoutSpec;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Deadline for a single `zpool`/`zfs` command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

// Unix process group leadership, so a signal to the group reaches every fio child
mod process_management {
    use nix::unistd::{Pid, setpgid};
    use tracing::debug;

    pub fn setup_process_group() {
        let pid = Pid::this();
        if let Err(e) = setpgid(pid, pid) {
            // EPERM means we already lead a group (started from a shell)
            if e != nix::errno::Errno::EPERM {
                debug!("Could not set process group ({}), continuing anyway", e);
            }
        }
        debug!("Process group initialized: PID {}", pid);
    }
}

#[derive(Parser, Debug)]
#[command(name = "resilver", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, default_value = "resilver.yml", global = true)]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the test matrix
    Run(RunArgs),

    /// Continue from the saved checkpoint
    Resume(ResumeArgs),

    /// List the test cases that would run
    Plan(PlanArgs),

    /// Estimate pool failure rates for a measured resilver time
    Afr(AfrArgs),

    /// Parse a pool status report and print the typed result
    Status(StatusArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// First case to run, as `layout,frag,recordsize,stress` indices
    #[arg(long, value_parser = parse_checkpoint)]
    start: Option<Checkpoint>,

    /// The first pool already exists and is filled
    #[arg(long)]
    skip_pool_setup: bool,

    /// Validate the configuration and list the cases without touching any pool
    #[arg(long)]
    dry_run: bool,

    /// fio executable
    #[arg(long, default_value = "fio")]
    fio: PathBuf,
}

#[derive(Parser, Debug)]
struct ResumeArgs {
    /// Reuse the pool left by the interrupted run
    #[arg(long)]
    skip_pool_setup: bool,

    #[arg(long)]
    dry_run: bool,

    /// fio executable
    #[arg(long, default_value = "fio")]
    fio: PathBuf,
}

#[derive(Parser, Debug)]
struct PlanArgs {
    #[arg(long, value_parser = parse_checkpoint)]
    start: Option<Checkpoint>,
}

#[derive(Parser, Debug)]
struct AfrArgs {
    /// Layout keyword, e.g. `raidz2` or `draid2:8d:82c:2s`
    #[arg(long)]
    layout: String,

    /// Disks per vdev
    #[arg(long)]
    width: u32,

    #[arg(long, default_value_t = 1)]
    vdevs: u32,

    /// Resilver time as `HH:MM:SS`, `N days HH:MM:SS` or seconds
    #[arg(long, value_parser = parse_duration)]
    resilver: Duration,
}

#[derive(Parser, Debug)]
struct StatusArgs {
    /// Read the report from a file instead of the live pool
    #[arg(long)]
    file: Option<PathBuf>,

    /// Only accept reports of this layout's redundancy family
    #[arg(long)]
    layout: Option<String>,
}

fn parse_checkpoint(text: &str) -> std::result::Result<Checkpoint, String> {
    text.parse().map_err(|e: resilver_proto::Error| e.to_string())
}

fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
    report::parse_resilver_time(text).ok_or_else(|| format!("invalid duration '{text}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run(args) => {
            let start = args.start.unwrap_or_default();
            let options = RunOptions {
                config_path: cli.config.clone(),
                skip_pool_setup: args.skip_pool_setup,
                dry_run: args.dry_run,
                fio: args.fio,
            };
            run_command(config, cli.verbose, start, options).await
        }
        Commands::Resume(args) => {
            let store = CheckpointStore::new(&config.output.checkpoint);
            let saved = store
                .load()
                .with_context(|| format!("Failed to read checkpoint {}", store.path().display()))?;
            let Some(saved) = saved else {
                bail!("No checkpoint at {}; use `resilver run`", store.path().display());
            };
            let Some(start) = saved.next else {
                logging::init_console(cli.verbose)?;
                info!(completed = saved.completed, "Test matrix already finished, nothing to resume");
                return Ok(());
            };
            let options = RunOptions {
                config_path: cli.config.clone(),
                skip_pool_setup: args.skip_pool_setup,
                dry_run: args.dry_run,
                fio: args.fio,
            };
            run_command(config, cli.verbose, start, options).await
        }
        Commands::Plan(args) => {
            logging::init_console(cli.verbose)?;
            validate(&config, &cli.config)?;
            print!("{}", report::render_plan(&config.matrix, args.start.unwrap_or_default())?);
            Ok(())
        }
        Commands::Afr(args) => {
            logging::init_console(cli.verbose)?;
            let layout = LayoutSpec::new(args.layout, args.width, 0);
            print!(
                "{}",
                report::render_sweep(
                    &layout,
                    args.vdevs,
                    args.resilver,
                    &config.reliability.disk_afrs,
                    &config.reliability.multipliers,
                )?
            );
            Ok(())
        }
        Commands::Status(args) => {
            logging::init_console(cli.verbose)?;
            status_command(&config, args).await
        }
    }
}

fn load_config(path: &Path) -> Result<BenchConfig> {
    if path.exists() {
        BenchConfig::from_file(path).with_context(|| format!("Failed to load config from {:?}", path))
    } else {
        Ok(BenchConfig::default())
    }
}

/// Reports a missing config file and any suspicious values. Needs logging to be up.
fn validate(config: &BenchConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        warn!("Config file {:?} not found, using defaults", path);
    }
    let warnings = config.validate().context("Invalid configuration")?;
    for warning in warnings {
        warn!("{}", warning);
    }
    Ok(())
}

struct RunOptions {
    config_path: PathBuf,
    skip_pool_setup: bool,
    dry_run: bool,
    fio: PathBuf,
}

async fn run_command(config: BenchConfig, verbose: bool, start: Checkpoint, options: RunOptions) -> Result<()> {
    if options.dry_run {
        logging::init_console(verbose)?;
        validate(&config, &options.config_path)?;
        info!(start = %start, "Dry run, no pool will be touched");
        print!("{}", report::render_plan(&config.matrix, start)?);
        return Ok(());
    }

    logging::init_with_file(verbose, &config.output.log)?;
    validate(&config, &options.config_path)?;
    process_management::setup_process_group();
    info!(
        started = %chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        start = %start,
        cases = config.matrix.len(),
        "Resilver benchmark starting"
    );

    // Whatever happens below, no fio process may outlive the run
    let _reaper_guard = scopeguard::guard((), |()| kill_stray_generators());

    let mut driver = build_driver(&config, &options.fio)?;

    let outcome = tokio::select! {
        result = driver.run(start, options.skip_pool_setup) => Some(result),
        signal = shutdown_signal() => {
            warn!(signal, "Signal received, stopping");
            None
        }
    };

    match outcome {
        Some(Ok(summary)) => {
            info!(completed = summary.completed, last = ?summary.last.map(|c| c.to_string()), "Run complete");
            Ok(())
        }
        Some(Err(e)) => {
            error!(error = %e, "Run aborted");
            driver.shutdown().await;
            Err(e).context("Benchmark failed")
        }
        None => {
            driver.shutdown().await;
            info!(
                checkpoint = %config.output.checkpoint.display(),
                "Stopped; continue with `resilver resume`"
            );
            Ok(())
        }
    }
}

type Driver = TestMatrixDriver<ZfsAdmin, FioSpawner, FioFillBackend>;

fn build_driver(config: &BenchConfig, fio: &Path) -> Result<Driver> {
    let runner = CommandRunner::new(COMMAND_TIMEOUT);
    let admin = ZfsAdmin::new(runner.clone(), config.pool.clone(), config.disks.clone());

    let poll = Duration::from_secs(config.monitor.poll_interval_secs);
    let plan = FioPlan::new(config.pool.dataset_path(), poll);
    let binary = FioBinary::new(fio);
    debug!(cpus = plan.cpus, dataset = %plan.dataset_path.display(), "fio plan");

    let lifecycle = PoolLifecycle::new(admin, Box::new(PkillReaper::fio(runner)), config.lifecycle_settings());
    let supervisor = LoadGeneratorSupervisor::new(
        FioSpawner::new(binary.clone(), plan.clone()),
        Duration::from_secs(config.monitor.sample_timeout_secs),
    );
    let fill = FioFillBackend::new(binary, plan);

    let sink = CsvResultSink::open(&config.output.results, &config.sweep_axes())
        .with_context(|| format!("Failed to open results file {}", config.output.results.display()))?;
    let telemetry = match &config.output.telemetry {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open telemetry file {}", path.display()))?;
            let writer: Box<dyn Write + Send> = Box::new(file);
            Some(TelemetryRecorder::new(writer))
        }
        None => None,
    };
    let context = RunContext {
        sink: Box::new(sink),
        telemetry,
        checkpoints: Some(CheckpointStore::new(&config.output.checkpoint)),
    };

    Ok(TestMatrixDriver::new(
        DriverSettings::from_config(config),
        config.matrix.clone(),
        lifecycle,
        supervisor,
        fill,
        Box::new(ProcLoadAverage::default()),
        context,
    ))
}

async fn status_command(config: &BenchConfig, args: StatusArgs) -> Result<()> {
    let mut parser = StatusParser::new();
    if let Some(layout) = &args.layout {
        let family = LayoutSpec::new(layout.clone(), 1, 0)
            .family()
            .with_context(|| format!("Unknown redundancy family in '{layout}'"))?;
        parser = parser.with_family(family);
    }

    let text = match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read status report {}", path.display()))?,
        None => {
            let admin = ZfsAdmin::new(
                CommandRunner::new(COMMAND_TIMEOUT),
                config.pool.clone(),
                config.disks.clone(),
            );
            admin.query_status_text().await.context("Failed to query pool status")?
        }
    };

    let status = parser.parse(&text).context("Failed to parse status report")?;
    println!("{}", report::render_status(&status)?);
    Ok(())
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::SignalKind;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        () = wait_for(SignalKind::terminate()) => "SIGTERM",
        () = wait_for(SignalKind::hangup()) => "SIGHUP",
    }
}

async fn wait_for(kind: tokio::signal::unix::SignalKind) {
    match tokio::signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to register signal handler");
            std::future::pending::<()>().await;
        }
    }
}

fn kill_stray_generators() {
    match std::process::Command::new("pkill").arg("fio").status() {
        Ok(status) => debug!(?status, "pkill fio"),
        Err(e) => warn!(error = %e, "Failed to run pkill"),
    }
}
