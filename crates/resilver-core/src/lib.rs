//! # resilver-core
//!
//! Orchestration engine for the resilver benchmark.
//!
//! This crate provides:
//! - Parsing of pool status reports into typed resilver snapshots
//! - Running averages over monitoring ticks
//! - Supervision of background load generators
//! - The resilver monitor loop and the pool lifecycle state machine
//! - The pool failure-probability model
//! - The test matrix driver with checkpointing and result sinks
//!
//! Everything that touches the host sits behind the [`PoolAdmin`],
//! [`GeneratorSpawner`], [`FillBackend`], [`GeneratorReaper`] and
//! [`HostProbe`] traits; [`testing`] has deterministic doubles for each.

mod admin;
mod config;
mod driver;
mod fill;
pub mod fio_terse;
pub mod human;
mod lifecycle;
mod matrix;
mod monitor;
pub mod reliability;
pub mod running_average;
mod sink;
mod status_parser;
mod supervisor;
mod telemetry;
pub mod testing;

pub use admin::{DestroyOutcome, PoolAdmin, PoolPlan, SyncPolicy, device_path};
pub use config::{
    BenchConfig, ConfigError, ConfigWarning, DestroyConfig, DiskConfig, FillConfig, MonitorConfig,
    OutputConfig, PoolConfig, ProbeConfig, ReliabilityConfig,
};
pub use driver::{DriverSettings, HostProbe, RunContext, RunSummary, TestMatrixDriver};
pub use fill::{FillBackend, FillFile, FillReport, fill_ceiling, plan_prune};
pub use lifecycle::{GeneratorReaper, LifecycleSettings, PoolLifecycle, PoolState};
pub use matrix::{Checkpoint, CheckpointFile, CheckpointStore, Dims, Matrix, MatrixCursor};
pub use monitor::{GeneratorAverages, MonitorOutcome, MonitorSettings, ResilverMonitor, TickObservation};
pub use reliability::{ReliabilitySweep, SweepPoint, pool_afr};
pub use running_average::{LifetimeMeanTracker, RunningAverage};
pub use sink::{CsvResultSink, HEADER_MARKER, ResultRow, ResultSink, SweepAxes, escape_field, rotated_path};
pub use status_parser::StatusParser;
pub use supervisor::{
    GeneratorHandle, GeneratorProcess, GeneratorSpawner, LoadGeneratorSupervisor, NoTelemetry,
    SpawnedGenerator, TelemetrySource, TickSamples,
};
pub use telemetry::{Record, TelemetryRecorder, TickRecord};
