//! # resilver-proto
//!
//! Shared types, error definitions, and value objects for the resilver benchmark.
//!
//! This crate provides the foundational vocabulary used across all resilver crates,
//! including:
//! - The typed resilver status snapshot and throughput units
//! - Pool layouts, redundancy families, and test configurations
//! - Load-generator roles and telemetry samples
//! - The error taxonomy shared by the orchestration engine

mod error;
mod layout;
mod sample;
mod snapshot;
mod status;

pub use error::{AdminError, Error, ParseError, Result};
pub use layout::{Configuration, FragLevel, LayoutSpec, RedundancyFamily, StressLevel, StressProfile};
pub use sample::{GeneratorRole, Sample};
pub use snapshot::PoolSnapshot;
pub use status::{ResilverCompletion, ResilverProgress, ResilverStatus, Throughput};
