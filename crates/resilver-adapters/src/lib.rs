//! # resilver-adapters
//!
//! Host implementations of the resilver-core seams.
//!
//! - [`ZfsAdmin`] drives `zpool`, `zfs` and `lsblk`
//! - [`FioSpawner`] and [`FioFillBackend`] run fio for load and fill
//! - [`ProcLoadAverage`] and [`PkillReaper`] cover host probing and cleanup
//!
//! All of them run external programs through [`CommandRunner`] or tokio
//! child processes, with SIGTERM-then-SIGKILL termination.

mod command;
mod disks;
mod fill;
mod fio;
mod fio_spawner;
mod host;
mod zfs;

pub use command::{CommandOutput, CommandRunner, render};
pub use disks::{eligible_disks, lsblk_args};
pub use fill::FioFillBackend;
pub use fio::{FioBinary, FioJob, FioPlan};
pub use fio_spawner::FioSpawner;
pub use host::{PkillReaper, ProcLoadAverage, parse_load_average};
pub use zfs::{ZfsAdmin, create_dataset_args, create_pool_args, parse_capacity};
