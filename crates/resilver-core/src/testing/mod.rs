//! Test doubles for deterministic tests of the orchestration engine.
//!
//! Every double records what was asked of it and shares that record across
//! clones, so a test can hand one clone to the engine and inspect another.

mod doubles;
mod scripted_pool;
mod scripted_spawner;

pub use doubles::{FixedHostProbe, MemoryFillBackend, MemorySink, RecordingReaper};
pub use scripted_pool::{AdminCall, ScriptedPool};
pub use scripted_spawner::{ScriptedSpawner, StreamScript};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, ignoring poisoning from a panicked test thread.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
