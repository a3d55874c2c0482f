//! Capacity snapshot of the pool under test.

use serde::{Deserialize, Serialize};

const TIB: f64 = 1024.0 * 1024.0 * 1024.0 * 1024.0;

/// Pool capacity at one instant. Read fresh on demand, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub used_bytes: u64,
    pub available_bytes: u64,
    /// Fragmentation in percent, if the pool reports it.
    pub fragmentation_percent: Option<u32>,
}

impl PoolSnapshot {
    pub fn total_bytes(&self) -> u64 {
        self.used_bytes + self.available_bytes
    }

    /// Used capacity in percent; zero for an empty (zero-sized) pool.
    pub fn used_percent(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / total as f64 * 100.0
    }

    pub fn used_tib(&self) -> f64 {
        self.used_bytes as f64 / TIB
    }

    pub fn available_tib(&self) -> f64 {
        self.available_bytes as f64 / TIB
    }

    pub fn total_tib(&self) -> f64 {
        self.total_bytes() as f64 / TIB
    }
}
