//! Reliability model.
//!
//! Maps a vdev geometry and a measured resilver duration to an estimated pool
//! annual failure rate. The model treats a disk failure as opening an exposure
//! window as long as the resilver; additional failures inside that window
//! beyond the vdev's parity level lose the vdev, and losing any vdev loses the
//! pool.

use serde::{Deserialize, Serialize};

pub const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// Disk AFRs swept by default: 1% through 10%.
pub const DEFAULT_DISK_AFRS: [f64; 10] = [0.01, 0.02, 0.03, 0.04, 0.05, 0.06, 0.07, 0.08, 0.09, 0.10];

/// Resilver duration multipliers swept by default: measured and a 100x stress case.
pub const DEFAULT_MULTIPLIERS: [f64; 2] = [1.0, 100.0];

/// Estimated probability that the pool fails within a year.
///
/// Builds a per-failure-order vector of length `parity_level + 1` where order 0
/// is the disk AFR and order `k` is `disk_afr * resilver_secs * k / year`, then
/// multiplies `(width - (k - 1)) * p[k - 1]` for `k` in `1..=parity_level + 1`.
/// The result is scaled by `vdev_count` and capped at 1.
pub fn pool_afr(width: u32, parity_level: u32, vdev_count: u32, disk_afr: f64, resilver_secs: f64) -> f64 {
    if parity_level >= width {
        // Every disk could fail without data loss; the model has no failure order to reach.
        return 0.0;
    }

    let exposure = disk_afr * resilver_secs / SECONDS_PER_YEAR;
    let probability_of_order = |order: u32| {
        if order == 0 {
            disk_afr
        } else {
            exposure * f64::from(order)
        }
    };

    let vdev_afr: f64 = (1..=parity_level + 1)
        .map(|k| f64::from(width - (k - 1)) * probability_of_order(k - 1))
        .product();

    (vdev_afr * f64::from(vdev_count)).min(1.0)
}

/// One point of a reliability sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub disk_afr: f64,
    pub multiplier: f64,
    pub pool_afr: f64,
}

/// Pool AFR estimates for a grid of disk AFRs and resilver-time multipliers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReliabilitySweep {
    pub points: Vec<SweepPoint>,
}

impl ReliabilitySweep {
    /// Evaluates the model for every (multiplier, disk AFR) pair.
    ///
    /// Points are ordered multiplier-major so each multiplier's AFR series is contiguous.
    pub fn compute(
        width: u32,
        parity_level: u32,
        vdev_count: u32,
        resilver_secs: f64,
        disk_afrs: &[f64],
        multipliers: &[f64],
    ) -> Self {
        let points = multipliers
            .iter()
            .flat_map(|&multiplier| {
                disk_afrs.iter().map(move |&disk_afr| SweepPoint {
                    disk_afr,
                    multiplier,
                    pool_afr: pool_afr(width, parity_level, vdev_count, disk_afr, resilver_secs * multiplier),
                })
            })
            .collect();
        Self { points }
    }

    /// Points for one multiplier, in disk AFR order.
    pub fn series(&self, multiplier: f64) -> impl Iterator<Item = &SweepPoint> {
        self.points.iter().filter(move |p| p.multiplier == multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_parity_formula() {
        // width 10, parity 1: 10 * afr * 9 * (afr * t / year)
        let afr = 0.05;
        let t = 3_600.0;
        let expected = 10.0 * afr * 9.0 * (afr * t / SECONDS_PER_YEAR);
        assert!((pool_afr(10, 1, 1, afr, t) - expected).abs() < 1e-18);
    }

    #[test]
    fn test_vdev_count_scales_linearly() {
        let one = pool_afr(10, 2, 1, 0.03, 7_200.0);
        let four = pool_afr(10, 2, 4, 0.03, 7_200.0);
        assert!((four - 4.0 * one).abs() < 1e-20);
    }

    #[test]
    fn test_parity_at_width_is_zero() {
        assert_eq!(pool_afr(2, 2, 1, 0.1, 1e6), 0.0);
    }

    #[test]
    fn test_default_sweep_shape() {
        let sweep = ReliabilitySweep::compute(10, 2, 1, 60.0, &DEFAULT_DISK_AFRS, &DEFAULT_MULTIPLIERS);
        assert_eq!(sweep.points.len(), 20);

        let measured: Vec<f64> = sweep.series(1.0).map(|p| p.pool_afr).collect();
        assert_eq!(measured.len(), 10);
        assert!(measured.windows(2).all(|w| w[0] < w[1]));

        let stressed: Vec<f64> = sweep.series(100.0).map(|p| p.pool_afr).collect();
        assert!(stressed.iter().zip(&measured).all(|(s, m)| s > m));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn non_decreasing_in_disk_afr(
            width in 3_u32..100,
            parity in 1_u32..3,
            vdevs in 1_u32..10,
            secs in 1.0_f64..1e6,
            a in 0.001_f64..0.2,
            b in 0.001_f64..0.2,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(pool_afr(width, parity, vdevs, lo, secs) <= pool_afr(width, parity, vdevs, hi, secs));
        }

        #[test]
        fn more_parity_is_more_reliable(
            width in 5_u32..100,
            parity in 1_u32..3,
            afr in 0.001_f64..0.2,
            secs in 1.0_f64..100_000.0,
        ) {
            prop_assert!(pool_afr(width, parity + 1, 1, afr, secs) < pool_afr(width, parity, 1, afr, secs));
        }
    }
}
