//! Incremental mean tracking.
//!
//! One [`RunningAverage`] exists per (metric, generator, test case). It starts
//! at the identity value, is updated once per observed sample, and is dropped
//! with the test case.

use serde::{Deserialize, Serialize};

/// Folds one sample into a running mean.
///
/// With `prior_count == 0` the prior mean is ignored and the sample becomes the mean.
pub fn update(prior_mean: f64, prior_count: u64, sample: f64) -> (f64, u64) {
    if prior_count == 0 {
        return (sample, 1);
    }
    let count = prior_count + 1;
    let mean = (prior_mean * prior_count as f64 + sample) / count as f64;
    (mean, count)
}

/// Recovers the value observed at tick `n` from two lifetime means.
///
/// Latency probes report the mean over their whole lifetime; given the mean
/// over `n` ticks and the mean over `n - 1` ticks, the marginal value is
/// `n * mean_n - (n - 1) * mean_prev`. For `n <= 1` the lifetime mean is the
/// marginal value.
pub fn decumulate(n: u64, mean_n: f64, mean_prev: f64) -> f64 {
    if n <= 1 {
        return mean_n;
    }
    n as f64 * mean_n - (n - 1) as f64 * mean_prev
}

/// Running mean of one metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningAverage {
    count: u64,
    mean: f64,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one sample. Zero is a legitimate sample and counts like any other.
    pub fn push(&mut self, sample: f64) {
        let (mean, count) = update(self.mean, self.count, sample);
        self.mean = mean;
        self.count = count;
    }

    /// Adds the sample if present; absent samples leave the average untouched.
    pub fn push_opt(&mut self, sample: Option<f64>) {
        if let Some(sample) = sample {
            self.push(sample);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Mean for reporting: `None` if nothing was observed or the mean stayed at zero.
    ///
    /// A rate of exactly zero is not a valid observation for throughput; reporting
    /// it would drag down averages across test cases.
    pub fn reportable(&self) -> Option<f64> {
        (self.count > 0 && self.mean != 0.0).then_some(self.mean)
    }
}

/// Tracks a lifetime-mean stream and yields per-interval marginal values.
///
/// Every record the producer emits must be observed, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LifetimeMeanTracker {
    intervals: u64,
    last_mean: f64,
}

impl LifetimeMeanTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the lifetime mean of the next interval and returns that interval's value.
    pub fn observe(&mut self, lifetime_mean: f64) -> f64 {
        self.intervals += 1;
        let marginal = decumulate(self.intervals, lifetime_mean, self.last_mean);
        self.last_mean = lifetime_mean;
        marginal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_sample_is_identity() {
        assert_eq!(update(123.0, 0, 7.0), (7.0, 1));
    }

    #[test]
    fn test_mean_of_sequence() {
        let mut avg = RunningAverage::new();
        for sample in [10.0, 20.0, 30.0] {
            avg.push(sample);
        }
        assert_eq!(avg.mean(), 20.0);
        assert_eq!(avg.count(), 3);
    }

    #[test]
    fn test_zero_samples_are_counted() {
        let mut avg = RunningAverage::new();
        avg.push(0.0);
        avg.push(10.0);
        assert_eq!(avg.count(), 2);
        assert_eq!(avg.mean(), 5.0);
    }

    #[test]
    fn test_reportable_hides_zero_means() {
        let mut avg = RunningAverage::new();
        assert_eq!(avg.reportable(), None);
        avg.push_opt(None);
        assert_eq!(avg.count(), 0);
        avg.push(0.0);
        assert_eq!(avg.reportable(), None);
        avg.push(4.0);
        assert_eq!(avg.reportable(), Some(2.0));
    }

    #[test]
    fn test_decumulate_constant_stream() {
        let mut tracker = LifetimeMeanTracker::new();
        for _ in 0..50 {
            assert_eq!(tracker.observe(5.0), 5.0);
        }
    }

    #[test]
    fn test_decumulate_recovers_marginals() {
        // Marginal values 10, 20, 30 give lifetime means 10, 15, 20.
        let mut tracker = LifetimeMeanTracker::new();
        assert_eq!(tracker.observe(10.0), 10.0);
        assert_eq!(tracker.observe(15.0), 20.0);
        assert_eq!(tracker.observe(20.0), 30.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn running_mean_matches_arithmetic_mean(
            samples in proptest::collection::vec(0.0_f64..10_000.0, 1..200),
        ) {
            let mut avg = RunningAverage::new();
            for &s in &samples {
                avg.push(s);
            }
            let expected = samples.iter().sum::<f64>() / samples.len() as f64;
            prop_assert!((avg.mean() - expected).abs() <= 1e-6 * expected.max(1.0));
            prop_assert_eq!(avg.count(), samples.len() as u64);
        }

        #[test]
        fn sample_count_only_increases(
            samples in proptest::collection::vec(proptest::option::of(0.0_f64..100.0), 0..100),
        ) {
            let mut avg = RunningAverage::new();
            let mut last = 0;
            for s in samples {
                avg.push_opt(s);
                prop_assert!(avg.count() >= last);
                last = avg.count();
            }
        }
    }
}
