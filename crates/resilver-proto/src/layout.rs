//! Pool layouts and test configurations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Redundancy family of a vdev.
///
/// The family decides which fields a status report carries, so the status
/// parser keeps one rule set per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedundancyFamily {
    /// Parity with distributed spare capacity (dRAID).
    DistributedSpare,
    /// Plain parity (RAIDZ).
    Parity,
    /// N-way mirror.
    Mirror,
}

impl RedundancyFamily {
    /// Keyword identifying the family in layout strings and status reports.
    pub fn keyword(self) -> &'static str {
        match self {
            RedundancyFamily::DistributedSpare => "draid",
            RedundancyFamily::Parity => "raidz",
            RedundancyFamily::Mirror => "mirror",
        }
    }

    /// Classifies a layout string or status report by keyword.
    ///
    /// `draid` is checked first: a dRAID report never mentions `raidz`, but the
    /// reverse order would be wrong if it ever did.
    pub fn detect(text: &str) -> Option<Self> {
        [
            RedundancyFamily::DistributedSpare,
            RedundancyFamily::Parity,
            RedundancyFamily::Mirror,
        ]
        .into_iter()
        .find(|family| text.contains(family.keyword()))
    }
}

impl fmt::Display for RedundancyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A vdev layout under test: `zpool create` layout keyword, vdev width and spare floor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayoutSpec {
    /// Layout keyword as passed to `zpool create`, e.g. `raidz2` or `draid2:8d:82c:2s`.
    pub layout: String,

    /// Number of disks per vdev.
    pub width: u32,

    /// Minimum number of hot spares set aside before vdevs are formed.
    #[serde(default)]
    pub min_spares: u32,
}

impl LayoutSpec {
    pub fn new(layout: impl Into<String>, width: u32, min_spares: u32) -> Self {
        Self {
            layout: layout.into(),
            width,
            min_spares,
        }
    }

    /// Redundancy family, or `None` for an unrecognized layout keyword.
    pub fn family(&self) -> Option<RedundancyFamily> {
        RedundancyFamily::detect(&self.layout)
    }

    /// Number of disk failures a single vdev tolerates.
    ///
    /// `raidz`/`draid` without a digit mean single parity; an N-way mirror
    /// tolerates N-1 failures.
    pub fn parity_level(&self) -> Option<u32> {
        match self.family()? {
            RedundancyFamily::Mirror => Some(self.width.saturating_sub(1)),
            family => {
                let rest = self.layout.strip_prefix(family.keyword())?;
                let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
                if digits.is_empty() {
                    Some(1)
                } else {
                    digits.parse().ok()
                }
            }
        }
    }
}

impl fmt::Display for LayoutSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x{}", self.layout, self.width)
    }
}

/// Fragmentation level induced during fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragLevel {
    None,
    Med,
    High,
}

impl FragLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            FragLevel::None => "none",
            FragLevel::Med => "med",
            FragLevel::High => "high",
        }
    }

    /// Fragmented fills overfill to 100% and prune back down.
    pub fn is_fragmented(self) -> bool {
        self != FragLevel::None
    }
}

impl fmt::Display for FragLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intensity of a background load generator. `None` means the generator is not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StressLevel {
    #[default]
    None,
    Med,
    High,
}

impl StressLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            StressLevel::None => "none",
            StressLevel::Med => "med",
            StressLevel::High => "high",
        }
    }

    pub fn is_active(self) -> bool {
        self != StressLevel::None
    }
}

impl fmt::Display for StressLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU and disk stress applied during one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StressProfile {
    #[serde(default)]
    pub cpu: StressLevel,
    #[serde(default)]
    pub disk: StressLevel,
}

impl StressProfile {
    pub fn new(cpu: StressLevel, disk: StressLevel) -> Self {
        Self { cpu, disk }
    }
}

impl fmt::Display for StressProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu={} disk={}", self.cpu, self.disk)
    }
}

/// One test case of the matrix. Immutable once produced by the matrix cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub layout: LayoutSpec,
    pub frag: FragLevel,
    pub record_size: String,
    pub stress: StressProfile,
}

impl Configuration {
    /// Returns true if `other` can run on the same pool without recreating it.
    ///
    /// Only the stress profile may differ between cases sharing a pool.
    pub fn shares_pool_with(&self, other: &Configuration) -> bool {
        self.layout == other.layout && self.frag == other.frag && self.record_size == other.record_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_family() {
        assert_eq!(
            RedundancyFamily::detect("draid2:8d:82c:2s"),
            Some(RedundancyFamily::DistributedSpare)
        );
        assert_eq!(RedundancyFamily::detect("raidz3"), Some(RedundancyFamily::Parity));
        assert_eq!(RedundancyFamily::detect("mirror"), Some(RedundancyFamily::Mirror));
        assert_eq!(RedundancyFamily::detect("stripe"), None);
    }

    #[test]
    fn test_parity_level_from_layout_keyword() {
        assert_eq!(LayoutSpec::new("draid2:32d:82c:2s", 82, 0).parity_level(), Some(2));
        assert_eq!(LayoutSpec::new("draid", 10, 0).parity_level(), Some(1));
        assert_eq!(LayoutSpec::new("raidz", 5, 0).parity_level(), Some(1));
        assert_eq!(LayoutSpec::new("raidz3", 10, 0).parity_level(), Some(3));
        assert_eq!(LayoutSpec::new("mirror", 3, 1).parity_level(), Some(2));
        assert_eq!(LayoutSpec::new("bogus", 3, 1).parity_level(), None);
    }

    #[test]
    fn test_levels_deserialize_lowercase() {
        let profile: StressProfile = serde_json::from_str(r#"{"cpu":"med","disk":"none"}"#).unwrap();
        assert_eq!(profile.cpu, StressLevel::Med);
        assert!(!profile.disk.is_active());

        let frag: FragLevel = serde_json::from_str(r#""high""#).unwrap();
        assert!(frag.is_fragmented());
    }

    #[test]
    fn test_shares_pool_ignores_stress() {
        let base = Configuration {
            layout: LayoutSpec::new("raidz2", 10, 0),
            frag: FragLevel::None,
            record_size: "1M".into(),
            stress: StressProfile::default(),
        };
        let mut other = base.clone();
        other.stress = StressProfile::new(StressLevel::High, StressLevel::High);
        assert!(base.shares_pool_with(&other));

        other.record_size = "128k".into();
        assert!(!base.shares_pool_with(&other));
    }
}
