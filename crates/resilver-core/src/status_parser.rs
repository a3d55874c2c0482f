//! Status report parsing.
//!
//! Turns the raw text of `zpool status` into a typed [`ResilverStatus`]. The
//! report layout depends on the redundancy family, so the parser first
//! classifies the family and then applies that family's rule set:
//!
//! ```text
//! status: One or more devices is currently being resilvered.  The pool will
//!   scan: resilver (draid2:8d:82c:2s-0) in progress since Mon Jan  1 00:00:00 2024
//!         1.23T scanned at 2.34G/s, 456G issued at 789M/s, 10.0T total
//!         12.3G resilvered, 4.56% done, 01:23:45 to go
//! ```
//!
//! Once the resilver finishes while the device is still faulted:
//!
//! ```text
//! status: One or more devices are faulted in response to persistent errors.
//!   scan: resilvered 10.2G in 00:01:00 with 0 errors on Mon Jan  1 00:01:00 2024
//! ```
//!
//! The grammar is a versioned contract with the status tool. Reports that
//! match no family fail loudly as [`ParseError::Structural`]; reports that
//! match a family but are missing fields (torn mid-update) fail as
//! [`ParseError::Transient`] so the caller can retry.

use crate::human::parse_hms;
use regex::{Captures, Regex};
use resilver_proto::{
    ParseError, RedundancyFamily, ResilverCompletion, ResilverProgress, ResilverStatus, Throughput,
};
use std::sync::LazyLock;
use std::time::Duration;

/// Marker for a resilver in flight.
const IN_PROGRESS_MARKER: &str = "currently being resilvered";

/// Marker for a finished resilver with the fault still active.
const UNRESOLVED_FAULT_MARKER: &str = "persistent errors";

const CLOCK: &str = r"(?:\d+ days? )?\d+:\d{2}:\d{2}";

static SCAN_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(?P<scanned>\S+) scanned(?: at (?P<scan_rate>\S+/s))?, (?P<issued>\S+) issued(?: at (?P<issue_rate>\S+/s))?",
    )
    .expect("static regex")
});

static DONE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?m)^\s*\S+ resilvered, (?P<pct>\d+(?:\.\d+)?)% done, (?:(?P<eta>{CLOCK}) to go|(?P<no_eta>no estimated completion time))"
    ))
    .expect("static regex")
});

static DRAID_COMPLETE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"resilvered \((?P<vdev>[^)]+)\) (?P<issued>\S+) in (?P<elapsed>{CLOCK})"
    ))
    .expect("static regex")
});

static PARITY_COMPLETE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"resilvered (?P<issued>[^\s(]\S*) in (?P<elapsed>{CLOCK})"
    ))
    .expect("static regex")
});

/// Field-extraction rules for one redundancy family.
struct FamilyRules {
    completion: &'static LazyLock<Regex>,
    /// Whether the family reports a scan rate while resilvering.
    reports_scan_rate: bool,
    /// Whether the family reports a scanned total after completion.
    reports_scanned_total: bool,
}

impl FamilyRules {
    fn for_family(family: RedundancyFamily) -> Self {
        match family {
            RedundancyFamily::DistributedSpare => Self {
                completion: &DRAID_COMPLETE,
                reports_scan_rate: true,
                reports_scanned_total: true,
            },
            RedundancyFamily::Parity | RedundancyFamily::Mirror => Self {
                completion: &PARITY_COMPLETE,
                reports_scan_rate: false,
                reports_scanned_total: false,
            },
        }
    }
}

/// Parser for pool status reports.
#[derive(Debug, Default, Clone)]
pub struct StatusParser {
    /// Family the pool was created with; reports of another family are rejected.
    expected: Option<RedundancyFamily>,
}

impl StatusParser {
    /// Creates a parser that accepts any known family.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the parser to reports of the given family.
    pub fn with_family(mut self, family: RedundancyFamily) -> Self {
        self.expected = Some(family);
        self
    }

    /// Classifies the redundancy family present in the report.
    pub fn classify(&self, text: &str) -> Result<RedundancyFamily, ParseError> {
        if text.trim().is_empty() {
            return Err(ParseError::Transient("empty status report".into()));
        }
        let family = RedundancyFamily::detect(text).ok_or_else(|| {
            ParseError::Structural("no draid, raidz or mirror vdev in status report".into())
        })?;
        match self.expected {
            Some(expected) if expected != family => Err(ParseError::Structural(format!(
                "expected a {expected} pool, report describes {family}"
            ))),
            _ => Ok(family),
        }
    }

    /// Parses one status report.
    pub fn parse(&self, text: &str) -> Result<ResilverStatus, ParseError> {
        let family = self.classify(text)?;
        let rules = FamilyRules::for_family(family);

        if text.contains(IN_PROGRESS_MARKER) {
            Self::parse_progress(text, &rules).map(ResilverStatus::Resilvering)
        } else if text.contains(UNRESOLVED_FAULT_MARKER) {
            Self::parse_completion(text, &rules).map(ResilverStatus::Complete)
        } else {
            Ok(ResilverStatus::Healthy)
        }
    }

    fn parse_progress(text: &str, rules: &FamilyRules) -> Result<ResilverProgress, ParseError> {
        let scan = SCAN_LINE
            .captures(text)
            .ok_or_else(|| ParseError::Transient("resilver in progress without scan line".into()))?;
        let done = DONE_LINE
            .captures(text)
            .ok_or_else(|| ParseError::Transient("resilver in progress without progress line".into()))?;

        let scan_rate = if rules.reports_scan_rate {
            optional_rate(&scan, "scan_rate")?
        } else {
            None
        };
        let issue_rate = optional_rate(&scan, "issue_rate")?;

        let percent_done: f64 = done["pct"]
            .parse()
            .map_err(|_| ParseError::Transient(format!("bad percentage '{}'", &done["pct"])))?;
        if !(0.0..=100.0).contains(&percent_done) {
            return Err(ParseError::Transient(format!(
                "percentage out of range: {percent_done}"
            )));
        }

        let eta = match done.name("eta") {
            Some(eta) => {
                let secs = parse_hms(eta.as_str()).ok_or_else(|| {
                    ParseError::Transient(format!("bad time remaining '{}'", eta.as_str()))
                })?;
                Duration::from_secs(secs)
            }
            // "no estimated completion time" once progress reaches 100%
            None => Duration::ZERO,
        };

        Ok(ResilverProgress {
            scan_rate,
            issue_rate,
            percent_done,
            eta,
        })
    }

    fn parse_completion(text: &str, rules: &FamilyRules) -> Result<ResilverCompletion, ParseError> {
        let done = rules.completion.captures(text).ok_or_else(|| {
            ParseError::Transient("fault reported without resilver completion line".into())
        })?;
        let elapsed = parse_hms(&done["elapsed"]).ok_or_else(|| {
            ParseError::Transient(format!("bad elapsed time '{}'", &done["elapsed"]))
        })?;

        let mut scanned = None;
        let mut issued = done["issued"].to_string();
        if rules.reports_scanned_total
            && let Some(totals) = SCAN_LINE.captures(text)
        {
            scanned = Some(totals["scanned"].to_string());
            issued = totals["issued"].to_string();
        }

        Ok(ResilverCompletion {
            elapsed: Duration::from_secs(elapsed),
            scanned,
            issued,
        })
    }
}

fn optional_rate(caps: &Captures<'_>, name: &str) -> Result<Option<Throughput>, ParseError> {
    match caps.name(name) {
        None => Ok(None),
        Some(m) => Throughput::parse(m.as_str())
            .map(Some)
            .ok_or_else(|| ParseError::Transient(format!("bad rate '{}'", m.as_str()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRAID_RESILVERING: &str = "  pool: tank
 state: DEGRADED
status: One or more devices is currently being resilvered.  The pool will
\tcontinue to function, possibly in a degraded state.
action: Wait for the resilver to complete.
  scan: resilver (draid2:8d:82c:2s-0) in progress since Mon Jan  1 00:00:00 2024
\t1.23T scanned at 2.34G/s, 456G issued at 789M/s, 10.0T total
\t12.3G resilvered, 4.56% done, 01:23:45 to go
config:

\tNAME                  STATE     READ WRITE CKSUM
\ttank                  DEGRADED     0     0     0
\t  draid2:8d:82c:2s-0  DEGRADED     0     0     0
";

    const RAIDZ_STARTING: &str = "  pool: tank
status: One or more devices is currently being resilvered.  The pool will
  scan: resilver in progress since Mon Jan  1 00:00:00 2024
\t1.00G scanned, 0B issued, 10.0T total
\t0B resilvered, 0.00% done, no estimated completion time
config:
\t  raidz2-0  DEGRADED     0     0     0
";

    #[test]
    fn test_draid_progress_has_both_rates() {
        let status = StatusParser::new().parse(DRAID_RESILVERING).unwrap();
        let ResilverStatus::Resilvering(progress) = status else {
            panic!("expected resilvering, got {status:?}");
        };
        assert_eq!(progress.scan_rate.unwrap().mb_per_sec(), 2_340.0);
        assert_eq!(progress.issue_rate.unwrap().mb_per_sec(), 789.0);
        assert_eq!(progress.percent_done, 4.56);
        assert_eq!(progress.eta, Duration::from_secs(5_025));
    }

    #[test]
    fn test_raidz_start_has_no_rates_and_zero_eta() {
        let status = StatusParser::new().parse(RAIDZ_STARTING).unwrap();
        let ResilverStatus::Resilvering(progress) = status else {
            panic!("expected resilvering");
        };
        assert!(progress.scan_rate.is_none());
        assert!(progress.issue_rate.is_none());
        assert_eq!(progress.percent_done, 0.0);
        assert_eq!(progress.eta, Duration::ZERO);
    }

    #[test]
    fn test_parity_family_ignores_scan_rate() {
        let text = RAIDZ_STARTING.replace(
            "1.00G scanned, 0B issued,",
            "1.00G scanned at 1.00G/s, 500M issued at 250M/s,",
        );
        let ResilverStatus::Resilvering(progress) = StatusParser::new().parse(&text).unwrap() else {
            panic!("expected resilvering");
        };
        assert!(progress.scan_rate.is_none());
        assert_eq!(progress.issue_rate.unwrap().mb_per_sec(), 250.0);
    }

    #[test]
    fn test_mirror_completion() {
        let text = "  pool: tank
status: One or more devices are faulted in response to persistent errors.
  scan: resilvered 10.2G in 00:01:00 with 0 errors on Mon Jan  1 00:01:00 2024
config:
\t  mirror-0  DEGRADED     0     0     0
";
        let ResilverStatus::Complete(done) = StatusParser::new().parse(text).unwrap() else {
            panic!("expected complete");
        };
        assert_eq!(done.elapsed, Duration::from_secs(60));
        assert_eq!(done.issued, "10.2G");
        assert!(done.scanned.is_none());
    }

    #[test]
    fn test_healthy_pool() {
        let text = "  pool: tank\n state: ONLINE\nconfig:\n\t  raidz2-0  ONLINE 0 0 0\nerrors: No known data errors\n";
        assert_eq!(StatusParser::new().parse(text).unwrap(), ResilverStatus::Healthy);
    }

    #[test]
    fn test_torn_progress_is_transient() {
        let torn = "status: One or more devices is currently being resilvered.\n\t  raidz2-0\n\t1.00G scanned";
        let err = StatusParser::new().parse(torn).unwrap_err();
        assert!(err.is_transient(), "{err}");
    }

    #[test]
    fn test_empty_report_is_transient() {
        assert!(StatusParser::new().parse("  \n").unwrap_err().is_transient());
    }

    #[test]
    fn test_unknown_family_is_structural() {
        let err = StatusParser::new()
            .parse("  pool: tank\n state: ONLINE\n\t  sda ONLINE\n")
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_expected_family_mismatch_is_structural() {
        let err = StatusParser::new()
            .with_family(RedundancyFamily::Mirror)
            .parse(DRAID_RESILVERING)
            .unwrap_err();
        assert!(matches!(err, ParseError::Structural(_)));
    }

    #[test]
    fn test_percent_over_hundred_is_transient() {
        let text = DRAID_RESILVERING.replace("4.56% done", "104.56% done");
        assert!(StatusParser::new().parse(&text).unwrap_err().is_transient());
    }
}
