//! Duration formatting and `HH:MM:SS` parsing.

use std::time::Duration;

/// Parses `HH:MM:SS` (hours unbounded) with an optional `N days ` prefix into seconds.
///
/// Returns `None` if minutes or seconds are out of range or any part is not numeric.
pub fn parse_hms(text: &str) -> Option<u64> {
    let text = text.trim();
    let (days, clock) = match text.split_once(" day") {
        Some((days, rest)) => {
            let days: u64 = days.trim().parse().ok()?;
            let clock = rest.trim_start_matches('s').trim();
            (days, clock)
        }
        None => (0, text),
    };

    let mut parts = clock.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }

    Some(days * 86_400 + hours * 3_600 + minutes * 60 + seconds)
}

/// Formats a duration as `1d 02h 03m 04s`, dropping leading zero units.
pub fn format_dhms(duration: Duration) -> String {
    let total = duration.as_secs();
    let (minutes, seconds) = (total / 60, total % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    let (days, hours) = (hours / 24, hours % 24);

    if days != 0 {
        format!("{days}d {hours:02}h {minutes:02}m {seconds:02}s")
    } else if hours != 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes != 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds:02}s")
    }
}

/// Formats seconds as zero-padded `HH:MM:SS`, letting hours grow past two digits.
pub fn format_hms(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3_600, (total / 60) % 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hms() {
        assert_eq!(parse_hms("00:01:00"), Some(60));
        assert_eq!(parse_hms("01:23:45"), Some(5_025));
        assert_eq!(parse_hms("250:00:01"), Some(900_001));
    }

    #[test]
    fn test_parse_hms_with_days() {
        assert_eq!(parse_hms("1 days 00:00:10"), Some(86_410));
        assert_eq!(parse_hms("2 day 01:00:00"), Some(2 * 86_400 + 3_600));
    }

    #[test]
    fn test_parse_hms_rejects_malformed() {
        assert_eq!(parse_hms("no"), None);
        assert_eq!(parse_hms("00:61:00"), None);
        assert_eq!(parse_hms("1:2"), None);
        assert_eq!(parse_hms("00:00:00:00"), None);
    }

    #[test]
    fn test_format_dhms() {
        assert_eq!(format_dhms(Duration::from_secs(4)), "04s");
        assert_eq!(format_dhms(Duration::from_secs(184)), "3m 04s");
        assert_eq!(format_dhms(Duration::from_secs(7_384)), "2h 03m 04s");
        assert_eq!(format_dhms(Duration::from_secs(93_784)), "1d 02h 03m 04s");
    }

    #[test]
    fn test_format_hms_round_trips_large_hours() {
        let d = Duration::from_secs(360_061);
        assert_eq!(format_hms(d), "100:01:01");
        assert_eq!(parse_hms(&format_hms(d)), Some(360_061));
    }
}
