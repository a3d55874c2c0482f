//! Decoder for fio terse (version 3) status records.
//!
//! Each status interval fio prints one semicolon-separated record with a fixed
//! field order. Only the handful of fields the benchmark reports are read.
//! Anything that is not a v3 record (startup warnings, job banners) decodes to
//! `None` and is treated as an absent sample by the supervisor.

use resilver_proto::Sample;

/// Zero-based positions of the fields read from a v3 terse record.
///
/// A v3 record is a 5-field header, 41 read fields, 41 write fields, then CPU
/// usage. Disk utilization groups follow only when fio can map the target to a
/// block device, so they are never relied on.
pub mod field {
    pub const TERSE_VERSION: usize = 0;
    pub const READ_BW_KIB: usize = 6;
    pub const READ_IOPS: usize = 7;
    pub const READ_LAT_MEAN_US: usize = 39;
    pub const WRITE_BW_KIB: usize = 47;
    pub const WRITE_IOPS: usize = 48;
    pub const WRITE_LAT_MEAN_US: usize = 80;
    pub const CPU_USER_PCT: usize = 87;
    pub const CPU_SYS_PCT: usize = 88;
}

/// Minimum field count of a usable record (through CPU system time).
pub const MIN_FIELDS: usize = field::CPU_SYS_PCT + 1;

/// Decodes one terse line into a sample.
pub fn decode(line: &str) -> Option<Sample> {
    let fields: Vec<&str> = line.trim().split(';').collect();
    if fields.len() < MIN_FIELDS || fields[field::TERSE_VERSION] != "3" {
        return None;
    }

    let num = |idx: usize| -> Option<f64> {
        let raw = fields[idx].trim().trim_end_matches('%');
        raw.parse().ok()
    };

    Some(Sample {
        read_iops: num(field::READ_IOPS)?,
        write_iops: num(field::WRITE_IOPS)?,
        read_bw_kib: num(field::READ_BW_KIB)?,
        write_bw_kib: num(field::WRITE_BW_KIB)?,
        read_lat_mean_us: num(field::READ_LAT_MEAN_US)?,
        write_lat_mean_us: num(field::WRITE_LAT_MEAN_US)?,
        cpu_user_pct: num(field::CPU_USER_PCT)?,
        cpu_sys_pct: num(field::CPU_SYS_PCT)?,
    })
}

/// Field count of a v3 record without disk utilization.
const RECORD_FIELDS: usize = 121;

/// Builds a v3 terse record with the given values and zeros elsewhere.
///
/// Used by test doubles that stand in for fio.
pub fn encode(sample: &Sample) -> String {
    let mut fields = vec!["0".to_string(); RECORD_FIELDS];
    fields[field::TERSE_VERSION] = "3".into();
    fields[1] = "fio-3.36".into();
    fields[2] = "probe".into();
    let mut set = |idx: usize, value: f64| fields[idx] = format!("{value}");
    set(field::READ_BW_KIB, sample.read_bw_kib);
    set(field::READ_IOPS, sample.read_iops);
    set(field::READ_LAT_MEAN_US, sample.read_lat_mean_us);
    set(field::WRITE_BW_KIB, sample.write_bw_kib);
    set(field::WRITE_IOPS, sample.write_iops);
    set(field::WRITE_LAT_MEAN_US, sample.write_lat_mean_us);
    fields[field::CPU_USER_PCT] = format!("{}%", sample.cpu_user_pct);
    fields[field::CPU_SYS_PCT] = format!("{}%", sample.cpu_sys_pct);
    fields.join(";")
}
