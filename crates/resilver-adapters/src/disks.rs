//! Disk discovery from `lsblk`.

/// Arguments for listing whole disks with their sizes.
pub fn lsblk_args() -> Vec<String> {
    ["-d", "-n", "--output", "NAME,SIZE"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Picks the disks whose reported size equals `physical_size`, in listing order.
///
/// Input is `lsblk -d -n --output NAME,SIZE`, one `name size` pair per line.
pub fn eligible_disks(listing: &str, physical_size: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let name = cols.next()?;
            let size = cols.next()?;
            (size == physical_size).then(|| name.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
sda     7.3T
sdb     7.3T
nvme0n1 931.5G
sdc     7.3T
loop0
sdd     3.6T
";

    #[test]
    fn test_filters_by_size() {
        assert_eq!(eligible_disks(LISTING, "7.3T"), vec!["sda", "sdb", "sdc"]);
        assert_eq!(eligible_disks(LISTING, "3.6T"), vec!["sdd"]);
    }

    #[test]
    fn test_no_match() {
        assert!(eligible_disks(LISTING, "14.6T").is_empty());
        assert!(eligible_disks("", "7.3T").is_empty());
    }
}
