//! RAID Policy Table
//!
//! Static mapping from RAID profile to the structural constraints a pool
//! must satisfy: minimum disk count, parity, and the removal rule.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// =============================================================================
// Raid Level
// =============================================================================

/// Redundancy/striping profile of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaidLevel {
    Single,
    Raid0,
    Raid1,
    Raid10,
    Raid5,
    Raid6,
}

impl RaidLevel {
    /// All supported levels, in table order
    pub const ALL: [RaidLevel; 6] = [
        RaidLevel::Single,
        RaidLevel::Raid0,
        RaidLevel::Raid1,
        RaidLevel::Raid10,
        RaidLevel::Raid5,
        RaidLevel::Raid6,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RaidLevel::Single => "single",
            RaidLevel::Raid0 => "raid0",
            RaidLevel::Raid1 => "raid1",
            RaidLevel::Raid10 => "raid10",
            RaidLevel::Raid5 => "raid5",
            RaidLevel::Raid6 => "raid6",
        }
    }

    /// Structural constraints for this level
    pub const fn policy(&self) -> RaidPolicy {
        match self {
            RaidLevel::Single => RaidPolicy::new(1, false, RemovalRule::Forbidden),
            RaidLevel::Raid0 => RaidPolicy::new(2, false, RemovalRule::Forbidden),
            RaidLevel::Raid1 => RaidPolicy::new(2, false, RemovalRule::ExactBatch(1)),
            RaidLevel::Raid10 => RaidPolicy::new(4, true, RemovalRule::ExactBatch(2)),
            RaidLevel::Raid5 => RaidPolicy::new(3, false, RemovalRule::Forbidden),
            RaidLevel::Raid6 => RaidPolicy::new(4, false, RemovalRule::Forbidden),
        }
    }

    /// Profile used for metadata when formatting.
    ///
    /// `single` data keeps two metadata copies on the same device.
    pub fn metadata_profile(&self) -> &'static str {
        match self {
            RaidLevel::Single => "dup",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RaidLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RaidLevel::ALL
            .iter()
            .copied()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| Error::InvalidRaidLevel {
                level: s.to_string(),
            })
    }
}

/// Supported levels formatted for error messages
pub fn supported_level_list() -> String {
    let quoted: Vec<String> = RaidLevel::ALL
        .iter()
        .map(|level| format!("'{}'", level.as_str()))
        .collect();
    format!("({})", quoted.join(", "))
}

// =============================================================================
// Raid Policy
// =============================================================================

/// Whether, and how many, disks may leave a pool in one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalRule {
    /// Disks may never be removed
    Forbidden,
    /// Exactly this many disks per remove operation
    ExactBatch(usize),
}

/// Constraints for one raid level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaidPolicy {
    /// Minimum disk count to create or keep the pool
    pub min_disks: usize,
    /// Disk count must stay even
    pub even_required: bool,
    /// Removal rule
    pub removal: RemovalRule,
}

impl RaidPolicy {
    const fn new(min_disks: usize, even_required: bool, removal: RemovalRule) -> Self {
        Self {
            min_disks,
            even_required,
            removal,
        }
    }

    pub fn remove_allowed(&self) -> bool {
        matches!(self.removal, RemovalRule::ExactBatch(_))
    }

    pub fn remove_batch(&self) -> Option<usize> {
        match self.removal {
            RemovalRule::ExactBatch(n) => Some(n),
            RemovalRule::Forbidden => None,
        }
    }

    /// Check a disk count a pool is being created with (or converted to)
    pub fn check_disk_count(&self, level: RaidLevel, count: usize) -> Result<()> {
        if count < self.min_disks {
            return Err(Error::InsufficientDisks {
                level: level.to_string(),
                min_disks: self.min_disks,
            });
        }
        if self.even_required && count % 2 != 0 {
            return Err(Error::OddDiskCount {
                level: level.to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Capacity Bound
// =============================================================================

/// Upper bound of bytes storable on `disk_sizes` under `level`.
///
/// Chunk allocation bound: start from the trivial bound (total / chunks per
/// allocation), then find the first device that would fill up before the
/// devices after it, and recurse on the devices up to it.
pub fn usable_capacity(level: RaidLevel, disk_sizes: &[u64]) -> u64 {
    let mut sizes = disk_sizes.to_vec();
    sizes.sort_unstable_by(|a, b| b.cmp(a));
    capacity_bound(level, &sizes)
}

fn capacity_bound(level: RaidLevel, sizes: &[u64]) -> u64 {
    let num_devices = sizes.len() as u64;

    let mut data_ratio = 1u64;
    let mut stripes = 1u64;
    let mut parity = 0u64;
    let mut chunks = num_devices;

    match level {
        RaidLevel::Single => chunks = 1,
        RaidLevel::Raid0 => stripes = 2,
        RaidLevel::Raid1 => {
            data_ratio = 2;
            chunks = 2;
        }
        RaidLevel::Raid10 => {
            data_ratio = 2;
            stripes = std::cmp::max(2, num_devices / 2);
        }
        RaidLevel::Raid5 => parity = 1,
        RaidLevel::Raid6 => parity = 2,
    }

    chunks -= chunks % data_ratio;

    if num_devices < data_ratio * (stripes + parity) || chunks == 0 {
        return 0;
    }

    let per_allocation = chunks / data_ratio - parity;
    let mut bound = sizes.iter().sum::<u64>() / chunks;
    let mut bounding_q = None;

    for q in 0..(chunks - 1) as usize {
        let slice: u64 = sizes[q + 1..].iter().sum();
        let b = slice / (chunks - q as u64 - 1);
        if sizes[q] >= b && b < bound {
            bound = b;
            bounding_q = Some(q);
        }
    }

    match bounding_q {
        None => bound * per_allocation,
        Some(q) => {
            // Devices past q are full; the ones up to q lost `bound` each.
            let remaining: Vec<u64> = sizes[..=q].iter().map(|s| s - bound).collect();
            bound * per_allocation + capacity_bound(level, &remaining)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const GB: u64 = 1_000_000_000;

    #[test]
    fn test_policy_table() {
        let expected = [
            (RaidLevel::Single, 1, false, None),
            (RaidLevel::Raid0, 2, false, None),
            (RaidLevel::Raid1, 2, false, Some(1)),
            (RaidLevel::Raid10, 4, true, Some(2)),
            (RaidLevel::Raid5, 3, false, None),
            (RaidLevel::Raid6, 4, false, None),
        ];

        for (level, min, even, batch) in expected {
            let policy = level.policy();
            assert_eq!(policy.min_disks, min, "{}", level);
            assert_eq!(policy.even_required, even, "{}", level);
            assert_eq!(policy.remove_batch(), batch, "{}", level);
            assert_eq!(policy.remove_allowed(), batch.is_some(), "{}", level);
        }
    }

    #[test]
    fn test_parse_levels() {
        for level in RaidLevel::ALL {
            assert_eq!(level.as_str().parse::<RaidLevel>().unwrap(), level);
        }
        assert_matches!(
            "derp".parse::<RaidLevel>(),
            Err(Error::InvalidRaidLevel { level }) if level == "derp"
        );
        // Case matters at the boundary
        assert!("RAID1".parse::<RaidLevel>().is_err());
    }

    #[test]
    fn test_check_disk_count() {
        let policy = RaidLevel::Raid10.policy();
        assert_matches!(
            policy.check_disk_count(RaidLevel::Raid10, 2),
            Err(Error::InsufficientDisks { min_disks: 4, .. })
        );
        assert_matches!(
            policy.check_disk_count(RaidLevel::Raid10, 5),
            Err(Error::OddDiskCount { .. })
        );
        assert!(policy.check_disk_count(RaidLevel::Raid10, 6).is_ok());

        let policy = RaidLevel::Raid5.policy();
        assert!(policy.check_disk_count(RaidLevel::Raid5, 3).is_ok());
        assert!(policy.check_disk_count(RaidLevel::Raid5, 2).is_err());
    }

    #[test]
    fn test_metadata_profile() {
        assert_eq!(RaidLevel::Single.metadata_profile(), "dup");
        assert_eq!(RaidLevel::Raid1.metadata_profile(), "raid1");
    }

    #[test]
    fn test_usable_capacity_equal_disks() {
        let two = [100 * GB, 100 * GB];
        assert_eq!(usable_capacity(RaidLevel::Single, &two), 200 * GB);
        assert_eq!(usable_capacity(RaidLevel::Raid0, &two), 200 * GB);
        assert_eq!(usable_capacity(RaidLevel::Raid1, &two), 100 * GB);

        let three = [100 * GB; 3];
        assert_eq!(usable_capacity(RaidLevel::Raid5, &three), 200 * GB);

        let four = [100 * GB; 4];
        assert_eq!(usable_capacity(RaidLevel::Raid10, &four), 200 * GB);
        assert_eq!(usable_capacity(RaidLevel::Raid6, &four), 200 * GB);
    }

    #[test]
    fn test_usable_capacity_uneven_mirror() {
        // A 300G disk can only be mirrored against the 200G on the others
        let sizes = [100 * GB, 300 * GB, 100 * GB];
        assert_eq!(usable_capacity(RaidLevel::Raid1, &sizes), 200 * GB);
    }

    #[test]
    fn test_usable_capacity_too_few_devices() {
        assert_eq!(usable_capacity(RaidLevel::Raid1, &[100 * GB]), 0);
        assert_eq!(usable_capacity(RaidLevel::Raid5, &[100 * GB; 1]), 0);
        assert_eq!(usable_capacity(RaidLevel::Single, &[]), 0);
    }
}
