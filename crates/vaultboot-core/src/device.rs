//! Device classification and naming for the unlock batch.

use std::fmt;

const NVME_PREFIX: &str = "/dev/nvme";
const SATA_PREFIX: &str = "/dev/sd";
const PATA_PREFIX: &str = "/dev/hd";

/// Bus class a block device path resolves to.
///
/// `Unknown` is a first-class outcome: paths outside the recognised
/// prefixes are reported, never silently skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Nvme,
    Sata,
    Pata,
    Unknown,
}

impl BusKind {
    /// Classify a device path by its literal prefix.
    pub fn classify(path: &str) -> Self {
        if path.starts_with(NVME_PREFIX) {
            BusKind::Nvme
        } else if path.starts_with(SATA_PREFIX) {
            BusKind::Sata
        } else if path.starts_with(PATA_PREFIX) {
            BusKind::Pata
        } else {
            BusKind::Unknown
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BusKind::Nvme => "nvme",
            BusKind::Sata => "sata",
            BusKind::Pata => "pata",
            BusKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Serial and manufacturer extracted from an NVMe controller.
///
/// Both fields degrade to empty strings when the identity query fails or
/// the field is absent; callers should treat emptiness as "unresolved".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub serial: String,
    pub manufacturer: String,
}

impl DeviceIdentity {
    pub fn is_resolved(&self) -> bool {
        !self.serial.is_empty()
    }
}

/// Mapping name for an unlocked device: fixed prefix plus serial.
///
/// Uniqueness relies on serial uniqueness and is not enforced here.
pub fn mapper_name(prefix: &str, serial: &str) -> String {
    format!("{prefix}{serial}")
}

/// Per-device result of one unlock attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// Device opened; decrypted contents exposed at /dev/mapper/<mapping>.
    Unlocked { mapping: String },
    /// Attempted and failed; the batch continues regardless.
    Failed { reason: String },
    /// Recognised bus with no unlock support; never attempted.
    Unsupported { bus: BusKind },
    /// Matched none of the known prefixes; reported, not attempted.
    Unclassified,
}

/// One line of the batch report, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    /// 1-based position within the sorted batch.
    pub ordinal: usize,
    pub device: String,
    pub bus: BusKind,
    /// Present only for NVMe devices.
    pub identity: Option<DeviceIdentity>,
    pub outcome: UnlockOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_recognises_buses() {
        assert_eq!(BusKind::classify("/dev/nvme0n1"), BusKind::Nvme);
        assert_eq!(BusKind::classify("/dev/nvme1n1p2"), BusKind::Nvme);
        assert_eq!(BusKind::classify("/dev/sda1"), BusKind::Sata);
        assert_eq!(BusKind::classify("/dev/hdb"), BusKind::Pata);
    }

    #[test]
    fn classify_reports_unknown_paths() {
        assert_eq!(BusKind::classify("/dev/vda1"), BusKind::Unknown);
        assert_eq!(BusKind::classify("/dev/mmcblk0p1"), BusKind::Unknown);
        assert_eq!(BusKind::classify(""), BusKind::Unknown);
    }

    #[test]
    fn mapper_name_joins_prefix_and_serial() {
        assert_eq!(mapper_name("sn-", "ABC123"), "sn-ABC123");
        assert_eq!(mapper_name("sn-", ""), "sn-");
    }

    #[test]
    fn identity_resolution_tracks_serial() {
        assert!(!DeviceIdentity::default().is_resolved());
        let id = DeviceIdentity {
            serial: "S123".into(),
            manufacturer: String::new(),
        };
        assert!(id.is_resolved());
    }
}
