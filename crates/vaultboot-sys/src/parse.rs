//! Helpers for turning blkid, nvme, zpool, and zfs CLI output into data the
//! rest of the crate can reason about.

use regex::Regex;
use std::sync::OnceLock;
use vaultboot_core::device::DeviceIdentity;

/// Split newline-separated device or dataset listings, dropping blanks.
pub(crate) fn parse_name_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn identity_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(sn|mn)\s*:\s*(.*)$").expect("static identity regex"))
}

/// Extract serial (`sn`) and manufacturer (`mn`) fields from
/// `nvme id-ctrl` output. Missing fields stay empty; the caller decides
/// whether that matters.
pub(crate) fn parse_nvme_identity(output: &str) -> DeviceIdentity {
    let mut identity = DeviceIdentity::default();
    for line in output.lines() {
        if let Some(caps) = identity_line_re().captures(line.trim()) {
            let value = caps[2].trim().to_string();
            match &caps[1] {
                "sn" => identity.serial = value,
                "mn" => identity.manufacturer = value,
                _ => unreachable!("regex alternation is closed"),
            }
        }
    }
    identity
}

/// Normalize a `zpool get -H -o value` result; `-` means unset.
pub(crate) fn parse_property_value(output: &str) -> Option<String> {
    let value = output.trim();
    if value.is_empty() || value == "-" {
        None
    } else {
        Some(value.to_string())
    }
}

/// Newest snapshots from a creation-ascending `zfs list` run: take the
/// tail and flip it so the most recent entry comes first.
pub(crate) fn newest_snapshots(output: &str, limit: usize) -> Vec<String> {
    let names = parse_name_list(output);
    let skip = names.len().saturating_sub(limit);
    let mut recent: Vec<String> = names.into_iter().skip(skip).collect();
    recent.reverse();
    recent
}
