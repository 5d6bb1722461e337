use crate::device::DeviceIdentity;
use crate::error::VaultbootResult;
use std::path::Path;

/// Abstraction over block-device discovery and LUKS mapping commands.
///
/// Implementations are expected to provide a thin, testable surface over
/// the underlying system tools (blkid, nvme, cryptsetup), so the unlock
/// service can be exercised without real devices.
pub trait BlockProvider {
    /// Enumerate device paths whose on-disk format is LUKS.
    fn discover_luks_devices(&self) -> VaultbootResult<Vec<String>>;

    /// Query controller identity for an NVMe device. Defined only for the
    /// NVMe bus; the service never calls this for other classes.
    fn nvme_identity(&self, device: &str) -> VaultbootResult<DeviceIdentity>;

    /// Open `device` as `mapping` using key material at `key_path`.
    fn open_device(&self, device: &str, mapping: &str, key_path: &Path) -> VaultbootResult<()>;

    /// Open `device` as `mapping` with an interactive passphrase (keystore
    /// container bring-up).
    fn open_with_passphrase(
        &self,
        device: &str,
        mapping: &str,
        passphrase: &[u8],
    ) -> VaultbootResult<()>;

    /// Tear down a mapping. Closing an inactive mapping is not an error.
    fn close_mapping(&self, mapping: &str) -> VaultbootResult<()>;
}

/// Abstraction over pool import and recovery reporting commands.
pub trait PoolProvider {
    /// Force-import `pool` without mounting its filesystems.
    fn import_pool(&self, pool: &str, altroot: Option<&str>) -> VaultbootResult<()>;

    /// Human-readable pool status text.
    fn pool_status(&self, pool: &str) -> VaultbootResult<String>;

    /// Resolve the configured boot dataset, if any.
    fn boot_dataset(&self, pool: &str) -> VaultbootResult<Option<String>>;

    /// Most recent snapshots of `dataset`, newest first, at most `limit`.
    fn recent_snapshots(&self, dataset: &str, limit: usize) -> VaultbootResult<Vec<String>>;
}
