//! High-level unlock orchestration: the device batch loop, the operator
//! decision model, and the pool bootstrap step.

use crate::config::VaultbootConfig;
use crate::device::{mapper_name, BusKind, DeviceIdentity, DeviceReport, UnlockOutcome};
use crate::error::VaultbootResult;
use crate::keyfile;
use crate::provider::{BlockProvider, PoolProvider};
use log::{debug, info, warn};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Operator choice from the boot menu.
///
/// Returned explicitly from the decision gate and threaded into
/// [`bootstrap_pool`]; there is no hidden shared flag. The default is the
/// fail-safe: keep the interactive shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootDecision {
    /// Unlock, import, and hand off to normal boot.
    Resume,
    /// Unlock, import, then stay in the recovery shell.
    #[default]
    RecoveryShell,
}

/// Terminal result of the bootstrap step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome {
    /// Key source closed, lock marker removed; boot resumes externally.
    Resume,
    /// Recovery halt: the caller prints this and exits nonzero.
    Recovery {
        status: String,
        boot_dataset: Option<String>,
        snapshots: Vec<String>,
    },
}

/// Drives discovery, classification, and per-device unlock.
pub struct UnlockService<B: BlockProvider> {
    config: Arc<VaultbootConfig>,
    blocks: B,
}

impl<B: BlockProvider> UnlockService<B> {
    pub fn new(config: Arc<VaultbootConfig>, blocks: B) -> Self {
        Self { config, blocks }
    }

    /// Enumerate LUKS devices, sort them, and attempt each in order.
    ///
    /// Per-device failures are recorded in the report and never abort the
    /// batch. An empty discovery result short-circuits before the key
    /// source is even checked.
    pub fn unlock_all(&self) -> VaultbootResult<Vec<DeviceReport>> {
        let mut devices = self.blocks.discover_luks_devices()?;
        if devices.is_empty() {
            debug!("no LUKS devices discovered; nothing to unlock");
            return Ok(Vec::new());
        }
        devices.sort();

        let key_path = self.config.key_path();
        keyfile::verify_key_source(&key_path, self.config.keystore.expected_sha256.as_deref())?;

        let mut reports = Vec::with_capacity(devices.len());
        for (idx, device) in devices.into_iter().enumerate() {
            let ordinal = idx + 1;
            let bus = BusKind::classify(&device);
            let report = match bus {
                BusKind::Nvme => self.unlock_nvme(ordinal, device, &key_path),
                BusKind::Sata | BusKind::Pata => {
                    info!("device {device} on {bus} bus: unlock not implemented");
                    DeviceReport {
                        ordinal,
                        device,
                        bus,
                        identity: None,
                        outcome: UnlockOutcome::Unsupported { bus },
                    }
                }
                BusKind::Unknown => {
                    warn!("device {device} matches no known bus prefix; not attempted");
                    DeviceReport {
                        ordinal,
                        device,
                        bus,
                        identity: None,
                        outcome: UnlockOutcome::Unclassified,
                    }
                }
            };
            reports.push(report);
        }

        Ok(reports)
    }

    /// NVMe path: identity first, then open under the serial-derived name.
    fn unlock_nvme(&self, ordinal: usize, device: String, key_path: &Path) -> DeviceReport {
        let identity = match self.blocks.nvme_identity(&device) {
            Ok(identity) => identity,
            Err(err) => {
                warn!("identity query failed for {device}: {err}");
                DeviceIdentity::default()
            }
        };
        if !identity.is_resolved() {
            warn!("no serial resolved for {device}; mapping name may collide");
        }

        let mapping = mapper_name(&self.config.unlock.mapper_prefix, &identity.serial);
        let outcome = match self.blocks.open_device(&device, &mapping, key_path) {
            Ok(()) => UnlockOutcome::Unlocked { mapping },
            Err(err) => UnlockOutcome::Failed {
                reason: err.to_string(),
            },
        };

        DeviceReport {
            ordinal,
            device,
            bus: BusKind::Nvme,
            identity: Some(identity),
            outcome,
        }
    }
}

/// Import the pool, then act on the operator decision.
///
/// The import always runs before the decision is consulted and its failure
/// is fatal. In recovery mode the status/snapshot queries are advisory and
/// degrade to placeholders so the shell is still reached.
pub fn bootstrap_pool<B, P>(
    config: &VaultbootConfig,
    blocks: &B,
    pools: &P,
    decision: BootDecision,
) -> VaultbootResult<BootOutcome>
where
    B: BlockProvider,
    P: PoolProvider,
{
    let pool = config.pool.name.as_str();
    pools.import_pool(pool, config.pool.altroot.as_deref())?;
    info!("pool {pool} imported (no mount)");

    match decision {
        BootDecision::RecoveryShell => {
            let status = pools
                .pool_status(pool)
                .unwrap_or_else(|err| format!("pool status unavailable: {err}"));

            let boot_dataset = pools.boot_dataset(pool).unwrap_or_else(|err| {
                warn!("boot dataset query failed for {pool}: {err}");
                None
            });

            let snapshots = match &boot_dataset {
                Some(dataset) => pools
                    .recent_snapshots(dataset, config.pool.snapshot_limit)
                    .unwrap_or_else(|err| {
                        warn!("snapshot listing failed for {dataset}: {err}");
                        Vec::new()
                    }),
                None => Vec::new(),
            };

            Ok(BootOutcome::Recovery {
                status,
                boot_dataset,
                snapshots,
            })
        }
        BootDecision::Resume => {
            if let Err(err) = blocks.close_mapping(&config.keystore.mapping) {
                warn!(
                    "failed to close keystore mapping {}: {err}",
                    config.keystore.mapping
                );
            }

            let marker = config.lock_marker_path();
            match fs::remove_file(&marker) {
                Ok(()) => debug!("removed lock marker {}", marker.display()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!("lock marker {} already absent", marker.display())
                }
                Err(err) => return Err(err.into()),
            }

            Ok(BootOutcome::Resume)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeystoreCfg, PoolCfg, ToolsCfg, UnlockCfg, VaultbootConfig};
    use crate::error::VaultbootError;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct MockBlocks {
        devices: Vec<String>,
        identities: HashMap<String, DeviceIdentity>,
        failing_opens: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl MockBlocks {
        fn new(devices: &[&str]) -> Self {
            Self {
                devices: devices.iter().map(|s| s.to_string()).collect(),
                identities: HashMap::new(),
                failing_opens: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_identity(mut self, device: &str, serial: &str, manufacturer: &str) -> Self {
            self.identities.insert(
                device.to_string(),
                DeviceIdentity {
                    serial: serial.to_string(),
                    manufacturer: manufacturer.to_string(),
                },
            );
            self
        }

        fn failing_open(mut self, device: &str) -> Self {
            self.failing_opens.push(device.to_string());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    impl BlockProvider for MockBlocks {
        fn discover_luks_devices(&self) -> VaultbootResult<Vec<String>> {
            self.record("discover");
            Ok(self.devices.clone())
        }

        fn nvme_identity(&self, device: &str) -> VaultbootResult<DeviceIdentity> {
            self.record(format!("identity:{device}"));
            self.identities
                .get(device)
                .cloned()
                .ok_or_else(|| VaultbootError::Tool(format!("no identity for {device}")))
        }

        fn open_device(
            &self,
            device: &str,
            mapping: &str,
            _key_path: &Path,
        ) -> VaultbootResult<()> {
            self.record(format!("open:{device}:{mapping}"));
            if self.failing_opens.iter().any(|d| d == device) {
                return Err(VaultbootError::Tool(format!("open failed for {device}")));
            }
            Ok(())
        }

        fn open_with_passphrase(
            &self,
            device: &str,
            mapping: &str,
            _passphrase: &[u8],
        ) -> VaultbootResult<()> {
            self.record(format!("open-pass:{device}:{mapping}"));
            Ok(())
        }

        fn close_mapping(&self, mapping: &str) -> VaultbootResult<()> {
            self.record(format!("close:{mapping}"));
            Ok(())
        }
    }

    struct MockPool {
        import_fails: bool,
        boot_dataset: Option<String>,
        snapshots: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl MockPool {
        fn new() -> Self {
            Self {
                import_fails: false,
                boot_dataset: Some("rpool/ROOT/default".to_string()),
                snapshots: vec!["rpool/ROOT/default@nightly".to_string()],
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing_import() -> Self {
            Self {
                import_fails: true,
                ..Self::new()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    impl PoolProvider for MockPool {
        fn import_pool(&self, pool: &str, _altroot: Option<&str>) -> VaultbootResult<()> {
            self.record(format!("import:{pool}"));
            if self.import_fails {
                return Err(VaultbootError::PoolImport {
                    pool: pool.to_string(),
                    reason: "simulated".to_string(),
                });
            }
            Ok(())
        }

        fn pool_status(&self, pool: &str) -> VaultbootResult<String> {
            self.record(format!("status:{pool}"));
            Ok(format!("  pool: {pool}\n state: ONLINE"))
        }

        fn boot_dataset(&self, pool: &str) -> VaultbootResult<Option<String>> {
            self.record(format!("bootfs:{pool}"));
            Ok(self.boot_dataset.clone())
        }

        fn recent_snapshots(&self, dataset: &str, limit: usize) -> VaultbootResult<Vec<String>> {
            self.record(format!("snapshots:{dataset}:{limit}"));
            Ok(self.snapshots.clone())
        }
    }

    fn test_config(dir: &Path) -> VaultbootConfig {
        let key_path = dir.join("key.bin");
        fs::write(&key_path, [0x24u8; 32]).unwrap();
        VaultbootConfig {
            pool: PoolCfg {
                name: "rpool".to_string(),
                altroot: None,
                bootfs_property: "bootfs".to_string(),
                snapshot_limit: 10,
                zpool_path: None,
                zfs_path: None,
            },
            keystore: KeystoreCfg {
                device: None,
                mapping: "keys".to_string(),
                key_path: key_path.display().to_string(),
                expected_sha256: None,
            },
            unlock: UnlockCfg {
                mapper_prefix: "sn-".to_string(),
                lock_marker: dir.join("vaultboot.lock").display().to_string(),
                blkid_path: None,
                nvme_path: None,
                cryptsetup_path: None,
                dialog_path: None,
            },
            tools: ToolsCfg { timeout_secs: 5 },
            path: PathBuf::from("/etc/vaultboot.toml"),
        }
    }

    #[test]
    fn decision_defaults_to_recovery_shell() {
        assert_eq!(BootDecision::default(), BootDecision::RecoveryShell);
    }

    #[test]
    fn zero_devices_yield_zero_reports() {
        let dir = tempdir().unwrap();
        let cfg = Arc::new(test_config(dir.path()));
        let blocks = MockBlocks::new(&[]);
        let service = UnlockService::new(cfg, blocks);

        let reports = service.unlock_all().unwrap();
        assert!(reports.is_empty());
        assert_eq!(service.blocks.calls(), vec!["discover"]);
    }

    #[test]
    fn nvme_identity_resolved_before_unlock() {
        let dir = tempdir().unwrap();
        let cfg = Arc::new(test_config(dir.path()));
        let blocks =
            MockBlocks::new(&["/dev/nvme0n1"]).with_identity("/dev/nvme0n1", "ABC123", "Acme Corp");
        let service = UnlockService::new(cfg, blocks);

        let reports = service.unlock_all().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].outcome,
            UnlockOutcome::Unlocked {
                mapping: "sn-ABC123".to_string()
            }
        );
        let identity = reports[0].identity.as_ref().unwrap();
        assert_eq!(identity.serial, "ABC123");
        assert_eq!(identity.manufacturer, "Acme Corp");

        assert_eq!(
            service.blocks.calls(),
            vec![
                "discover",
                "identity:/dev/nvme0n1",
                "open:/dev/nvme0n1:sn-ABC123",
            ]
        );
    }

    #[test]
    fn three_device_scenario_matches_contract() {
        let dir = tempdir().unwrap();
        let cfg = Arc::new(test_config(dir.path()));
        // Deliberately unsorted discovery output; the batch sorts it.
        let blocks = MockBlocks::new(&["/dev/sda1", "/dev/nvme1n1", "/dev/nvme0n1"])
            .with_identity("/dev/nvme0n1", "S0", "Acme")
            .with_identity("/dev/nvme1n1", "S1", "Acme");
        let service = UnlockService::new(cfg, blocks);

        let reports = service.unlock_all().unwrap();
        assert_eq!(reports.len(), 3);

        assert_eq!(reports[0].ordinal, 1);
        assert_eq!(reports[0].device, "/dev/nvme0n1");
        assert!(matches!(reports[0].outcome, UnlockOutcome::Unlocked { .. }));

        assert_eq!(reports[1].ordinal, 2);
        assert_eq!(reports[1].device, "/dev/nvme1n1");
        assert!(matches!(reports[1].outcome, UnlockOutcome::Unlocked { .. }));

        assert_eq!(reports[2].ordinal, 3);
        assert_eq!(reports[2].device, "/dev/sda1");
        assert_eq!(
            reports[2].outcome,
            UnlockOutcome::Unsupported { bus: BusKind::Sata }
        );
        assert!(reports[2].identity.is_none());

        // No identity query and no open for the SATA device.
        let calls = service.blocks.calls();
        assert!(!calls.iter().any(|c| c.contains("/dev/sda1")));
    }

    #[test]
    fn unlock_failure_does_not_abort_batch() {
        let dir = tempdir().unwrap();
        let cfg = Arc::new(test_config(dir.path()));
        let blocks = MockBlocks::new(&["/dev/nvme0n1", "/dev/nvme1n1"])
            .with_identity("/dev/nvme0n1", "S0", "Acme")
            .with_identity("/dev/nvme1n1", "S1", "Acme")
            .failing_open("/dev/nvme0n1");
        let service = UnlockService::new(cfg, blocks);

        let reports = service.unlock_all().unwrap();
        assert!(matches!(reports[0].outcome, UnlockOutcome::Failed { .. }));
        assert!(matches!(reports[1].outcome, UnlockOutcome::Unlocked { .. }));
    }

    #[test]
    fn failed_identity_degrades_to_empty_serial() {
        let dir = tempdir().unwrap();
        let cfg = Arc::new(test_config(dir.path()));
        // No identity registered: the query errors, the unlock proceeds
        // under the bare prefix.
        let blocks = MockBlocks::new(&["/dev/nvme0n1"]);
        let service = UnlockService::new(cfg, blocks);

        let reports = service.unlock_all().unwrap();
        assert_eq!(
            reports[0].outcome,
            UnlockOutcome::Unlocked {
                mapping: "sn-".to_string()
            }
        );
        assert!(!reports[0].identity.as_ref().unwrap().is_resolved());
    }

    #[test]
    fn unknown_prefix_is_reported_not_attempted() {
        let dir = tempdir().unwrap();
        let cfg = Arc::new(test_config(dir.path()));
        let blocks = MockBlocks::new(&["/dev/vda1"]);
        let service = UnlockService::new(cfg, blocks);

        let reports = service.unlock_all().unwrap();
        assert_eq!(reports[0].outcome, UnlockOutcome::Unclassified);
        assert_eq!(service.blocks.calls(), vec!["discover"]);
    }

    #[test]
    fn missing_key_source_is_fatal_when_devices_exist() {
        let dir = tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.keystore.key_path = dir.path().join("absent").display().to_string();
        let blocks = MockBlocks::new(&["/dev/nvme0n1"]).with_identity("/dev/nvme0n1", "S0", "A");
        let service = UnlockService::new(Arc::new(cfg), blocks);

        let err = service.unlock_all().unwrap_err();
        assert!(matches!(err, VaultbootError::InvalidKeyMaterial { .. }));
    }

    #[test]
    fn bootstrap_imports_before_consulting_decision() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path());
        fs::write(cfg.lock_marker_path(), b"").unwrap();
        let blocks = MockBlocks::new(&[]);
        let pools = MockPool::new();

        let outcome =
            bootstrap_pool(&cfg, &blocks, &pools, BootDecision::RecoveryShell).unwrap();

        let calls = pools.calls();
        assert_eq!(calls[0], "import:rpool");
        assert!(calls.contains(&"status:rpool".to_string()));
        assert!(calls.contains(&"snapshots:rpool/ROOT/default:10".to_string()));

        match outcome {
            BootOutcome::Recovery {
                status,
                boot_dataset,
                snapshots,
            } => {
                assert!(status.contains("ONLINE"));
                assert_eq!(boot_dataset.as_deref(), Some("rpool/ROOT/default"));
                assert_eq!(snapshots.len(), 1);
            }
            other => panic!("expected recovery outcome, got {other:?}"),
        }

        // Recovery halt keeps the marker and the keystore mapping.
        assert!(cfg.lock_marker_path().exists());
        assert!(blocks.calls().is_empty());
    }

    #[test]
    fn bootstrap_resume_closes_keystore_and_removes_marker() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path());
        fs::write(cfg.lock_marker_path(), b"").unwrap();
        let blocks = MockBlocks::new(&[]);
        let pools = MockPool::new();

        let outcome = bootstrap_pool(&cfg, &blocks, &pools, BootDecision::Resume).unwrap();
        assert_eq!(outcome, BootOutcome::Resume);
        assert!(!cfg.lock_marker_path().exists());
        assert_eq!(blocks.calls(), vec!["close:keys"]);
    }

    #[test]
    fn bootstrap_resume_tolerates_absent_marker() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path());
        let blocks = MockBlocks::new(&[]);
        let pools = MockPool::new();

        let outcome = bootstrap_pool(&cfg, &blocks, &pools, BootDecision::Resume).unwrap();
        assert_eq!(outcome, BootOutcome::Resume);
    }

    #[test]
    fn bootstrap_propagates_import_failure() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path());
        let blocks = MockBlocks::new(&[]);
        let pools = MockPool::failing_import();

        let err = bootstrap_pool(&cfg, &blocks, &pools, BootDecision::Resume).unwrap_err();
        assert!(matches!(err, VaultbootError::PoolImport { .. }));
    }
}
