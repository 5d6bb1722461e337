use crate::error::{VaultbootError, VaultbootResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Target pool and the datasets we report on in recovery mode.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PoolCfg {
    pub name: String,

    /// Alternate root passed to `zpool import -R` (initramfs installs often
    /// stage the pool under /sysroot).
    #[serde(default)]
    pub altroot: Option<String>,

    #[serde(default = "default_bootfs_property")]
    pub bootfs_property: String,

    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: usize,

    #[serde(default)]
    pub zpool_path: Option<String>,

    #[serde(default)]
    pub zfs_path: Option<String>,
}

fn default_bootfs_property() -> String {
    "bootfs".to_string()
}

fn default_snapshot_limit() -> usize {
    10
}

/// The encrypted container holding key material for the data devices.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KeystoreCfg {
    /// Backing LUKS device; when set, `vaultboot boot` opens it first.
    #[serde(default)]
    pub device: Option<String>,

    #[serde(default = "default_keystore_mapping")]
    pub mapping: String,

    /// Key source handed to `cryptsetup open --key-file`. Defaults to the
    /// mapped keystore node itself.
    #[serde(default = "default_key_path")]
    pub key_path: String,

    /// Optional digest check, applied only when key_path is a regular file.
    #[serde(default)]
    pub expected_sha256: Option<String>,
}

fn default_keystore_mapping() -> String {
    "keys".to_string()
}

fn default_key_path() -> String {
    "/dev/mapper/keys".to_string()
}

impl Default for KeystoreCfg {
    fn default() -> Self {
        Self {
            device: None,
            mapping: default_keystore_mapping(),
            key_path: default_key_path(),
            expected_sha256: None,
        }
    }
}

/// Settings for the per-device unlock batch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UnlockCfg {
    /// Prefix prepended to the NVMe serial to form the mapping name.
    #[serde(default = "default_mapper_prefix")]
    pub mapper_prefix: String,

    /// Marker removed when boot is allowed to resume.
    #[serde(default = "default_lock_marker")]
    pub lock_marker: String,

    #[serde(default)]
    pub blkid_path: Option<String>,

    #[serde(default)]
    pub nvme_path: Option<String>,

    #[serde(default)]
    pub cryptsetup_path: Option<String>,

    #[serde(default)]
    pub dialog_path: Option<String>,
}

fn default_mapper_prefix() -> String {
    "sn-".to_string()
}

fn default_lock_marker() -> String {
    "/run/vaultboot.lock".to_string()
}

impl Default for UnlockCfg {
    fn default() -> Self {
        Self {
            mapper_prefix: default_mapper_prefix(),
            lock_marker: default_lock_marker(),
            blkid_path: None,
            nvme_path: None,
            cryptsetup_path: None,
            dialog_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolsCfg {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for ToolsCfg {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VaultbootConfig {
    pub pool: PoolCfg,

    #[serde(default)]
    pub keystore: KeystoreCfg,

    #[serde(default)]
    pub unlock: UnlockCfg,

    #[serde(default)]
    pub tools: ToolsCfg,

    #[serde(skip)]
    pub path: PathBuf,
}

impl VaultbootConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> VaultbootResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut cfg = if matches!(path.extension().and_then(|ext| ext.to_str()), Some(ext) if ext.eq_ignore_ascii_case("toml"))
        {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();

        if cfg.pool.name.trim().is_empty() {
            return Err(VaultbootError::InvalidConfig(
                "pool.name must not be empty".to_string(),
            ));
        }

        Ok(cfg)
    }

    /// Collect non-fatal configuration issues for `vaultboot validate`.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.pool.name.contains('/') {
            issues.push(format!(
                "pool.name `{}` looks like a dataset; expected a bare pool name",
                self.pool.name
            ));
        }
        if self.unlock.mapper_prefix.trim().is_empty() {
            issues.push("unlock.mapper_prefix must not be empty".to_string());
        }
        if self.unlock.lock_marker.trim().is_empty() {
            issues.push("unlock.lock_marker must not be empty".to_string());
        }
        if self.keystore.key_path.trim().is_empty() {
            issues.push("keystore.key_path must not be empty".to_string());
        }
        if self.pool.snapshot_limit == 0 {
            issues.push("pool.snapshot_limit of 0 hides all snapshots in recovery".to_string());
        }
        if let Some(digest) = &self.keystore.expected_sha256 {
            if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                issues.push(
                    "keystore.expected_sha256 must be a 64-digit hex string".to_string(),
                );
            }
        }

        issues
    }

    pub fn key_path(&self) -> PathBuf {
        PathBuf::from(&self.keystore.key_path)
    }

    pub fn lock_marker_path(&self) -> PathBuf {
        PathBuf::from(&self.unlock.lock_marker)
    }

    pub fn tool_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tools.timeout_secs)
    }

    pub fn blkid_binary_path(&self) -> Option<PathBuf> {
        self.unlock.blkid_path.as_ref().map(PathBuf::from)
    }

    pub fn nvme_binary_path(&self) -> Option<PathBuf> {
        self.unlock.nvme_path.as_ref().map(PathBuf::from)
    }

    pub fn cryptsetup_binary_path(&self) -> Option<PathBuf> {
        self.unlock.cryptsetup_path.as_ref().map(PathBuf::from)
    }

    pub fn dialog_binary_path(&self) -> Option<PathBuf> {
        self.unlock.dialog_path.as_ref().map(PathBuf::from)
    }

    pub fn zpool_binary_path(&self) -> Option<PathBuf> {
        self.pool.zpool_path.as_ref().map(PathBuf::from)
    }

    pub fn zfs_binary_path(&self) -> Option<PathBuf> {
        self.pool.zfs_path.as_ref().map(PathBuf::from)
    }
}
