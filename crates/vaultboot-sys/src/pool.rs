//! System-backed `PoolProvider`. Shells out to zpool for import/status and
//! zfs for snapshot listings.

use crate::command::{resolve_binary, ToolOutput, ToolRunner};
use crate::parse::{newest_snapshots, parse_property_value};
use std::path::PathBuf;
use std::time::Duration;
use vaultboot_core::config::VaultbootConfig;
use vaultboot_core::error::{VaultbootError, VaultbootResult};
use vaultboot_core::provider::PoolProvider;

/// Default locations we probe when looking for a `zpool` binary.
pub const DEFAULT_ZPOOL_PATHS: &[&str] = &[
    "/sbin/zpool",
    "/usr/sbin/zpool",
    "/usr/local/sbin/zpool",
    "/bin/zpool",
];

/// Default locations we probe when looking for a `zfs` binary.
pub const DEFAULT_ZFS_PATHS: &[&str] = &[
    "/sbin/zfs",
    "/usr/sbin/zfs",
    "/usr/local/sbin/zfs",
    "/bin/zfs",
];

/// `PoolProvider` backed by the native zpool/zfs CLIs.
#[derive(Clone)]
pub struct SystemPoolProvider {
    zpool: ToolRunner,
    zfs: ToolRunner,
    bootfs_property: String,
}

impl SystemPoolProvider {
    pub fn from_config(config: &VaultbootConfig) -> VaultbootResult<Self> {
        let timeout = config.tool_timeout();
        Ok(Self {
            zpool: ToolRunner::new(
                resolve_binary(config.zpool_binary_path(), DEFAULT_ZPOOL_PATHS, "zpool")?,
                timeout,
            ),
            zfs: ToolRunner::new(
                resolve_binary(config.zfs_binary_path(), DEFAULT_ZFS_PATHS, "zfs")?,
                timeout,
            ),
            bootfs_property: config.pool.bootfs_property.clone(),
        })
    }

    /// Construct a provider with explicit binary paths (test fixtures).
    pub fn with_paths(zpool: PathBuf, zfs: PathBuf, timeout: Duration) -> Self {
        Self {
            zpool: ToolRunner::new(zpool, timeout),
            zfs: ToolRunner::new(zfs, timeout),
            bootfs_property: "bootfs".to_string(),
        }
    }

    fn run_checked_zfs(&self, args: &[&str]) -> VaultbootResult<ToolOutput> {
        let out = self.zfs.run(args, None)?;
        if out.status != 0 {
            return Err(VaultbootError::Tool(format!(
                "{} {} exited with code {}: {}",
                self.zfs.binary().display(),
                args.join(" "),
                out.status,
                out.diagnostic()
            )));
        }
        Ok(out)
    }
}

impl PoolProvider for SystemPoolProvider {
    /// `zpool import -f -N [-R altroot] <pool>`. A pool that is already
    /// imported is treated as success so the bootstrap stays idempotent.
    fn import_pool(&self, pool: &str, altroot: Option<&str>) -> VaultbootResult<()> {
        let mut args = vec!["import", "-f", "-N"];
        if let Some(root) = altroot {
            args.push("-R");
            args.push(root);
        }
        args.push(pool);

        let out = self.zpool.run(&args, None)?;
        if out.status == 0 {
            return Ok(());
        }

        let diagnostic = out.diagnostic().to_string();
        let diagnostic_lower = diagnostic.to_ascii_lowercase();
        if diagnostic_lower.contains("already exists")
            || diagnostic_lower.contains("pool is already imported")
        {
            return Ok(());
        }

        Err(VaultbootError::PoolImport {
            pool: pool.to_string(),
            reason: if diagnostic.is_empty() {
                format!("zpool import exited with code {}", out.status)
            } else {
                diagnostic
            },
        })
    }

    fn pool_status(&self, pool: &str) -> VaultbootResult<String> {
        let args = ["status", pool];
        let out = self.zpool.run(&args, None)?;
        if out.status != 0 {
            return Err(VaultbootError::Tool(format!(
                "zpool status {} exited with code {}: {}",
                pool,
                out.status,
                out.diagnostic()
            )));
        }
        Ok(out.stdout)
    }

    /// The pool's configured boot dataset, read from the bootfs property;
    /// `-` (unset) maps to `None`.
    fn boot_dataset(&self, pool: &str) -> VaultbootResult<Option<String>> {
        let property = self.bootfs_property.as_str();
        let args = ["get", "-H", "-o", "value", property, pool];
        let out = self.zpool.run(&args, None)?;
        if out.status != 0 {
            return Err(VaultbootError::Tool(format!(
                "zpool get {} {} exited with code {}: {}",
                self.bootfs_property,
                pool,
                out.status,
                out.diagnostic()
            )));
        }
        Ok(parse_property_value(&out.stdout))
    }

    /// Snapshots of `dataset` sorted by creation time, newest first.
    fn recent_snapshots(&self, dataset: &str, limit: usize) -> VaultbootResult<Vec<String>> {
        let args = ["list", "-H", "-t", "snapshot", "-o", "name", "-s", "creation", dataset];
        let out = self.run_checked_zfs(&args)?;
        Ok(newest_snapshots(&out.stdout, limit))
    }
}
