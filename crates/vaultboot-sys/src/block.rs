//! System-backed `BlockProvider`. Shells out to blkid for discovery, nvme
//! for controller identity, and cryptsetup for mapping management.

use crate::command::{resolve_binary, ToolOutput, ToolRunner};
use crate::parse::{parse_name_list, parse_nvme_identity};
use log::warn;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vaultboot_core::config::VaultbootConfig;
use vaultboot_core::device::DeviceIdentity;
use vaultboot_core::error::{VaultbootError, VaultbootResult};
use vaultboot_core::provider::BlockProvider;

/// Default locations we probe when looking for a `blkid` binary.
pub const DEFAULT_BLKID_PATHS: &[&str] = &[
    "/sbin/blkid",
    "/usr/sbin/blkid",
    "/bin/blkid",
    "/usr/bin/blkid",
];

/// Default locations we probe when looking for an `nvme` binary.
pub const DEFAULT_NVME_PATHS: &[&str] = &["/usr/sbin/nvme", "/sbin/nvme", "/usr/bin/nvme", "/bin/nvme"];

/// Default locations we probe when looking for a `cryptsetup` binary.
pub const DEFAULT_CRYPTSETUP_PATHS: &[&str] = &[
    "/usr/sbin/cryptsetup",
    "/sbin/cryptsetup",
    "/usr/bin/cryptsetup",
    "/bin/cryptsetup",
    "/usr/local/sbin/cryptsetup",
];

// blkid's documented "nothing matched" exit status.
const BLKID_NOT_FOUND: i32 = 2;

/// `BlockProvider` backed by the native blkid/nvme/cryptsetup CLIs.
#[derive(Clone)]
pub struct SystemBlockProvider {
    blkid: ToolRunner,
    nvme: ToolRunner,
    cryptsetup: ToolRunner,
}

impl SystemBlockProvider {
    /// Build a provider from the user configuration, falling back to
    /// discovery for any unset binary path.
    pub fn from_config(config: &VaultbootConfig) -> VaultbootResult<Self> {
        let timeout = config.tool_timeout();
        Ok(Self {
            blkid: ToolRunner::new(
                resolve_binary(config.blkid_binary_path(), DEFAULT_BLKID_PATHS, "blkid")?,
                timeout,
            ),
            nvme: ToolRunner::new(
                resolve_binary(config.nvme_binary_path(), DEFAULT_NVME_PATHS, "nvme")?,
                timeout,
            ),
            cryptsetup: ToolRunner::new(
                resolve_binary(
                    config.cryptsetup_binary_path(),
                    DEFAULT_CRYPTSETUP_PATHS,
                    "cryptsetup",
                )?,
                timeout,
            ),
        })
    }

    /// Construct a provider with explicit binary paths (test fixtures).
    pub fn with_paths(
        blkid: PathBuf,
        nvme: PathBuf,
        cryptsetup: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            blkid: ToolRunner::new(blkid, timeout),
            nvme: ToolRunner::new(nvme, timeout),
            cryptsetup: ToolRunner::new(cryptsetup, timeout),
        }
    }

    fn run_checked(runner: &ToolRunner, args: &[&str]) -> VaultbootResult<ToolOutput> {
        let out = runner.run(args, None)?;
        if out.status != 0 {
            return Err(classify_cli_error(runner.binary(), args, &out));
        }
        Ok(out)
    }

    fn open_mapping(
        &self,
        device: &str,
        mapping: &str,
        key_arg: &str,
        input: Option<&[u8]>,
    ) -> VaultbootResult<()> {
        if dev_mapper_node_exists(mapping) {
            // A stale mapping or serial collision would be masked here.
            warn!("/dev/mapper/{mapping} already exists; skipping open of {device}");
            return Ok(());
        }

        let args = [
            "open",
            "--type",
            "luks",
            "--batch-mode",
            "--key-file",
            key_arg,
            device,
            mapping,
        ];
        let out = self.cryptsetup.run(&args, input)?;
        if out.status == 0 || dev_mapper_node_exists(mapping) {
            return Ok(());
        }

        Err(classify_cli_error(self.cryptsetup.binary(), &args, &out))
    }
}

impl BlockProvider for SystemBlockProvider {
    /// `blkid -t TYPE=crypto_LUKS -o device`; an exit status of 2 means no
    /// device matched and yields an empty batch, not an error.
    fn discover_luks_devices(&self) -> VaultbootResult<Vec<String>> {
        let args = ["-t", "TYPE=crypto_LUKS", "-o", "device"];
        let out = self.blkid.run(&args, None)?;
        if out.status == BLKID_NOT_FOUND {
            return Ok(Vec::new());
        }
        if out.status != 0 {
            return Err(classify_cli_error(self.blkid.binary(), &args, &out));
        }
        Ok(parse_name_list(&out.stdout))
    }

    /// `nvme id-ctrl <device>`, parsed for the sn/mn fields.
    fn nvme_identity(&self, device: &str) -> VaultbootResult<DeviceIdentity> {
        let out = Self::run_checked(&self.nvme, &["id-ctrl", device])?;
        Ok(parse_nvme_identity(&out.stdout))
    }

    fn open_device(&self, device: &str, mapping: &str, key_path: &Path) -> VaultbootResult<()> {
        let key_arg = key_path.to_string_lossy().into_owned();
        self.open_mapping(device, mapping, &key_arg, None)
    }

    fn open_with_passphrase(
        &self,
        device: &str,
        mapping: &str,
        passphrase: &[u8],
    ) -> VaultbootResult<()> {
        self.open_mapping(device, mapping, "-", Some(passphrase))
    }

    /// `cryptsetup close`; a mapping that is already gone counts as closed.
    fn close_mapping(&self, mapping: &str) -> VaultbootResult<()> {
        let args = ["close", mapping];
        let out = self.cryptsetup.run(&args, None)?;
        if out.status == 0 {
            return Ok(());
        }

        let diagnostic_lower = out.diagnostic().to_ascii_lowercase();
        if diagnostic_lower.contains("does not exist")
            || diagnostic_lower.contains("doesn't exist")
            || diagnostic_lower.contains("not active")
        {
            return Ok(());
        }

        Err(classify_cli_error(self.cryptsetup.binary(), &args, &out))
    }
}

fn dev_mapper_node_exists(name: &str) -> bool {
    mapper_node_exists_in(Path::new("/dev/mapper"), name)
}

fn mapper_node_exists_in(root: &Path, name: &str) -> bool {
    !name.is_empty() && root.is_dir() && root.join(name).exists()
}

/// Map CLI output into the right `VaultbootError` bucket with context.
fn classify_cli_error(binary: &Path, args: &[&str], output: &ToolOutput) -> VaultbootError {
    let diagnostic = output.diagnostic();
    let diagnostic_lower = diagnostic.to_ascii_lowercase();

    if diagnostic_lower.contains("no key available")
        || diagnostic_lower.contains("wrong key")
        || diagnostic_lower.contains("passphrase")
        || diagnostic_lower.contains("keyslot")
        || diagnostic_lower.contains("key slot")
    {
        return VaultbootError::Tool(format!(
            "{} {} rejected the key material: {}",
            binary.display(),
            args.join(" "),
            diagnostic
        ));
    }

    if diagnostic_lower.contains("no such file")
        || diagnostic_lower.contains("does not exist")
        || diagnostic_lower.contains("not found")
        || diagnostic_lower.contains("cannot open device")
    {
        return VaultbootError::Tool(format!(
            "{} {} reported a missing device: {}",
            binary.display(),
            args.join(" "),
            diagnostic
        ));
    }

    VaultbootError::Tool(format!(
        "{} {} exited with code {}: {}",
        binary.display(),
        args.join(" "),
        output.status,
        if diagnostic.is_empty() {
            "no additional output"
        } else {
            diagnostic
        }
    ))
}
