//! Operator decision gate rendered through the external `dialog` tool.

use crate::command::{resolve_binary, ToolRunner};
use log::warn;
use std::path::PathBuf;
use std::time::Duration;
use vaultboot_core::config::VaultbootConfig;
use vaultboot_core::error::VaultbootResult;
use vaultboot_core::service::BootDecision;

/// Default locations we probe when looking for a `dialog` binary.
pub const DEFAULT_DIALOG_PATHS: &[&str] = &["/usr/bin/dialog", "/bin/dialog"];

const TAG_BOOT: &str = "boot";
const TAG_SHELL: &str = "shell";

/// Renders the two-option boot menu and maps the selection to a
/// [`BootDecision`]. Any non-enumerated result (cancel, escape, tool
/// failure) falls back to the recovery shell.
pub struct DialogMenu {
    runner: ToolRunner,
}

impl DialogMenu {
    pub fn from_config(config: &VaultbootConfig) -> VaultbootResult<Self> {
        let path = resolve_binary(config.dialog_binary_path(), DEFAULT_DIALOG_PATHS, "dialog")?;
        Ok(Self::with_path(path, config.tool_timeout()))
    }

    /// Construct a menu with an explicit binary path (test fixtures). The
    /// timeout only applies to process setup; the menu itself blocks
    /// indefinitely awaiting the operator.
    pub fn with_path(path: PathBuf, timeout: Duration) -> Self {
        Self {
            runner: ToolRunner::new(path, timeout),
        }
    }

    /// Block on the menu and return the operator's choice.
    pub fn prompt(&self) -> VaultbootResult<BootDecision> {
        let args = [
            "--clear",
            "--no-cancel",
            "--menu",
            "Encrypted storage unlocked. Choose how to continue:",
            "12",
            "60",
            "2",
            TAG_BOOT,
            "Unlock and continue boot",
            TAG_SHELL,
            "Unlock and return to the recovery shell",
        ];
        let out = self.runner.run_interactive(&args)?;
        Ok(Self::decision_from(out.status, out.stderr.trim()))
    }

    /// Pure mapping from dialog's exit status and selected tag.
    fn decision_from(status: i32, tag: &str) -> BootDecision {
        if status == 0 && tag == TAG_BOOT {
            return BootDecision::Resume;
        }
        if status != 0 || (tag != TAG_BOOT && tag != TAG_SHELL) {
            warn!("menu returned status {status} tag {tag:?}; defaulting to recovery shell");
        }
        BootDecision::RecoveryShell
    }
}
