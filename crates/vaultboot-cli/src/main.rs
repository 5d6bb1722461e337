//! Vaultboot command-line interface: the initramfs boot flow plus unlock,
//! status, and validation tooling.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::warn;
use rpassword::prompt_password;
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::path::PathBuf;
use std::sync::Arc;
use vaultboot_core::{
    bootstrap_pool, logging,
    provider::{BlockProvider, PoolProvider},
    BootDecision, BootOutcome, DeviceReport, UnlockOutcome, UnlockService, VaultbootConfig,
};
use vaultboot_sys::{DialogMenu, SystemBlockProvider, SystemPoolProvider};

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "vaultboot",
    version,
    about = "Early-boot unlock for LUKS-encrypted ZFS pool members."
)]
struct Cli {
    /// Path to the Vaultboot configuration file.
    #[arg(short, long, default_value = "/etc/vaultboot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full initramfs flow: keystore, menu, unlock batch, pool
    /// import, then resume boot or halt in the recovery shell.
    Boot {
        /// Skip the menu and continue to boot after unlocking.
        #[arg(long, conflicts_with = "recovery")]
        resume: bool,

        /// Skip the menu and stay in the recovery shell after unlocking.
        #[arg(long)]
        recovery: bool,
    },

    /// Unlock the discovered LUKS devices and print the per-device report.
    Unlock,

    /// Show pool status, the boot dataset, and its recent snapshots.
    Status,

    /// Validate a configuration file or emit the config schema.
    Validate {
        /// Path to the configuration file to validate.
        #[arg(short = 'f', long, default_value = "/etc/vaultboot.toml")]
        file: PathBuf,

        /// Output the JSON schema instead of validating a file.
        #[arg(long)]
        schema: bool,
    },
}

/// Entry point: parse arguments and surface errors with an exit code.
fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();
    let config_path = cli.config.clone();

    match cli.command {
        Commands::Boot { resume, recovery } => {
            let config = load_config(&config_path)?;
            cmd_boot(Arc::new(config), resume, recovery)
        }
        Commands::Unlock => {
            let config = Arc::new(load_config(&config_path)?);
            let blocks = SystemBlockProvider::from_config(&config)?;
            let service = UnlockService::new(config, blocks);
            let reports = service.unlock_all()?;
            print_reports(&reports);
            Ok(())
        }
        Commands::Status => {
            let config = load_config(&config_path)?;
            cmd_status(&config)
        }
        Commands::Validate { file, schema } => {
            if schema {
                let schema = schema_for!(VaultbootConfig);
                println!("{}", to_string_pretty(&schema)?);
                return Ok(());
            }

            let cfg = load_config(&file)?;
            let issues = cfg.validate();
            if issues.is_empty() {
                println!("Configuration valid (pool {}).", cfg.pool.name);
            } else {
                eprintln!("Configuration validation failed:");
                for issue in issues {
                    eprintln!("  - {issue}");
                }
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn load_config(path: &PathBuf) -> Result<VaultbootConfig> {
    VaultbootConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// The initramfs flow. Exits 0 when handing off to boot resumption and 1
/// when deliberately halting in the recovery shell.
fn cmd_boot(config: Arc<VaultbootConfig>, resume: bool, recovery: bool) -> Result<()> {
    let blocks = SystemBlockProvider::from_config(&config)?;

    open_keystore(&config, &blocks)?;

    // The gate runs before any unlock attempt; the choice only takes
    // effect after the pool import.
    let decision = if resume {
        BootDecision::Resume
    } else if recovery {
        BootDecision::RecoveryShell
    } else {
        prompt_decision(&config)
    };

    let service = UnlockService::new(config.clone(), blocks.clone());
    let reports = service.unlock_all()?;
    print_reports(&reports);

    let pools = SystemPoolProvider::from_config(&config)?;
    match bootstrap_pool(&config, &blocks, &pools, decision)? {
        BootOutcome::Resume => {
            println!("Pool {} imported; resuming boot.", config.pool.name);
            Ok(())
        }
        BootOutcome::Recovery {
            status,
            boot_dataset,
            snapshots,
        } => {
            println!("Pool {} imported; staying in recovery shell.", config.pool.name);
            println!();
            println!("{}", status.trim_end());
            println!();
            match &boot_dataset {
                Some(dataset) => {
                    println!("Boot dataset: {dataset}");
                    if snapshots.is_empty() {
                        println!("  No snapshots found.");
                    } else {
                        println!("  Recent snapshots (newest first):");
                        for snapshot in &snapshots {
                            println!("    - {snapshot}");
                        }
                    }
                }
                None => println!("No boot dataset configured on the pool."),
            }
            println!();
            println!("Devices are unlocked and the pool is imported without mounts.");
            println!("Inspect or roll back as needed, then reboot to try again.");
            std::process::exit(1);
        }
    }
}

/// Open the keystore container when configured and not yet mapped.
fn open_keystore<B: BlockProvider>(config: &VaultbootConfig, blocks: &B) -> Result<()> {
    let Some(device) = &config.keystore.device else {
        return Ok(());
    };
    if config.key_path().exists() {
        return Ok(());
    }

    let passphrase = prompt_password(format!("Passphrase for keystore {device}: "))?;
    blocks
        .open_with_passphrase(device, &config.keystore.mapping, passphrase.as_bytes())
        .with_context(|| format!("failed to open keystore container {device}"))?;
    Ok(())
}

/// Show the boot menu; anything short of an explicit "boot" choice keeps
/// the fail-safe default of staying in the recovery shell.
fn prompt_decision(config: &VaultbootConfig) -> BootDecision {
    match DialogMenu::from_config(config).and_then(|menu| menu.prompt()) {
        Ok(decision) => decision,
        Err(err) => {
            warn!("boot menu unavailable ({err}); defaulting to recovery shell");
            BootDecision::default()
        }
    }
}

fn cmd_status(config: &VaultbootConfig) -> Result<()> {
    let pools = SystemPoolProvider::from_config(config)?;
    let pool = config.pool.name.as_str();

    println!("{}", pools.pool_status(pool)?.trim_end());
    match pools.boot_dataset(pool)? {
        Some(dataset) => {
            println!("Boot dataset: {dataset}");
            for snapshot in pools.recent_snapshots(&dataset, config.pool.snapshot_limit)? {
                println!("  - {snapshot}");
            }
        }
        None => println!("No boot dataset configured on the pool."),
    }
    Ok(())
}

/// Render the per-device batch report for humans on the console.
fn print_reports(reports: &[DeviceReport]) {
    for report in reports {
        let identity = report
            .identity
            .as_ref()
            .filter(|id| id.is_resolved())
            .map(|id| format!(" ({} {})", id.manufacturer, id.serial))
            .unwrap_or_default();

        match &report.outcome {
            UnlockOutcome::Unlocked { mapping } => println!(
                "[{:>2}] {}{} [ OK ] -> /dev/mapper/{}",
                report.ordinal, report.device, identity, mapping
            ),
            UnlockOutcome::Failed { reason } => println!(
                "[{:>2}] {}{} [FAIL] {}",
                report.ordinal, report.device, identity, reason
            ),
            UnlockOutcome::Unsupported { bus } => println!(
                "[{:>2}] {} [FAIL] {} unlock not implemented",
                report.ordinal, report.device, bus
            ),
            UnlockOutcome::Unclassified => println!(
                "[{:>2}] {} [SKIP] unrecognized device path; not attempted",
                report.ordinal, report.device
            ),
        }
    }
}
