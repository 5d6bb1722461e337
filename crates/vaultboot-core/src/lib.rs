pub mod config;
pub mod device;
pub mod error;
pub mod keyfile;
pub mod logging;
pub mod provider;
pub mod service;

pub use config::{KeystoreCfg, PoolCfg, ToolsCfg, UnlockCfg, VaultbootConfig};
pub use device::{mapper_name, BusKind, DeviceIdentity, DeviceReport, UnlockOutcome};
pub use error::{VaultbootError, VaultbootResult};
pub use provider::{BlockProvider, PoolProvider};
pub use service::{bootstrap_pool, BootDecision, BootOutcome, UnlockService};
