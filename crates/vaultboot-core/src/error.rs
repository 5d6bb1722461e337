use std::path::PathBuf;
use thiserror::Error;

/// Result alias for core operations.
pub type VaultbootResult<T> = Result<T, VaultbootError>;

#[derive(Error, Debug)]
pub enum VaultbootError {
    #[error("[VB1000] io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[VB1001] toml config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("[VB1002] yaml config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[VB1100] configuration error: {0}")]
    InvalidConfig(String),

    #[error("[VB1300] unusable key material at {path}: {reason}")]
    InvalidKeyMaterial { path: PathBuf, reason: String },

    #[error("[VB2000] tool error: {0}")]
    Tool(String),

    #[error("[VB2100] import of pool `{pool}` failed: {reason}")]
    PoolImport { pool: String, reason: String },
}

impl VaultbootError {
    pub fn code(&self) -> &'static str {
        match self {
            VaultbootError::Io(_) => "VB1000",
            VaultbootError::Toml(_) => "VB1001",
            VaultbootError::Yaml(_) => "VB1002",
            VaultbootError::InvalidConfig(_) => "VB1100",
            VaultbootError::InvalidKeyMaterial { .. } => "VB1300",
            VaultbootError::Tool(_) => "VB2000",
            VaultbootError::PoolImport { .. } => "VB2100",
        }
    }
}
