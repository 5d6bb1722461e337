//! Key-material preflight for the fixed key source used by the batch.

use crate::error::{VaultbootError, VaultbootResult};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Read raw key material from `path`.
pub fn read_key_file(path: &Path) -> VaultbootResult<Zeroizing<Vec<u8>>> {
    let contents = fs::read(path)?;
    Ok(Zeroizing::new(contents))
}

/// Check the key source before any unlock attempt.
///
/// The path must exist. Regular files must be non-empty and, when
/// `expected_sha256` is set, match the digest. Block-device key sources
/// (e.g. a mapped keystore node) skip content checks: cryptsetup reads
/// them directly.
pub fn verify_key_source(path: &Path, expected_sha256: Option<&str>) -> VaultbootResult<()> {
    let meta = fs::metadata(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            invalid_key(path, "key source not found; is the keystore open?")
        } else {
            VaultbootError::Io(err)
        }
    })?;

    if !meta.is_file() {
        if expected_sha256.is_some() {
            warn!(
                "keystore.expected_sha256 set but {} is not a regular file; skipping digest check",
                path.display()
            );
        }
        debug!("key source {} is not a regular file", path.display());
        return Ok(());
    }

    if meta.len() == 0 {
        return Err(invalid_key(path, "key file is empty"));
    }

    if let Some(expected) = expected_sha256 {
        let key = read_key_file(path)?;
        let actual = hex::encode(Sha256::digest(&key[..]));
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(invalid_key(
                path,
                format!("sha256 mismatch: expected {expected}, got {actual}"),
            ));
        }
    }

    Ok(())
}

fn invalid_key(path: &Path, reason: impl Into<String>) -> VaultbootError {
    VaultbootError::InvalidKeyMaterial {
        path: PathBuf::from(path),
        reason: reason.into(),
    }
}
