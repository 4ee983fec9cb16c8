//! # MeshLink Identity
//!
//! Path-addressed identity profile store. A profile binds together:
//!
//! - a stable `account_id` (derived from the Ed25519 identity verifying key),
//! - a per-installation `device_id`,
//! - a 32-byte network seed (deterministic node identity bootstrap),
//! - a 32-byte crypto seed (signing key + session-key derivation).
//!
//! `Profile::load_or_create` is the only entry point: a missing file produces
//! a fresh identity and persists it atomically; a corrupt file is an error,
//! never a silent regeneration (that would orphan every existing session and
//! published document).

use ed25519_dalek::SigningKey;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroize;

/// Length of both identity seeds, in bytes.
pub const SEED_LEN: usize = 32;

/// Errors raised while loading or creating an identity profile.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Filesystem failure while reading or persisting the profile
    #[error("profile I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Profile file exists but does not parse or fails internal checks
    #[error("profile file is corrupt: {0}")]
    Corrupt(String),

    /// Seed material has the wrong length
    #[error("invalid seed length: expected {SEED_LEN}, got {0}")]
    InvalidSeedLength(usize),
}

/// On-disk representation. Seeds are hex so the file stays a readable
/// single-line JSON document.
#[derive(Serialize, Deserialize)]
struct ProfileFile {
    version: u16,
    account_id: String,
    device_id: String,
    network_seed: String,
    crypto_seed: String,
    created_at: u64,
}

const PROFILE_VERSION: u16 = 1;

/// A loaded identity profile.
///
/// Seed material is zeroized when the profile is dropped.
pub struct Profile {
    account_id: String,
    device_id: String,
    network_seed: [u8; SEED_LEN],
    crypto_seed: [u8; SEED_LEN],
    created_at: u64,
}

impl Profile {
    /// Load the profile stored at `path`, creating and persisting a fresh one
    /// when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Corrupt`] when an existing file fails to
    /// parse, and [`IdentityError::Io`] on filesystem failures.
    pub fn load_or_create(path: &Path) -> Result<Self, IdentityError> {
        if path.exists() {
            let raw = fs::read_to_string(path)?;
            let file: ProfileFile =
                serde_json::from_str(&raw).map_err(|e| IdentityError::Corrupt(e.to_string()))?;
            let profile = Self::from_file(file)?;
            debug!(account_id = %profile.account_id, "Loaded identity profile");
            return Ok(profile);
        }

        let profile = Self::generate();
        profile.persist(path)?;
        info!(account_id = %profile.account_id, "Created new identity profile");
        Ok(profile)
    }

    fn from_file(file: ProfileFile) -> Result<Self, IdentityError> {
        if file.version != PROFILE_VERSION {
            return Err(IdentityError::Corrupt(format!(
                "unsupported profile version {}",
                file.version
            )));
        }
        Ok(Self {
            account_id: file.account_id,
            device_id: file.device_id,
            network_seed: decode_seed(&file.network_seed)?,
            crypto_seed: decode_seed(&file.crypto_seed)?,
            created_at: file.created_at,
        })
    }

    fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut network_seed = [0u8; SEED_LEN];
        let mut crypto_seed = [0u8; SEED_LEN];
        rng.fill_bytes(&mut network_seed);
        rng.fill_bytes(&mut crypto_seed);

        let signing_key = SigningKey::from_bytes(&crypto_seed);
        let account_id = hex::encode(signing_key.verifying_key().to_bytes());

        let mut device_bytes = [0u8; 8];
        rng.fill_bytes(&mut device_bytes);
        let device_id = hex::encode(device_bytes);

        Self {
            account_id,
            device_id,
            network_seed,
            crypto_seed,
            created_at: unix_now(),
        }
    }

    /// Persist the profile at `path` via write-to-temp-then-rename so a crash
    /// never leaves a half-written file behind.
    fn persist(&self, path: &Path) -> Result<(), IdentityError> {
        let file = ProfileFile {
            version: PROFILE_VERSION,
            account_id: self.account_id.clone(),
            device_id: self.device_id.clone(),
            network_seed: hex::encode(self.network_seed),
            crypto_seed: hex::encode(self.crypto_seed),
            created_at: self.created_at,
        };
        let json = serde_json::to_string(&file)
            .map_err(|e| IdentityError::Corrupt(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Stable account identifier (hex of the identity verifying key).
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Per-installation device identifier.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Seed for deterministic network identity bootstrap.
    pub fn network_seed(&self) -> &[u8; SEED_LEN] {
        &self.network_seed
    }

    /// Seed for the signing key and session-key derivation.
    pub fn crypto_seed(&self) -> &[u8; SEED_LEN] {
        &self.crypto_seed
    }

    /// Profile creation time (unix seconds).
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Re-derive the Ed25519 signing key from the crypto seed.
    pub fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.crypto_seed)
    }

    /// Hex encoding of the identity verifying key.
    pub fn identity_public_hex(&self) -> String {
        hex::encode(self.signing_key().verifying_key().to_bytes())
    }
}

impl Drop for Profile {
    fn drop(&mut self) {
        self.network_seed.zeroize();
        self.crypto_seed.zeroize();
    }
}

fn decode_seed(s: &str) -> Result<[u8; SEED_LEN], IdentityError> {
    let bytes = hex::decode(s).map_err(|e| IdentityError::Corrupt(e.to_string()))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| IdentityError::InvalidSeedLength(len))
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_load_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");

        let created = Profile::load_or_create(&path).unwrap();
        let loaded = Profile::load_or_create(&path).unwrap();

        assert_eq!(created.account_id(), loaded.account_id());
        assert_eq!(created.device_id(), loaded.device_id());
        assert_eq!(created.network_seed(), loaded.network_seed());
        assert_eq!(created.crypto_seed(), loaded.crypto_seed());
    }

    #[test]
    fn test_account_id_matches_signing_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");

        let profile = Profile::load_or_create(&path).unwrap();
        assert_eq!(profile.account_id(), profile.identity_public_hex());
    }

    #[test]
    fn test_corrupt_file_is_an_error_not_a_regeneration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        fs::write(&path, "{ not json").unwrap();

        let result = Profile::load_or_create(&path);
        assert!(matches!(result, Err(IdentityError::Corrupt(_))));
        // The broken file must still be there for operator inspection.
        assert!(path.exists());
    }

    #[test]
    fn test_missing_parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/profile.json");

        let profile = Profile::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(profile.account_id().len(), 64);
    }

    #[test]
    fn test_distinct_paths_get_distinct_identities() {
        let dir = tempfile::tempdir().unwrap();
        let a = Profile::load_or_create(&dir.path().join("a.json")).unwrap();
        let b = Profile::load_or_create(&dir.path().join("b.json")).unwrap();
        assert_ne!(a.account_id(), b.account_id());
    }
}
