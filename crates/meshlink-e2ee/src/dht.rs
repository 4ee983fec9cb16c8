//! DHT-backed key distribution.
//!
//! Prekey bundles and key updates live in a distributed record store under
//! deterministic keys derived from the owner's account and device ids. The
//! store itself is behind the [`RecordStore`] port so this crate stays
//! independent of the networking stack; fetch paths validate everything
//! they read and fail closed on any defect.

use crate::documents::{validate_key_update, validate_prekey_bundle, KeyUpdate, PrekeyBundle};
use crate::error::E2eeError;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors surfaced by a backing record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists under the requested key
    #[error("record not found")]
    NotFound,

    /// The lookup did not complete within the store's deadline
    #[error("record lookup timed out")]
    Timeout,

    /// Any other store failure
    #[error("record store failure: {0}")]
    Internal(String),
}

/// Port onto a distributed record store with TTL semantics.
///
/// `ttl_seconds = 0` selects the store's default retention.
pub trait RecordStore {
    /// Store `value` under `key`, retained for at most `ttl_seconds`.
    fn put(&self, key: &[u8], value: &[u8], ttl_seconds: u64) -> Result<(), StoreError>;

    /// Fetch the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError>;
}

/// Record key for a device's prekey bundle.
#[must_use]
pub fn prekey_bundle_key(account_id: &str, device_id: &str) -> Vec<u8> {
    namespaced_key("/meshlink/prekey/v1/", account_id, device_id)
}

/// Record key for a device's key-update document.
#[must_use]
pub fn key_update_key(account_id: &str, device_id: &str) -> Vec<u8> {
    namespaced_key("/meshlink/keyupdate/v1/", account_id, device_id)
}

fn namespaced_key(namespace: &str, account_id: &str, device_id: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(account_id.as_bytes());
    hasher.update(b"/");
    hasher.update(device_id.as_bytes());
    hasher.finalize().to_vec()
}

/// Publish an already-signed prekey bundle document.
///
/// The document is re-validated before it leaves this process; publishing a
/// bundle this node cannot itself verify would poison every consumer.
pub fn publish_prekey_bundle(
    store: &dyn RecordStore,
    bundle_bytes: &[u8],
    ttl_seconds: u64,
) -> Result<(), E2eeError> {
    let bundle = validate_prekey_bundle(bundle_bytes, 0)?;
    let key = prekey_bundle_key(&bundle.payload.account_id, &bundle.payload.device_id);
    store.put(&key, bundle_bytes, ttl_seconds)?;
    debug!(
        account_id = %bundle.payload.account_id,
        device_id = %bundle.payload.device_id,
        "Published prekey bundle"
    );
    Ok(())
}

/// Fetch and validate the prekey bundle for `(account_id, device_id)`.
///
/// Fails closed: a record that is present but malformed, mis-signed, or
/// expired is an error, never returned to the caller.
pub fn fetch_prekey_bundle(
    store: &dyn RecordStore,
    account_id: &str,
    device_id: &str,
) -> Result<PrekeyBundle, E2eeError> {
    let key = prekey_bundle_key(account_id, device_id);
    let bytes = store.get(&key)?;
    let bundle = validate_prekey_bundle(&bytes, 0).map_err(|e| {
        warn!(%account_id, %device_id, error = %e, "Rejected fetched prekey bundle");
        e
    })?;
    if bundle.payload.account_id != account_id || bundle.payload.device_id != device_id {
        return Err(E2eeError::Malformed(
            "bundle owner does not match requested key".into(),
        ));
    }
    Ok(bundle)
}

/// Publish an already-signed key-update document.
pub fn publish_key_update(
    store: &dyn RecordStore,
    update_bytes: &[u8],
    ttl_seconds: u64,
) -> Result<(), E2eeError> {
    let update = validate_key_update(update_bytes, 0)?;
    let key = key_update_key(&update.payload.account_id, &update.payload.device_id);
    store.put(&key, update_bytes, ttl_seconds)?;
    debug!(
        account_id = %update.payload.account_id,
        revision = update.payload.revision,
        "Published key update"
    );
    Ok(())
}

/// Fetch and validate the key update for `(account_id, device_id)`.
pub fn fetch_key_update(
    store: &dyn RecordStore,
    account_id: &str,
    device_id: &str,
) -> Result<KeyUpdate, E2eeError> {
    let key = key_update_key(account_id, device_id);
    let bytes = store.get(&key)?;
    let update = validate_key_update(&bytes, 0).map_err(|e| {
        warn!(%account_id, %device_id, error = %e, "Rejected fetched key update");
        e
    })?;
    if update.payload.account_id != account_id || update.payload.device_id != device_id {
        return Err(E2eeError::Malformed(
            "update owner does not match requested key".into(),
        ));
    }
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{build_key_update, build_prekey_bundle};
    use meshlink_identity::Profile;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    }

    impl RecordStore for MemoryStore {
        fn put(&self, key: &[u8], value: &[u8], _ttl_seconds: u64) -> Result<(), StoreError> {
            self.records.lock().insert(key.to_vec(), value.to_vec());
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
            self.records.lock().get(key).cloned().ok_or(StoreError::NotFound)
        }
    }

    fn test_profile() -> Profile {
        let dir = tempfile::tempdir().unwrap();
        Profile::load_or_create(&dir.path().join("profile.json")).unwrap()
    }

    #[test]
    fn test_publish_then_fetch_prekey_bundle() {
        let store = MemoryStore::default();
        let profile = test_profile();
        let bytes = build_prekey_bundle(&profile, 3, 300).unwrap();

        publish_prekey_bundle(&store, &bytes, 300).unwrap();
        let fetched = fetch_prekey_bundle(&store, profile.account_id(), profile.device_id()).unwrap();
        assert_eq!(fetched.payload.identity_key, profile.identity_public_hex());
    }

    #[test]
    fn test_fetch_missing_bundle_is_not_found() {
        let store = MemoryStore::default();
        let err = fetch_prekey_bundle(&store, "nobody", "nowhere").unwrap_err();
        assert!(matches!(err, E2eeError::Store(StoreError::NotFound)));
    }

    #[test]
    fn test_fetch_rejects_tampered_record() {
        let store = MemoryStore::default();
        let profile = test_profile();
        let bytes = build_prekey_bundle(&profile, 3, 300).unwrap();
        publish_prekey_bundle(&store, &bytes, 300).unwrap();

        // Overwrite the stored record with a flipped payload field.
        let mut doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        doc["device_id"] = serde_json::Value::String("spoofed".into());
        let key = prekey_bundle_key(profile.account_id(), profile.device_id());
        store
            .put(&key, &serde_json::to_vec(&doc).unwrap(), 300)
            .unwrap();

        let err = fetch_prekey_bundle(&store, profile.account_id(), profile.device_id()).unwrap_err();
        assert!(matches!(err, E2eeError::SignatureInvalid));
    }

    #[test]
    fn test_publish_rejects_unsigned_bytes() {
        let store = MemoryStore::default();
        assert!(publish_prekey_bundle(&store, b"{}", 300).is_err());
        assert!(store.records.lock().is_empty());
    }

    #[test]
    fn test_key_update_roundtrip_through_store() {
        let store = MemoryStore::default();
        let profile = test_profile();
        let peer_id = "b".repeat(64);
        let bytes = build_key_update(&profile, &peer_id, 7, 600).unwrap();

        publish_key_update(&store, &bytes, 600).unwrap();
        let fetched = fetch_key_update(&store, profile.account_id(), profile.device_id()).unwrap();
        assert_eq!(fetched.payload.revision, 7);
        assert_eq!(fetched.payload.peer_id, peer_id);
    }

    #[test]
    fn test_fetch_rejects_owner_mismatch() {
        let store = MemoryStore::default();
        let owner = test_profile();
        let other = test_profile();
        let bytes = build_prekey_bundle(&owner, 1, 300).unwrap();

        // Plant the owner's valid bundle under the other identity's key.
        let key = prekey_bundle_key(other.account_id(), other.device_id());
        store.put(&key, &bytes, 300).unwrap();

        let err = fetch_prekey_bundle(&store, other.account_id(), other.device_id()).unwrap_err();
        assert!(matches!(err, E2eeError::Malformed(_)));
    }
}
