//! Session cache.
//!
//! Maps remote `(account_id, device_id)` pairs to established crypto
//! sessions. The cache is process-local; losing it only means the next
//! outbound message re-bootstraps from the recipient's published bundle.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use zeroize::Zeroize;

/// An established pairwise session: the symmetric key the crypto engine
/// derived plus the remote identity it was derived against.
#[derive(Clone)]
pub struct Session {
    /// Hex identity verifying key of the remote party.
    pub remote_identity_key: String,
    /// Derived symmetric key material.
    pub key: [u8; 32],
}

impl Drop for Session {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material never reaches logs.
        f.debug_struct("Session")
            .field("remote_identity_key", &self.remote_identity_key)
            .finish_non_exhaustive()
    }
}

/// Thread-safe cache of established sessions keyed by remote
/// `(account_id, device_id)`.
#[derive(Default)]
pub struct SessionCache {
    sessions: Mutex<HashMap<(String, String), Arc<Session>>>,
}

impl SessionCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the session for a remote device.
    pub fn get(&self, account_id: &str, device_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .get(&(account_id.to_string(), device_id.to_string()))
            .cloned()
    }

    /// Install (or replace) the session for a remote device.
    pub fn insert(&self, account_id: &str, device_id: &str, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        self.sessions.lock().insert(
            (account_id.to_string(), device_id.to_string()),
            Arc::clone(&session),
        );
        session
    }

    /// Drop the session for a remote device, if any.
    pub fn remove(&self, account_id: &str, device_id: &str) {
        self.sessions
            .lock()
            .remove(&(account_id.to_string(), device_id.to_string()));
    }

    /// Number of cached sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether the cache holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(tag: u8) -> Session {
        Session {
            remote_identity_key: format!("{tag:064x}"),
            key: [tag; 32],
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let cache = SessionCache::new();
        assert!(cache.get("acc", "dev").is_none());

        cache.insert("acc", "dev", session(1));
        assert_eq!(cache.get("acc", "dev").unwrap().key, [1u8; 32]);

        cache.remove("acc", "dev");
        assert!(cache.get("acc", "dev").is_none());
    }

    #[test]
    fn test_devices_are_independent() {
        let cache = SessionCache::new();
        cache.insert("acc", "phone", session(1));
        cache.insert("acc", "laptop", session(2));

        assert_eq!(cache.get("acc", "phone").unwrap().key, [1u8; 32]);
        assert_eq!(cache.get("acc", "laptop").unwrap().key, [2u8; 32]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_insert_replaces() {
        let cache = SessionCache::new();
        cache.insert("acc", "dev", session(1));
        cache.insert("acc", "dev", session(2));
        assert_eq!(cache.get("acc", "dev").unwrap().key, [2u8; 32]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_debug_hides_key_material() {
        let rendered = format!("{:?}", session(0xab));
        assert!(!rendered.contains("171")); // 0xab
        assert!(!rendered.contains("ab, ab"));
    }
}
