//! # Integration Test Flows
//!
//! Tests that meshlink-node, meshlink-e2ee, and meshlink-identity compose
//! correctly through the record-store port: key material published into
//! one node's DHT is fetched, validated, and used to bootstrap encrypted
//! sessions by another profile.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use meshlink_e2ee::{
        build_key_update, build_prekey_bundle, fetch_key_update, fetch_prekey_bundle,
        publish_key_update, publish_prekey_bundle, E2eeError, MessageKind, Messenger, RecordStore,
        SharedSecretEngine, StoreError,
    };
    use meshlink_identity::Profile;
    use meshlink_node::{Node, NodeConfig, NodeError};

    /// A node's DHT viewed through the e2ee record-store port, the same
    /// composition the boundary crate performs.
    struct NodeStore(Node);

    impl RecordStore for NodeStore {
        fn put(&self, key: &[u8], value: &[u8], ttl_seconds: u64) -> Result<(), StoreError> {
            self.0.dht_put(key, value, ttl_seconds).map_err(store_err)
        }

        fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
            self.0.dht_get(key).map_err(store_err)
        }
    }

    fn store_err(e: NodeError) -> StoreError {
        match e {
            NodeError::NotFound => StoreError::NotFound,
            NodeError::Timeout => StoreError::Timeout,
            other => StoreError::Internal(other.to_string()),
        }
    }

    fn node_store() -> NodeStore {
        NodeStore(Node::new(NodeConfig::default()).unwrap())
    }

    fn messenger(dir: &tempfile::TempDir, name: &str) -> Messenger {
        let profile = Profile::load_or_create(&dir.path().join(name)).unwrap();
        Messenger::new(profile, Arc::new(SharedSecretEngine::new()))
    }

    #[test]
    fn test_bundle_published_to_node_bootstraps_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = node_store();
        let alice = messenger(&dir, "alice.json");
        let bob = messenger(&dir, "bob.json");

        // Bob publishes through the node's DHT.
        let bundle = build_prekey_bundle(bob.profile(), 2, 300).unwrap();
        publish_prekey_bundle(&store, &bundle, 0).unwrap();

        // Alice addresses Bob by id only; the store supplies the bundle.
        let (wire, kind) = alice
            .build_message_for(
                &store,
                bob.profile().account_id(),
                bob.profile().device_id(),
                b"hello over the dht",
                b"",
            )
            .unwrap();
        assert_eq!(kind, MessageKind::Prekey);

        let got = bob.decrypt_message_auto(&wire).unwrap();
        assert_eq!(got.plaintext, b"hello over the dht");
        assert_eq!(got.sender_account_id, alice.profile().account_id());

        // Continuation keeps working without another fetch.
        let (wire2, kind2) = alice
            .build_message_for(
                &store,
                bob.profile().account_id(),
                bob.profile().device_id(),
                b"and again",
                b"",
            )
            .unwrap();
        assert_eq!(kind2, MessageKind::Session);
        assert_eq!(bob.decrypt_message_auto(&wire2).unwrap().plaintext, b"and again");
    }

    #[test]
    fn test_missing_bundle_fails_closed_through_node() {
        let dir = tempfile::tempdir().unwrap();
        let store = node_store();
        let alice = messenger(&dir, "alice.json");

        let err = alice
            .build_message_for(&store, &"f".repeat(64), "no-device", b"x", b"")
            .unwrap_err();
        assert!(matches!(err, E2eeError::Store(StoreError::NotFound)));
    }

    #[test]
    fn test_tampered_record_in_node_dht_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = node_store();
        let bob = messenger(&dir, "bob.json");

        let bundle = build_prekey_bundle(bob.profile(), 1, 300).unwrap();
        publish_prekey_bundle(&store, &bundle, 0).unwrap();

        // Corrupt the record in place, then fetch.
        let mut doc: serde_json::Value = serde_json::from_slice(&bundle).unwrap();
        doc["identity_key"] = serde_json::Value::String("00".repeat(32));
        let key = meshlink_e2ee::dht::prekey_bundle_key(
            bob.profile().account_id(),
            bob.profile().device_id(),
        );
        store
            .put(&key, &serde_json::to_vec(&doc).unwrap(), 0)
            .unwrap();

        let err = fetch_prekey_bundle(&store, bob.profile().account_id(), bob.profile().device_id())
            .unwrap_err();
        assert!(matches!(err, E2eeError::SignatureInvalid));
    }

    #[test]
    fn test_key_update_roundtrip_through_node() {
        let dir = tempfile::tempdir().unwrap();
        let store = node_store();
        let bob = messenger(&dir, "bob.json");
        let peer_id = store.0.local_peer_id().to_string();

        let update = build_key_update(bob.profile(), &peer_id, 4, 600).unwrap();
        publish_key_update(&store, &update, 0).unwrap();

        let fetched =
            fetch_key_update(&store, bob.profile().account_id(), bob.profile().device_id())
                .unwrap();
        assert_eq!(fetched.payload.revision, 4);
        assert_eq!(fetched.payload.peer_id, peer_id);
    }

    #[test]
    fn test_bundle_expires_out_of_the_dht() {
        let dir = tempfile::tempdir().unwrap();
        let store = node_store();
        let bob = messenger(&dir, "bob.json");

        // Minimum bundle TTL, but a 1-second record TTL: the DHT forgets
        // the record before the document itself expires.
        let bundle = build_prekey_bundle(bob.profile(), 1, 10).unwrap();
        publish_prekey_bundle(&store, &bundle, 1).unwrap();
        assert!(
            fetch_prekey_bundle(&store, bob.profile().account_id(), bob.profile().device_id())
                .is_ok()
        );

        std::thread::sleep(std::time::Duration::from_millis(1100));
        let err =
            fetch_prekey_bundle(&store, bob.profile().account_id(), bob.profile().device_id())
                .unwrap_err();
        assert!(matches!(err, E2eeError::Store(StoreError::NotFound)));
    }
}
