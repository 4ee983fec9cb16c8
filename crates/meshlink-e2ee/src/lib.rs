//! # MeshLink E2EE
//!
//! End-to-end-encrypted messaging over a distributed record store.
//!
//! ## Key Modules
//!
//! * `documents` – Signed prekey bundles, key updates, and envelopes.
//! * `dispatch` – Automatic bootstrap-vs-continuation message handling.
//! * `engine` – The crypto-engine port and the built-in pairwise engine.
//! * `session` – Process-local session cache.
//! * `dht` – Key distribution through the record-store port.
//!
//! ## Trust Model
//!
//! Everything read from the record store is hostile until its detached
//! signature verifies against the identity key it embeds. Fetch paths fail
//! closed; publish paths re-validate their own output before it leaves the
//! process.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod dht;
pub mod dispatch;
pub mod documents;
pub mod engine;
pub mod error;
pub mod session;

pub use dht::{
    fetch_key_update, fetch_prekey_bundle, publish_key_update, publish_prekey_bundle, RecordStore,
    StoreError,
};
pub use dispatch::{DecryptedMessage, MessageKind, Messenger, WireMessage};
pub use documents::{
    build_key_update, build_prekey_bundle, clamp_ttl, validate_envelope, validate_key_update,
    validate_prekey_bundle, Envelope, KeyUpdate, PrekeyBundle, DEFAULT_DELIVERY_TTL_SECS,
    MAX_DELIVERY_TTL_SECS, MIN_DELIVERY_TTL_SECS,
};
pub use engine::{CryptoEngine, SharedSecretEngine};
pub use error::E2eeError;
pub use session::{Session, SessionCache};
