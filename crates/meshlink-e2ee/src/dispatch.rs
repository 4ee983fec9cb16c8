//! Automatic message dispatch.
//!
//! [`Messenger`] decides per message whether a session already exists.
//! Outbound: cache hit produces a continuation message, cache miss
//! bootstraps a session from the recipient's prekey bundle and produces a
//! bootstrap message. Inbound: the wire tag selects the path, bootstrap
//! messages install a session as a side effect, continuation messages
//! require one to exist already. Callers never see the distinction beyond
//! the returned kind.

use crate::documents::{validate_envelope, validate_prekey_bundle, Envelope};
use crate::dht::{fetch_prekey_bundle, RecordStore};
use crate::engine::CryptoEngine;
use crate::error::E2eeError;
use crate::session::SessionCache;
use meshlink_identity::Profile;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// How a message was (or would be) handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Not a recognizable encrypted message.
    Unknown,
    /// Session-establishing bootstrap message.
    Prekey,
    /// Continuation message under an existing session.
    Session,
}

/// Wire form of an encrypted message. The tag is what inbound dispatch
/// switches on.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WireMessage {
    /// Bootstrap: carries the sender's identity key so the recipient can
    /// establish the session before decrypting.
    Prekey {
        /// Hex identity verifying key of the sender.
        sender_identity_key: String,
        /// The encrypted envelope.
        envelope: Envelope,
    },
    /// Continuation under an already-established session.
    Session {
        /// The encrypted envelope.
        envelope: Envelope,
    },
}

/// A successfully decrypted inbound message.
#[derive(Debug)]
pub struct DecryptedMessage {
    /// Which dispatch path handled it.
    pub kind: MessageKind,
    /// Sender account id from the envelope.
    pub sender_account_id: String,
    /// Sender device id from the envelope.
    pub sender_device_id: String,
    /// Recovered plaintext.
    pub plaintext: Vec<u8>,
}

/// Per-profile messaging front end: owns the session cache and drives the
/// crypto engine.
pub struct Messenger {
    profile: Profile,
    engine: Arc<dyn CryptoEngine>,
    sessions: SessionCache,
}

impl Messenger {
    /// New messenger for `profile` using `engine`.
    pub fn new(profile: Profile, engine: Arc<dyn CryptoEngine>) -> Self {
        Self {
            profile,
            engine,
            sessions: SessionCache::new(),
        }
    }

    /// The profile this messenger sends and receives as.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Whether a session with the given remote device is already cached.
    pub fn has_session(&self, account_id: &str, device_id: &str) -> bool {
        self.sessions.get(account_id, device_id).is_some()
    }

    /// Encrypt `plaintext` for a recipient whose bundle bytes the caller
    /// already holds. Selects bootstrap or continuation automatically.
    ///
    /// Returns the serialized wire message and the kind that was produced.
    pub fn build_message_auto(
        &self,
        recipient_bundle: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, MessageKind), E2eeError> {
        let bundle = validate_prekey_bundle(recipient_bundle, 0)?;
        let account_id = bundle.payload.account_id.clone();
        let device_id = bundle.payload.device_id.clone();

        let (session, kind) = match self.sessions.get(&account_id, &device_id) {
            Some(session) => (session, MessageKind::Session),
            None => {
                let session = self.engine.establish_outbound(&self.profile, &bundle)?;
                debug!(recipient = %account_id, "Established outbound session");
                (
                    self.sessions.insert(&account_id, &device_id, session),
                    MessageKind::Prekey,
                )
            }
        };

        let sealed = self.engine.encrypt(&session, plaintext, aad)?;
        let envelope = Envelope::build(
            (self.profile.account_id(), self.profile.device_id()),
            (&account_id, &device_id),
            &sealed,
            aad,
        )?;

        let wire = match kind {
            MessageKind::Prekey => WireMessage::Prekey {
                sender_identity_key: self.profile.identity_public_hex(),
                envelope,
            },
            _ => WireMessage::Session { envelope },
        };
        let bytes = serde_json::to_vec(&wire).map_err(|e| E2eeError::Malformed(e.to_string()))?;
        Ok((bytes, kind))
    }

    /// Like [`build_message_auto`](Self::build_message_auto) but fetches the
    /// recipient's bundle from `store` first.
    pub fn build_message_for(
        &self,
        store: &dyn RecordStore,
        recipient_account_id: &str,
        recipient_device_id: &str,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, MessageKind), E2eeError> {
        // A cached session skips the fetch entirely.
        if let Some(session) = self.sessions.get(recipient_account_id, recipient_device_id) {
            let sealed = self.engine.encrypt(&session, plaintext, aad)?;
            let envelope = Envelope::build(
                (self.profile.account_id(), self.profile.device_id()),
                (recipient_account_id, recipient_device_id),
                &sealed,
                aad,
            )?;
            let wire = WireMessage::Session { envelope };
            let bytes =
                serde_json::to_vec(&wire).map_err(|e| E2eeError::Malformed(e.to_string()))?;
            return Ok((bytes, MessageKind::Session));
        }

        let bundle = fetch_prekey_bundle(store, recipient_account_id, recipient_device_id)?;
        let bundle_bytes =
            serde_json::to_vec(&bundle).map_err(|e| E2eeError::Malformed(e.to_string()))?;
        self.build_message_auto(&bundle_bytes, plaintext, aad)
    }

    /// Decrypt an inbound wire message, installing a session when it is a
    /// bootstrap message.
    pub fn decrypt_message_auto(&self, wire_bytes: &[u8]) -> Result<DecryptedMessage, E2eeError> {
        let wire: WireMessage =
            serde_json::from_slice(wire_bytes).map_err(|_| E2eeError::UnknownKind)?;

        match wire {
            WireMessage::Prekey {
                sender_identity_key,
                envelope,
            } => {
                check_envelope(&envelope)?;
                let session = self
                    .engine
                    .establish_inbound(&self.profile, &sender_identity_key)?;
                let session = self.sessions.insert(
                    &envelope.sender_account_id,
                    &envelope.sender_device_id,
                    session,
                );
                debug!(sender = %envelope.sender_account_id, "Established inbound session");
                let plaintext = self.engine.decrypt(
                    &session,
                    &envelope.ciphertext_bytes()?,
                    &envelope.aad_bytes()?,
                )?;
                Ok(DecryptedMessage {
                    kind: MessageKind::Prekey,
                    sender_account_id: envelope.sender_account_id,
                    sender_device_id: envelope.sender_device_id,
                    plaintext,
                })
            }
            WireMessage::Session { envelope } => {
                check_envelope(&envelope)?;
                let session = self
                    .sessions
                    .get(&envelope.sender_account_id, &envelope.sender_device_id)
                    .ok_or(E2eeError::NoSession)?;
                let plaintext = self.engine.decrypt(
                    &session,
                    &envelope.ciphertext_bytes()?,
                    &envelope.aad_bytes()?,
                )?;
                Ok(DecryptedMessage {
                    kind: MessageKind::Session,
                    sender_account_id: envelope.sender_account_id,
                    sender_device_id: envelope.sender_device_id,
                    plaintext,
                })
            }
        }
    }
}

fn check_envelope(envelope: &Envelope) -> Result<(), E2eeError> {
    let bytes = envelope.to_bytes()?;
    validate_envelope(&bytes)?;
    Ok(())
}
