//! Crypto engine port.
//!
//! The messaging layer treats the cipher machinery as a black box behind
//! [`CryptoEngine`]: establish a session from key material, then encrypt
//! and decrypt under it. [`SharedSecretEngine`] is the built-in engine: a
//! deterministic pairwise key derivation feeding XChaCha20-Poly1305. Both
//! sides derive the same key from the same public inputs, so the bootstrap
//! message and every continuation message decrypt without extra round
//! trips.

use crate::documents::{derive_signed_prekey, PrekeyBundle};
use crate::error::E2eeError;
use crate::session::Session;
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{AeadCore, KeyInit, XChaCha20Poly1305, XNonce};
use meshlink_identity::Profile;
use sha2::{Digest, Sha256};

/// Length of the XChaCha20-Poly1305 nonce prepended to every sealed blob.
pub const NONCE_LEN: usize = 24;

/// Port onto the session-key and AEAD machinery.
pub trait CryptoEngine: Send + Sync {
    /// Establish an outbound session toward the owner of `bundle`.
    fn establish_outbound(
        &self,
        local: &Profile,
        bundle: &PrekeyBundle,
    ) -> Result<Session, E2eeError>;

    /// Establish an inbound session from a bootstrap message's sender,
    /// identified by their hex identity verifying key.
    fn establish_inbound(
        &self,
        local: &Profile,
        sender_identity_key: &str,
    ) -> Result<Session, E2eeError>;

    /// Encrypt `plaintext` under `session`, binding `aad`.
    fn encrypt(&self, session: &Session, plaintext: &[u8], aad: &[u8])
        -> Result<Vec<u8>, E2eeError>;

    /// Decrypt `sealed` under `session`, checking `aad`.
    fn decrypt(&self, session: &Session, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, E2eeError>;
}

/// Deterministic pairwise-key engine.
///
/// The pairwise key is `SHA-256(domain || min(idA, idB) || max(idA, idB)
/// || signed_prekey)` where the ids are the two hex identity keys and the
/// signed prekey is the bundle owner's. Ordering the ids makes the
/// derivation symmetric; folding in the signed prekey rotates the key
/// whenever the owner republishes a bundle from a fresh crypto seed.
#[derive(Default)]
pub struct SharedSecretEngine;

impl SharedSecretEngine {
    /// New engine instance.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn derive_pairwise_key(
        local_identity: &str,
        remote_identity: &str,
        signed_prekey: &str,
    ) -> [u8; 32] {
        let (lo, hi) = if local_identity <= remote_identity {
            (local_identity, remote_identity)
        } else {
            (remote_identity, local_identity)
        };
        let mut hasher = Sha256::new();
        hasher.update(b"meshlink-pairwise-v1");
        hasher.update(lo.as_bytes());
        hasher.update(hi.as_bytes());
        hasher.update(signed_prekey.as_bytes());
        hasher.finalize().into()
    }
}

impl CryptoEngine for SharedSecretEngine {
    fn establish_outbound(
        &self,
        local: &Profile,
        bundle: &PrekeyBundle,
    ) -> Result<Session, E2eeError> {
        let remote_identity = bundle.payload.identity_key.clone();
        let key = Self::derive_pairwise_key(
            &local.identity_public_hex(),
            &remote_identity,
            &bundle.payload.signed_prekey,
        );
        Ok(Session {
            remote_identity_key: remote_identity,
            key,
        })
    }

    fn establish_inbound(
        &self,
        local: &Profile,
        sender_identity_key: &str,
    ) -> Result<Session, E2eeError> {
        if sender_identity_key.is_empty() {
            return Err(E2eeError::Crypto("empty sender identity key".into()));
        }
        // Inbound bootstrap is addressed at our own bundle, so the prekey
        // in the derivation is ours.
        let signed_prekey = derive_signed_prekey(local.crypto_seed());
        let key = Self::derive_pairwise_key(
            &local.identity_public_hex(),
            sender_identity_key,
            &signed_prekey,
        );
        Ok(Session {
            remote_identity_key: sender_identity_key.to_string(),
            key,
        })
    }

    fn encrypt(
        &self,
        session: &Session,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, E2eeError> {
        let cipher = XChaCha20Poly1305::new((&session.key).into());
        let nonce = XChaCha20Poly1305::generate_nonce(&mut rand::thread_rng());
        let ciphertext = cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad })
            .map_err(|_| E2eeError::Crypto("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, session: &Session, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, E2eeError> {
        if sealed.len() <= NONCE_LEN {
            return Err(E2eeError::Crypto("sealed blob too short".into()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new((&session.key).into());
        cipher
            .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| E2eeError::Crypto("decryption failed".into()))
    }
}
