//! Signed key-distribution documents.
//!
//! Three JSON documents cross this layer: the prekey bundle (bootstrap key
//! material), the key update (identity-key rotation announcement), and the
//! envelope (ciphertext plus routing metadata). Bundles and key updates
//! carry a detached Ed25519 signature over their canonical payload
//! serialization; envelopes only wrap bytes and are not themselves signed.
//!
//! All validation entry points are pure: `(bytes, now_unix)` in, verdict
//! out, no side effects. `now_unix = 0` means "use wall-clock now", so
//! callers can also pin a reference timestamp for reproducible checks.

use crate::error::E2eeError;
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use meshlink_identity::{unix_now, Profile};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Document format version.
pub const DOCUMENT_VERSION: u16 = 1;

/// Default delivery TTL applied when the caller passes `0`.
pub const DEFAULT_DELIVERY_TTL_SECS: u64 = 300;

/// Lower clamp for delivery TTLs.
pub const MIN_DELIVERY_TTL_SECS: u64 = 10;

/// Upper clamp for delivery TTLs.
pub const MAX_DELIVERY_TTL_SECS: u64 = 86_400;

/// Clamp a caller-supplied TTL into the supported range; `0` selects the
/// default.
#[must_use]
pub fn clamp_ttl(ttl_seconds: u64) -> u64 {
    if ttl_seconds == 0 {
        DEFAULT_DELIVERY_TTL_SECS
    } else {
        ttl_seconds.clamp(MIN_DELIVERY_TTL_SECS, MAX_DELIVERY_TTL_SECS)
    }
}

/// Resolve a reference timestamp: `0` means wall-clock now.
#[must_use]
pub fn now_or(now_unix: u64) -> u64 {
    if now_unix == 0 {
        unix_now()
    } else {
        now_unix
    }
}

/// Derive the (public) signed-prekey value from a crypto seed.
///
/// Deterministic so both sides of a bootstrap message agree on it: the
/// bundle owner embeds it, the bundle consumer reads it, and the owner
/// re-derives it when accepting the inbound bootstrap.
#[must_use]
pub fn derive_signed_prekey(crypto_seed: &[u8; 32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(crypto_seed);
    hasher.update(b"meshlink-spk-v1");
    hex::encode(hasher.finalize())
}

fn derive_one_time_prekey(crypto_seed: &[u8; 32], index: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(crypto_seed);
    hasher.update(b"meshlink-otk-v1");
    hasher.update(index.to_le_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Prekey bundle
// ---------------------------------------------------------------------------

/// Signed payload of a prekey bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrekeyBundlePayload {
    /// Document format version.
    pub v: u16,
    /// Owning account (hex identity verifying key).
    pub account_id: String,
    /// Owning device.
    pub device_id: String,
    /// Hex Ed25519 identity verifying key.
    pub identity_key: String,
    /// Hex signed prekey.
    pub signed_prekey: String,
    /// Hex signature over the signed prekey by the identity key.
    pub prekey_signature: String,
    /// Hex one-time prekeys.
    pub one_time_prekeys: Vec<String>,
    /// Creation time (unix seconds).
    pub created_at: u64,
    /// Expiry time (unix seconds).
    pub expires_at: u64,
}

/// A complete prekey bundle document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrekeyBundle {
    /// Signed payload.
    #[serde(flatten)]
    pub payload: PrekeyBundlePayload,
    /// Hex detached signature over the canonical payload serialization.
    pub signature: String,
}

/// Build and sign a prekey bundle for the local profile.
///
/// `one_time_prekey_count` is raised to at least 1; `ttl_seconds` is
/// clamped per [`clamp_ttl`]. Returns the UTF-8 JSON document.
pub fn build_prekey_bundle(
    profile: &Profile,
    one_time_prekey_count: usize,
    ttl_seconds: u64,
) -> Result<Vec<u8>, E2eeError> {
    let signing_key = profile.signing_key();
    let created_at = unix_now();
    let signed_prekey = derive_signed_prekey(profile.crypto_seed());
    let prekey_signature = hex::encode(signing_key.sign(signed_prekey.as_bytes()).to_bytes());

    let count = one_time_prekey_count.max(1);
    let one_time_prekeys = (0..count as u64)
        .map(|i| derive_one_time_prekey(profile.crypto_seed(), i))
        .collect();

    let payload = PrekeyBundlePayload {
        v: DOCUMENT_VERSION,
        account_id: profile.account_id().to_string(),
        device_id: profile.device_id().to_string(),
        identity_key: profile.identity_public_hex(),
        signed_prekey,
        prekey_signature,
        one_time_prekeys,
        created_at,
        expires_at: created_at + clamp_ttl(ttl_seconds),
    };
    sign_document(&signing_key, payload, |payload, signature| PrekeyBundle {
        payload,
        signature,
    })
}

/// Validate a prekey bundle document: structure, signature, prekey
/// signature, and expiry against `now_unix` (`0` means wall-clock now).
pub fn validate_prekey_bundle(bytes: &[u8], now_unix: u64) -> Result<PrekeyBundle, E2eeError> {
    let bundle: PrekeyBundle =
        serde_json::from_slice(bytes).map_err(|e| E2eeError::Malformed(e.to_string()))?;
    let payload = &bundle.payload;

    check_version(payload.v)?;
    check_expiry(payload.created_at, payload.expires_at, now_unix)?;
    let key = verifying_key(&payload.identity_key)?;
    verify_detached(&key, payload, &bundle.signature)?;

    // The inner prekey signature must also hold.
    let prekey_sig = decode_signature(&payload.prekey_signature)?;
    key.verify(payload.signed_prekey.as_bytes(), &prekey_sig)
        .map_err(|_| E2eeError::SignatureInvalid)?;

    if payload.one_time_prekeys.is_empty() {
        return Err(E2eeError::Malformed("bundle has no one-time prekeys".into()));
    }
    Ok(bundle)
}

// ---------------------------------------------------------------------------
// Key update
// ---------------------------------------------------------------------------

/// Signed payload of a key-update document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyUpdatePayload {
    /// Document format version.
    pub v: u16,
    /// Owning account.
    pub account_id: String,
    /// Owning device.
    pub device_id: String,
    /// Network peer id the update binds to.
    pub peer_id: String,
    /// Monotonically increasing revision; consumers keep the highest seen.
    pub revision: u64,
    /// Hex identity verifying key after the update.
    pub identity_key: String,
    /// Creation time (unix seconds).
    pub created_at: u64,
    /// Expiry time (unix seconds).
    pub expires_at: u64,
}

/// A complete key-update document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyUpdate {
    /// Signed payload.
    #[serde(flatten)]
    pub payload: KeyUpdatePayload,
    /// Hex detached signature over the canonical payload serialization.
    pub signature: String,
}

/// Build and sign a key-update document for the local profile.
pub fn build_key_update(
    profile: &Profile,
    peer_id: &str,
    revision: u64,
    ttl_seconds: u64,
) -> Result<Vec<u8>, E2eeError> {
    if peer_id.is_empty() {
        return Err(E2eeError::Malformed("empty peer id".into()));
    }
    let signing_key = profile.signing_key();
    let created_at = unix_now();
    let payload = KeyUpdatePayload {
        v: DOCUMENT_VERSION,
        account_id: profile.account_id().to_string(),
        device_id: profile.device_id().to_string(),
        peer_id: peer_id.to_string(),
        revision,
        identity_key: profile.identity_public_hex(),
        created_at,
        expires_at: created_at + clamp_ttl(ttl_seconds),
    };
    sign_document(&signing_key, payload, |payload, signature| KeyUpdate {
        payload,
        signature,
    })
}

/// Validate a key-update document against `now_unix` (`0` means wall-clock
/// now).
pub fn validate_key_update(bytes: &[u8], now_unix: u64) -> Result<KeyUpdate, E2eeError> {
    let update: KeyUpdate =
        serde_json::from_slice(bytes).map_err(|e| E2eeError::Malformed(e.to_string()))?;
    let payload = &update.payload;

    check_version(payload.v)?;
    check_expiry(payload.created_at, payload.expires_at, now_unix)?;
    let key = verifying_key(&payload.identity_key)?;
    verify_detached(&key, payload, &update.signature)?;
    Ok(update)
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Ciphertext plus routing metadata. Wraps already-encrypted bytes; the
/// encryption itself happens in the crypto engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Document format version.
    pub v: u16,
    /// Sender account.
    pub sender_account_id: String,
    /// Sender device.
    pub sender_device_id: String,
    /// Recipient account.
    pub recipient_account_id: String,
    /// Recipient device.
    pub recipient_device_id: String,
    /// Hex ciphertext.
    pub ciphertext: String,
    /// Hex associated authenticated data (may be empty).
    pub aad: String,
    /// Send time (unix seconds).
    pub sent_at: u64,
}

impl Envelope {
    /// Assemble an envelope around already-encrypted bytes.
    pub fn build(
        sender: (&str, &str),
        recipient: (&str, &str),
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Self, E2eeError> {
        if sender.0.is_empty() || sender.1.is_empty() || recipient.0.is_empty() || recipient.1.is_empty() {
            return Err(E2eeError::Malformed("empty sender/recipient id".into()));
        }
        if ciphertext.is_empty() {
            return Err(E2eeError::Malformed("empty ciphertext".into()));
        }
        Ok(Self {
            v: DOCUMENT_VERSION,
            sender_account_id: sender.0.to_string(),
            sender_device_id: sender.1.to_string(),
            recipient_account_id: recipient.0.to_string(),
            recipient_device_id: recipient.1.to_string(),
            ciphertext: hex::encode(ciphertext),
            aad: hex::encode(aad),
            sent_at: unix_now(),
        })
    }

    /// Serialize to the UTF-8 JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, E2eeError> {
        serde_json::to_vec(self).map_err(|e| E2eeError::Malformed(e.to_string()))
    }

    /// Decoded ciphertext bytes.
    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, E2eeError> {
        hex::decode(&self.ciphertext).map_err(|e| E2eeError::Malformed(e.to_string()))
    }

    /// Decoded AAD bytes.
    pub fn aad_bytes(&self) -> Result<Vec<u8>, E2eeError> {
        hex::decode(&self.aad).map_err(|e| E2eeError::Malformed(e.to_string()))
    }
}

/// Validate an envelope document's structure. Envelopes carry no signature
/// and no expiry; tampering shows up later as an AEAD failure.
pub fn validate_envelope(bytes: &[u8]) -> Result<Envelope, E2eeError> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| E2eeError::Malformed(e.to_string()))?;
    check_version(envelope.v)?;
    if envelope.sender_account_id.is_empty()
        || envelope.sender_device_id.is_empty()
        || envelope.recipient_account_id.is_empty()
        || envelope.recipient_device_id.is_empty()
    {
        return Err(E2eeError::Malformed("empty sender/recipient id".into()));
    }
    let ct = envelope.ciphertext_bytes()?;
    if ct.is_empty() {
        return Err(E2eeError::Malformed("empty ciphertext".into()));
    }
    envelope.aad_bytes()?;
    Ok(envelope)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn sign_document<P: Serialize, D: Serialize>(
    signing_key: &ed25519_dalek::SigningKey,
    payload: P,
    assemble: impl FnOnce(P, String) -> D,
) -> Result<Vec<u8>, E2eeError> {
    let canonical =
        serde_json::to_vec(&payload).map_err(|e| E2eeError::Malformed(e.to_string()))?;
    let signature = hex::encode(signing_key.sign(&canonical).to_bytes());
    serde_json::to_vec(&assemble(payload, signature)).map_err(|e| E2eeError::Malformed(e.to_string()))
}

fn verify_detached<P: Serialize>(
    key: &VerifyingKey,
    payload: &P,
    signature_hex: &str,
) -> Result<(), E2eeError> {
    let canonical =
        serde_json::to_vec(payload).map_err(|e| E2eeError::Malformed(e.to_string()))?;
    let signature = decode_signature(signature_hex)?;
    key.verify(&canonical, &signature)
        .map_err(|_| E2eeError::SignatureInvalid)
}

fn verifying_key(identity_key_hex: &str) -> Result<VerifyingKey, E2eeError> {
    let bytes = hex::decode(identity_key_hex).map_err(|e| E2eeError::Malformed(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| E2eeError::Malformed("identity key is not 32 bytes".into()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| E2eeError::Malformed("invalid identity key".into()))
}

fn decode_signature(signature_hex: &str) -> Result<Signature, E2eeError> {
    let bytes = hex::decode(signature_hex).map_err(|e| E2eeError::Malformed(e.to_string()))?;
    let bytes: [u8; 64] = bytes
        .try_into()
        .map_err(|_| E2eeError::Malformed("signature is not 64 bytes".into()))?;
    Ok(Signature::from_bytes(&bytes))
}

fn check_version(v: u16) -> Result<(), E2eeError> {
    if v == DOCUMENT_VERSION {
        Ok(())
    } else {
        Err(E2eeError::Malformed(format!("unsupported document version {v}")))
    }
}

fn check_expiry(created_at: u64, expires_at: u64, now_unix: u64) -> Result<(), E2eeError> {
    if expires_at < created_at {
        return Err(E2eeError::Malformed("expiry precedes creation".into()));
    }
    let now = now_or(now_unix);
    if now > expires_at {
        return Err(E2eeError::Expired { expires_at, now });
    }
    Ok(())
}
