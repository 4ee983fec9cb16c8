//! E2EE error types.
//!
//! Cryptographic detail never crosses the boundary: callers see the
//! category, the logs see the rest.

use thiserror::Error;

/// Errors surfaced by the encrypted-messaging layer.
#[derive(Debug, Error)]
pub enum E2eeError {
    /// Document or payload does not parse or fails structural checks
    #[error("malformed document: {0}")]
    Malformed(String),

    /// Document is past its expiry at the reference timestamp
    #[error("document expired at {expires_at} (reference time {now})")]
    Expired {
        /// Expiry recorded in the document (unix seconds)
        expires_at: u64,
        /// Reference timestamp the check ran against
        now: u64,
    },

    /// Detached signature does not verify against the embedded identity key
    #[error("signature verification failed")]
    SignatureInvalid,

    /// Incoming payload carries no recognizable kind tag
    #[error("unknown message kind")]
    UnknownKind,

    /// Continuation message received but no session exists for the sender
    #[error("no established session for sender")]
    NoSession,

    /// AEAD or key-derivation failure inside the crypto engine
    #[error("crypto engine failure: {0}")]
    Crypto(String),

    /// Failure in the backing record store
    #[error(transparent)]
    Store(#[from] crate::dht::StoreError),
}
