//! Textual validation for multiaddresses and peer identifiers.
//!
//! The boundary rejects malformed input locally with `InvalidArgument`
//! semantics before anything is handed to the engine; the engine itself is
//! trusted to do full semantic resolution.

use crate::error::NodeError;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Peer id length bounds. Covers base58 multihash forms (46 and 52 chars)
/// as well as the 64-char hex form the in-process engine produces.
const PEER_ID_MIN_LEN: usize = 16;
const PEER_ID_MAX_LEN: usize = 128;

/// Validate a textual peer identifier.
///
/// # Errors
///
/// Returns [`NodeError::InvalidPeerId`] when the string is empty, has an
/// implausible length, or contains characters outside `[0-9A-Za-z]`.
pub fn validate_peer_id(peer_id: &str) -> Result<(), NodeError> {
    if peer_id.len() < PEER_ID_MIN_LEN || peer_id.len() > PEER_ID_MAX_LEN {
        return Err(NodeError::InvalidPeerId(peer_id.to_string()));
    }
    if !peer_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(NodeError::InvalidPeerId(peer_id.to_string()));
    }
    Ok(())
}

/// Validate the structure of a multiaddress string.
///
/// Checks the `/proto/value/proto/value/...` grammar against the protocol
/// set the engine supports; it does not resolve names or probe reachability.
///
/// # Errors
///
/// Returns [`NodeError::InvalidAddress`] on any grammar violation.
pub fn validate_multiaddr(addr: &str) -> Result<(), NodeError> {
    let invalid = || NodeError::InvalidAddress(addr.to_string());

    if !addr.starts_with('/') || addr.len() < 2 {
        return Err(invalid());
    }

    let mut parts = addr[1..].split('/');
    let mut saw_any = false;
    while let Some(proto) = parts.next() {
        saw_any = true;
        match proto {
            "ip4" => {
                let v = parts.next().ok_or_else(invalid)?;
                v.parse::<Ipv4Addr>().map_err(|_| invalid())?;
            }
            "ip6" => {
                let v = parts.next().ok_or_else(invalid)?;
                v.parse::<Ipv6Addr>().map_err(|_| invalid())?;
            }
            "dns" | "dns4" | "dns6" | "dnsaddr" => {
                let v = parts.next().ok_or_else(invalid)?;
                if v.is_empty() {
                    return Err(invalid());
                }
            }
            "tcp" | "udp" => {
                let v = parts.next().ok_or_else(invalid)?;
                v.parse::<u16>().map_err(|_| invalid())?;
            }
            "p2p" => {
                let v = parts.next().ok_or_else(invalid)?;
                validate_peer_id(v).map_err(|_| invalid())?;
            }
            "memory" => {
                let v = parts.next().ok_or_else(invalid)?;
                v.parse::<u64>().map_err(|_| invalid())?;
            }
            "quic" | "quic-v1" | "ws" | "wss" | "p2p-circuit" => {}
            _ => return Err(invalid()),
        }
    }

    if saw_any {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// Extract the trailing `/p2p/<peer-id>` component, if present.
///
/// Circuit addresses carry two `/p2p/` components; the trailing one names
/// the dial target, so the last valid match wins.
pub fn peer_id_of(addr: &str) -> Option<&str> {
    let mut found = None;
    let mut parts = addr.split('/').peekable();
    while let Some(part) = parts.next() {
        if part == "p2p" {
            if let Some(id) = parts.peek() {
                if validate_peer_id(id).is_ok() {
                    found = Some(*id);
                }
            }
        }
    }
    found
}
