//! Numeric status taxonomy shared with C callers.
//!
//! Every boundary function reports one of these codes. `QUEUE_EMPTY` and
//! `BUFFER_TOO_SMALL` are control-flow signals the caller is expected to
//! handle on hot paths, not failures.

use meshlink_e2ee::{E2eeError, StoreError};
use meshlink_node::NodeError;
use std::os::raw::c_int;
use tracing::warn;

/// Operation completed successfully.
pub const CABI_STATUS_SUCCESS: c_int = 0;

/// One of the provided pointers was null.
pub const CABI_STATUS_NULL_POINTER: c_int = 1;

/// Invalid argument supplied (malformed multiaddr, bad document, ...).
pub const CABI_STATUS_INVALID_ARGUMENT: c_int = 2;

/// Internal runtime error; details go to the logs, not across the boundary.
pub const CABI_STATUS_INTERNAL_ERROR: c_int = 3;

/// No item available in the polled queue right now.
pub const CABI_STATUS_QUEUE_EMPTY: c_int = 4;

/// Provided buffer cannot hold the produced data; the out-length carries
/// the required size and the data stays available for a retry.
pub const CABI_STATUS_BUFFER_TOO_SMALL: c_int = 5;

/// The operation did not complete within its deadline.
pub const CABI_STATUS_TIMEOUT: c_int = 6;

/// The requested peer or record could not be located.
pub const CABI_STATUS_NOT_FOUND: c_int = 7;

/// Decrypted message kind could not be determined.
pub const CABI_E2EE_MESSAGE_KIND_UNKNOWN: c_int = 0;

/// Decrypted message was a session-establishing bootstrap message.
pub const CABI_E2EE_MESSAGE_KIND_PREKEY: c_int = 1;

/// Decrypted message was a continuation under an existing session.
pub const CABI_E2EE_MESSAGE_KIND_SESSION: c_int = 2;

/// AutoNAT status has not yet been determined.
pub const CABI_AUTONAT_UNKNOWN: c_int = 0;

/// AutoNAT reports the node as privately reachable only.
pub const CABI_AUTONAT_PRIVATE: c_int = 1;

/// AutoNAT reports the node as publicly reachable.
pub const CABI_AUTONAT_PUBLIC: c_int = 2;

/// Discovery event carries an address for a peer.
pub const CABI_DISCOVERY_EVENT_ADDRESS: c_int = 0;

/// Discovery query has finished.
pub const CABI_DISCOVERY_EVENT_FINISHED: c_int = 1;

/// Collapse a node-layer error into a boundary status.
pub(crate) fn status_from_node(err: &NodeError) -> c_int {
    match err {
        NodeError::InvalidAddress(_) | NodeError::InvalidPeerId(_) | NodeError::InvalidArgument(_) => {
            CABI_STATUS_INVALID_ARGUMENT
        }
        NodeError::NotFound => CABI_STATUS_NOT_FOUND,
        NodeError::Timeout => CABI_STATUS_TIMEOUT,
        NodeError::QueueFull { .. } | NodeError::Engine(_) => {
            warn!(error = %err, "Node operation failed at the boundary");
            CABI_STATUS_INTERNAL_ERROR
        }
    }
}

/// Collapse an e2ee-layer error into a boundary status.
pub(crate) fn status_from_e2ee(err: &E2eeError) -> c_int {
    match err {
        E2eeError::Malformed(_)
        | E2eeError::Expired { .. }
        | E2eeError::SignatureInvalid
        | E2eeError::UnknownKind
        | E2eeError::NoSession => CABI_STATUS_INVALID_ARGUMENT,
        E2eeError::Crypto(_) => {
            warn!(error = %err, "Crypto engine failure at the boundary");
            CABI_STATUS_INTERNAL_ERROR
        }
        E2eeError::Store(store) => match store {
            StoreError::NotFound => CABI_STATUS_NOT_FOUND,
            StoreError::Timeout => CABI_STATUS_TIMEOUT,
            StoreError::Internal(_) => {
                warn!(error = %err, "Record store failure at the boundary");
                CABI_STATUS_INTERNAL_ERROR
            }
        },
    }
}
