//! Node error types.
//!
//! Engine-internal faults are collapsed into [`NodeError::Engine`] at this
//! boundary: callers have no use for transport- or codec-specific error types,
//! so detail is logged where it occurs and only the category crosses over.

use thiserror::Error;

/// Errors surfaced by node-handle operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Multiaddress string failed local validation
    #[error("invalid multiaddress: {0}")]
    InvalidAddress(String),

    /// Peer identifier string failed local validation
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    /// Some other argument was rejected before reaching the engine
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Message queue stayed at capacity for the whole backpressure window
    #[error("message queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// DHT record could not be resolved
    #[error("record not found")]
    NotFound,

    /// Query exceeded its internal time bound without a definitive answer
    #[error("query timed out")]
    Timeout,

    /// Opaque engine-internal failure; details are in the logs
    #[error("engine failure: {0}")]
    Engine(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            NodeError::InvalidAddress("nope".into()).to_string(),
            "invalid multiaddress: nope"
        );
        assert_eq!(
            NodeError::QueueFull { capacity: 64 }.to_string(),
            "message queue full (capacity 64)"
        );
        assert_eq!(NodeError::Timeout.to_string(), "query timed out");
    }
}
