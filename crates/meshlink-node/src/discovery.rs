//! Discovery query correlation.
//!
//! Every query gets a node-unique 64-bit request id at issue time. Results
//! arrive later as [`DiscoveryEvent`]s tagged with that id. The per-query
//! state machine is `Issued -> {zero or more AddressFound} -> Finished`;
//! `Finished` is terminal, and the [`QueryTracker`] enforces that nothing is
//! delivered for an id after its terminal event.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Terminal status of a discovery query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Query completed and produced its results.
    Success,
    /// Query exceeded its internal time bound.
    Timeout,
    /// Target could not be located.
    NotFound,
    /// Engine-internal failure; details are in the logs.
    InternalError,
}

/// An event produced by the engine's query subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// An address was found for a peer during the query.
    AddressFound {
        /// Correlates the event to an issued query.
        request_id: u64,
        /// Peer the address belongs to.
        peer_id: String,
        /// Multiaddress found for the peer.
        address: String,
    },
    /// The query reached its terminal state. No further events follow for
    /// this `request_id`.
    Finished {
        /// Correlates the event to an issued query.
        request_id: u64,
        /// How the query ended.
        status: QueryStatus,
    },
}

impl DiscoveryEvent {
    /// Request id the event is correlated to.
    #[must_use]
    pub fn request_id(&self) -> u64 {
        match self {
            Self::AddressFound { request_id, .. } | Self::Finished { request_id, .. } => {
                *request_id
            }
        }
    }
}

/// Monotonic allocator for request ids. Ids are unique for the lifetime of
/// the owning node; the first issued id is 1 so 0 stays free as a sentinel.
#[derive(Debug)]
pub struct RequestIdAllocator {
    next: AtomicU64,
}

impl RequestIdAllocator {
    /// Allocator starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Hand out the next id.
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks which request ids are still live and gates event admission so the
/// terminal-event invariant holds even against a misbehaving engine.
#[derive(Debug, Default)]
pub struct QueryTracker {
    active: Mutex<HashSet<u64>>,
}

impl QueryTracker {
    /// Empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a freshly allocated request id as live.
    pub fn register(&self, request_id: u64) {
        self.active.lock().insert(request_id);
    }

    /// Decide whether `event` may be delivered. A `Finished` event retires
    /// its id; anything referencing a retired (or never registered) id is
    /// rejected.
    pub fn admit(&self, event: &DiscoveryEvent) -> bool {
        let mut active = self.active.lock();
        match event {
            DiscoveryEvent::AddressFound { request_id, .. } => active.contains(request_id),
            DiscoveryEvent::Finished { request_id, .. } => {
                let live = active.remove(request_id);
                if !live {
                    debug!(request_id, "Dropping event for retired query");
                }
                live
            }
        }
    }

    /// Number of queries that have not yet finished.
    #[must_use]
    pub fn live_queries(&self) -> usize {
        self.active.lock().len()
    }
}
