//! Networking-engine port.
//!
//! The node treats the networking engine (transport, Kademlia, relay, NAT
//! probing) as a black box behind the [`NetworkEngine`] trait. The engine
//! runs on its own concurrency domain and pushes results back through the
//! [`EngineMailbox`] it receives at startup; the mailbox owns the overflow
//! policies so no engine implementation can stall on a slow consumer.

pub mod in_process;

use crate::discovery::{DiscoveryEvent, QueryTracker};
use crate::queue::BoundedQueue;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Last AutoNAT classification pushed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutonatStatus {
    /// No probe result observed yet.
    #[default]
    Unknown,
    /// Node is only privately reachable.
    Private,
    /// Node is publicly dialable.
    Public,
}

impl AutonatStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Private,
            2 => Self::Public,
            _ => Self::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Private => 1,
            Self::Public => 2,
        }
    }
}

/// Errors an engine implementation reports back to the node.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Requested record or peer is not resolvable.
    #[error("not found")]
    NotFound,
    /// Operation exceeded the engine's internal bound.
    #[error("timed out")]
    Timeout,
    /// Anything else; detail stays inside the engine's logs.
    #[error("{0}")]
    Internal(String),
}

/// Lock-free cell holding the cached AutoNAT status.
#[derive(Debug, Default)]
pub struct AutonatCell(AtomicU8);

impl AutonatCell {
    /// Read the cached classification. Never blocks.
    pub fn get(&self) -> AutonatStatus {
        AutonatStatus::from_u8(self.0.load(Ordering::Relaxed))
    }

    /// Replace the cached classification.
    pub fn set(&self, status: AutonatStatus) {
        self.0.store(status.as_u8(), Ordering::Relaxed);
    }
}

/// Versioned set of listen/external addresses the engine has confirmed.
///
/// The version counter lets pollers skip unchanged snapshots.
#[derive(Debug, Default)]
pub struct AddrBook {
    addrs: Mutex<Vec<String>>,
    version: AtomicU64,
}

impl AddrBook {
    /// Add an address if not already present.
    pub fn add(&self, addr: &str) {
        let mut addrs = self.addrs.lock();
        if !addrs.iter().any(|a| a == addr) {
            addrs.push(addr.to_string());
            self.version.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove an address if present.
    pub fn remove(&self, addr: &str) {
        let mut addrs = self.addrs.lock();
        if let Some(pos) = addrs.iter().position(|a| a == addr) {
            addrs.remove(pos);
            self.version.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current version and address list.
    pub fn snapshot(&self) -> (u64, Vec<String>) {
        let addrs = self.addrs.lock();
        (self.version.load(Ordering::Relaxed), addrs.clone())
    }
}

/// How long the inbound-message producer waits on a full queue before
/// giving up, and the poll interval inside that window.
const DELIVER_BACKPRESSURE_WINDOW: Duration = Duration::from_secs(1);
const DELIVER_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Handle an engine uses to push results into the node.
///
/// Cloneable; all clones feed the same queues.
#[derive(Clone)]
pub struct EngineMailbox {
    messages: Arc<BoundedQueue<Vec<u8>>>,
    discovery: Arc<BoundedQueue<DiscoveryEvent>>,
    tracker: Arc<QueryTracker>,
    autonat: Arc<AutonatCell>,
    addrs: Arc<AddrBook>,
}

impl EngineMailbox {
    pub(crate) fn new(
        messages: Arc<BoundedQueue<Vec<u8>>>,
        discovery: Arc<BoundedQueue<DiscoveryEvent>>,
        tracker: Arc<QueryTracker>,
        autonat: Arc<AutonatCell>,
        addrs: Arc<AddrBook>,
    ) -> Self {
        Self {
            messages,
            discovery,
            tracker,
            autonat,
            addrs,
        }
    }

    /// Deliver an inbound message to the caller-facing queue.
    ///
    /// Applies bounded backpressure: retries for up to one second while the
    /// queue is full, then drops the payload so the engine's own progress is
    /// never blocked indefinitely. Returns whether the message was queued.
    pub async fn deliver_message(&self, payload: Vec<u8>) -> bool {
        let mut payload = payload;
        let deadline = tokio::time::Instant::now() + DELIVER_BACKPRESSURE_WINDOW;
        loop {
            match self.messages.try_push(payload) {
                Ok(()) => return true,
                Err(rejected) => {
                    if tokio::time::Instant::now() >= deadline {
                        warn!(
                            len = rejected.len(),
                            "Inbound message dropped: queue full past backpressure window"
                        );
                        return false;
                    }
                    payload = rejected;
                    tokio::time::sleep(DELIVER_RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Deliver a discovery event.
    ///
    /// Events for retired request ids are rejected (terminal-event
    /// invariant). Overflow drops the oldest undelivered event: discovery
    /// results are advisory and re-queryable. Returns whether the event was
    /// admitted.
    pub fn push_discovery(&self, event: DiscoveryEvent) -> bool {
        if !self.tracker.admit(&event) {
            return false;
        }
        if let Some(evicted) = self.discovery.push_evicting(event) {
            debug!(
                request_id = evicted.request_id(),
                "Discovery queue full: dropped oldest undelivered event"
            );
        }
        true
    }

    /// Update the cached AutoNAT classification.
    pub fn set_autonat(&self, status: AutonatStatus) {
        self.autonat.set(status);
    }

    /// Record a confirmed listen/external address.
    pub fn add_address(&self, addr: &str) {
        self.addrs.add(addr);
    }

    /// Retract a previously confirmed address.
    pub fn remove_address(&self, addr: &str) {
        self.addrs.remove(addr);
    }
}

/// The networking engine contract.
///
/// All methods hand off work: returning `Ok` means "accepted for
/// processing", and completion is observed later through the mailbox, the
/// queues, or the cached status — never through a blocking return. The one
/// exception is [`NetworkEngine::get_record`], which resolves to a value and
/// is bounded by the node's configured query timeout.
#[async_trait]
pub trait NetworkEngine: Send + Sync {
    /// Begin background activity, retaining the mailbox for push updates.
    async fn start(&self, mailbox: EngineMailbox) -> Result<(), EngineError>;

    /// Start listening on a validated multiaddress.
    async fn listen(&self, addr: &str) -> Result<(), EngineError>;

    /// Dial a validated multiaddress.
    async fn dial(&self, addr: &str) -> Result<(), EngineError>;

    /// Request a circuit-relay reservation on the given relay address.
    async fn reserve_relay(&self, addr: &str) -> Result<(), EngineError>;

    /// Launch a find-peer query correlated by `request_id`.
    async fn find_peer(&self, request_id: u64, peer_id: &str) -> Result<(), EngineError>;

    /// Launch a closest-peers query correlated by `request_id`.
    async fn get_closest_peers(&self, request_id: u64, peer_id: &str) -> Result<(), EngineError>;

    /// Publish an application payload to the network.
    async fn publish_message(&self, payload: Vec<u8>) -> Result<(), EngineError>;

    /// Store a record in the DHT. `ttl_seconds = 0` selects the engine
    /// default.
    async fn put_record(
        &self,
        key: Vec<u8>,
        value: Vec<u8>,
        ttl_seconds: u64,
    ) -> Result<(), EngineError>;

    /// Resolve a record from the DHT.
    async fn get_record(&self, key: &[u8]) -> Result<Vec<u8>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::QueryStatus;

    fn mailbox(msg_cap: usize, disc_cap: usize) -> EngineMailbox {
        EngineMailbox::new(
            Arc::new(BoundedQueue::new(msg_cap)),
            Arc::new(BoundedQueue::new(disc_cap)),
            Arc::new(QueryTracker::new()),
            Arc::new(AutonatCell::default()),
            Arc::new(AddrBook::default()),
        )
    }

    #[test]
    fn test_autonat_cell_roundtrip() {
        let cell = AutonatCell::default();
        assert_eq!(cell.get(), AutonatStatus::Unknown);
        cell.set(AutonatStatus::Public);
        assert_eq!(cell.get(), AutonatStatus::Public);
    }

    #[test]
    fn test_addr_book_versioning() {
        let book = AddrBook::default();
        let (v0, addrs) = book.snapshot();
        assert!(addrs.is_empty());

        book.add("/ip4/127.0.0.1/tcp/4001");
        book.add("/ip4/127.0.0.1/tcp/4001"); // duplicate, no version bump
        let (v1, addrs) = book.snapshot();
        assert_eq!(addrs.len(), 1);
        assert_eq!(v1, v0 + 1);

        book.remove("/ip4/127.0.0.1/tcp/4001");
        let (v2, addrs) = book.snapshot();
        assert!(addrs.is_empty());
        assert_eq!(v2, v1 + 1);
    }

    #[tokio::test]
    async fn test_deliver_message_drops_after_window() {
        tokio::time::pause();
        let mb = mailbox(1, 1);
        assert!(mb.deliver_message(vec![1]).await);
        // Queue is now full and nobody drains it.
        assert!(!mb.deliver_message(vec![2]).await);
    }

    #[test]
    fn test_push_discovery_respects_tracker() {
        let mb = mailbox(4, 4);
        mb.tracker.register(1);

        assert!(mb.push_discovery(DiscoveryEvent::Finished {
            request_id: 1,
            status: QueryStatus::Success,
        }));
        // Terminal: same id is now rejected.
        assert!(!mb.push_discovery(DiscoveryEvent::Finished {
            request_id: 1,
            status: QueryStatus::Success,
        }));
    }

    #[test]
    fn test_push_discovery_drop_oldest_overflow() {
        let mb = mailbox(4, 2);
        mb.tracker.register(1);

        for _ in 0..3 {
            assert!(mb.push_discovery(DiscoveryEvent::AddressFound {
                request_id: 1,
                peer_id: "p".repeat(52),
                address: "/ip4/1.2.3.4/tcp/1".into(),
            }));
        }
        // Capacity 2: the oldest was evicted, two remain.
        assert_eq!(mb.discovery.len(), 2);
    }
}
