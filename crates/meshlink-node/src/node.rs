//! The node handle.
//!
//! [`Node`] is a uniquely owned resource: it owns the tokio runtime the
//! engine runs on, both caller-facing queues, and the cached reachability
//! status. Synchronous operations that accept input and return immediately
//! (listen, dial, queries, enqueue) only hand work off; completion is
//! observed later by polling the queues or the cached status. Dropping the
//! node releases the engine and both queues.

use crate::addr::{validate_multiaddr, validate_peer_id};
use crate::config::NodeConfig;
use crate::discovery::{DiscoveryEvent, QueryStatus, QueryTracker, RequestIdAllocator};
use crate::engine::in_process::InProcessEngine;
use crate::engine::{AddrBook, AutonatCell, AutonatStatus, EngineError, EngineMailbox, NetworkEngine};
use crate::error::NodeError;
use crate::queue::{BoundedQueue, DequeueOutcome};
use ed25519_dalek::SigningKey;
use rand::RngCore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

/// How long `enqueue_message` applies backpressure against a full queue
/// before reporting `QueueFull`, and the poll interval inside that window.
const ENQUEUE_BACKPRESSURE_WINDOW: Duration = Duration::from_millis(250);
const ENQUEUE_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Local identity derived from the configured (or generated) seed.
struct NodeIdentity {
    peer_id: String,
}

impl NodeIdentity {
    fn derive(config: &NodeConfig) -> Self {
        let seed = config.identity_seed.unwrap_or_else(|| {
            let mut fresh = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut fresh);
            fresh
        });
        let signing_key = SigningKey::from_bytes(&seed);
        let peer_id = hex::encode(signing_key.verifying_key().to_bytes());
        Self { peer_id }
    }
}

/// One running network participant.
pub struct Node {
    runtime: Runtime,
    engine: Arc<dyn NetworkEngine>,
    peer_id: String,
    messages: Arc<BoundedQueue<Vec<u8>>>,
    discovery: Arc<BoundedQueue<DiscoveryEvent>>,
    tracker: Arc<QueryTracker>,
    autonat: Arc<AutonatCell>,
    addrs: Arc<AddrBook>,
    request_ids: RequestIdAllocator,
    dht_query_timeout: Duration,
}

impl Node {
    /// Create a node backed by the bundled in-process engine.
    ///
    /// Starts the engine's background activity and dials the configured
    /// bootstrap peers; malformed bootstrap entries are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Any unrecoverable setup failure (runtime construction, engine start)
    /// surfaces here; a `Node` that was returned `Ok` is fully operational.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let identity = NodeIdentity::derive(&config);
        let engine = Arc::new(InProcessEngine::new(
            identity.peer_id.clone(),
            None,
            config.discovery_query_timeout,
        ));
        Self::start_with(config, identity, engine)
    }

    /// Create a node backed by a caller-provided engine implementation.
    pub fn with_engine(
        config: NodeConfig,
        engine: Arc<dyn NetworkEngine>,
    ) -> Result<Self, NodeError> {
        let identity = NodeIdentity::derive(&config);
        Self::start_with(config, identity, engine)
    }

    fn start_with(
        config: NodeConfig,
        identity: NodeIdentity,
        engine: Arc<dyn NetworkEngine>,
    ) -> Result<Self, NodeError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("meshlink-engine")
            .enable_all()
            .build()
            .map_err(|e| NodeError::Engine(e.to_string()))?;

        let messages = Arc::new(BoundedQueue::new(config.message_queue_capacity));
        let discovery = Arc::new(BoundedQueue::new(config.discovery_queue_capacity));
        let tracker = Arc::new(QueryTracker::new());
        let autonat = Arc::new(AutonatCell::default());
        let addrs = Arc::new(AddrBook::default());

        let mailbox = EngineMailbox::new(
            Arc::clone(&messages),
            Arc::clone(&discovery),
            Arc::clone(&tracker),
            Arc::clone(&autonat),
            Arc::clone(&addrs),
        );
        runtime
            .block_on(engine.start(mailbox))
            .map_err(|e| NodeError::Engine(e.to_string()))?;

        info!(
            peer_id = %identity.peer_id,
            transport = ?config.transport,
            relay_hop = config.relay_hop,
            "Node started"
        );

        let node = Self {
            runtime,
            engine,
            peer_id: identity.peer_id,
            messages,
            discovery,
            tracker,
            autonat,
            addrs,
            request_ids: RequestIdAllocator::new(),
            dht_query_timeout: config.dht_query_timeout,
        };

        for addr in &config.bootstrap_peers {
            if let Err(e) = node.dial(addr) {
                warn!(addr, error = %e, "Skipping bootstrap peer");
            }
        }

        Ok(node)
    }

    /// Textual identifier of the local peer.
    #[must_use]
    pub fn local_peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Last cached AutoNAT classification. Never blocks; reflects push
    /// updates from the engine, not a live probe.
    #[must_use]
    pub fn autonat_status(&self) -> AutonatStatus {
        self.autonat.get()
    }

    /// Version-stamped snapshot of confirmed listen/external addresses.
    #[must_use]
    pub fn external_addrs_snapshot(&self) -> (u64, Vec<String>) {
        self.addrs.snapshot()
    }

    /// Start listening on `addr`. Success means accepted for processing;
    /// the bound address shows up later in the address snapshot.
    pub fn listen(&self, addr: &str) -> Result<(), NodeError> {
        validate_multiaddr(addr)?;
        self.runtime
            .block_on(self.engine.listen(addr))
            .map_err(Self::engine_err)
    }

    /// Dial `addr`. Success means accepted for processing, not connected.
    pub fn dial(&self, addr: &str) -> Result<(), NodeError> {
        validate_multiaddr(addr)?;
        self.runtime
            .block_on(self.engine.dial(addr))
            .map_err(Self::engine_err)
    }

    /// Request a circuit-relay reservation on the given relay address.
    pub fn reserve_relay(&self, addr: &str) -> Result<(), NodeError> {
        validate_multiaddr(addr)?;
        self.runtime
            .block_on(self.engine.reserve_relay(addr))
            .map_err(Self::engine_err)
    }

    /// Issue a find-peer query. Returns the correlation request id
    /// immediately; results arrive as discovery events.
    pub fn find_peer(&self, peer_id: &str) -> Result<u64, NodeError> {
        self.issue_query(peer_id, QueryKind::FindPeer)
    }

    /// Issue a closest-peers query. Same correlation contract as
    /// [`Node::find_peer`].
    pub fn get_closest_peers(&self, peer_id: &str) -> Result<u64, NodeError> {
        self.issue_query(peer_id, QueryKind::ClosestPeers)
    }

    fn issue_query(&self, peer_id: &str, kind: QueryKind) -> Result<u64, NodeError> {
        validate_peer_id(peer_id)?;
        let request_id = self.request_ids.allocate();
        // Register before the engine can emit, so early events are admitted.
        self.tracker.register(request_id);

        let result = self.runtime.block_on(async {
            match kind {
                QueryKind::FindPeer => self.engine.find_peer(request_id, peer_id).await,
                QueryKind::ClosestPeers => self.engine.get_closest_peers(request_id, peer_id).await,
            }
        });

        match result {
            Ok(()) => {
                debug!(request_id, peer_id, ?kind, "Query issued");
                Ok(request_id)
            }
            Err(e) => {
                // Retire the id so nothing can be delivered for it later.
                self.tracker.admit(&DiscoveryEvent::Finished {
                    request_id,
                    status: QueryStatus::InternalError,
                });
                Err(Self::engine_err(e))
            }
        }
    }

    /// Enqueue an application payload for outbound processing.
    ///
    /// The payload is appended to the node's delivery queue (so local
    /// consumers observe strict FIFO) and fanned out to the engine for
    /// network publication. On a full queue this applies bounded
    /// backpressure rather than dropping: it retries for up to 250 ms and
    /// then reports [`NodeError::QueueFull`].
    pub fn enqueue_message(&self, payload: &[u8]) -> Result<(), NodeError> {
        let mut item = payload.to_vec();
        let deadline = Instant::now() + ENQUEUE_BACKPRESSURE_WINDOW;
        loop {
            match self.messages.try_push(item) {
                Ok(()) => break,
                Err(rejected) => {
                    if Instant::now() >= deadline {
                        return Err(NodeError::QueueFull {
                            capacity: self.messages.capacity(),
                        });
                    }
                    item = rejected;
                    std::thread::sleep(ENQUEUE_RETRY_INTERVAL);
                }
            }
        }

        let engine = Arc::clone(&self.engine);
        let outbound = payload.to_vec();
        self.runtime.spawn(async move {
            if let Err(e) = engine.publish_message(outbound).await {
                warn!(error = %e, "Outbound publish failed");
            }
        });
        Ok(())
    }

    /// Pop the oldest queued message, if any. Never blocks.
    pub fn dequeue_message(&self) -> Option<Vec<u8>> {
        self.messages.pop()
    }

    /// Copy the oldest queued message into `buf`.
    ///
    /// `NeedsCapacity` leaves the message at the head of the queue so the
    /// caller can retry with a larger buffer without data loss; `Empty` is a
    /// normal outcome, not an error.
    pub fn dequeue_message_into(&self, buf: &mut [u8]) -> DequeueOutcome {
        self.messages.dequeue_into(buf)
    }

    /// Pop the oldest discovery event, if any. Never blocks.
    pub fn dequeue_discovery_event(&self) -> Option<DiscoveryEvent> {
        self.discovery.pop()
    }

    /// Inspect the oldest discovery event under the queue lock, popping it
    /// only when `accept` returns `Ok`.
    ///
    /// This is the marshalling hook for callers with fixed-size buffers: a
    /// rejected event stays queued for a retry with larger buffers.
    pub fn dequeue_discovery_event_when<R, E>(
        &self,
        accept: impl FnOnce(&DiscoveryEvent) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        self.discovery.pop_when(accept)
    }

    /// Store a record in the DHT. `ttl_seconds = 0` selects the engine
    /// default. Returns local acceptance, not network-wide replication.
    pub fn dht_put(&self, key: &[u8], value: &[u8], ttl_seconds: u64) -> Result<(), NodeError> {
        if key.is_empty() {
            return Err(NodeError::InvalidArgument("empty DHT key"));
        }
        self.runtime
            .block_on(
                self.engine
                    .put_record(key.to_vec(), value.to_vec(), ttl_seconds),
            )
            .map_err(Self::engine_err)
    }

    /// Resolve a record from the DHT, bounded by the configured query
    /// timeout.
    pub fn dht_get(&self, key: &[u8]) -> Result<Vec<u8>, NodeError> {
        if key.is_empty() {
            return Err(NodeError::InvalidArgument("empty DHT key"));
        }
        let result = self.runtime.block_on(async {
            tokio::time::timeout(self.dht_query_timeout, self.engine.get_record(key)).await
        });
        match result {
            Ok(inner) => inner.map_err(Self::engine_err),
            Err(_) => Err(NodeError::Timeout),
        }
    }

    fn engine_err(e: EngineError) -> NodeError {
        match e {
            EngineError::NotFound => NodeError::NotFound,
            EngineError::Timeout => NodeError::Timeout,
            EngineError::Internal(detail) => NodeError::Engine(detail),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum QueryKind {
    FindPeer,
    ClosestPeers,
}
