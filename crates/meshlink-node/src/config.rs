//! Node configuration.

use std::time::Duration;

/// Default capacity for the message queue.
pub const DEFAULT_MESSAGE_QUEUE_CAPACITY: usize = 64;

/// Default capacity for the discovery event queue.
pub const DEFAULT_DISCOVERY_QUEUE_CAPACITY: usize = 64;

/// Default upper bound for a DHT get before it surfaces as a timeout.
pub const DEFAULT_DHT_QUERY_TIMEOUT: Duration = Duration::from_secs(20);

/// Default upper bound for a discovery query before the engine emits
/// `Finished(Timeout)`.
pub const DEFAULT_DISCOVERY_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Preferred transport family for the underlying engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportPref {
    /// Stream-multiplexed TCP transport
    #[default]
    Tcp,
    /// Datagram-based QUIC transport
    Quic,
}

/// Configuration captured at node creation. Queue capacities are fixed for
/// the lifetime of the node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Preferred transport family.
    pub transport: TransportPref,
    /// Whether the node offers circuit-relay hop service to others.
    pub relay_hop: bool,
    /// Bootstrap peer multiaddresses. Malformed entries are skipped with a
    /// warning; they are never fatal.
    pub bootstrap_peers: Vec<String>,
    /// Fixed 32-byte identity seed; `None` generates a fresh identity.
    pub identity_seed: Option<[u8; 32]>,
    /// Message queue capacity.
    pub message_queue_capacity: usize,
    /// Discovery event queue capacity.
    pub discovery_queue_capacity: usize,
    /// Internal bound on DHT gets.
    pub dht_query_timeout: Duration,
    /// Internal bound on discovery queries.
    pub discovery_query_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            transport: TransportPref::default(),
            relay_hop: false,
            bootstrap_peers: Vec::new(),
            identity_seed: None,
            message_queue_capacity: DEFAULT_MESSAGE_QUEUE_CAPACITY,
            discovery_queue_capacity: DEFAULT_DISCOVERY_QUEUE_CAPACITY,
            dht_query_timeout: DEFAULT_DHT_QUERY_TIMEOUT,
            discovery_query_timeout: DEFAULT_DISCOVERY_QUERY_TIMEOUT,
        }
    }
}

impl NodeConfig {
    /// Config with the given transport preference, everything else default.
    #[must_use]
    pub fn with_transport(transport: TransportPref) -> Self {
        Self {
            transport,
            ..Self::default()
        }
    }
}
