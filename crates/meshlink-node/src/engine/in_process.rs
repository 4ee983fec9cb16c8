//! In-process networking engine.
//!
//! Implements [`NetworkEngine`] entirely in memory: a record store with TTL
//! expiry, a peer address book fed by dials, and discovery queries that
//! resolve from that book. It exists so every boundary operation can be
//! exercised without a transport; a real transport/Kademlia engine plugs in
//! through the same trait.

use super::{EngineError, EngineMailbox, NetworkEngine};
use crate::addr::peer_id_of;
use crate::discovery::{DiscoveryEvent, QueryStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Upper bound on addresses reported by a closest-peers query.
const CLOSEST_PEERS_LIMIT: usize = 20;

struct StoredRecord {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// In-memory engine implementation.
pub struct InProcessEngine {
    local_peer_id: String,
    mailbox: Mutex<Option<EngineMailbox>>,
    records: Mutex<HashMap<Vec<u8>, StoredRecord>>,
    peers: Mutex<HashMap<String, Vec<String>>>,
    default_record_ttl: Option<Duration>,
    query_timeout: Duration,
}

impl InProcessEngine {
    /// Engine for the node identified by `local_peer_id`.
    ///
    /// `default_record_ttl = None` keeps records until process exit; this is
    /// the engine default selected by `ttl_seconds = 0` on put. Discovery
    /// queries still running after `query_timeout` finish with
    /// `QueryStatus::Timeout`.
    #[must_use]
    pub fn new(
        local_peer_id: String,
        default_record_ttl: Option<Duration>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            local_peer_id,
            mailbox: Mutex::new(None),
            records: Mutex::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
            default_record_ttl,
            query_timeout,
        }
    }

    fn mailbox(&self) -> Result<EngineMailbox, EngineError> {
        self.mailbox
            .lock()
            .clone()
            .ok_or_else(|| EngineError::Internal("engine not started".into()))
    }

    /// Addresses currently known for `peer_id`.
    fn known_addrs(&self, peer_id: &str) -> Vec<String> {
        self.peers.lock().get(peer_id).cloned().unwrap_or_default()
    }

    fn remember_peer(&self, peer_id: &str, addr: &str) {
        let mut peers = self.peers.lock();
        let addrs = peers.entry(peer_id.to_string()).or_default();
        if !addrs.iter().any(|a| a == addr) {
            addrs.push(addr.to_string());
        }
    }
}

#[async_trait]
impl NetworkEngine for InProcessEngine {
    async fn start(&self, mailbox: EngineMailbox) -> Result<(), EngineError> {
        *self.mailbox.lock() = Some(mailbox);
        debug!(peer_id = %self.local_peer_id, "In-process engine started");
        Ok(())
    }

    async fn listen(&self, addr: &str) -> Result<(), EngineError> {
        self.mailbox()?.add_address(addr);
        debug!(addr, "Listening");
        Ok(())
    }

    async fn dial(&self, addr: &str) -> Result<(), EngineError> {
        // Dials with an explicit /p2p/ component seed the peer book; other
        // dials have nothing to resolve against in-process.
        if let Some(peer_id) = peer_id_of(addr) {
            let peer_id = peer_id.to_string();
            self.remember_peer(&peer_id, addr);
            debug!(addr, peer_id = %peer_id, "Dial accepted");
        } else {
            trace!(addr, "Dial accepted (no peer id component)");
        }
        Ok(())
    }

    async fn reserve_relay(&self, addr: &str) -> Result<(), EngineError> {
        // A reservation yields a public circuit address through the relay.
        let circuit = format!("{addr}/p2p-circuit/p2p/{}", self.local_peer_id);
        self.mailbox()?.add_address(&circuit);
        debug!(relay = addr, "Relay reservation accepted");
        Ok(())
    }

    async fn find_peer(&self, request_id: u64, peer_id: &str) -> Result<(), EngineError> {
        let mailbox = self.mailbox()?;
        let peer_id = peer_id.to_string();
        let addrs = self.known_addrs(&peer_id);
        let query_timeout = self.query_timeout;
        tokio::spawn(async move {
            let resolve = async {
                // Yield once so the query completes strictly after issue
                // returns.
                tokio::task::yield_now().await;
                if addrs.is_empty() {
                    QueryStatus::NotFound
                } else {
                    for address in addrs {
                        mailbox.push_discovery(DiscoveryEvent::AddressFound {
                            request_id,
                            peer_id: peer_id.clone(),
                            address,
                        });
                    }
                    QueryStatus::Success
                }
            };
            let status = match tokio::time::timeout(query_timeout, resolve).await {
                Ok(status) => status,
                Err(_) => QueryStatus::Timeout,
            };
            mailbox.push_discovery(DiscoveryEvent::Finished { request_id, status });
        });
        Ok(())
    }

    async fn get_closest_peers(&self, request_id: u64, _peer_id: &str) -> Result<(), EngineError> {
        let mailbox = self.mailbox()?;
        let entries: Vec<(String, String)> = {
            let peers = self.peers.lock();
            peers
                .iter()
                .filter_map(|(id, addrs)| addrs.first().map(|a| (id.clone(), a.clone())))
                .take(CLOSEST_PEERS_LIMIT)
                .collect()
        };
        let query_timeout = self.query_timeout;
        tokio::spawn(async move {
            let resolve = async {
                tokio::task::yield_now().await;
                if entries.is_empty() {
                    QueryStatus::NotFound
                } else {
                    for (peer_id, address) in entries {
                        mailbox.push_discovery(DiscoveryEvent::AddressFound {
                            request_id,
                            peer_id,
                            address,
                        });
                    }
                    QueryStatus::Success
                }
            };
            let status = match tokio::time::timeout(query_timeout, resolve).await {
                Ok(status) => status,
                Err(_) => QueryStatus::Timeout,
            };
            mailbox.push_discovery(DiscoveryEvent::Finished { request_id, status });
        });
        Ok(())
    }

    async fn publish_message(&self, payload: Vec<u8>) -> Result<(), EngineError> {
        trace!(len = payload.len(), "Publish accepted (no remote peers in-process)");
        Ok(())
    }

    async fn put_record(
        &self,
        key: Vec<u8>,
        value: Vec<u8>,
        ttl_seconds: u64,
    ) -> Result<(), EngineError> {
        let ttl = if ttl_seconds == 0 {
            self.default_record_ttl
        } else {
            Some(Duration::from_secs(ttl_seconds))
        };
        let record = StoredRecord {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        let mut records = self.records.lock();
        records.retain(|_, r| r.expires_at.map_or(true, |at| at > Instant::now()));
        records.insert(key, record);
        Ok(())
    }

    async fn get_record(&self, key: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut records = self.records.lock();
        match records.get(key) {
            Some(record) => {
                if record.expires_at.is_some_and(|at| at <= Instant::now()) {
                    records.remove(key);
                    return Err(EngineError::NotFound);
                }
                Ok(record.value.clone())
            }
            None => Err(EngineError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::QueryTracker;
    use crate::engine::{AddrBook, AutonatCell};
    use crate::queue::BoundedQueue;
    use std::sync::Arc;

    fn started_engine() -> (InProcessEngine, EngineMailbox) {
        let engine = InProcessEngine::new(
            "e".repeat(64),
            None,
            crate::config::DEFAULT_DISCOVERY_QUERY_TIMEOUT,
        );
        let mailbox = EngineMailbox::new(
            Arc::new(BoundedQueue::new(64)),
            Arc::new(BoundedQueue::new(64)),
            Arc::new(QueryTracker::new()),
            Arc::new(AutonatCell::default()),
            Arc::new(AddrBook::default()),
        );
        (engine, mailbox)
    }

    async fn drain_until_finished(queue: &BoundedQueue<DiscoveryEvent>) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        for _ in 0..200 {
            while let Some(event) = queue.pop() {
                let terminal = matches!(event, DiscoveryEvent::Finished { .. });
                events.push(event);
                if terminal {
                    return events;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        events
    }

    #[tokio::test]
    async fn test_find_peer_resolves_dialed_peer() {
        let (engine, mailbox) = started_engine();
        engine.start(mailbox.clone()).await.unwrap();

        let peer = "c".repeat(52);
        let addr = format!("/ip4/9.9.9.9/tcp/4001/p2p/{peer}");
        engine.dial(&addr).await.unwrap();

        mailbox.tracker.register(7);
        engine.find_peer(7, &peer).await.unwrap();

        let events = drain_until_finished(&mailbox.discovery).await;
        assert!(matches!(
            events.first(),
            Some(DiscoveryEvent::AddressFound { request_id: 7, .. })
        ));
        assert!(matches!(
            events.last(),
            Some(DiscoveryEvent::Finished {
                request_id: 7,
                status: QueryStatus::Success
            })
        ));
    }

    #[tokio::test]
    async fn test_find_peer_unknown_finishes_not_found() {
        let (engine, mailbox) = started_engine();
        engine.start(mailbox.clone()).await.unwrap();

        mailbox.tracker.register(3);
        engine.find_peer(3, &"d".repeat(52)).await.unwrap();

        let events = drain_until_finished(&mailbox.discovery).await;
        assert_eq!(
            events,
            vec![DiscoveryEvent::Finished {
                request_id: 3,
                status: QueryStatus::NotFound
            }]
        );
    }

    #[tokio::test]
    async fn test_query_past_time_bound_finishes_with_timeout() {
        // A zero bound elapses before the query task gets to run, so the
        // only event delivered is the terminal timeout status.
        let engine = InProcessEngine::new("e".repeat(64), None, Duration::ZERO);
        let mailbox = EngineMailbox::new(
            Arc::new(BoundedQueue::new(64)),
            Arc::new(BoundedQueue::new(64)),
            Arc::new(QueryTracker::new()),
            Arc::new(AutonatCell::default()),
            Arc::new(AddrBook::default()),
        );
        engine.start(mailbox.clone()).await.unwrap();

        let peer = "c".repeat(52);
        engine
            .dial(&format!("/ip4/9.9.9.9/tcp/4001/p2p/{peer}"))
            .await
            .unwrap();

        mailbox.tracker.register(11);
        engine.find_peer(11, &peer).await.unwrap();

        let events = drain_until_finished(&mailbox.discovery).await;
        assert_eq!(
            events,
            vec![DiscoveryEvent::Finished {
                request_id: 11,
                status: QueryStatus::Timeout
            }]
        );
    }

    #[tokio::test]
    async fn test_record_roundtrip_and_missing_key() {
        let (engine, mailbox) = started_engine();
        engine.start(mailbox).await.unwrap();

        engine
            .put_record(b"key".to_vec(), b"value".to_vec(), 0)
            .await
            .unwrap();
        assert_eq!(engine.get_record(b"key").await.unwrap(), b"value");
        assert!(matches!(
            engine.get_record(b"absent").await,
            Err(EngineError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_record_ttl_expiry() {
        let (engine, mailbox) = started_engine();
        engine.start(mailbox).await.unwrap();

        engine
            .put_record(b"k".to_vec(), b"v".to_vec(), 1)
            .await
            .unwrap();
        assert!(engine.get_record(b"k").await.is_ok());

        std::thread::sleep(Duration::from_millis(1100));
        assert!(matches!(
            engine.get_record(b"k").await,
            Err(EngineError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_relay_reservation_adds_circuit_address() {
        let (engine, mailbox) = started_engine();
        engine.start(mailbox.clone()).await.unwrap();

        engine
            .reserve_relay("/ip4/5.5.5.5/tcp/4001")
            .await
            .unwrap();
        let (_, addrs) = mailbox.addrs.snapshot();
        assert_eq!(addrs.len(), 1);
        assert!(addrs[0].contains("/p2p-circuit/p2p/"));
    }
}
