//! # MeshLink Node
//!
//! The boundary layer between an internally asynchronous networking engine
//! and callers that can only make synchronous, polling-style calls.
//!
//! ## Key Modules
//!
//! * `node` – The uniquely owned node handle and its operations.
//! * `queue` – Bounded MPMC FIFOs, the only engine/caller hand-off points.
//! * `discovery` – Request-id correlation and the query state machine.
//! * `engine` – The networking-engine port and the in-process engine.
//! * `addr` – Local validation of multiaddresses and peer ids.
//!
//! ## Concurrency Contract
//!
//! All dequeues are non-blocking; an empty queue is a normal outcome.
//! Hand-off operations return as soon as the engine accepts the work, and
//! completion is observed via the queues or cached status. A node is not
//! safe to use concurrently with its own drop: freeing must be externally
//! serialized against all other operations on the same handle.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod addr;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod node;
pub mod queue;

pub use config::{
    NodeConfig, TransportPref, DEFAULT_DISCOVERY_QUEUE_CAPACITY, DEFAULT_MESSAGE_QUEUE_CAPACITY,
};
pub use discovery::{DiscoveryEvent, QueryStatus};
pub use engine::{AutonatStatus, EngineError, EngineMailbox, NetworkEngine};
pub use error::NodeError;
pub use node::Node;
pub use queue::{BoundedQueue, DequeueOutcome};
