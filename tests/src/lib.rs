//! # MeshLink Test Suite
//!
//! Unified test crate for flows that cross crate boundaries:
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── flows.rs         # node + e2ee composed through the record-store port
//!     └── choreography.rs  # full C-ABI round trips, as a host would drive them
//! ```
//!
//! Single-crate behavior lives in each crate's own `#[cfg(test)]` modules;
//! only multi-crate choreography belongs here.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p meshlink-tests
//! ```

#![allow(dead_code)]

pub mod integration;
