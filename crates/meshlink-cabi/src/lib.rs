//! # MeshLink C ABI
//!
//! The boundary crate hosts embed: opaque node handles, flat-buffer
//! marshalling, and a numeric status taxonomy. Every function is
//! synchronous and either returns immediately with its result or hands
//! work to the node's internal runtime and reports acceptance.
//!
//! ## Buffer protocol
//!
//! Producing functions take `(buffer, buffer_len, written_len)`. The
//! recommended caller strategy: probe with a 64 KiB buffer, and on
//! `CABI_STATUS_BUFFER_TOO_SMALL` resize to the reported required length
//! and retry; queue-backed producers keep the item queued across the
//! retry so nothing is lost.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod buffer;
mod e2ee_api;
mod handle;
mod identity_api;
mod node_api;
mod status;

pub use e2ee_api::*;
pub use handle::CabiNodeHandle;
pub use identity_api::*;
pub use node_api::*;
pub use status::*;

use std::os::raw::c_int;
use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initializes tracing for the library. Idempotent; later calls are
/// no-ops. The filter honors `RUST_LOG` and defaults to `info`.
#[no_mangle]
pub extern "C" fn cabi_init_tracing() -> c_int {
    TRACING_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        // A host may already have a global subscriber; that is not an error.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init();
    });
    CABI_STATUS_SUCCESS
}
