//! Node lifecycle, transport, discovery, messaging, and DHT endpoints.

use crate::buffer::{borrow_slice, borrow_str, copy_out, copy_out_str, store_out};
use crate::handle::{borrow_node, CabiNodeHandle};
use crate::status::{
    status_from_node, CABI_DISCOVERY_EVENT_ADDRESS, CABI_DISCOVERY_EVENT_FINISHED,
    CABI_STATUS_INTERNAL_ERROR, CABI_STATUS_INVALID_ARGUMENT, CABI_STATUS_NOT_FOUND,
    CABI_STATUS_NULL_POINTER, CABI_STATUS_QUEUE_EMPTY, CABI_STATUS_SUCCESS, CABI_STATUS_TIMEOUT,
};
use meshlink_node::queue::DequeueOutcome;
use meshlink_node::{AutonatStatus, DiscoveryEvent, Node, NodeConfig, QueryStatus, TransportPref};
use std::os::raw::{c_char, c_int};
use tracing::{error, info};

fn status_code_of(status: QueryStatus) -> c_int {
    match status {
        QueryStatus::Success => CABI_STATUS_SUCCESS,
        QueryStatus::Timeout => CABI_STATUS_TIMEOUT,
        QueryStatus::NotFound => CABI_STATUS_NOT_FOUND,
        QueryStatus::InternalError => CABI_STATUS_INTERNAL_ERROR,
    }
}

/// Creates a new node and returns its handle, or null on failure.
///
/// `identity_seed_ptr` may be null (a fresh identity is generated) or point
/// at exactly 32 bytes. Bootstrap peers are NUL-terminated multiaddr
/// strings; malformed entries are skipped during startup.
///
/// # Safety
///
/// All pointer/length pairs must describe valid memory for the duration of
/// the call.
#[no_mangle]
pub unsafe extern "C" fn cabi_node_new(
    use_quic: bool,
    enable_relay_hop: bool,
    bootstrap_peers: *const *const c_char,
    bootstrap_peers_len: usize,
    identity_seed_ptr: *const u8,
    identity_seed_len: usize,
) -> *mut CabiNodeHandle {
    let identity_seed = if identity_seed_ptr.is_null() {
        None
    } else if identity_seed_len == 32 {
        let mut seed = [0u8; 32];
        seed.copy_from_slice(std::slice::from_raw_parts(identity_seed_ptr, 32));
        Some(seed)
    } else {
        error!(identity_seed_len, "Identity seed must be exactly 32 bytes");
        return std::ptr::null_mut();
    };

    let mut peers = Vec::with_capacity(bootstrap_peers_len);
    if bootstrap_peers_len > 0 {
        if bootstrap_peers.is_null() {
            return std::ptr::null_mut();
        }
        for &entry in std::slice::from_raw_parts(bootstrap_peers, bootstrap_peers_len) {
            match borrow_str(entry) {
                Ok(addr) => peers.push(addr.to_string()),
                Err(_) => {
                    error!("Bootstrap peer entry is null or not UTF-8");
                    return std::ptr::null_mut();
                }
            }
        }
    }

    let config = NodeConfig {
        transport: if use_quic {
            TransportPref::Quic
        } else {
            TransportPref::Tcp
        },
        relay_hop: enable_relay_hop,
        bootstrap_peers: peers,
        identity_seed,
        ..NodeConfig::default()
    };

    match Node::new(config) {
        Ok(node) => Box::into_raw(Box::new(CabiNodeHandle { node })),
        Err(e) => {
            error!(error = %e, "Node creation failed");
            std::ptr::null_mut()
        }
    }
}

/// Frees a node handle. Passing null is a no-op; passing the same handle
/// twice is undefined behavior, as with any C free.
///
/// # Safety
///
/// `handle` must be null or a pointer previously returned by
/// [`cabi_node_new`] that has not been freed.
#[no_mangle]
pub unsafe extern "C" fn cabi_node_free(handle: *mut CabiNodeHandle) {
    if handle.is_null() {
        return;
    }
    let boxed = Box::from_raw(handle);
    info!(peer_id = %boxed.node.local_peer_id(), "Node freed");
    drop(boxed);
}

/// Writes the local peer id into the provided buffer as UTF-8.
///
/// # Safety
///
/// Standard handle and buffer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_node_local_peer_id(
    handle: *mut CabiNodeHandle,
    out_buffer: *mut c_char,
    buffer_len: usize,
    written_len: *mut usize,
) -> c_int {
    let node = match borrow_node(handle) {
        Ok(node) => node,
        Err(status) => return status,
    };
    copy_out_str(node.local_peer_id(), out_buffer, buffer_len, written_len)
}

unsafe fn address_op(
    handle: *mut CabiNodeHandle,
    address: *const c_char,
    op: impl FnOnce(&Node, &str) -> Result<(), meshlink_node::NodeError>,
) -> c_int {
    let node = match borrow_node(handle) {
        Ok(node) => node,
        Err(status) => return status,
    };
    let address = match borrow_str(address) {
        Ok(address) => address,
        Err(status) => return status,
    };
    match op(node, address) {
        Ok(()) => CABI_STATUS_SUCCESS,
        Err(e) => status_from_node(&e),
    }
}

/// Starts listening on the given multiaddress.
///
/// # Safety
///
/// Standard handle and string contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_node_listen(
    handle: *mut CabiNodeHandle,
    address: *const c_char,
) -> c_int {
    address_op(handle, address, |node, addr| node.listen(addr))
}

/// Dials the peer at the given multiaddress.
///
/// # Safety
///
/// Standard handle and string contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_node_dial(
    handle: *mut CabiNodeHandle,
    address: *const c_char,
) -> c_int {
    address_op(handle, address, |node, addr| node.dial(addr))
}

/// Requests a circuit-relay reservation on the given relay address.
///
/// # Safety
///
/// Standard handle and string contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_node_reserve_relay(
    handle: *mut CabiNodeHandle,
    address: *const c_char,
) -> c_int {
    address_op(handle, address, |node, addr| node.reserve_relay(addr))
}

/// Returns the latest cached AutoNAT status for the node, or a negative
/// status code on a bad handle.
///
/// # Safety
///
/// Standard handle contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_autonat_status(handle: *mut CabiNodeHandle) -> c_int {
    match borrow_node(handle) {
        Ok(node) => match node.autonat_status() {
            AutonatStatus::Unknown => crate::status::CABI_AUTONAT_UNKNOWN,
            AutonatStatus::Private => crate::status::CABI_AUTONAT_PRIVATE,
            AutonatStatus::Public => crate::status::CABI_AUTONAT_PUBLIC,
        },
        Err(status) => -status,
    }
}

unsafe fn query_op(
    handle: *mut CabiNodeHandle,
    peer_id: *const c_char,
    request_id: *mut u64,
    op: impl FnOnce(&Node, &str) -> Result<u64, meshlink_node::NodeError>,
) -> c_int {
    let node = match borrow_node(handle) {
        Ok(node) => node,
        Err(status) => return status,
    };
    let peer_id = match borrow_str(peer_id) {
        Ok(peer_id) => peer_id,
        Err(status) => return status,
    };
    if request_id.is_null() {
        return CABI_STATUS_NULL_POINTER;
    }
    match op(node, peer_id) {
        Ok(id) => store_out(request_id, id),
        Err(e) => status_from_node(&e),
    }
}

/// Starts a find-peer query; the correlation id comes back through
/// `request_id` and results arrive on the discovery queue.
///
/// # Safety
///
/// Standard handle, string, and out-pointer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_node_find_peer(
    handle: *mut CabiNodeHandle,
    peer_id: *const c_char,
    request_id: *mut u64,
) -> c_int {
    query_op(handle, peer_id, request_id, |node, target| {
        node.find_peer(target)
    })
}

/// Starts a closest-peers query with the same correlation contract as
/// [`cabi_node_find_peer`].
///
/// # Safety
///
/// Standard handle, string, and out-pointer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_node_get_closest_peers(
    handle: *mut CabiNodeHandle,
    peer_id: *const c_char,
    request_id: *mut u64,
) -> c_int {
    query_op(handle, peer_id, request_id, |node, target| {
        node.get_closest_peers(target)
    })
}

/// Stores a binary key/value record in the DHT. `ttl_seconds = 0` selects
/// the node default.
///
/// # Safety
///
/// Standard handle and buffer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_node_dht_put_record(
    handle: *mut CabiNodeHandle,
    key_ptr: *const u8,
    key_len: usize,
    value_ptr: *const u8,
    value_len: usize,
    ttl_seconds: u64,
) -> c_int {
    let node = match borrow_node(handle) {
        Ok(node) => node,
        Err(status) => return status,
    };
    let key = match borrow_slice(key_ptr, key_len) {
        Ok(key) => key,
        Err(status) => return status,
    };
    let value = match borrow_slice(value_ptr, value_len) {
        Ok(value) => value,
        Err(status) => return status,
    };
    match node.dht_put(key, value, ttl_seconds) {
        Ok(()) => CABI_STATUS_SUCCESS,
        Err(e) => status_from_node(&e),
    }
}

/// Resolves a binary value by key from the DHT.
///
/// # Safety
///
/// Standard handle and buffer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_node_dht_get_record(
    handle: *mut CabiNodeHandle,
    key_ptr: *const u8,
    key_len: usize,
    out_buffer: *mut u8,
    buffer_len: usize,
    written_len: *mut usize,
) -> c_int {
    let node = match borrow_node(handle) {
        Ok(node) => node,
        Err(status) => return status,
    };
    let key = match borrow_slice(key_ptr, key_len) {
        Ok(key) => key,
        Err(status) => return status,
    };
    match node.dht_get(key) {
        Ok(value) => copy_out(&value, out_buffer, buffer_len, written_len),
        Err(e) => status_from_node(&e),
    }
}

/// Enqueues a binary payload into the node's message queue.
///
/// # Safety
///
/// Standard handle and buffer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_node_enqueue_message(
    handle: *mut CabiNodeHandle,
    data_ptr: *const u8,
    data_len: usize,
) -> c_int {
    let node = match borrow_node(handle) {
        Ok(node) => node,
        Err(status) => return status,
    };
    let data = match borrow_slice(data_ptr, data_len) {
        Ok(data) => data,
        Err(status) => return status,
    };
    if data.is_empty() {
        return CABI_STATUS_INVALID_ARGUMENT;
    }
    match node.enqueue_message(data) {
        Ok(()) => CABI_STATUS_SUCCESS,
        Err(e) => status_from_node(&e),
    }
}

/// Attempts to dequeue the next message into the provided buffer.
///
/// Returns `CABI_STATUS_QUEUE_EMPTY` when nothing is queued, and
/// `CABI_STATUS_BUFFER_TOO_SMALL` (with the required size in
/// `written_len`) when the buffer cannot hold the message; the message
/// stays queued in that case.
///
/// # Safety
///
/// Standard handle and buffer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_node_dequeue_message(
    handle: *mut CabiNodeHandle,
    out_buffer: *mut u8,
    buffer_len: usize,
    written_len: *mut usize,
) -> c_int {
    let node = match borrow_node(handle) {
        Ok(node) => node,
        Err(status) => return status,
    };
    if written_len.is_null() {
        return CABI_STATUS_NULL_POINTER;
    }
    let dst: &mut [u8] = if buffer_len == 0 {
        &mut []
    } else {
        if out_buffer.is_null() {
            return CABI_STATUS_NULL_POINTER;
        }
        std::slice::from_raw_parts_mut(out_buffer, buffer_len)
    };
    match node.dequeue_message_into(dst) {
        DequeueOutcome::Empty => CABI_STATUS_QUEUE_EMPTY,
        DequeueOutcome::Copied(len) => {
            *written_len = len;
            CABI_STATUS_SUCCESS
        }
        DequeueOutcome::NeedsCapacity(required) => {
            *written_len = required;
            crate::status::CABI_STATUS_BUFFER_TOO_SMALL
        }
    }
}

/// Attempts to dequeue a discovery event.
///
/// `event_kind` selects which outputs are meaningful: address events fill
/// the peer-id and address buffers, finished events fill `status_code`.
/// `request_id` is always filled. If either string buffer is too small the
/// event stays queued, both written-lengths report the required sizes, and
/// `CABI_STATUS_BUFFER_TOO_SMALL` is returned.
///
/// # Safety
///
/// Standard handle, buffer, and out-pointer contracts apply.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn cabi_node_dequeue_discovery_event(
    handle: *mut CabiNodeHandle,
    event_kind: *mut c_int,
    request_id: *mut u64,
    status_code: *mut c_int,
    peer_id_buffer: *mut c_char,
    peer_id_buffer_len: usize,
    peer_id_written_len: *mut usize,
    address_buffer: *mut c_char,
    address_buffer_len: usize,
    address_written_len: *mut usize,
) -> c_int {
    let node = match borrow_node(handle) {
        Ok(node) => node,
        Err(status) => return status,
    };
    if event_kind.is_null()
        || request_id.is_null()
        || status_code.is_null()
        || peer_id_written_len.is_null()
        || address_written_len.is_null()
    {
        return CABI_STATUS_NULL_POINTER;
    }

    // SAFETY: the out-pointers were null-checked above and stay valid for
    // the duration of the call; the closure runs before this function
    // returns.
    let result = node.dequeue_discovery_event_when(|event| -> Result<(), c_int> {
        match event {
            DiscoveryEvent::AddressFound {
                request_id: id,
                peer_id,
                address,
            } => unsafe {
                // Both strings must fit or the event stays queued; report
                // both required sizes so one retry suffices.
                if peer_id.len() > peer_id_buffer_len || address.len() > address_buffer_len {
                    *peer_id_written_len = peer_id.len();
                    *address_written_len = address.len();
                    return Err(crate::status::CABI_STATUS_BUFFER_TOO_SMALL);
                }
                if (peer_id_buffer.is_null() && !peer_id.is_empty())
                    || (address_buffer.is_null() && !address.is_empty())
                {
                    return Err(CABI_STATUS_NULL_POINTER);
                }
                copy_out_str(peer_id, peer_id_buffer, peer_id_buffer_len, peer_id_written_len);
                copy_out_str(address, address_buffer, address_buffer_len, address_written_len);
                *event_kind = CABI_DISCOVERY_EVENT_ADDRESS;
                *request_id = *id;
                *status_code = CABI_STATUS_SUCCESS;
                Ok(())
            },
            DiscoveryEvent::Finished {
                request_id: id,
                status,
            } => unsafe {
                *peer_id_written_len = 0;
                *address_written_len = 0;
                *event_kind = CABI_DISCOVERY_EVENT_FINISHED;
                *request_id = *id;
                *status_code = status_code_of(*status);
                Ok(())
            },
        }
    });

    match result {
        None => CABI_STATUS_QUEUE_EMPTY,
        Some(Err(status)) => status,
        Some(Ok(())) => CABI_STATUS_SUCCESS,
    }
}

/// Writes a versioned JSON array of the node's confirmed listen/external
/// addresses.
///
/// # Safety
///
/// Standard handle, buffer, and out-pointer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_node_get_addrs_snapshot(
    handle: *mut CabiNodeHandle,
    out_version: *mut u64,
    out_buf: *mut c_char,
    out_buf_len: usize,
    out_written: *mut usize,
) -> c_int {
    let node = match borrow_node(handle) {
        Ok(node) => node,
        Err(status) => return status,
    };
    if out_version.is_null() {
        return CABI_STATUS_NULL_POINTER;
    }
    let (version, addrs) = node.external_addrs_snapshot();
    let json = match serde_json::to_string(&addrs) {
        Ok(json) => json,
        Err(_) => return CABI_STATUS_INTERNAL_ERROR,
    };
    let status = copy_out_str(&json, out_buf, out_buf_len, out_written);
    if status == CABI_STATUS_SUCCESS {
        *out_version = version;
    }
    status
}
