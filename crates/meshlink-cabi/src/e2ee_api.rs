//! Encrypted-messaging endpoints.
//!
//! Profile-addressed: every stateful call names the profile file it acts
//! as, and the library keeps one messenger (with its session cache) per
//! profile path for the lifetime of the process. Sessions therefore
//! survive across calls without the host holding any extra handle.

use crate::buffer::{borrow_slice, borrow_str, copy_out};
use crate::handle::{borrow_node, CabiNodeHandle};
use crate::status::{
    status_from_e2ee, CABI_E2EE_MESSAGE_KIND_PREKEY, CABI_E2EE_MESSAGE_KIND_SESSION,
    CABI_STATUS_INTERNAL_ERROR, CABI_STATUS_INVALID_ARGUMENT, CABI_STATUS_NULL_POINTER,
    CABI_STATUS_SUCCESS,
};
use meshlink_e2ee::{
    build_key_update, build_prekey_bundle, fetch_key_update, fetch_prekey_bundle,
    publish_key_update, publish_prekey_bundle, validate_envelope, validate_key_update,
    validate_prekey_bundle, Envelope, MessageKind, Messenger, RecordStore, SharedSecretEngine,
    StoreError, WireMessage,
};
use meshlink_identity::Profile;
use meshlink_node::{Node, NodeError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::raw::{c_char, c_int};
use std::sync::{Arc, OnceLock};
use tracing::error;

/// One messenger per profile path, shared across all boundary calls.
static MESSENGERS: OnceLock<Mutex<HashMap<String, Arc<Messenger>>>> = OnceLock::new();

fn messenger_for(profile_path: &str) -> Result<Arc<Messenger>, c_int> {
    let registry = MESSENGERS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut registry = registry.lock();
    if let Some(existing) = registry.get(profile_path) {
        return Ok(Arc::clone(existing));
    }
    let profile = Profile::load_or_create(std::path::Path::new(profile_path)).map_err(|e| {
        error!(profile_path, error = %e, "Profile load failed");
        CABI_STATUS_INTERNAL_ERROR
    })?;
    let messenger = Arc::new(Messenger::new(profile, Arc::new(SharedSecretEngine::new())));
    registry.insert(profile_path.to_string(), Arc::clone(&messenger));
    Ok(messenger)
}

fn load_profile(profile_path: &str) -> Result<Profile, c_int> {
    Profile::load_or_create(std::path::Path::new(profile_path)).map_err(|e| {
        error!(profile_path, error = %e, "Profile load failed");
        CABI_STATUS_INTERNAL_ERROR
    })
}

/// The node's DHT viewed through the e2ee record-store port.
struct NodeRecordStore<'a>(&'a Node);

impl RecordStore for NodeRecordStore<'_> {
    fn put(&self, key: &[u8], value: &[u8], ttl_seconds: u64) -> Result<(), StoreError> {
        self.0.dht_put(key, value, ttl_seconds).map_err(store_err)
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.0.dht_get(key).map_err(store_err)
    }
}

fn store_err(e: NodeError) -> StoreError {
    match e {
        NodeError::NotFound => StoreError::NotFound,
        NodeError::Timeout => StoreError::Timeout,
        other => StoreError::Internal(other.to_string()),
    }
}

/// Builds a signed key-update document for the local profile. The output
/// is a UTF-8 JSON document.
///
/// # Safety
///
/// Standard string and buffer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_build_key_update(
    profile_path: *const c_char,
    peer_id: *const c_char,
    revision: u64,
    ttl_seconds: u64,
    out_buffer: *mut u8,
    out_buffer_len: usize,
    written_len: *mut usize,
) -> c_int {
    let path = match borrow_str(profile_path) {
        Ok(path) => path,
        Err(status) => return status,
    };
    let peer_id = match borrow_str(peer_id) {
        Ok(peer_id) => peer_id,
        Err(status) => return status,
    };
    let profile = match load_profile(path) {
        Ok(profile) => profile,
        Err(status) => return status,
    };
    match build_key_update(&profile, peer_id, revision, ttl_seconds) {
        Ok(bytes) => copy_out(&bytes, out_buffer, out_buffer_len, written_len),
        Err(e) => status_from_e2ee(&e),
    }
}

/// Validates a signed key-update JSON document. `now_unix = 0` checks
/// expiry against the current time.
///
/// # Safety
///
/// Standard buffer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_validate_key_update(
    payload_ptr: *const u8,
    payload_len: usize,
    now_unix: u64,
) -> c_int {
    let payload = match borrow_slice(payload_ptr, payload_len) {
        Ok(payload) => payload,
        Err(status) => return status,
    };
    match validate_key_update(payload, now_unix) {
        Ok(_) => CABI_STATUS_SUCCESS,
        Err(e) => status_from_e2ee(&e),
    }
}

/// Builds an encrypted-envelope JSON document around already-encrypted
/// bytes.
///
/// # Safety
///
/// Standard string and buffer contracts apply.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn cabi_e2ee_build_envelope(
    sender_account_id: *const c_char,
    sender_device_id: *const c_char,
    recipient_account_id: *const c_char,
    recipient_device_id: *const c_char,
    ciphertext_ptr: *const u8,
    ciphertext_len: usize,
    aad_ptr: *const u8,
    aad_len: usize,
    out_buffer: *mut u8,
    out_buffer_len: usize,
    written_len: *mut usize,
) -> c_int {
    let sender_account = match borrow_str(sender_account_id) {
        Ok(s) => s,
        Err(status) => return status,
    };
    let sender_device = match borrow_str(sender_device_id) {
        Ok(s) => s,
        Err(status) => return status,
    };
    let recipient_account = match borrow_str(recipient_account_id) {
        Ok(s) => s,
        Err(status) => return status,
    };
    let recipient_device = match borrow_str(recipient_device_id) {
        Ok(s) => s,
        Err(status) => return status,
    };
    let ciphertext = match borrow_slice(ciphertext_ptr, ciphertext_len) {
        Ok(s) => s,
        Err(status) => return status,
    };
    let aad = match borrow_slice(aad_ptr, aad_len) {
        Ok(s) => s,
        Err(status) => return status,
    };

    let envelope = match Envelope::build(
        (sender_account, sender_device),
        (recipient_account, recipient_device),
        ciphertext,
        aad,
    ) {
        Ok(envelope) => envelope,
        Err(e) => return status_from_e2ee(&e),
    };
    match envelope.to_bytes() {
        Ok(bytes) => copy_out(&bytes, out_buffer, out_buffer_len, written_len),
        Err(e) => status_from_e2ee(&e),
    }
}

/// Validates an encrypted-envelope JSON document.
///
/// # Safety
///
/// Standard buffer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_validate_envelope(
    payload_ptr: *const u8,
    payload_len: usize,
) -> c_int {
    let payload = match borrow_slice(payload_ptr, payload_len) {
        Ok(payload) => payload,
        Err(status) => return status,
    };
    match validate_envelope(payload) {
        Ok(_) => CABI_STATUS_SUCCESS,
        Err(e) => status_from_e2ee(&e),
    }
}

/// Builds a signed prekey-bundle JSON document for the local profile.
///
/// # Safety
///
/// Standard string and buffer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_build_prekey_bundle(
    profile_path: *const c_char,
    one_time_prekey_count: usize,
    ttl_seconds: u64,
    out_buffer: *mut u8,
    out_buffer_len: usize,
    written_len: *mut usize,
) -> c_int {
    let path = match borrow_str(profile_path) {
        Ok(path) => path,
        Err(status) => return status,
    };
    let profile = match load_profile(path) {
        Ok(profile) => profile,
        Err(status) => return status,
    };
    match build_prekey_bundle(&profile, one_time_prekey_count, ttl_seconds) {
        Ok(bytes) => copy_out(&bytes, out_buffer, out_buffer_len, written_len),
        Err(e) => status_from_e2ee(&e),
    }
}

/// Validates a signed prekey-bundle JSON document. `now_unix = 0` checks
/// expiry against the current time.
///
/// # Safety
///
/// Standard buffer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_validate_prekey_bundle(
    payload_ptr: *const u8,
    payload_len: usize,
    now_unix: u64,
) -> c_int {
    let payload = match borrow_slice(payload_ptr, payload_len) {
        Ok(payload) => payload,
        Err(status) => return status,
    };
    match validate_prekey_bundle(payload, now_unix) {
        Ok(_) => CABI_STATUS_SUCCESS,
        Err(e) => status_from_e2ee(&e),
    }
}

/// Legacy endpoint kept for ABI compatibility. Explicit prekey-message
/// construction is disabled; use [`cabi_e2ee_build_message_auto`].
///
/// # Safety
///
/// Never dereferences its arguments.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn cabi_e2ee_build_prekey_message(
    _profile_path: *const c_char,
    _recipient_prekey_bundle_ptr: *const u8,
    _recipient_prekey_bundle_len: usize,
    _plaintext_ptr: *const u8,
    _plaintext_len: usize,
    _aad_ptr: *const u8,
    _aad_len: usize,
    _out_buffer: *mut u8,
    _out_buffer_len: usize,
    _written_len: *mut usize,
) -> c_int {
    CABI_STATUS_INTERNAL_ERROR
}

/// Validates that a payload is a well-formed bootstrap wire message.
///
/// # Safety
///
/// Standard buffer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_validate_prekey_message(
    payload_ptr: *const u8,
    payload_len: usize,
) -> c_int {
    validate_wire_kind(payload_ptr, payload_len, MessageKind::Prekey)
}

/// Legacy endpoint kept for ABI compatibility. Explicit prekey-decrypt is
/// disabled; use [`cabi_e2ee_decrypt_message_auto`].
///
/// # Safety
///
/// Never dereferences its arguments.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_decrypt_prekey_message(
    _profile_path: *const c_char,
    _payload_ptr: *const u8,
    _payload_len: usize,
    _out_plaintext_buffer: *mut u8,
    _out_plaintext_buffer_len: usize,
    _written_len: *mut usize,
) -> c_int {
    CABI_STATUS_INTERNAL_ERROR
}

/// Legacy endpoint kept for ABI compatibility. Explicit session-message
/// construction is disabled; use [`cabi_e2ee_build_message_auto`].
///
/// # Safety
///
/// Never dereferences its arguments.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn cabi_e2ee_build_session_message(
    _profile_path: *const c_char,
    _session_id: *const c_char,
    _plaintext_ptr: *const u8,
    _plaintext_len: usize,
    _aad_ptr: *const u8,
    _aad_len: usize,
    _out_buffer: *mut u8,
    _out_buffer_len: usize,
    _written_len: *mut usize,
) -> c_int {
    CABI_STATUS_INTERNAL_ERROR
}

/// Validates that a payload is a well-formed continuation wire message.
///
/// # Safety
///
/// Standard buffer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_validate_session_message(
    payload_ptr: *const u8,
    payload_len: usize,
) -> c_int {
    validate_wire_kind(payload_ptr, payload_len, MessageKind::Session)
}

/// Legacy endpoint kept for ABI compatibility. Explicit session-decrypt is
/// disabled; use [`cabi_e2ee_decrypt_message_auto`].
///
/// # Safety
///
/// Never dereferences its arguments.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_decrypt_session_message(
    _profile_path: *const c_char,
    _payload_ptr: *const u8,
    _payload_len: usize,
    _out_plaintext_buffer: *mut u8,
    _out_plaintext_buffer_len: usize,
    _written_len: *mut usize,
) -> c_int {
    CABI_STATUS_INTERNAL_ERROR
}

unsafe fn validate_wire_kind(
    payload_ptr: *const u8,
    payload_len: usize,
    expected: MessageKind,
) -> c_int {
    let payload = match borrow_slice(payload_ptr, payload_len) {
        Ok(payload) => payload,
        Err(status) => return status,
    };
    let wire: WireMessage = match serde_json::from_slice(payload) {
        Ok(wire) => wire,
        Err(_) => return CABI_STATUS_INVALID_ARGUMENT,
    };
    let (kind, envelope) = match wire {
        WireMessage::Prekey { envelope, .. } => (MessageKind::Prekey, envelope),
        WireMessage::Session { envelope } => (MessageKind::Session, envelope),
    };
    if kind != expected {
        return CABI_STATUS_INVALID_ARGUMENT;
    }
    let bytes = match envelope.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => return status_from_e2ee(&e),
    };
    match validate_envelope(&bytes) {
        Ok(_) => CABI_STATUS_SUCCESS,
        Err(e) => status_from_e2ee(&e),
    }
}

/// Builds and publishes the local profile's current prekey bundle into the
/// node's DHT.
///
/// # Safety
///
/// Standard handle and string contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_publish_prekey_bundle(
    handle: *mut CabiNodeHandle,
    profile_path: *const c_char,
    one_time_prekey_count: usize,
    bundle_ttl_seconds: u64,
    dht_ttl_seconds: u64,
) -> c_int {
    let node = match borrow_node(handle) {
        Ok(node) => node,
        Err(status) => return status,
    };
    let path = match borrow_str(profile_path) {
        Ok(path) => path,
        Err(status) => return status,
    };
    let profile = match load_profile(path) {
        Ok(profile) => profile,
        Err(status) => return status,
    };
    let bytes = match build_prekey_bundle(&profile, one_time_prekey_count, bundle_ttl_seconds) {
        Ok(bytes) => bytes,
        Err(e) => return status_from_e2ee(&e),
    };
    match publish_prekey_bundle(&NodeRecordStore(node), &bytes, dht_ttl_seconds) {
        Ok(()) => CABI_STATUS_SUCCESS,
        Err(e) => status_from_e2ee(&e),
    }
}

/// Fetches and validates a prekey bundle from the node's DHT. The output
/// is the validated UTF-8 JSON document.
///
/// # Safety
///
/// Standard handle, string, and buffer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_fetch_prekey_bundle(
    handle: *mut CabiNodeHandle,
    account_id: *const c_char,
    device_id: *const c_char,
    out_buffer: *mut u8,
    out_buffer_len: usize,
    written_len: *mut usize,
) -> c_int {
    let node = match borrow_node(handle) {
        Ok(node) => node,
        Err(status) => return status,
    };
    let account_id = match borrow_str(account_id) {
        Ok(s) => s,
        Err(status) => return status,
    };
    let device_id = match borrow_str(device_id) {
        Ok(s) => s,
        Err(status) => return status,
    };
    let bundle = match fetch_prekey_bundle(&NodeRecordStore(node), account_id, device_id) {
        Ok(bundle) => bundle,
        Err(e) => return status_from_e2ee(&e),
    };
    match serde_json::to_vec(&bundle) {
        Ok(bytes) => copy_out(&bytes, out_buffer, out_buffer_len, written_len),
        Err(_) => CABI_STATUS_INTERNAL_ERROR,
    }
}

/// Builds and publishes a key-update document into the node's DHT.
///
/// # Safety
///
/// Standard handle and string contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_publish_key_update(
    handle: *mut CabiNodeHandle,
    profile_path: *const c_char,
    revision: u64,
    key_update_ttl_seconds: u64,
    dht_ttl_seconds: u64,
) -> c_int {
    let node = match borrow_node(handle) {
        Ok(node) => node,
        Err(status) => return status,
    };
    let path = match borrow_str(profile_path) {
        Ok(path) => path,
        Err(status) => return status,
    };
    let profile = match load_profile(path) {
        Ok(profile) => profile,
        Err(status) => return status,
    };
    let bytes = match build_key_update(
        &profile,
        node.local_peer_id(),
        revision,
        key_update_ttl_seconds,
    ) {
        Ok(bytes) => bytes,
        Err(e) => return status_from_e2ee(&e),
    };
    match publish_key_update(&NodeRecordStore(node), &bytes, dht_ttl_seconds) {
        Ok(()) => CABI_STATUS_SUCCESS,
        Err(e) => status_from_e2ee(&e),
    }
}

/// Fetches and validates the latest key-update document from the node's
/// DHT.
///
/// # Safety
///
/// Standard handle, string, and buffer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_fetch_key_update(
    handle: *mut CabiNodeHandle,
    account_id: *const c_char,
    device_id: *const c_char,
    out_buffer: *mut u8,
    out_buffer_len: usize,
    written_len: *mut usize,
) -> c_int {
    let node = match borrow_node(handle) {
        Ok(node) => node,
        Err(status) => return status,
    };
    let account_id = match borrow_str(account_id) {
        Ok(s) => s,
        Err(status) => return status,
    };
    let device_id = match borrow_str(device_id) {
        Ok(s) => s,
        Err(status) => return status,
    };
    let update = match fetch_key_update(&NodeRecordStore(node), account_id, device_id) {
        Ok(update) => update,
        Err(e) => return status_from_e2ee(&e),
    };
    match serde_json::to_vec(&update) {
        Ok(bytes) => copy_out(&bytes, out_buffer, out_buffer_len, written_len),
        Err(_) => CABI_STATUS_INTERNAL_ERROR,
    }
}

/// Legacy device-directory validation API, disabled in single-device mode.
///
/// # Safety
///
/// Never dereferences its arguments.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_validate_device_directory(
    _payload_ptr: *const u8,
    _payload_len: usize,
    _now_unix: u64,
) -> c_int {
    CABI_STATUS_INTERNAL_ERROR
}

/// Legacy device-directory fetch API, disabled in single-device mode.
///
/// # Safety
///
/// Never dereferences its arguments.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_fetch_device_directory(
    _handle: *mut CabiNodeHandle,
    _account_id: *const c_char,
    _out_buffer: *mut u8,
    _out_buffer_len: usize,
    _written_len: *mut usize,
) -> c_int {
    CABI_STATUS_INTERNAL_ERROR
}

/// Runs an in-memory crypto-engine round trip: two throwaway identities,
/// one bootstrap message, one continuation, both decrypted and compared.
/// Non-zero means the cipher machinery in this build is unusable.
///
/// # Safety
///
/// Takes no arguments.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_crypto_probe() -> c_int {
    match crypto_probe_impl() {
        Ok(()) => CABI_STATUS_SUCCESS,
        Err(e) => {
            error!(error = %e, "Crypto probe failed");
            CABI_STATUS_INTERNAL_ERROR
        }
    }
}

fn crypto_probe_impl() -> anyhow::Result<()> {
    let mut suffix = [0u8; 8];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut suffix);
    let dir = std::env::temp_dir().join(format!("meshlink-probe-{}", hex::encode(suffix)));

    let result = (|| -> anyhow::Result<()> {
        let sender = Messenger::new(
            Profile::load_or_create(&dir.join("a.json"))?,
            Arc::new(SharedSecretEngine::new()),
        );
        let receiver = Messenger::new(
            Profile::load_or_create(&dir.join("b.json"))?,
            Arc::new(SharedSecretEngine::new()),
        );

        let bundle = build_prekey_bundle(receiver.profile(), 1, 0)?;
        let (boot, _) = sender.build_message_auto(&bundle, b"probe-1", b"probe")?;
        let (cont, _) = sender.build_message_auto(&bundle, b"probe-2", b"probe")?;

        let first = receiver.decrypt_message_auto(&boot)?;
        let second = receiver.decrypt_message_auto(&cont)?;
        if first.plaintext != b"probe-1" || second.plaintext != b"probe-2" {
            anyhow::bail!("probe plaintext mismatch");
        }
        Ok(())
    })();

    let _ = std::fs::remove_dir_all(&dir);
    result
}

/// Builds an outbound encrypted payload automatically: a bootstrap message
/// when no session exists for the recipient, a continuation otherwise.
///
/// # Safety
///
/// Standard string and buffer contracts apply.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn cabi_e2ee_build_message_auto(
    profile_path: *const c_char,
    recipient_prekey_bundle_ptr: *const u8,
    recipient_prekey_bundle_len: usize,
    plaintext_ptr: *const u8,
    plaintext_len: usize,
    aad_ptr: *const u8,
    aad_len: usize,
    out_buffer: *mut u8,
    out_buffer_len: usize,
    written_len: *mut usize,
) -> c_int {
    let path = match borrow_str(profile_path) {
        Ok(path) => path,
        Err(status) => return status,
    };
    let bundle = match borrow_slice(recipient_prekey_bundle_ptr, recipient_prekey_bundle_len) {
        Ok(bundle) => bundle,
        Err(status) => return status,
    };
    let plaintext = match borrow_slice(plaintext_ptr, plaintext_len) {
        Ok(plaintext) => plaintext,
        Err(status) => return status,
    };
    let aad = match borrow_slice(aad_ptr, aad_len) {
        Ok(aad) => aad,
        Err(status) => return status,
    };
    let messenger = match messenger_for(path) {
        Ok(messenger) => messenger,
        Err(status) => return status,
    };
    match messenger.build_message_auto(bundle, plaintext, aad) {
        Ok((bytes, _)) => copy_out(&bytes, out_buffer, out_buffer_len, written_len),
        Err(e) => status_from_e2ee(&e),
    }
}

/// Decrypts an incoming encrypted payload automatically and reports which
/// path handled it through `message_kind`.
///
/// # Safety
///
/// Standard string, buffer, and out-pointer contracts apply.
#[no_mangle]
pub unsafe extern "C" fn cabi_e2ee_decrypt_message_auto(
    profile_path: *const c_char,
    payload_ptr: *const u8,
    payload_len: usize,
    out_plaintext_buffer: *mut u8,
    out_plaintext_buffer_len: usize,
    written_len: *mut usize,
    message_kind: *mut c_int,
) -> c_int {
    let path = match borrow_str(profile_path) {
        Ok(path) => path,
        Err(status) => return status,
    };
    let payload = match borrow_slice(payload_ptr, payload_len) {
        Ok(payload) => payload,
        Err(status) => return status,
    };
    if message_kind.is_null() {
        return CABI_STATUS_NULL_POINTER;
    }
    let messenger = match messenger_for(path) {
        Ok(messenger) => messenger,
        Err(status) => return status,
    };
    *message_kind = crate::status::CABI_E2EE_MESSAGE_KIND_UNKNOWN;
    match messenger.decrypt_message_auto(payload) {
        Ok(decrypted) => {
            let status = copy_out(
                &decrypted.plaintext,
                out_plaintext_buffer,
                out_plaintext_buffer_len,
                written_len,
            );
            if status == CABI_STATUS_SUCCESS {
                *message_kind = match decrypted.kind {
                    MessageKind::Prekey => CABI_E2EE_MESSAGE_KIND_PREKEY,
                    MessageKind::Session => CABI_E2EE_MESSAGE_KIND_SESSION,
                    MessageKind::Unknown => crate::status::CABI_E2EE_MESSAGE_KIND_UNKNOWN,
                };
            }
            status
        }
        Err(e) => status_from_e2ee(&e),
    }
}
