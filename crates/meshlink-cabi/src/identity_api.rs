//! Identity-profile endpoint.

use crate::buffer::{borrow_str, copy_out_str};
use crate::status::{
    CABI_STATUS_BUFFER_TOO_SMALL, CABI_STATUS_INTERNAL_ERROR, CABI_STATUS_NULL_POINTER,
    CABI_STATUS_SUCCESS,
};
use meshlink_identity::{Profile, SEED_LEN};
use std::os::raw::{c_char, c_int};
use tracing::error;

/// Loads the identity profile stored at `profile_path`, creating one when
/// the file is missing.
///
/// Writes the account and device ids as UTF-8 strings and the two 32-byte
/// identity seeds (network bootstrap and crypto) into fixed-size buffers.
/// Seed buffers shorter than 32 bytes yield `CABI_STATUS_BUFFER_TOO_SMALL`
/// before anything is written.
///
/// # Safety
///
/// Standard string and buffer contracts apply.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn cabi_identity_load_or_create(
    profile_path: *const c_char,
    account_id_buffer: *mut c_char,
    account_id_buffer_len: usize,
    account_id_written_len: *mut usize,
    device_id_buffer: *mut c_char,
    device_id_buffer_len: usize,
    device_id_written_len: *mut usize,
    network_seed_buffer: *mut u8,
    network_seed_buffer_len: usize,
    crypto_seed_buffer: *mut u8,
    crypto_seed_buffer_len: usize,
) -> c_int {
    let path = match borrow_str(profile_path) {
        Ok(path) => path,
        Err(status) => return status,
    };
    if network_seed_buffer.is_null() || crypto_seed_buffer.is_null() {
        return CABI_STATUS_NULL_POINTER;
    }
    if network_seed_buffer_len < SEED_LEN || crypto_seed_buffer_len < SEED_LEN {
        return CABI_STATUS_BUFFER_TOO_SMALL;
    }

    let profile = match Profile::load_or_create(std::path::Path::new(path)) {
        Ok(profile) => profile,
        Err(e) => {
            error!(path, error = %e, "Identity load failed");
            return CABI_STATUS_INTERNAL_ERROR;
        }
    };

    // Check both string fits before writing anything, so a short buffer
    // never leaves the caller with half the identity.
    if profile.account_id().len() > account_id_buffer_len {
        let status = copy_out_str(
            profile.account_id(),
            account_id_buffer,
            account_id_buffer_len,
            account_id_written_len,
        );
        return status;
    }
    if profile.device_id().len() > device_id_buffer_len {
        let status = copy_out_str(
            profile.device_id(),
            device_id_buffer,
            device_id_buffer_len,
            device_id_written_len,
        );
        return status;
    }

    let status = copy_out_str(
        profile.account_id(),
        account_id_buffer,
        account_id_buffer_len,
        account_id_written_len,
    );
    if status != CABI_STATUS_SUCCESS {
        return status;
    }
    let status = copy_out_str(
        profile.device_id(),
        device_id_buffer,
        device_id_buffer_len,
        device_id_written_len,
    );
    if status != CABI_STATUS_SUCCESS {
        return status;
    }

    std::ptr::copy_nonoverlapping(profile.network_seed().as_ptr(), network_seed_buffer, SEED_LEN);
    std::ptr::copy_nonoverlapping(profile.crypto_seed().as_ptr(), crypto_seed_buffer, SEED_LEN);
    CABI_STATUS_SUCCESS
}
