//! Flat-buffer marshalling.
//!
//! The contract for every byte- or string-producing function: the caller
//! supplies `(buffer, buffer_len, written_len)`. On success `written_len`
//! holds the bytes written; on `BUFFER_TOO_SMALL` it holds the required
//! size and the buffer contents are unspecified. A zero-length probe with
//! a null buffer is legal and reports the required size.

use crate::status::{
    CABI_STATUS_BUFFER_TOO_SMALL, CABI_STATUS_INVALID_ARGUMENT, CABI_STATUS_NULL_POINTER,
    CABI_STATUS_SUCCESS,
};
use std::os::raw::{c_char, c_int};

/// Borrow a caller byte slice. A null pointer is only legal for length 0.
pub(crate) unsafe fn borrow_slice<'a>(ptr: *const u8, len: usize) -> Result<&'a [u8], c_int> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(CABI_STATUS_NULL_POINTER);
    }
    Ok(std::slice::from_raw_parts(ptr, len))
}

/// Borrow a caller NUL-terminated string as UTF-8.
pub(crate) unsafe fn borrow_str<'a>(ptr: *const c_char) -> Result<&'a str, c_int> {
    if ptr.is_null() {
        return Err(CABI_STATUS_NULL_POINTER);
    }
    std::ffi::CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| CABI_STATUS_INVALID_ARGUMENT)
}

/// Copy `src` into the caller's `(dst, dst_len)` buffer, reporting the
/// length through `written_len`.
///
/// On `BUFFER_TOO_SMALL` the required size goes into `written_len` and
/// nothing is copied, so the producer can keep the data queued for a
/// retry.
pub(crate) unsafe fn copy_out(
    src: &[u8],
    dst: *mut u8,
    dst_len: usize,
    written_len: *mut usize,
) -> c_int {
    if written_len.is_null() {
        return CABI_STATUS_NULL_POINTER;
    }
    if src.len() > dst_len {
        *written_len = src.len();
        return CABI_STATUS_BUFFER_TOO_SMALL;
    }
    if !src.is_empty() {
        if dst.is_null() {
            return CABI_STATUS_NULL_POINTER;
        }
        std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
    }
    *written_len = src.len();
    CABI_STATUS_SUCCESS
}

/// String-typed variant of [`copy_out`]. No NUL terminator is appended;
/// the reported length is the exact string length.
pub(crate) unsafe fn copy_out_str(
    src: &str,
    dst: *mut c_char,
    dst_len: usize,
    written_len: *mut usize,
) -> c_int {
    copy_out(src.as_bytes(), dst.cast::<u8>(), dst_len, written_len)
}

/// Store a scalar through a caller out-pointer.
pub(crate) unsafe fn store_out<T>(ptr: *mut T, value: T) -> c_int {
    if ptr.is_null() {
        return CABI_STATUS_NULL_POINTER;
    }
    *ptr = value;
    CABI_STATUS_SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_out_exact_and_small() {
        let src = b"hello";
        let mut dst = [0u8; 5];
        let mut written = 0usize;

        let status = unsafe { copy_out(src, dst.as_mut_ptr(), dst.len(), &mut written) };
        assert_eq!(status, CABI_STATUS_SUCCESS);
        assert_eq!(written, 5);
        assert_eq!(&dst, src);

        let mut tiny = [0u8; 2];
        let status = unsafe { copy_out(src, tiny.as_mut_ptr(), tiny.len(), &mut written) };
        assert_eq!(status, CABI_STATUS_BUFFER_TOO_SMALL);
        assert_eq!(written, 5);
    }

    #[test]
    fn test_zero_length_probe_reports_required_size() {
        let mut written = 0usize;
        let status = unsafe { copy_out(b"payload", std::ptr::null_mut(), 0, &mut written) };
        assert_eq!(status, CABI_STATUS_BUFFER_TOO_SMALL);
        assert_eq!(written, 7);
    }

    #[test]
    fn test_null_pointers_are_rejected() {
        let status = unsafe { copy_out(b"x", std::ptr::null_mut(), 8, std::ptr::null_mut()) };
        assert_eq!(status, CABI_STATUS_NULL_POINTER);

        let mut written = 0usize;
        let status = unsafe { copy_out(b"x", std::ptr::null_mut(), 8, &mut written) };
        assert_eq!(status, CABI_STATUS_NULL_POINTER);

        assert!(unsafe { borrow_slice(std::ptr::null(), 4) }.is_err());
        assert_eq!(unsafe { borrow_slice(std::ptr::null(), 0) }.unwrap(), b"");
    }

    #[test]
    fn test_borrow_str_rejects_invalid_utf8() {
        let bad = [0xffu8, 0xfe, 0x00];
        let status = unsafe { borrow_str(bad.as_ptr().cast()) }.unwrap_err();
        assert_eq!(status, CABI_STATUS_INVALID_ARGUMENT);
    }
}
