//! # Boundary Choreography
//!
//! Drives the C ABI the way an embedding host would: one node handle, two
//! identity profiles, key material distributed through the node's DHT, and
//! encrypted messages exchanged end to end. Exercises the documented
//! caller strategy of probing with a fixed buffer and growing on
//! `CABI_STATUS_BUFFER_TOO_SMALL`.

#[cfg(test)]
mod tests {
    use meshlink_cabi::*;
    use std::ffi::CString;
    use std::os::raw::c_char;

    const PROBE_LEN: usize = 64 * 1024;

    fn profile_cstring(dir: &tempfile::TempDir, name: &str) -> CString {
        CString::new(dir.path().join(name).to_str().unwrap().to_string()).unwrap()
    }

    /// The documented growth strategy: probe, then retry at required + 1.
    fn call_growing(
        mut call: impl FnMut(*mut u8, usize, *mut usize) -> i32,
    ) -> Result<Vec<u8>, i32> {
        let mut buf = vec![0u8; PROBE_LEN];
        let mut written = 0usize;
        loop {
            let status = call(buf.as_mut_ptr(), buf.len(), &mut written);
            match status {
                CABI_STATUS_SUCCESS => {
                    buf.truncate(written);
                    return Ok(buf);
                }
                CABI_STATUS_BUFFER_TOO_SMALL => buf = vec![0u8; written + 1],
                other => return Err(other),
            }
        }
    }

    fn load_identity(path: &CString) -> (CString, CString) {
        let mut account = [0 as c_char; 128];
        let mut account_written = 0usize;
        let mut device = [0 as c_char; 64];
        let mut device_written = 0usize;
        let mut network_seed = [0u8; 32];
        let mut crypto_seed = [0u8; 32];
        let status = unsafe {
            cabi_identity_load_or_create(
                path.as_ptr(),
                account.as_mut_ptr(),
                account.len(),
                &mut account_written,
                device.as_mut_ptr(),
                device.len(),
                &mut device_written,
                network_seed.as_mut_ptr(),
                network_seed.len(),
                crypto_seed.as_mut_ptr(),
                crypto_seed.len(),
            )
        };
        assert_eq!(status, CABI_STATUS_SUCCESS);
        let account = unsafe {
            std::str::from_utf8(std::slice::from_raw_parts(
                account.as_ptr().cast::<u8>(),
                account_written,
            ))
        }
        .unwrap();
        let device = unsafe {
            std::str::from_utf8(std::slice::from_raw_parts(
                device.as_ptr().cast::<u8>(),
                device_written,
            ))
        }
        .unwrap();
        (
            CString::new(account).unwrap(),
            CString::new(device).unwrap(),
        )
    }

    #[test]
    fn test_full_host_choreography() {
        assert_eq!(cabi_init_tracing(), CABI_STATUS_SUCCESS);

        let handle =
            unsafe { cabi_node_new(false, false, std::ptr::null(), 0, std::ptr::null(), 0) };
        assert!(!handle.is_null());

        let listen = CString::new("/ip4/127.0.0.1/tcp/4100").unwrap();
        assert_eq!(
            unsafe { cabi_node_listen(handle, listen.as_ptr()) },
            CABI_STATUS_SUCCESS
        );

        let dir = tempfile::tempdir().unwrap();
        let sender_path = profile_cstring(&dir, "sender.json");
        let receiver_path = profile_cstring(&dir, "receiver.json");

        // Receiver publishes key material into the node's DHT.
        assert_eq!(
            unsafe { cabi_e2ee_publish_prekey_bundle(handle, receiver_path.as_ptr(), 2, 300, 300) },
            CABI_STATUS_SUCCESS
        );
        assert_eq!(
            unsafe { cabi_e2ee_publish_key_update(handle, receiver_path.as_ptr(), 1, 300, 300) },
            CABI_STATUS_SUCCESS
        );

        // Sender fetches the receiver's bundle by id.
        let (receiver_account, receiver_device) = load_identity(&receiver_path);
        let bundle = call_growing(|buf, len, written| unsafe {
            cabi_e2ee_fetch_prekey_bundle(
                handle,
                receiver_account.as_ptr(),
                receiver_device.as_ptr(),
                buf,
                len,
                written,
            )
        })
        .unwrap();
        assert_eq!(
            unsafe { cabi_e2ee_validate_prekey_bundle(bundle.as_ptr(), bundle.len(), 0) },
            CABI_STATUS_SUCCESS
        );

        // Sender encrypts, ships the wire bytes through the node's message
        // queue, receiver polls and decrypts.
        let plaintext = b"meet at the usual place";
        let wire = call_growing(|buf, len, written| unsafe {
            cabi_e2ee_build_message_auto(
                sender_path.as_ptr(),
                bundle.as_ptr(),
                bundle.len(),
                plaintext.as_ptr(),
                plaintext.len(),
                std::ptr::null(),
                0,
                buf,
                len,
                written,
            )
        })
        .unwrap();

        assert_eq!(
            unsafe { cabi_node_enqueue_message(handle, wire.as_ptr(), wire.len()) },
            CABI_STATUS_SUCCESS
        );
        let delivered = call_growing(|buf, len, written| unsafe {
            cabi_node_dequeue_message(handle, buf, len, written)
        })
        .unwrap();
        assert_eq!(delivered, wire);

        let mut kind = -1;
        let mut out = vec![0u8; PROBE_LEN];
        let mut written = 0usize;
        assert_eq!(
            unsafe {
                cabi_e2ee_decrypt_message_auto(
                    receiver_path.as_ptr(),
                    delivered.as_ptr(),
                    delivered.len(),
                    out.as_mut_ptr(),
                    out.len(),
                    &mut written,
                    &mut kind,
                )
            },
            CABI_STATUS_SUCCESS
        );
        assert_eq!(kind, CABI_E2EE_MESSAGE_KIND_PREKEY);
        assert_eq!(&out[..written], plaintext);

        // Queue is drained.
        assert_eq!(
            call_growing(|buf, len, written| unsafe {
                cabi_node_dequeue_message(handle, buf, len, written)
            }),
            Err(CABI_STATUS_QUEUE_EMPTY)
        );

        unsafe { cabi_node_free(handle) };
    }

    #[test]
    fn test_discovery_choreography_with_small_buffers() {
        let handle =
            unsafe { cabi_node_new(false, false, std::ptr::null(), 0, std::ptr::null(), 0) };
        assert!(!handle.is_null());

        let peer = "a1".repeat(26);
        let dial = CString::new(format!("/ip4/10.0.0.1/tcp/4001/p2p/{peer}")).unwrap();
        assert_eq!(
            unsafe { cabi_node_dial(handle, dial.as_ptr()) },
            CABI_STATUS_SUCCESS
        );

        let target = CString::new(peer.clone()).unwrap();
        let mut request_id = 0u64;
        assert_eq!(
            unsafe { cabi_node_find_peer(handle, target.as_ptr(), &mut request_id) },
            CABI_STATUS_SUCCESS
        );

        // Deliberately undersized string buffers: the first attempt reports
        // the required sizes and keeps the event queued, so the retry with
        // grown buffers observes the identical event.
        let mut peer_buf = vec![0 as c_char; 4];
        let mut addr_buf = vec![0 as c_char; 4];
        let mut saw_address_event = false;
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            let mut event_kind = -1;
            let mut event_request = 0u64;
            let mut status_code = -1;
            let mut peer_written = 0usize;
            let mut addr_written = 0usize;
            let status = unsafe {
                cabi_node_dequeue_discovery_event(
                    handle,
                    &mut event_kind,
                    &mut event_request,
                    &mut status_code,
                    peer_buf.as_mut_ptr(),
                    peer_buf.len(),
                    &mut peer_written,
                    addr_buf.as_mut_ptr(),
                    addr_buf.len(),
                    &mut addr_written,
                )
            };
            match status {
                CABI_STATUS_QUEUE_EMPTY => {
                    std::thread::sleep(std::time::Duration::from_millis(2))
                }
                CABI_STATUS_BUFFER_TOO_SMALL => {
                    peer_buf = vec![0 as c_char; peer_written + 1];
                    addr_buf = vec![0 as c_char; addr_written + 1];
                }
                CABI_STATUS_SUCCESS => {
                    assert_eq!(event_request, request_id);
                    if event_kind == CABI_DISCOVERY_EVENT_ADDRESS {
                        let got = unsafe {
                            std::str::from_utf8(std::slice::from_raw_parts(
                                peer_buf.as_ptr().cast::<u8>(),
                                peer_written,
                            ))
                        }
                        .unwrap();
                        assert_eq!(got, peer);
                        saw_address_event = true;
                    } else {
                        assert_eq!(event_kind, CABI_DISCOVERY_EVENT_FINISHED);
                        assert_eq!(status_code, CABI_STATUS_SUCCESS);
                        break;
                    }
                }
                other => panic!("unexpected status {other}"),
            }
        }
        assert!(saw_address_event);
        unsafe { cabi_node_free(handle) };
    }
}
