//! The opaque node handle.

use meshlink_node::Node;
use std::os::raw::c_int;

/// Opaque handle C callers hold for a running node.
///
/// Single-owner: created by `cabi_node_new`, freed exactly once by
/// `cabi_node_free`. The library does no lifetime tracking; the host must
/// serialize the free against every other call on the same handle.
pub struct CabiNodeHandle {
    pub(crate) node: Node,
}

/// Borrow the node behind a caller-supplied handle pointer.
pub(crate) unsafe fn borrow_node<'a>(ptr: *mut CabiNodeHandle) -> Result<&'a Node, c_int> {
    if ptr.is_null() {
        return Err(crate::status::CABI_STATUS_NULL_POINTER);
    }
    Ok(&(*ptr).node)
}
