//! `static inline` verbs that bindgen cannot see.

use std::os::raw::c_int;

use super::private::*;

/// Poll a CQ for work completions.
///
/// If the return value is < 0, an error occurred. Otherwise it is the number
/// of completions returned; fewer than `num_entries` means the CQ was
/// emptied.
#[inline]
pub unsafe fn ibv_poll_cq(cq: *mut ibv_cq, num_entries: c_int, wc: *mut ibv_wc) -> c_int {
    match (*(*cq).context).ops.poll_cq {
        Some(poll_cq) => poll_cq(cq, num_entries, wc),
        None => -libc::EOPNOTSUPP,
    }
}

/// Post a list of work requests to a send queue.
///
/// If `IBV_SEND_INLINE` is set, the data buffers can be reused immediately
/// after the call returns.
#[inline]
pub unsafe fn ibv_post_send(
    qp: *mut ibv_qp,
    wr: *mut ibv_send_wr,
    bad_wr: *mut *mut ibv_send_wr,
) -> c_int {
    match (*(*qp).context).ops.post_send {
        Some(post_send) => post_send(qp, wr, bad_wr),
        None => libc::EOPNOTSUPP,
    }
}
