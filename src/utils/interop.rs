use std::io;

/// Converts a verbs-style C return value (0, or an errno which some providers
/// negate) to a Rust `Result`.
#[inline(always)]
#[cfg_attr(not(feature = "ibverbs"), allow(dead_code))]
pub(crate) fn from_c_ret(ret: i32) -> io::Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(ret.wrapping_abs()))
    }
}

/// Converts a POSIX-style C return value (-1 with `errno` set on failure).
#[inline(always)]
pub(crate) fn from_c_ret_errno(ret: i32) -> io::Result<()> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
