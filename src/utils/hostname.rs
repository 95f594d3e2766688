use std::io;

use super::interop::from_c_ret_errno;

/// The local host name as raw bytes, as `gethostname(2)` reports it.
pub(crate) fn hostname() -> io::Result<Vec<u8>> {
    let mut buf = [0u8; 256];
    // SAFETY: FFI; the buffer length is passed along.
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    from_c_ret_errno(ret)?;
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(buf[..len].to_vec())
}

#[cfg(test)]
mod tests {
    #[test]
    fn hostname_is_not_empty() {
        let name = super::hostname().unwrap();
        assert!(!name.is_empty());
        assert!(!name.contains(&0));
    }
}
