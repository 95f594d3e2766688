//! Fixed-capacity buffers that back registered memory regions.
//!
//! A [`RegionBuf`] is written by the local CPU *and* by the NIC (or by the
//! simulated fabric) on behalf of a remote peer, without any notification.
//! Every byte is therefore accessed atomically: stores use release ordering
//! and loads use acquire ordering, so a reader that observes a byte also
//! observes every byte the same writer stored before it.

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Out-of-bounds access to a [`RegionBuf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("access to bytes {start}..{end} is out of bounds (capacity {capacity})")]
pub struct BoundsError {
    pub start: usize,
    pub end: usize,
    pub capacity: usize,
}

/// Heap buffer with a stable address, shareable between the owner and the
/// agent that deposits one-sided writes into it.
///
/// Cloning a `RegionBuf` clones the handle, not the memory.
#[derive(Clone)]
pub struct RegionBuf {
    bytes: Arc<[AtomicU8]>,
}

impl fmt::Debug for RegionBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionBuf")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len())
            .finish()
    }
}

impl RegionBuf {
    /// Allocate a zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        let bytes = (0..len).map(|_| AtomicU8::new(0)).collect::<Vec<_>>();
        Self {
            bytes: bytes.into(),
        }
    }

    /// Capacity in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Start address of the buffer, as advertised to peers.
    #[inline]
    pub fn addr(&self) -> u64 {
        self.as_ptr() as u64
    }

    /// Raw pointer to the first byte, for memory registration.
    ///
    /// `AtomicU8` has the same in-memory representation as `u8` and permits
    /// mutation through a shared reference.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.bytes.as_ptr() as *mut u8
    }

    /// Whether two handles refer to the same memory.
    #[inline]
    pub fn same_memory(&self, other: &RegionBuf) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    fn range(&self, start: usize, len: usize) -> Result<Range<usize>, BoundsError> {
        match start.checked_add(len) {
            Some(end) if end <= self.len() => Ok(start..end),
            _ => Err(BoundsError {
                start,
                end: start.saturating_add(len),
                capacity: self.len(),
            }),
        }
    }

    /// Load one byte.
    #[inline]
    pub fn load(&self, offset: usize) -> Result<u8, BoundsError> {
        self.bytes
            .get(offset)
            .map(|b| b.load(Ordering::Acquire))
            .ok_or(BoundsError {
                start: offset,
                end: offset.saturating_add(1),
                capacity: self.len(),
            })
    }

    /// Store one byte.
    #[inline]
    pub fn store(&self, offset: usize, value: u8) -> Result<(), BoundsError> {
        self.bytes
            .get(offset)
            .map(|b| b.store(value, Ordering::Release))
            .ok_or(BoundsError {
                start: offset,
                end: offset.saturating_add(1),
                capacity: self.len(),
            })
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), BoundsError> {
        let range = self.range(offset, dst.len())?;
        for (d, s) in dst.iter_mut().zip(&self.bytes[range]) {
            *d = s.load(Ordering::Acquire);
        }
        Ok(())
    }

    /// Copy `len` bytes starting at `offset` into a new vector.
    pub fn to_vec(&self, offset: usize, len: usize) -> Result<Vec<u8>, BoundsError> {
        let mut out = vec![0; len];
        self.read(offset, &mut out)?;
        Ok(out)
    }

    /// Store `src` starting at `offset`, front to back.
    pub fn write(&self, offset: usize, src: &[u8]) -> Result<(), BoundsError> {
        let range = self.range(offset, src.len())?;
        for (d, s) in self.bytes[range].iter().zip(src) {
            d.store(*s, Ordering::Release);
        }
        Ok(())
    }

    /// Store `src` starting at `offset`, back to front: the byte at `offset`
    /// becomes visible last.
    pub fn write_rev(&self, offset: usize, src: &[u8]) -> Result<(), BoundsError> {
        let range = self.range(offset, src.len())?;
        for (d, s) in self.bytes[range].iter().zip(src).rev() {
            d.store(*s, Ordering::Release);
        }
        Ok(())
    }

    /// Set every byte to `value`.
    pub fn fill(&self, value: u8) {
        for b in self.bytes.iter() {
            b.store(value, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_checked() {
        let buf = RegionBuf::new(8);
        assert!(buf.store(7, 1).is_ok());
        assert_eq!(
            buf.store(8, 1),
            Err(BoundsError {
                start: 8,
                end: 9,
                capacity: 8
            })
        );
        assert!(buf.write(4, &[0; 5]).is_err());
        assert!(buf.read(usize::MAX, &mut [0; 2]).is_err());
        assert!(buf.write(4, &[0; 4]).is_ok());
    }

    #[test]
    fn clones_share_memory() {
        let a = RegionBuf::new(16);
        let b = a.clone();
        a.write(3, b"abc").unwrap();
        assert_eq!(b.to_vec(3, 3).unwrap(), b"abc");
        assert!(a.same_memory(&b));
        assert_eq!(a.addr(), b.addr());
        assert!(!a.same_memory(&RegionBuf::new(16)));
    }

    #[test]
    fn reverse_write_lands_same_bytes() {
        let buf = RegionBuf::new(4);
        buf.write_rev(0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buf.to_vec(0, 4).unwrap(), vec![1, 2, 3, 4]);
        buf.fill(0xff);
        assert_eq!(buf.load(2).unwrap(), 0xff);
    }
}
