//! The storage engine as seen by the dispatch loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use xxhash_rust::xxh32::xxh32;

/// Hash of `key` under `seed`, as the engine buckets it.
#[inline]
pub fn hash(key: &[u8], seed: u32) -> u32 {
    xxh32(key, seed)
}

/// Linking an item would exceed the engine's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("out of memory")]
pub struct OutOfMemory;

/// A stored object. Handles are cheap to clone and refer to the same object.
pub trait Item: Clone {
    fn key(&self) -> &[u8];

    /// The value bytes.
    fn data(&self) -> &[u8];

    /// The value bytes of a freshly allocated, not yet linked item.
    fn data_mut(&mut self) -> &mut [u8];
}

/// Key-value storage engine.
///
/// An item obtained from [`alloc`](Store::alloc) is invisible to lookups
/// until it is [`link`](Store::link)ed or swapped in with
/// [`replace`](Store::replace).
pub trait Store {
    type Item: Item;

    fn hash(&self, key: &[u8], seed: u32) -> u32 {
        hash(key, seed)
    }

    /// Whether an object of this shape could ever be stored.
    fn item_size_ok(&self, key_len: usize, flags: u32, payload_len: usize) -> bool;

    /// Allocate an unlinked item with `payload_len` zeroed value bytes.
    /// `None` if the object is too large or no memory is left.
    fn alloc(&mut self, key: &[u8], flags: u32, exptime: u32, payload_len: usize) -> Option<Self::Item>;

    fn get(&self, key: &[u8]) -> Option<Self::Item> {
        self.get_by_hash(key, self.hash(key, 0))
    }

    fn get_by_hash(&self, key: &[u8], hash: u32) -> Option<Self::Item>;

    /// Make `item` visible under its key, displacing whatever is linked
    /// there. Capacity is checked again here, so concurrent allocations
    /// cannot overcommit the engine.
    fn link(&mut self, item: Self::Item, hash: u32) -> Result<(), OutOfMemory>;

    /// Swap `old` for `new`, which carries the same key. On failure nothing
    /// is unlinked.
    fn replace(&mut self, old: &Self::Item, new: Self::Item, hash: u32) -> Result<(), OutOfMemory>;

    /// Unlink `item` if it is still the one linked under its key. Existing
    /// handles stay readable.
    fn remove(&mut self, item: &Self::Item);
}

/// A store shared by several dispatch loops.
#[derive(Debug, Default)]
pub struct Shared<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for Shared<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Store> Shared<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Lock the underlying store.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Store> Store for Shared<S> {
    type Item = S::Item;

    fn hash(&self, key: &[u8], seed: u32) -> u32 {
        self.lock().hash(key, seed)
    }

    fn item_size_ok(&self, key_len: usize, flags: u32, payload_len: usize) -> bool {
        self.lock().item_size_ok(key_len, flags, payload_len)
    }

    fn alloc(&mut self, key: &[u8], flags: u32, exptime: u32, payload_len: usize) -> Option<Self::Item> {
        self.lock().alloc(key, flags, exptime, payload_len)
    }

    fn get(&self, key: &[u8]) -> Option<Self::Item> {
        self.lock().get(key)
    }

    fn get_by_hash(&self, key: &[u8], hash: u32) -> Option<Self::Item> {
        self.lock().get_by_hash(key, hash)
    }

    fn link(&mut self, item: Self::Item, hash: u32) -> Result<(), OutOfMemory> {
        self.lock().link(item, hash)
    }

    fn replace(&mut self, old: &Self::Item, new: Self::Item, hash: u32) -> Result<(), OutOfMemory> {
        self.lock().replace(old, new, hash)
    }

    fn remove(&mut self, item: &Self::Item) {
        self.lock().remove(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_depends_on_seed() {
        assert_eq!(hash(b"k01", 0), xxh32(b"k01", 0));
        assert_ne!(hash(b"k01", 0), hash(b"k01", 1));
        assert_ne!(hash(b"k01", 0), hash(b"k02", 0));
    }
}
