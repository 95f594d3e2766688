//! An in-memory [`Store`].

use std::collections::HashMap;
use std::sync::Arc;

use super::store::{Item, OutOfMemory, Store};

/// Per-item bookkeeping charged against the capacity.
pub const ITEM_OVERHEAD: usize = 48;

/// An item of a [`MemStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemItem {
    key: Arc<[u8]>,
    data: Arc<Vec<u8>>,
    flags: u32,
    exptime: u32,
}

impl MemItem {
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[inline]
    pub fn exptime(&self) -> u32 {
        self.exptime
    }

    fn charge(&self) -> usize {
        ITEM_OVERHEAD + self.key.len() + self.data.len()
    }
}

impl Item for MemItem {
    fn key(&self) -> &[u8] {
        &self.key
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }
}

/// Hash-bucketed store with a per-item size limit and a total capacity.
#[derive(Debug)]
pub struct MemStore {
    buckets: HashMap<u32, Vec<MemItem>>,
    max_item_size: usize,
    capacity_bytes: usize,
    used_bytes: usize,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new(1024 * 1024, 64 * 1024 * 1024)
    }
}

impl MemStore {
    pub fn new(max_item_size: usize, capacity_bytes: usize) -> Self {
        Self {
            buckets: HashMap::new(),
            max_item_size,
            capacity_bytes,
            used_bytes: 0,
        }
    }

    /// Bytes charged by linked items.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self, key: &[u8]) -> Option<&MemItem> {
        self.buckets
            .get(&self.hash(key, 0))?
            .iter()
            .find(|it| &*it.key == key)
    }

    fn unlink(&mut self, key: &[u8]) -> Option<MemItem> {
        let hash = self.hash(key, 0);
        let bucket = self.buckets.get_mut(&hash)?;
        let pos = bucket.iter().position(|it| &*it.key == key)?;
        let item = bucket.swap_remove(pos);
        if bucket.is_empty() {
            self.buckets.remove(&hash);
        }
        self.used_bytes -= item.charge();
        Some(item)
    }
}

impl Store for MemStore {
    type Item = MemItem;

    fn item_size_ok(&self, key_len: usize, _flags: u32, payload_len: usize) -> bool {
        ITEM_OVERHEAD + key_len + payload_len <= self.max_item_size
    }

    fn alloc(&mut self, key: &[u8], flags: u32, exptime: u32, payload_len: usize) -> Option<MemItem> {
        if !self.item_size_ok(key.len(), flags, payload_len) {
            return None;
        }
        let charge = ITEM_OVERHEAD + key.len() + payload_len;
        if self.used_bytes + charge > self.capacity_bytes {
            return None;
        }
        Some(MemItem {
            key: key.into(),
            data: Arc::new(vec![0; payload_len]),
            flags,
            exptime,
        })
    }

    fn get_by_hash(&self, key: &[u8], hash: u32) -> Option<MemItem> {
        self.buckets
            .get(&hash)?
            .iter()
            .find(|it| &*it.key == key)
            .cloned()
    }

    fn link(&mut self, item: MemItem, hash: u32) -> Result<(), OutOfMemory> {
        // `alloc` reserves nothing, so another allocation may have been
        // linked since this one was checked.
        let displaced = self.current(&item.key).map_or(0, MemItem::charge);
        if self.used_bytes - displaced + item.charge() > self.capacity_bytes {
            return Err(OutOfMemory);
        }
        self.unlink(&item.key);
        self.used_bytes += item.charge();
        self.buckets.entry(hash).or_default().push(item);
        Ok(())
    }

    fn replace(&mut self, old: &MemItem, new: MemItem, hash: u32) -> Result<(), OutOfMemory> {
        debug_assert_eq!(old.key, new.key);
        // The newest SET wins even if `old` was displaced in the meantime.
        self.link(new, hash)
    }

    fn remove(&mut self, item: &MemItem) {
        let linked = self
            .current(&item.key)
            .is_some_and(|cur| Arc::ptr_eq(&cur.data, &item.data));
        if linked {
            self.unlink(&item.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::store::Shared;

    fn put(store: &mut MemStore, key: &[u8], value: &[u8]) -> bool {
        let hv = store.hash(key, 0);
        let Some(mut it) = store.alloc(key, 0, 0, value.len()) else {
            return false;
        };
        it.data_mut().copy_from_slice(value);
        match store.get_by_hash(key, hv) {
            Some(old) => store.replace(&old, it, hv),
            None => store.link(it, hv),
        }
        .is_ok()
    }

    #[test]
    fn unlinked_items_are_invisible() {
        let mut store = MemStore::default();
        let it = store.alloc(b"k", 0, 0, 4).unwrap();
        assert!(store.get(b"k").is_none());
        let hv = store.hash(b"k", 0);
        store.link(it, hv).unwrap();
        assert_eq!(store.get(b"k").unwrap().data(), &[0; 4]);
    }

    #[test]
    fn replace_keeps_accounting() {
        let mut store = MemStore::default();
        assert!(put(&mut store, b"k01", b"first"));
        let old = store.get(b"k01").unwrap();
        assert!(put(&mut store, b"k01", b"second!"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.used_bytes(), ITEM_OVERHEAD + 3 + 7);
        // A handle taken before the replace still reads the old value.
        assert_eq!(old.data(), b"first");
        assert_eq!(store.get(b"k01").unwrap().data(), b"second!");

        let current = store.get(b"k01").unwrap();
        store.remove(&current);
        assert!(store.is_empty());
        assert_eq!(store.used_bytes(), 0);
    }

    #[test]
    fn size_and_capacity_limits() {
        let mut store = MemStore::new(ITEM_OVERHEAD + 10, ITEM_OVERHEAD * 2 + 17);
        assert!(!store.item_size_ok(1, 0, 10));
        assert!(store.alloc(b"k", 0, 0, 10).is_none());

        assert!(put(&mut store, b"a", &[1; 8]));
        assert!(store.item_size_ok(1, 0, 9));
        // Fits the item limit but not what remains of the capacity.
        assert!(store.alloc(b"b", 0, 0, 9).is_none());
        assert!(put(&mut store, b"b", &[2; 7]));
    }

    #[test]
    fn stale_handle_does_not_evict_newer_value() {
        let mut store = MemStore::default();
        assert!(put(&mut store, b"k", b"first"));
        let stale = store.get(b"k").unwrap();
        assert!(put(&mut store, b"k", b"second"));

        store.remove(&stale);
        assert_eq!(store.get(b"k").unwrap().data(), b"second");
        assert_eq!(store.used_bytes(), ITEM_OVERHEAD + 1 + 6);

        let current = store.get(b"k").unwrap();
        store.remove(&current);
        assert!(store.is_empty());
    }

    #[test]
    fn allocations_in_flight_cannot_overcommit() {
        let capacity = ITEM_OVERHEAD * 3 + 4;
        let shared = Shared::new(MemStore::new(1024, capacity));
        let (mut a, mut b) = (shared.clone(), shared.clone());

        // Each allocation fits on its own; together they do not.
        let ia = a.alloc(b"a", 0, 0, ITEM_OVERHEAD).unwrap();
        let ib = b.alloc(b"b", 0, 0, ITEM_OVERHEAD).unwrap();
        let (ha, hb) = (a.hash(b"a", 0), b.hash(b"b", 0));
        a.link(ia, ha).unwrap();
        assert_eq!(b.link(ib, hb), Err(OutOfMemory));
        assert!(shared.lock().used_bytes() <= capacity);
        assert!(shared.get(b"b").is_none());
        assert_eq!(shared.lock().len(), 1);
    }

    #[test]
    fn relinking_a_key_pays_only_the_difference() {
        let mut store = MemStore::new(1024, ITEM_OVERHEAD * 2 + 20);
        let hv = store.hash(b"k", 0);
        let first = store.alloc(b"k", 0, 0, 9).unwrap();
        let second = store.alloc(b"k", 0, 0, 10).unwrap();
        store.link(first, hv).unwrap();
        // 48 + 1 + 10 would not fit next to the first item, but it displaces it.
        store.link(second, hv).unwrap();
        assert_eq!(store.used_bytes(), ITEM_OVERHEAD + 11);
    }

    #[test]
    fn flags_are_kept() {
        let mut store = MemStore::default();
        let it = store.alloc(b"k", 7, 99, 0).unwrap();
        assert_eq!((it.flags(), it.exptime()), (7, 99));
    }
}
