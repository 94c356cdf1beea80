//! Intrusive indexed min-heap.
//!
//! A binary heap of `(key, serial)` entries with a `serial → slot` index
//! maintained across every sift, so `remove` is `O(log n)` and presence
//! checks are `O(1)`. Serials double as the tie-break: equal keys pop in
//! ascending serial (arrival) order.
//!
//! The engine instantiates this twice per queue: once keyed by priority
//! (the available heap) and once keyed by the next deadline (the
//! tracking heap).

use ahash::AHashMap;

#[derive(Debug, Clone, Copy)]
struct Entry<K> {
    key: K,
    serial: u64,
}

#[derive(Debug)]
pub struct IndexedHeap<K> {
    entries: Vec<Entry<K>>,
    index: AHashMap<u64, usize>,
}

impl<K> Default for IndexedHeap<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: AHashMap::new(),
        }
    }
}

impl<K: Ord + Copy> IndexedHeap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, serial: u64) -> bool {
        self.index.contains_key(&serial)
    }

    /// Insert an entry, or re-key an existing one and restore the heap
    /// order around it.
    pub fn push(&mut self, serial: u64, key: K) {
        if let Some(&slot) = self.index.get(&serial) {
            self.entries[slot].key = key;
            let slot = self.sift_up(slot);
            self.sift_down(slot);
        } else {
            let slot = self.entries.len();
            self.entries.push(Entry { key, serial });
            self.index.insert(serial, slot);
            self.sift_up(slot);
        }
    }

    /// The minimum entry, without removing it.
    pub fn peek_min(&self) -> Option<(K, u64)> {
        self.entries.first().map(|e| (e.key, e.serial))
    }

    /// Remove and return the minimum entry.
    pub fn pop_min(&mut self) -> Option<(K, u64)> {
        let min = self.peek_min()?;
        self.remove_slot(0);
        Some(min)
    }

    /// Remove the entry for `serial`, returning its key.
    pub fn remove(&mut self, serial: u64) -> Option<K> {
        let slot = *self.index.get(&serial)?;
        let key = self.entries[slot].key;
        self.remove_slot(slot);
        Some(key)
    }

    fn remove_slot(&mut self, slot: usize) {
        let last = self.entries.len() - 1;
        self.entries.swap(slot, last);
        if let Some(removed) = self.entries.pop() {
            self.index.remove(&removed.serial);
        }
        if slot < self.entries.len() {
            self.index.insert(self.entries[slot].serial, slot);
            let slot = self.sift_up(slot);
            self.sift_down(slot);
        }
    }

    fn less(&self, a: usize, b: usize) -> bool {
        let (x, y) = (&self.entries[a], &self.entries[b]);
        (x.key, x.serial) < (y.key, y.serial)
    }

    fn swap_slots(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        self.index.insert(self.entries[a].serial, a);
        self.index.insert(self.entries[b].serial, b);
    }

    fn sift_up(&mut self, mut slot: usize) -> usize {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.less(slot, parent) {
                self.swap_slots(slot, parent);
                slot = parent;
            } else {
                break;
            }
        }
        slot
    }

    fn sift_down(&mut self, mut slot: usize) {
        loop {
            let mut smallest = slot;
            for child in [2 * slot + 1, 2 * slot + 2] {
                if child < self.entries.len() && self.less(child, smallest) {
                    smallest = child;
                }
            }
            if smallest == slot {
                break;
            }
            self.swap_slots(slot, smallest);
            slot = smallest;
        }
    }
}
