//! Eviction Cache - LRU over a node arena
//!
//! One structure serves both tiers; only the [`Capacity`] differs.
//!
//! # Design
//!
//! - Recency list is a doubly-linked list of arena slots addressed by index
//! - Head is most-recently-used, tail is least-recently-used
//! - Freed slots are recycled through a free list
//! - `get`, `set`, `remove` and single evictions are O(1)

use std::collections::HashMap;
use std::hash::Hash;

const NIL: usize = usize::MAX;

/// Capacity model for an [`EvictionCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// Maximum number of entries
    Entries(usize),
    /// Maximum cumulative entry size in bytes
    Bytes(u64),
}

impl std::fmt::Display for Capacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capacity::Entries(n) => write!(f, "{} entries", n),
            Capacity::Bytes(b) => write!(f, "{} bytes", b),
        }
    }
}

struct Node<K, V> {
    key: K,
    value: V,
    size: u64,
    prev: usize,
    next: usize,
}

/// Fixed-capacity or byte-budgeted LRU cache
pub struct EvictionCache<K, V> {
    /// Key -> arena slot
    index: HashMap<K, usize>,
    /// Node arena
    slots: Vec<Option<Node<K, V>>>,
    /// Reusable arena slots
    free: Vec<usize>,
    /// Most-recently-used slot
    head: usize,
    /// Least-recently-used slot
    tail: usize,
    /// Capacity model
    capacity: Capacity,
    /// Sum of entry sizes
    size_bytes: u64,
    /// Hit count
    hits: u64,
    /// Miss count
    misses: u64,
    /// Eviction count
    evictions: u64,
}

impl<K: Hash + Eq + Clone, V> EvictionCache<K, V> {
    /// Create an empty cache with the given capacity model
    pub fn new(capacity: Capacity) -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
            size_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Cache bounded by entry count
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self::new(Capacity::Entries(max_entries))
    }

    /// Cache bounded by cumulative size
    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self::new(Capacity::Bytes(max_bytes))
    }

    /// Look up a key and mark it most-recently-used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        match self.index.get(key).copied() {
            Some(slot) => {
                self.hits += 1;
                self.move_to_front(slot);
                self.node(slot).map(|n| &n.value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Look up a key without touching recency or counters
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.index
            .get(key)
            .and_then(|&slot| self.node(slot))
            .map(|n| &n.value)
    }

    /// Check if the cache holds a key
    pub fn has(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or replace an entry, evicting least-recently-used entries
    /// until the cache is back within capacity.
    ///
    /// Returns every displaced entry, oldest first. An entry that can never
    /// fit (larger than a byte budget, or a zero-entry capacity) is not
    /// stored and comes back as the only element.
    pub fn set(&mut self, key: K, value: V, size: u64) -> Vec<(K, V)> {
        if !self.fits_alone(size) {
            let mut rejected = Vec::new();
            if let Some(old) = self.remove(&key) {
                rejected.push((key.clone(), old));
            }
            rejected.push((key, value));
            return rejected;
        }

        let slot = match self.index.get(&key).copied() {
            Some(slot) => {
                if let Some(node) = self.slots[slot].as_mut() {
                    self.size_bytes = self.size_bytes - node.size + size;
                    node.value = value;
                    node.size = size;
                }
                self.move_to_front(slot);
                slot
            }
            None => {
                let slot = self.alloc(Node {
                    key: key.clone(),
                    value,
                    size,
                    prev: NIL,
                    next: NIL,
                });
                self.push_front(slot);
                self.index.insert(key, slot);
                self.size_bytes += size;
                slot
            }
        };

        let mut evicted = Vec::new();
        while self.over_capacity() && self.tail != slot && self.tail != NIL {
            if let Some(entry) = self.pop_back() {
                self.evictions += 1;
                evicted.push(entry);
            }
        }
        evicted
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        let node = self.release(slot)?;
        self.size_bytes -= node.size;
        Some(node.value)
    }

    /// The key that would be evicted next if `key` were inserted with `size`
    ///
    /// Lets a caller clean up external state for a victim before the
    /// in-memory accounting changes.
    pub fn victim_for(&self, key: &K, size: u64) -> Option<K> {
        if !self.fits_alone(size) {
            return None;
        }
        let existing = self.index.get(key).copied();
        let over = match self.capacity {
            Capacity::Entries(max) => existing.is_none() && self.index.len() >= max,
            Capacity::Bytes(max) => {
                let current = existing
                    .and_then(|s| self.node(s))
                    .map(|n| n.size)
                    .unwrap_or(0);
                self.size_bytes - current + size > max
            }
        };
        if !over {
            return None;
        }

        let mut cursor = self.tail;
        while cursor != NIL {
            let node = self.node(cursor)?;
            if Some(cursor) != existing {
                return Some(node.key.clone());
            }
            cursor = node.prev;
        }
        None
    }

    /// Keys from most- to least-recently-used
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.index.len());
        let mut cursor = self.head;
        while let Some(node) = self.node(cursor) {
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
        self.size_bytes = 0;
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Sum of entry sizes
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Capacity model
    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Get cache statistics
    pub fn stats(&self) -> EvictionStats {
        let total = self.hits + self.misses;
        EvictionStats {
            entries: self.len(),
            size_bytes: self.size_bytes,
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                self.hits as f64 / total as f64
            },
            evictions: self.evictions,
        }
    }

    // -------------------------------------------------------------------------
    // Arena and list plumbing
    // -------------------------------------------------------------------------

    fn fits_alone(&self, size: u64) -> bool {
        match self.capacity {
            Capacity::Entries(max) => max > 0,
            Capacity::Bytes(max) => size <= max,
        }
    }

    fn over_capacity(&self) -> bool {
        match self.capacity {
            Capacity::Entries(max) => self.index.len() > max,
            Capacity::Bytes(max) => self.size_bytes > max,
        }
    }

    fn node(&self, slot: usize) -> Option<&Node<K, V>> {
        self.slots.get(slot).and_then(|s| s.as_ref())
    }

    fn alloc(&mut self, node: Node<K, V>) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, slot: usize) -> Option<Node<K, V>> {
        let node = self.slots.get_mut(slot)?.take();
        if node.is_some() {
            self.free.push(slot);
        }
        node
    }

    fn set_links(&mut self, slot: usize, prev: usize, next: usize) {
        if let Some(node) = self.slots[slot].as_mut() {
            node.prev = prev;
            node.next = next;
        }
    }

    fn set_prev(&mut self, slot: usize, prev: usize) {
        if let Some(node) = self.slots[slot].as_mut() {
            node.prev = prev;
        }
    }

    fn set_next(&mut self, slot: usize, next: usize) {
        if let Some(node) = self.slots[slot].as_mut() {
            node.next = next;
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.node(slot) {
            Some(node) => (node.prev, node.next),
            None => return,
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.set_next(prev, next);
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.set_prev(next, prev);
        }
        self.set_links(slot, NIL, NIL);
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        self.set_links(slot, NIL, old_head);
        if old_head == NIL {
            self.tail = slot;
        } else {
            self.set_prev(old_head, slot);
        }
        self.head = slot;
    }

    fn move_to_front(&mut self, slot: usize) {
        if self.head == slot {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn pop_back(&mut self) -> Option<(K, V)> {
        let slot = self.tail;
        if slot == NIL {
            return None;
        }
        self.unlink(slot);
        let node = self.release(slot)?;
        self.index.remove(&node.key);
        self.size_bytes -= node.size;
        Some((node.key, node.value))
    }
}

/// Eviction cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionStats {
    /// Number of entries
    pub entries: usize,
    /// Sum of entry sizes
    pub size_bytes: u64,
    /// Capacity model
    pub capacity: Capacity,
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    /// Eviction count
    pub evictions: u64,
}

// =============================================================================
// Tests
// =============================================================================
