//! In-memory counter store.
//!
//! Maps fingerprints to counter state with two eviction rules: a hard entry
//! cap enforced by least-recently-used eviction, and per-entry expiry at
//! `created_at + duration + grace` checked on access and by the daemon's
//! coarse sweep tick.
//!
//! The store is not thread-safe on its own. Callers wrap it in a short-held
//! `Mutex` for structural mutations; per-entry write ordering comes from the
//! per-key serializer in [`crate::workers`].

use rustc_hash::FxHashMap;

use crate::common::{CounterState, Fingerprint};

/// Grace period past a counter's window before its entry is reclaimed.
pub(crate) const EXPIRY_GRACE_MS: i64 = 1_000;

const NIL: usize = usize::MAX;

struct Slot {
    fingerprint: Fingerprint,
    state: CounterState,
    expires_at_ms: i64,
    prev: usize,
    next: usize,
}

/// Bounded LRU + TTL map from fingerprint to counter state.
///
/// Recency is an index-linked list threaded through a slab of slots, so
/// `get`, `upsert` and `remove` are O(1); `sweep` scans the live entries.
pub(crate) struct CounterStore {
    map: FxHashMap<Fingerprint, usize>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    capacity: usize,
}

impl CounterStore {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            map: FxHashMap::default(),
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Fetch the live state for `fingerprint`, marking it recently used.
    /// Expired entries are reclaimed on the way.
    pub(crate) fn get(&mut self, fingerprint: Fingerprint, now_ms: i64) -> Option<CounterState> {
        let index = *self.map.get(&fingerprint)?;
        if self.slots[index].expires_at_ms <= now_ms {
            self.remove_index(index);
            return None;
        }
        self.unlink(index);
        self.push_front(index);
        Some(self.slots[index].state)
    }

    /// Fetch without disturbing recency. Used for existence probes.
    pub(crate) fn peek(&self, fingerprint: Fingerprint, now_ms: i64) -> Option<CounterState> {
        let index = *self.map.get(&fingerprint)?;
        let slot = &self.slots[index];
        (slot.expires_at_ms > now_ms).then_some(slot.state)
    }

    /// Insert or replace the state for `fingerprint`, evicting the least
    /// recently used entry if the cap is exceeded.
    pub(crate) fn upsert(&mut self, fingerprint: Fingerprint, state: CounterState, _now_ms: i64) {
        let expires_at_ms = state
            .created_at_ms
            .saturating_add(state.duration_ms)
            .saturating_add(EXPIRY_GRACE_MS);

        if let Some(&index) = self.map.get(&fingerprint) {
            self.slots[index].state = state;
            self.slots[index].expires_at_ms = expires_at_ms;
            self.unlink(index);
            self.push_front(index);
            return;
        }

        let slot = Slot { fingerprint, state, expires_at_ms, prev: NIL, next: NIL };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.map.insert(fingerprint, index);
        self.push_front(index);

        if self.map.len() > self.capacity {
            let tail = self.tail;
            self.remove_index(tail);
        }
    }

    pub(crate) fn remove(&mut self, fingerprint: Fingerprint) {
        if let Some(&index) = self.map.get(&fingerprint) {
            self.remove_index(index);
        }
    }

    /// Reclaim every expired entry. Called on a coarse background tick.
    pub(crate) fn sweep(&mut self, now_ms: i64) -> usize {
        let expired: Vec<usize> = self
            .map
            .values()
            .copied()
            .filter(|&index| self.slots[index].expires_at_ms <= now_ms)
            .collect();
        for index in &expired {
            self.remove_index(*index);
        }
        expired.len()
    }

    fn remove_index(&mut self, index: usize) {
        self.unlink(index);
        self.map.remove(&self.slots[index].fingerprint);
        self.free.push(index);
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = (self.slots[index].prev, self.slots[index].next);
        if prev != NIL {
            self.slots[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.slots[index].prev = NIL;
        self.slots[index].next = NIL;
    }

    fn push_front(&mut self, index: usize) {
        self.slots[index].prev = NIL;
        self.slots[index].next = self.head;
        if self.head != NIL {
            self.slots[self.head].prev = index;
        } else {
            self.tail = index;
        }
        self.head = index;
    }
}
