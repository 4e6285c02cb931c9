use crate::common::{Algorithm, CounterState, Status};
use crate::store::{CounterStore, EXPIRY_GRACE_MS};

fn state(created_at_ms: i64, duration_ms: i64) -> CounterState {
    CounterState {
        algorithm: Algorithm::TokenBucket,
        limit: 10,
        duration_ms,
        created_at_ms,
        remaining: 10,
        status: Status::UnderLimit,
    }
}

#[test]
fn get_missing_returns_none() {
    let mut store = CounterStore::new(4);
    assert!(store.get(42, 0).is_none());
}

#[test]
fn upsert_then_get_roundtrips() {
    let mut store = CounterStore::new(4);
    let value = state(0, 1_000);
    store.upsert(1, value, 0);

    assert_eq!(store.get(1, 10), Some(value));
    assert_eq!(store.len(), 1);
}

#[test]
fn upsert_replaces_existing_entry() {
    let mut store = CounterStore::new(4);
    store.upsert(1, state(0, 1_000), 0);

    let mut replacement = state(0, 1_000);
    replacement.remaining = 3;
    store.upsert(1, replacement, 0);

    assert_eq!(store.len(), 1);
    assert_eq!(store.get(1, 10).map(|s| s.remaining), Some(3));
}

#[test]
fn capacity_overflow_evicts_least_recently_used() {
    let mut store = CounterStore::new(2);
    store.upsert(1, state(0, 60_000), 0);
    store.upsert(2, state(0, 60_000), 0);

    // Touch 1 so 2 becomes the eviction candidate.
    assert!(store.get(1, 10).is_some());
    store.upsert(3, state(0, 60_000), 10);

    assert!(store.get(2, 20).is_none());
    assert!(store.get(1, 20).is_some());
    assert!(store.get(3, 20).is_some());
    assert_eq!(store.len(), 2);
}

#[test]
fn peek_does_not_refresh_recency() {
    let mut store = CounterStore::new(2);
    store.upsert(1, state(0, 60_000), 0);
    store.upsert(2, state(0, 60_000), 0);

    // A peek must not save 1 from eviction.
    assert!(store.peek(1, 10).is_some());
    store.upsert(3, state(0, 60_000), 10);

    assert!(store.peek(1, 20).is_none());
    assert!(store.peek(2, 20).is_some());
    assert!(store.peek(3, 20).is_some());
}

#[test]
fn expired_entries_vanish_on_access() {
    let mut store = CounterStore::new(4);
    store.upsert(1, state(0, 100), 0);

    let expiry = 100 + EXPIRY_GRACE_MS;
    assert!(store.get(1, expiry - 1).is_some());
    assert!(store.get(1, expiry).is_none());
    assert_eq!(store.len(), 0);
}

#[test]
fn sweep_reclaims_only_expired_entries() {
    let mut store = CounterStore::new(8);
    store.upsert(1, state(0, 100), 0);
    store.upsert(2, state(0, 200), 0);
    store.upsert(3, state(0, 60_000), 0);

    let swept = store.sweep(300 + EXPIRY_GRACE_MS);
    assert_eq!(swept, 2);
    assert_eq!(store.len(), 1);
    assert!(store.peek(3, 300).is_some());
}

#[test]
fn capacity_of_one_keeps_only_the_newest() {
    let mut store = CounterStore::new(1);
    for fingerprint in 0..10u64 {
        store.upsert(fingerprint, state(0, 60_000), 0);
    }
    assert_eq!(store.len(), 1);
    assert!(store.get(9, 10).is_some());
}

#[test]
fn slots_are_reused_after_removal() {
    let mut store = CounterStore::new(4);
    for round in 0..5 {
        for fingerprint in 0..4u64 {
            store.upsert(fingerprint + round * 4, state(0, 60_000), 0);
        }
        for fingerprint in 0..4u64 {
            store.remove(fingerprint + round * 4);
        }
    }
    assert_eq!(store.len(), 0);

    store.upsert(99, state(0, 60_000), 0);
    assert!(store.get(99, 10).is_some());
}
