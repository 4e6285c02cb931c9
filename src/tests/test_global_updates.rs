use crate::common::{Algorithm, CounterState, RateLimitResponse, Status, UpdateRateLimit};
use crate::global::{accept_update, update_to_state};

fn held(created_at_ms: i64) -> CounterState {
    CounterState {
        algorithm: Algorithm::TokenBucket,
        limit: 100,
        duration_ms: 30_000,
        created_at_ms,
        remaining: 50,
        status: Status::UnderLimit,
    }
}

#[test]
fn updates_are_accepted_when_nothing_is_held() {
    assert!(accept_update(None, &held(1_000)));
}

#[test]
fn strictly_older_updates_are_discarded() {
    let current = held(1_000);
    let stale = held(999);
    assert!(!accept_update(Some(&current), &stale));
}

#[test]
fn newer_updates_replace_held_state() {
    let current = held(1_000);
    let fresh = held(1_001);
    assert!(accept_update(Some(&current), &fresh));
}

#[test]
fn equal_timestamp_same_identity_is_accepted() {
    // The owner rebroadcasts within the same window; remaining moves while
    // created_at stays put.
    let current = held(1_000);
    let rebroadcast = CounterState { remaining: 10, ..held(1_000) };
    assert!(accept_update(Some(&current), &rebroadcast));
}

#[test]
fn equal_timestamp_different_identity_is_rejected() {
    let current = held(1_000);

    let different_algorithm = CounterState { algorithm: Algorithm::LeakyBucket, ..held(1_000) };
    assert!(!accept_update(Some(&current), &different_algorithm));

    let different_limit = CounterState { limit: 7, ..held(1_000) };
    assert!(!accept_update(Some(&current), &different_limit));

    let different_duration = CounterState { duration_ms: 5, ..held(1_000) };
    assert!(!accept_update(Some(&current), &different_duration));
}

#[test]
fn newer_update_with_changed_identity_wins() {
    // An algorithm change resets the counter; the broadcast that follows
    // carries a fresher created_at and must land.
    let current = held(1_000);
    let changed = CounterState { algorithm: Algorithm::LeakyBucket, ..held(2_000) };
    assert!(accept_update(Some(&current), &changed));
}

fn update() -> UpdateRateLimit {
    UpdateRateLimit {
        name: "global".to_string(),
        unique_key: "k".to_string(),
        state: RateLimitResponse {
            status: Status::OverLimit,
            limit: 100,
            remaining: 0,
            reset_time: 31_000,
            error: String::new(),
        },
        algorithm: Algorithm::LeakyBucket.as_wire(),
        duration: 30_000,
        created_at: 1_000,
    }
}

#[test]
fn update_envelopes_rebuild_counter_state() {
    let state = update_to_state(&update()).expect("valid update");

    assert_eq!(state.algorithm, Algorithm::LeakyBucket);
    assert_eq!(state.limit, 100);
    assert_eq!(state.duration_ms, 30_000);
    assert_eq!(state.created_at_ms, 1_000);
    assert_eq!(state.remaining, 0);
    assert_eq!(state.status, Status::OverLimit);
}

#[test]
fn unknown_algorithm_in_an_update_is_rejected() {
    let bad = UpdateRateLimit { algorithm: 9, ..update() };
    assert!(update_to_state(&bad).is_err());
}

#[test]
fn nonpositive_duration_in_an_update_is_rejected() {
    let bad = UpdateRateLimit { duration: 0, ..update() };
    assert!(update_to_state(&bad).is_err());
}
