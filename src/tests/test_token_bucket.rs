use crate::algorithms::token_bucket;
use crate::common::{
    Algorithm, Behavior, CheckRequest, CounterState, Status, fingerprint,
};

fn request(hits: i64, limit: i64, duration_ms: i64, created_at_ms: i64) -> CheckRequest {
    CheckRequest {
        name: "test".to_string(),
        unique_key: "account:995".to_string(),
        fingerprint: fingerprint("test", "account:995"),
        hits,
        limit,
        burst: limit,
        duration_ms,
        algorithm: Algorithm::TokenBucket,
        behavior: Behavior::default(),
        created_at_ms,
    }
}

#[test]
fn first_hit_debits_and_sets_reset_time() {
    let req = request(1, 100, 30_000, 1_000);
    let (state, response) = token_bucket(None, &req, 1_000);

    assert_eq!(response.status, Status::UnderLimit);
    assert_eq!(response.remaining, 99);
    assert_eq!(response.reset_time, 31_000);
    assert_eq!(state.remaining, 99);
    assert_eq!(state.created_at_ms, 1_000);
}

#[test]
fn drains_to_zero_then_rejects() {
    let req = request(1, 100, 30_000, 1_000);
    let mut state: Option<CounterState> = None;

    for expected_remaining in (0..100).rev() {
        let (next, response) = token_bucket(state, &req, 1_000);
        assert_eq!(response.status, Status::UnderLimit);
        assert_eq!(response.remaining, expected_remaining);
        state = Some(next);
    }

    let (next, response) = token_bucket(state, &req, 1_000);
    assert_eq!(response.status, Status::OverLimit);
    assert_eq!(response.remaining, 0);
    assert_eq!(next.remaining, 0);
}

#[test]
fn refills_when_window_expires() {
    let req = request(100, 100, 30_000, 1_000);
    let (state, response) = token_bucket(None, &req, 1_000);
    assert_eq!(response.remaining, 0);

    let late = request(1, 100, 30_000, 31_000);
    let (state, response) = token_bucket(Some(state), &late, 31_000);
    assert_eq!(response.status, Status::UnderLimit);
    assert_eq!(response.remaining, 99);
    assert_eq!(state.created_at_ms, 31_000);
    assert_eq!(response.reset_time, 61_000);
}

#[test]
fn zero_hits_reports_without_consuming() {
    let seed = request(3, 10, 1_000, 0);
    let (state, _) = token_bucket(None, &seed, 0);

    let peek = request(0, 10, 1_000, 0);
    let (state, first) = token_bucket(Some(state), &peek, 0);
    let (_, second) = token_bucket(Some(state), &peek, 0);

    assert_eq!(first.remaining, 7);
    assert_eq!(second.remaining, 7);
    assert_eq!(first.status, Status::UnderLimit);
}

#[test]
fn over_limit_leaves_remaining_untouched() {
    let seed = request(8, 10, 1_000, 0);
    let (state, _) = token_bucket(None, &seed, 0);

    let too_big = request(5, 10, 1_000, 0);
    let (state, response) = token_bucket(Some(state), &too_big, 0);

    assert_eq!(response.status, Status::OverLimit);
    assert_eq!(response.remaining, 2);
    assert_eq!(state.remaining, 2);
}

#[test]
fn drain_over_limit_clamps_remaining_to_zero() {
    let seed = request(8, 10, 1_000, 0);
    let (state, _) = token_bucket(None, &seed, 0);

    let mut too_big = request(5, 10, 1_000, 0);
    too_big.behavior = Behavior::DRAIN_OVER_LIMIT;
    let (state, response) = token_bucket(Some(state), &too_big, 0);

    assert_eq!(response.status, Status::OverLimit);
    assert_eq!(response.remaining, 0);
    assert_eq!(state.remaining, 0);
}

#[test]
fn reset_remaining_restores_burst_without_consuming() {
    let seed = request(9, 10, 1_000, 0);
    let (state, _) = token_bucket(None, &seed, 0);

    let mut reset = request(5, 10, 1_000, 0);
    reset.behavior = Behavior::RESET_REMAINING;
    let (state, response) = token_bucket(Some(state), &reset, 0);

    assert_eq!(response.status, Status::UnderLimit);
    assert_eq!(response.remaining, 10);
    assert_eq!(state.remaining, 10);

    // A fresh counter debited by the next request's hits.
    let follow_up = request(4, 10, 1_000, 0);
    let (_, response) = token_bucket(Some(state), &follow_up, 0);
    assert_eq!(response.remaining, 6);
}

#[test]
fn parameter_change_discards_state() {
    let seed = request(10, 10, 1_000, 0);
    let (state, response) = token_bucket(None, &seed, 0);
    assert_eq!(response.remaining, 0);

    // Same key, bigger limit: counter starts over.
    let resized = request(1, 20, 1_000, 0);
    let (state, response) = token_bucket(Some(state), &resized, 0);
    assert_eq!(response.status, Status::UnderLimit);
    assert_eq!(response.remaining, 19);
    assert_eq!(state.limit, 20);
}

#[test]
fn explicit_burst_admits_beyond_limit() {
    let mut req = request(150, 100, 30_000, 0);
    req.burst = 150;
    let (state, response) = token_bucket(None, &req, 0);

    assert_eq!(response.status, Status::UnderLimit);
    assert_eq!(response.remaining, 0);
    assert_eq!(state.limit, 100);
}

#[test]
fn client_created_at_pins_the_window() {
    // The client says the window started two seconds ago; a hit one second
    // into a one second window finds it expired and refilled.
    let seed = request(10, 10, 1_000, 5_000);
    let (state, _) = token_bucket(None, &seed, 5_000);

    let later = request(1, 10, 1_000, 6_000);
    let (_, response) = token_bucket(Some(state), &later, 6_000);
    assert_eq!(response.status, Status::UnderLimit);
    assert_eq!(response.remaining, 9);
}
