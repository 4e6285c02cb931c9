use crate::common::{Algorithm, Behavior, CheckRequest, CounterState, RateLimitResponse, Status};

use super::state_matches;

/// Token bucket: a counter that refills to `burst` when its window expires.
///
/// Hits are debited from `remaining`; a request whose hits do not fit is
/// answered `OVER_LIMIT` and consumes nothing, unless `DRAIN_OVER_LIMIT`
/// clamps the remainder to zero.
pub(crate) fn token_bucket(
    previous: Option<CounterState>,
    request: &CheckRequest,
    now_ms: i64,
) -> (CounterState, RateLimitResponse) {
    let mut state = match previous {
        Some(prev) if state_matches(&prev, request) => prev,
        _ => fresh_state(request),
    };

    // Window expired: refill and restart the window at the request's time.
    if now_ms >= state.created_at_ms + state.duration_ms {
        state.created_at_ms = request.created_at_ms;
        state.remaining = request.burst;
        state.status = Status::UnderLimit;
    }

    let reset_time = state.created_at_ms + state.duration_ms;

    if request.behavior.has(Behavior::RESET_REMAINING) {
        state.remaining = request.burst;
        state.status = Status::UnderLimit;
        return respond(state, reset_time);
    }

    if request.hits == 0 {
        return respond(state, reset_time);
    }

    if request.hits <= state.remaining {
        state.remaining -= request.hits;
        state.status = Status::UnderLimit;
        return respond(state, reset_time);
    }

    state.status = Status::OverLimit;
    if request.behavior.has(Behavior::DRAIN_OVER_LIMIT) {
        state.remaining = 0;
    }
    respond(state, reset_time)
}

fn fresh_state(request: &CheckRequest) -> CounterState {
    CounterState {
        algorithm: Algorithm::TokenBucket,
        limit: request.limit,
        duration_ms: request.duration_ms,
        created_at_ms: request.created_at_ms,
        remaining: request.burst,
        status: Status::UnderLimit,
    }
}

fn respond(state: CounterState, reset_time: i64) -> (CounterState, RateLimitResponse) {
    let response = RateLimitResponse {
        status: state.status,
        limit: state.limit,
        remaining: state.remaining,
        reset_time,
        error: String::new(),
    };
    (state, response)
}
