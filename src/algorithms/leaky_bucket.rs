use crate::common::{Algorithm, Behavior, CheckRequest, CounterState, RateLimitResponse, Status};

use super::state_matches;

/// Leaky bucket: a counter that drains at `limit / duration_ms` tokens per
/// millisecond.
///
/// `created_at_ms` doubles as the last-drain timestamp. It only advances for
/// whole leaked tokens, so sub-tick residue carries over to the next hit.
pub(crate) fn leaky_bucket(
    previous: Option<CounterState>,
    request: &CheckRequest,
    now_ms: i64,
) -> (CounterState, RateLimitResponse) {
    let mut state = match previous {
        Some(prev) if state_matches(&prev, request) => prev,
        _ => CounterState {
            algorithm: Algorithm::LeakyBucket,
            limit: request.limit,
            duration_ms: request.duration_ms,
            created_at_ms: request.created_at_ms,
            remaining: request.limit,
            status: Status::UnderLimit,
        },
    };

    drain(&mut state, now_ms);

    if request.behavior.has(Behavior::RESET_REMAINING) {
        state.remaining = state.limit;
        state.created_at_ms = now_ms;
        state.status = Status::UnderLimit;
        return respond(state, now_ms, state.remaining);
    }

    if request.hits == 0 {
        return respond(state, now_ms, state.remaining);
    }

    if request.hits <= state.remaining {
        state.remaining -= request.hits;
        state.status = Status::UnderLimit;
        return respond(state, now_ms, state.remaining);
    }

    state.status = Status::OverLimit;
    let response = RateLimitResponse {
        status: state.status,
        limit: state.limit,
        remaining: state.remaining,
        // Time until enough tokens have leaked for this request to fit.
        reset_time: now_ms + scale(request.hits - state.remaining, state.duration_ms, state.limit),
        error: String::new(),
    };
    (state, response)
}

/// Credit back whole tokens that leaked since the last drain.
fn drain(state: &mut CounterState, now_ms: i64) {
    if state.remaining >= state.limit {
        // Nothing to leak; keep the drain anchor current so idle time is not
        // credited later.
        state.created_at_ms = now_ms;
        return;
    }

    let elapsed_ms = now_ms - state.created_at_ms;
    if elapsed_ms <= 0 {
        return;
    }

    let leaked = scale(elapsed_ms, state.limit, state.duration_ms);
    if leaked == 0 {
        return;
    }

    if state.remaining + leaked >= state.limit {
        state.remaining = state.limit;
        state.created_at_ms = now_ms;
    } else {
        state.remaining += leaked;
        state.created_at_ms += scale(leaked, state.duration_ms, state.limit);
    }
}

/// `value * numerator / denominator` without intermediate overflow.
fn scale(value: i64, numerator: i64, denominator: i64) -> i64 {
    (i128::from(value) * i128::from(numerator) / i128::from(denominator)) as i64
}

fn respond(
    state: CounterState,
    now_ms: i64,
    remaining: i64,
) -> (CounterState, RateLimitResponse) {
    let response = RateLimitResponse {
        status: state.status,
        limit: state.limit,
        remaining,
        // Time until the bucket is fully replenished.
        reset_time: now_ms + scale(state.limit - remaining, state.duration_ms, state.limit),
        error: String::new(),
    };
    (state, response)
}
