//! Counting algorithms.
//!
//! Both algorithms are deterministic functions over
//! `(previous state, request, now)`. They never touch storage or I/O, which
//! keeps the entire stateful layer a thin shell over unit-testable math.

mod gregorian;
mod leaky_bucket;
mod token_bucket;

pub(crate) use gregorian::next_boundary_ms;
pub(crate) use leaky_bucket::leaky_bucket;
pub(crate) use token_bucket::token_bucket;

use crate::common::{Algorithm, CheckRequest, CounterState, RateLimitResponse};

/// Apply the request's algorithm and return the new state and response line.
pub(crate) fn apply(
    previous: Option<CounterState>,
    request: &CheckRequest,
    now_ms: i64,
) -> (CounterState, RateLimitResponse) {
    match request.algorithm {
        Algorithm::TokenBucket => token_bucket(previous, request, now_ms),
        Algorithm::LeakyBucket => leaky_bucket(previous, request, now_ms),
    }
}

/// True when `previous` still describes the limit the request asks about.
///
/// A change in algorithm, limit or duration discards existing state and
/// starts a fresh counter.
pub(crate) fn state_matches(previous: &CounterState, request: &CheckRequest) -> bool {
    previous.triple() == (request.algorithm, request.limit, request.duration_ms)
}
