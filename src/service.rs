//! Request entrypoint: validation, fingerprinting and order-preserving
//! dispatch of check batches.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;

use crate::algorithms::next_boundary_ms;
use crate::clock::Clock;
use crate::common::{
    Algorithm, Behavior, CheckRateLimitsRequest, CheckRateLimitsResponse, CheckRequest,
    ForwardRequest, ForwardResponse, RateLimitRequest, RateLimitResponse, UpdateRequest,
    fingerprint,
};
use crate::config::BehaviorConfig;
use crate::error::PeermitError;
use crate::global::update_to_state;
use crate::metrics::Metrics;
use crate::router::Router;
use crate::workers::KeyWorkers;

/// Validate one wire line and resolve it into a [`CheckRequest`].
///
/// Gregorian durations are resolved against the request's creation time, so
/// the window ends at the calendar boundary regardless of which peer applies
/// the line later.
pub(crate) fn validate_line(
    line: &RateLimitRequest,
    now_ms: i64,
) -> Result<CheckRequest, PeermitError> {
    if line.name.is_empty() {
        return Err(PeermitError::InvalidArgument("name is required".into()));
    }
    if line.unique_key.is_empty() {
        return Err(PeermitError::InvalidArgument("unique_key is required".into()));
    }
    if line.limit <= 0 {
        return Err(PeermitError::InvalidArgument("limit must be positive".into()));
    }
    if line.hits < 0 {
        return Err(PeermitError::InvalidArgument("hits must not be negative".into()));
    }

    let algorithm = Algorithm::from_wire(line.algorithm).ok_or_else(|| {
        PeermitError::InvalidArgument(format!("unknown algorithm {}", line.algorithm))
    })?;
    let behavior = Behavior::from_wire(line.behavior).ok_or_else(|| {
        PeermitError::InvalidArgument(format!("unknown behavior flags {:#x}", line.behavior))
    })?;
    if behavior.has(Behavior::MULTI_REGION) {
        return Err(PeermitError::InvalidArgument(
            "multi-region behavior is not implemented".into(),
        ));
    }

    let created_at_ms = match line.created_at {
        Some(created_at) if created_at < 0 => {
            return Err(PeermitError::InvalidArgument(
                "created_at must not be negative".into(),
            ));
        }
        Some(created_at) => created_at,
        None => now_ms,
    };

    let duration_ms = if behavior.has(Behavior::DURATION_IS_GREGORIAN) {
        next_boundary_ms(line.duration, created_at_ms)? - created_at_ms
    } else if line.duration <= 0 {
        return Err(PeermitError::InvalidArgument("duration must be positive".into()));
    } else {
        line.duration
    };

    let burst = match algorithm {
        // Leaky buckets drain into their own capacity; burst does not apply.
        Algorithm::LeakyBucket => line.limit,
        Algorithm::TokenBucket => match line.burst {
            Some(burst) if burst < 0 => {
                return Err(PeermitError::InvalidArgument(
                    "burst must not be negative".into(),
                ));
            }
            Some(burst) => burst,
            None => line.limit,
        },
    };

    Ok(CheckRequest {
        fingerprint: fingerprint(&line.name, &line.unique_key),
        name: line.name.clone(),
        unique_key: line.unique_key.clone(),
        hits: line.hits,
        limit: line.limit,
        burst,
        duration_ms,
        algorithm,
        behavior,
        created_at_ms,
    })
} // end function validate_line

fn error_line(err: &PeermitError) -> RateLimitResponse {
    RateLimitResponse { error: err.to_string(), ..RateLimitResponse::default() }
}

/// The batch entrypoint and the receiving side of the two peer RPCs.
pub(crate) struct RateLimitService {
    router: Router,
    workers: Arc<KeyWorkers>,
    clock: Arc<dyn Clock>,
    behaviors: BehaviorConfig,
    metrics: Metrics,
}

impl RateLimitService {
    pub(crate) fn new(
        router: Router,
        workers: Arc<KeyWorkers>,
        clock: Arc<dyn Clock>,
        behaviors: BehaviorConfig,
        metrics: Metrics,
    ) -> Self {
        Self { router, workers, clock, behaviors, metrics }
    }

    /// Client-facing batch check.
    ///
    /// Lines are dispatched independently and reassembled in input order.
    /// A line failure populates that line's `error` field; only an invalid
    /// envelope fails the call as a whole.
    pub(crate) async fn check_rate_limits(
        &self,
        request: CheckRateLimitsRequest,
    ) -> Result<CheckRateLimitsResponse, PeermitError> {
        if request.requests.is_empty() {
            return Err(PeermitError::InvalidArgument(
                "requests must contain at least one entry".into(),
            ));
        }

        let now_ms = self.clock.now_millis();
        let deadline = Instant::now() + Duration::from_millis(self.behaviors.batch_timeout_ms);

        let lines = request.requests.into_iter().map(|line| async move {
            match validate_line(&line, now_ms) {
                Err(err) => error_line(&err),
                Ok(check) => match self.router.dispatch(check, deadline).await {
                    Ok(response) => {
                        self.metrics.observe_status(response.status);
                        response
                    }
                    Err(err) => error_line(&err),
                },
            }
        });

        Ok(CheckRateLimitsResponse { responses: join_all(lines).await })
    } // end method check_rate_limits

    /// Peer-to-peer delegation receiver. Every line must belong to this node;
    /// disagreement is answered per line and never re-forwarded.
    pub(crate) async fn forward(
        &self,
        request: ForwardRequest,
    ) -> Result<ForwardResponse, PeermitError> {
        if request.requests.is_empty() {
            return Err(PeermitError::InvalidArgument(
                "forward must contain at least one entry".into(),
            ));
        }

        let now_ms = self.clock.now_millis();
        let deadline = Instant::now() + Duration::from_millis(self.behaviors.batch_timeout_ms);

        let lines = request.requests.into_iter().map(|line| async move {
            match validate_line(&line, now_ms) {
                Err(err) => error_line(&err),
                Ok(check) => match self.router.apply_owned(check, deadline).await {
                    Ok(response) => {
                        self.metrics.observe_status(response.status);
                        response
                    }
                    Err(err) => error_line(&err),
                },
            }
        });

        Ok(ForwardResponse { rate_limits: join_all(lines).await })
    }

    /// Broadcast receiver: fold authoritative global states into the local
    /// shadow copies. Individually bad entries are logged and skipped; the
    /// push as a whole stays best effort.
    pub(crate) async fn update(&self, request: UpdateRequest) -> Result<(), PeermitError> {
        if request.globals.is_empty() {
            return Err(PeermitError::InvalidArgument(
                "update must contain at least one entry".into(),
            ));
        }

        for update in &request.globals {
            let state = match update_to_state(update) {
                Ok(state) => state,
                Err(err) => {
                    tracing::warn!(
                        name = %update.name,
                        unique_key = %update.unique_key,
                        error = %err,
                        "skipping malformed global update"
                    );
                    continue;
                }
            };
            let key = fingerprint(&update.name, &update.unique_key);
            if let Err(err) = self.workers.apply_update(key, state).await {
                tracing::warn!(error = %err, "applying global update failed");
            }
        }
        Ok(())
    }
}
