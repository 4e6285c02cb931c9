//! Request routing.
//!
//! Each validated line takes one of three paths. Lines this node owns are
//! applied through the per-key serializer. Lines another peer owns are
//! delegated over the forward RPC, batched per owner unless the line opts
//! out. Global lines are answered from local state on any peer, with a delta
//! queued for asynchronous reconciliation with the owner.

use std::sync::Arc;

use tokio::time::Instant;

use crate::common::{Behavior, CheckRequest, ForwardRequest, RateLimitResponse};
use crate::error::PeermitError;
use crate::global::GlobalManager;
use crate::metrics::Metrics;
use crate::peers::{PeerClient, PickerHandle};
use crate::workers::KeyWorkers;

pub(crate) struct Router {
    workers: Arc<KeyWorkers>,
    picker: PickerHandle,
    global: Arc<GlobalManager>,
    metrics: Metrics,
}

impl Router {
    pub(crate) fn new(
        workers: Arc<KeyWorkers>,
        picker: PickerHandle,
        global: Arc<GlobalManager>,
        metrics: Metrics,
    ) -> Self {
        Self { workers, picker, global, metrics }
    }

    /// Route one line and produce its response.
    pub(crate) async fn dispatch(
        &self,
        request: CheckRequest,
        deadline: Instant,
    ) -> Result<RateLimitResponse, PeermitError> {
        let owner = {
            let snapshot = self.picker.read().expect("picker lock poisoned");
            snapshot.owner(request.fingerprint).cloned()
        };
        // No ring, or the ring points here: this node is authoritative.
        let owned_here = owner.as_ref().is_none_or(|peer| peer.is_self());

        if request.behavior.has(Behavior::GLOBAL) {
            return self.dispatch_global(request, owner, owned_here, deadline).await;
        }

        if owned_here {
            return self.check_local(request, deadline).await;
        }

        let owner = owner.expect("non-local line always has an owner");
        self.forward(&owner, &request, deadline).await
    }

    /// Apply a line this node must own, as the forward RPC receiver does.
    /// Ownership disagreement is an error; the receiver never re-forwards.
    pub(crate) async fn apply_owned(
        &self,
        request: CheckRequest,
        deadline: Instant,
    ) -> Result<RateLimitResponse, PeermitError> {
        {
            let snapshot = self.picker.read().expect("picker lock poisoned");
            if let Some(owner) = snapshot.owner(request.fingerprint)
                && !owner.is_self()
            {
                return Err(PeermitError::Internal(format!(
                    "not authoritative for this key; owner is {}",
                    owner.info().address
                )));
            }
        }

        let is_global = request.behavior.has(Behavior::GLOBAL);
        let (response, state) = self.workers.check(request.clone(), deadline).await?;
        if is_global {
            self.global.queue_broadcast(&request, state, &response);
        }
        Ok(response)
    }

    async fn dispatch_global(
        &self,
        request: CheckRequest,
        owner: Option<Arc<PeerClient>>,
        owned_here: bool,
        deadline: Instant,
    ) -> Result<RateLimitResponse, PeermitError> {
        if owned_here {
            // The local copy is the authoritative one; admit and schedule a
            // broadcast of the resulting state.
            let (response, state) = self.check_worker(request.clone(), deadline).await?;
            self.global.queue_broadcast(&request, state, &response);
            return Ok(response);
        }

        let owner = owner.expect("non-local line always has an owner");

        // Cold start: without a shadow copy there is nothing sensible to
        // answer from, so consult the owner directly.
        if self.workers.peek(request.fingerprint).is_none() {
            return self.forward(&owner, &request, deadline).await;
        }

        match self.check_worker(request.clone(), deadline).await {
            Ok((response, _)) => {
                if request.hits != 0 {
                    self.global.queue_delta(request.to_wire());
                }
                Ok(response)
            }
            // The local inbox is saturated; the owner still has capacity to
            // answer, so spend the RPC rather than dropping the hit.
            Err(PeermitError::QueueFull(_)) => self.forward(&owner, &request, deadline).await,
            Err(err) => Err(err),
        }
    } // end method dispatch_global

    async fn check_local(
        &self,
        request: CheckRequest,
        deadline: Instant,
    ) -> Result<RateLimitResponse, PeermitError> {
        let (response, _) = self.check_worker(request, deadline).await?;
        Ok(response)
    }

    async fn check_worker(
        &self,
        request: CheckRequest,
        deadline: Instant,
    ) -> Result<(RateLimitResponse, crate::common::CounterState), PeermitError> {
        match self.workers.check(request, deadline).await {
            Err(err @ PeermitError::QueueFull(_)) => {
                self.metrics.queue_full.inc();
                Err(err)
            }
            other => other,
        }
    }

    async fn forward(
        &self,
        owner: &Arc<PeerClient>,
        request: &CheckRequest,
        deadline: Instant,
    ) -> Result<RateLimitResponse, PeermitError> {
        let result = if request.behavior.has(Behavior::NO_BATCHING) {
            self.forward_single(owner, request, deadline).await
        } else {
            self.forward_batched(owner, request, deadline).await
        };
        if result.is_err() {
            self.metrics.forward_errors.inc();
        }
        result
    }

    async fn forward_single(
        &self,
        owner: &Arc<PeerClient>,
        request: &CheckRequest,
        deadline: Instant,
    ) -> Result<RateLimitResponse, PeermitError> {
        let envelope = ForwardRequest { requests: vec![request.to_wire()] };
        let timeout = deadline.saturating_duration_since(Instant::now());
        let response = owner.forward(&envelope, timeout).await?;
        response
            .rate_limits
            .into_iter()
            .next()
            .ok_or_else(|| PeermitError::Protocol("empty forward response".into()))
    }

    async fn forward_batched(
        &self,
        owner: &Arc<PeerClient>,
        request: &CheckRequest,
        deadline: Instant,
    ) -> Result<RateLimitResponse, PeermitError> {
        let rx = owner.forward_batched(request.to_wire())?;
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PeermitError::Unavailable(
                "forward batcher dropped the request".into(),
            )),
            Err(_) => Err(PeermitError::Deadline(
                "timed out waiting for the forward batch".into(),
            )),
        }
    }
}
