//! Global behavior: asynchronous reconciliation for keys whose hits may be
//! admitted on any peer.
//!
//! Two flows meet here. Deltas are hits a non-owner admitted locally; they
//! are aggregated and forwarded to each key's owner on a sync tick. Updates
//! are authoritative states an owner pushes to every peer so their shadow
//! copies converge. Both directions are best effort by design: a failed
//! broadcast means staleness, never a failed client request.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use rustc_hash::FxHashMap;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::common::{
    Algorithm, CheckRequest, CounterState, Fingerprint, ForwardRequest, RateLimitRequest,
    RateLimitResponse, UpdateRateLimit, UpdateRequest, fingerprint,
};
use crate::config::BehaviorConfig;
use crate::error::PeermitError;
use crate::metrics::Metrics;
use crate::peers::{PeerClient, PickerHandle};
use crate::service::validate_line;
use crate::workers::KeyWorkers;

/// One locally admitted hit on a global key, bound for the key's owner.
#[derive(Clone, Debug)]
pub(crate) struct GlobalDelta {
    pub line: RateLimitRequest,
}

/// Decide whether broadcast state may replace what this node holds.
///
/// Acceptance is monotonic per owner: a strictly older `created_at` is
/// discarded. On equal timestamps the `(algorithm, limit, duration)` triple
/// must match, so an in-flight update carrying a superseded algorithm for the
/// same window cannot resurrect discarded state.
pub(crate) fn accept_update(held: Option<&CounterState>, update: &CounterState) -> bool {
    match held {
        None => true,
        Some(held) => {
            if update.created_at_ms != held.created_at_ms {
                update.created_at_ms > held.created_at_ms
            } else {
                held.triple() == update.triple()
            }
        }
    }
}

/// Rebuild counter state from an update envelope.
pub(crate) fn update_to_state(update: &UpdateRateLimit) -> Result<CounterState, PeermitError> {
    let algorithm = Algorithm::from_wire(update.algorithm).ok_or_else(|| {
        PeermitError::InvalidArgument(format!("unknown algorithm {}", update.algorithm))
    })?;
    if update.duration <= 0 {
        return Err(PeermitError::InvalidArgument("duration must be positive".into()));
    }
    Ok(CounterState {
        algorithm,
        limit: update.state.limit,
        duration_ms: update.duration,
        created_at_ms: update.created_at,
        remaining: update.state.remaining,
        status: update.state.status,
    })
}

pub(crate) struct GlobalManager {
    deltas_tx: broadcast::Sender<GlobalDelta>,
    pending_updates: Mutex<FxHashMap<Fingerprint, UpdateRateLimit>>,
    behaviors: BehaviorConfig,
    metrics: Metrics,
    clock: Arc<dyn Clock>,
}

impl GlobalManager {
    pub(crate) fn new(
        behaviors: BehaviorConfig,
        metrics: Metrics,
        clock: Arc<dyn Clock>,
    ) -> (Arc<Self>, broadcast::Receiver<GlobalDelta>) {
        // The broadcast channel keeps the newest entries when the consumer
        // lags; the receiver reports how many were skipped, which is exactly
        // the drop-oldest overflow policy with a counter.
        let (deltas_tx, deltas_rx) =
            broadcast::channel(behaviors.global_batch_limit.saturating_mul(4).max(16));
        let manager = Arc::new(Self {
            deltas_tx,
            pending_updates: Mutex::new(FxHashMap::default()),
            behaviors,
            metrics,
            clock,
        });
        (manager, deltas_rx)
    }

    /// Record a hit admitted against local shadow state.
    pub(crate) fn queue_delta(&self, line: RateLimitRequest) {
        if self.deltas_tx.send(GlobalDelta { line }).is_err() {
            // No live sync loop; the delta is lost, which only means the
            // owner learns about the hit from a later one.
            self.metrics.global_deltas_dropped.inc();
        }
    }

    /// Schedule a broadcast of authoritative state, coalescing by key so only
    /// the latest state per fingerprint flies each tick.
    pub(crate) fn queue_broadcast(
        &self,
        request: &CheckRequest,
        state: CounterState,
        response: &RateLimitResponse,
    ) {
        let update = UpdateRateLimit {
            name: request.name.clone(),
            unique_key: request.unique_key.clone(),
            state: RateLimitResponse {
                status: state.status,
                limit: state.limit,
                remaining: state.remaining,
                reset_time: response.reset_time,
                error: String::new(),
            },
            algorithm: state.algorithm.as_wire(),
            duration: state.duration_ms,
            created_at: state.created_at_ms,
        };
        self.pending_updates
            .lock()
            .expect("pending updates lock poisoned")
            .insert(request.fingerprint, update);
    }

    /// Number of coalesced updates waiting for the next broadcast tick.
    #[cfg(test)]
    pub(crate) fn pending_broadcasts(&self) -> usize {
        self.pending_updates
            .lock()
            .expect("pending updates lock poisoned")
            .len()
    }

    /// Drive the sync loop until shutdown.
    pub(crate) fn run(
        self: &Arc<Self>,
        mut deltas_rx: broadcast::Receiver<GlobalDelta>,
        workers: Arc<KeyWorkers>,
        picker: PickerHandle,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(
                manager.behaviors.global_sync_wait_ms.max(1),
            ));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        manager.sync_deltas(&mut deltas_rx, &workers, &picker).await;
                        manager.broadcast_updates(&picker).await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    } // end method run

    /// Drain queued deltas, aggregate them by key and hand each key's total
    /// to its owner: applied locally when this node owns it, forwarded
    /// otherwise.
    async fn sync_deltas(
        &self,
        deltas_rx: &mut broadcast::Receiver<GlobalDelta>,
        workers: &Arc<KeyWorkers>,
        picker: &PickerHandle,
    ) {
        let mut aggregated: FxHashMap<Fingerprint, RateLimitRequest> = FxHashMap::default();
        loop {
            match deltas_rx.try_recv() {
                Ok(delta) => {
                    let key = fingerprint(&delta.line.name, &delta.line.unique_key);
                    // Sum hits, keep the newest request parameters.
                    let carried = aggregated.get(&key).map_or(0, |line| line.hits);
                    let mut line = delta.line;
                    line.hits += carried;
                    aggregated.insert(key, line);
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.metrics.global_deltas_dropped.inc_by(skipped);
                }
                Err(_) => break,
            }
        }
        if aggregated.is_empty() {
            return;
        }

        let snapshot = picker.read().expect("picker lock poisoned").clone();
        let timeout = Duration::from_millis(self.behaviors.global_timeout_ms);
        let mut by_owner: FxHashMap<String, (Arc<PeerClient>, Vec<RateLimitRequest>)> =
            FxHashMap::default();

        for (key, line) in aggregated {
            match snapshot.owner(key) {
                Some(owner) if !owner.is_self() => {
                    by_owner
                        .entry(owner.info().address.clone())
                        .or_insert_with(|| (Arc::clone(owner), Vec::new()))
                        .1
                        .push(line);
                }
                _ => self.apply_owned_delta(line, workers, timeout).await,
            }
        }

        let forwards = by_owner.into_values().map(|(owner, lines)| {
            async move {
                for chunk in lines.chunks(self.behaviors.global_batch_limit) {
                    let request = ForwardRequest { requests: chunk.to_vec() };
                    if let Err(err) = owner.forward(&request, timeout).await {
                        self.metrics.forward_errors.inc();
                        tracing::warn!(
                            peer = %owner.info().address,
                            error = %err,
                            "global delta forward failed"
                        );
                    }
                }
            }
        });
        join_all(forwards).await;
    } // end method sync_deltas

    async fn apply_owned_delta(
        &self,
        line: RateLimitRequest,
        workers: &Arc<KeyWorkers>,
        timeout: Duration,
    ) {
        let request = match validate_line(&line, self.clock.now_millis()) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed global delta");
                return;
            }
        };
        let deadline = tokio::time::Instant::now() + timeout;
        match workers.check(request.clone(), deadline).await {
            Ok((response, state)) => self.queue_broadcast(&request, state, &response),
            Err(err) => {
                tracing::warn!(error = %err, "applying global delta locally failed");
            }
        }
    }

    /// Fan pending authoritative states out to every other peer.
    async fn broadcast_updates(&self, picker: &PickerHandle) {
        let updates: Vec<UpdateRateLimit> = {
            let mut pending = self
                .pending_updates
                .lock()
                .expect("pending updates lock poisoned");
            if pending.is_empty() {
                return;
            }
            pending.drain().map(|(_, update)| update).collect()
        };

        let snapshot = picker.read().expect("picker lock poisoned").clone();
        let others: Vec<Arc<PeerClient>> = snapshot
            .peers()
            .iter()
            .filter(|peer| !peer.is_self())
            .cloned()
            .collect();
        if others.is_empty() {
            return;
        }

        let timeout = Duration::from_millis(self.behaviors.global_timeout_ms);
        for chunk in updates.chunks(self.behaviors.global_batch_limit) {
            let request = UpdateRequest { globals: chunk.to_vec() };
            let sends = others.iter().map(|peer| {
                let request = &request;
                async move {
                    if let Err(err) = peer.update(request, timeout).await {
                        self.metrics.broadcast_errors.inc();
                        tracing::warn!(
                            peer = %peer.info().address,
                            error = %err,
                            "global update broadcast failed"
                        );
                    }
                }
            });
            join_all(sends).await;
        }
    } // end method broadcast_updates
}
