use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::common::Status;
use crate::error::PeermitError;

/// Daemon-local metrics.
///
/// Each daemon owns its own registry rather than registering into the
/// process-global one, so several daemons can share a test process without
/// colliding on metric names.
#[derive(Clone)]
pub(crate) struct Metrics {
    registry: Registry,
    pub rpc_calls: IntCounterVec,
    pub check_status: IntCounterVec,
    pub queue_full: IntCounter,
    pub forward_errors: IntCounter,
    pub broadcast_errors: IntCounter,
    pub global_deltas_dropped: IntCounter,
    pub peer_count: IntGauge,
    pub cache_entries: IntGauge,
}

impl Metrics {
    pub(crate) fn new() -> Result<Self, PeermitError> {
        let registry = Registry::new();

        let rpc_calls = IntCounterVec::new(
            Opts::new("peermit_rpc_calls_total", "RPC calls served, by path"),
            &["path"],
        )
        .map_err(internal)?;
        let check_status = IntCounterVec::new(
            Opts::new("peermit_check_status_total", "Check outcomes, by status"),
            &["status"],
        )
        .map_err(internal)?;
        let queue_full = IntCounter::new(
            "peermit_queue_full_total",
            "Checks rejected because a per-key inbox overflowed",
        )
        .map_err(internal)?;
        let forward_errors = IntCounter::new(
            "peermit_forward_errors_total",
            "Forward calls to peers that failed",
        )
        .map_err(internal)?;
        let broadcast_errors = IntCounter::new(
            "peermit_broadcast_errors_total",
            "Global update broadcasts to peers that failed",
        )
        .map_err(internal)?;
        let global_deltas_dropped = IntCounter::new(
            "peermit_global_deltas_dropped_total",
            "Global hit deltas dropped due to queue overflow",
        )
        .map_err(internal)?;
        let peer_count = IntGauge::new("peermit_peer_count", "Current cluster size")
            .map_err(internal)?;
        let cache_entries = IntGauge::new(
            "peermit_cache_entries",
            "Counters currently held in the local store",
        )
        .map_err(internal)?;

        registry.register(Box::new(rpc_calls.clone())).map_err(internal)?;
        registry.register(Box::new(check_status.clone())).map_err(internal)?;
        registry.register(Box::new(queue_full.clone())).map_err(internal)?;
        registry.register(Box::new(forward_errors.clone())).map_err(internal)?;
        registry.register(Box::new(broadcast_errors.clone())).map_err(internal)?;
        registry
            .register(Box::new(global_deltas_dropped.clone()))
            .map_err(internal)?;
        registry.register(Box::new(peer_count.clone())).map_err(internal)?;
        registry.register(Box::new(cache_entries.clone())).map_err(internal)?;

        Ok(Self {
            registry,
            rpc_calls,
            check_status,
            queue_full,
            forward_errors,
            broadcast_errors,
            global_deltas_dropped,
            peer_count,
            cache_entries,
        })
    }

    pub(crate) fn observe_status(&self, status: Status) {
        let label = match status {
            Status::UnderLimit => "under_limit",
            Status::OverLimit => "over_limit",
        };
        self.check_status.with_label_values(&[label]).inc();
    }

    /// Render the registry in the Prometheus text exposition format.
    pub(crate) fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = ?err, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

fn internal(err: prometheus::Error) -> PeermitError {
    PeermitError::Internal(format!("metrics registry: {err}"))
}
