//! The daemon: HTTP surface, membership management and background loops.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::clock::{Clock, SystemClock};
use crate::common::{
    CheckRateLimitsRequest, ForwardRequest, HealthResponse, UpdateRequest,
};
use crate::config::{DaemonConfig, PeerInfo};
use crate::error::PeermitError;
use crate::global::GlobalManager;
use crate::metrics::Metrics;
use crate::peers::{Client, PeerClient, PeerPicker, PickerHandle};
use crate::router::Router;
use crate::service::RateLimitService;
use crate::store::CounterStore;
use crate::workers::KeyWorkers;

/// Client-facing batch entrypoint.
pub const RPC_CHECK_RATE_LIMITS: &str = "/v1/check-rate-limits";
/// Peer-to-peer authoritative delegation.
pub const RPC_PEER_FORWARD: &str = "/v1/peer.forward";
/// Owner-to-peers global state push.
pub const RPC_PEER_UPDATE: &str = "/v1/peer.update";

/// How often expired counters are reclaimed.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct DaemonState {
    config: DaemonConfig,
    service: RateLimitService,
    picker: PickerHandle,
    metrics: Metrics,
}

/// A peermit cluster member.
///
/// Spawning binds the listeners and starts the background loops; the daemon
/// then serves checks on its own. Peer discovery is a collaborator that
/// pushes fresh membership through [`set_peers`](Daemon::set_peers).
pub struct Daemon {
    state: Arc<DaemonState>,
    workers: Arc<KeyWorkers>,
    listen_addr: SocketAddr,
    status_addr: Option<SocketAddr>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Daemon {
    /// Spawn a daemon with the system clock.
    pub async fn spawn(config: DaemonConfig) -> Result<Daemon, PeermitError> {
        Self::spawn_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Spawn with an explicit clock, for tests that control time.
    pub async fn spawn_with_clock(
        config: DaemonConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Daemon, PeermitError> {
        config.validate()?;
        if config.tls.is_some() {
            // Certificate loading and socket wrapping are the embedder's
            // collaborators; the daemon only validates and carries the policy.
            tracing::info!("tls configured; listener wrapping is delegated to the embedder");
        }

        let metrics = Metrics::new()?;
        let store = Arc::new(Mutex::new(CounterStore::new(config.cache_size)));
        let workers = Arc::new(KeyWorkers::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.worker_inbox_size,
        ));
        let picker: PickerHandle = Arc::new(RwLock::new(Arc::new(PeerPicker::empty())));
        let (global, deltas_rx) =
            GlobalManager::new(config.behaviors.clone(), metrics.clone(), Arc::clone(&clock));
        let router = Router::new(
            Arc::clone(&workers),
            Arc::clone(&picker),
            Arc::clone(&global),
            metrics.clone(),
        );
        let service = RateLimitService::new(
            router,
            Arc::clone(&workers),
            Arc::clone(&clock),
            config.behaviors.clone(),
            metrics.clone(),
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let listener = TcpListener::bind(&config.http_address)
            .await
            .map_err(|err| {
                PeermitError::Unavailable(format!("binding {}: {err}", config.http_address))
            })?;
        let listen_addr = listener
            .local_addr()
            .map_err(|err| PeermitError::Internal(format!("reading listen address: {err}")))?;

        let state = Arc::new(DaemonState {
            config,
            service,
            picker: Arc::clone(&picker),
            metrics: metrics.clone(),
        });

        tasks.push(tokio::spawn(serve(
            listener,
            primary_app(Arc::clone(&state)),
            shutdown_rx.clone(),
        )));

        let status_addr = match &state.config.http_status_address {
            Some(address) => {
                let status_listener = TcpListener::bind(address).await.map_err(|err| {
                    PeermitError::Unavailable(format!("binding {address}: {err}"))
                })?;
                let status_addr = status_listener.local_addr().map_err(|err| {
                    PeermitError::Internal(format!("reading status listen address: {err}"))
                })?;
                tasks.push(tokio::spawn(serve(
                    status_listener,
                    status_app(Arc::clone(&state)),
                    shutdown_rx.clone(),
                )));
                Some(status_addr)
            }
            None => None,
        };

        tasks.push(global.run(
            deltas_rx,
            Arc::clone(&workers),
            Arc::clone(&picker),
            shutdown_rx.clone(),
        ));
        tasks.push(run_sweeper(store, clock, metrics, shutdown_rx));

        tracing::info!(
            instance_id = %state.config.instance_id,
            addr = %listen_addr,
            "peermit daemon started"
        );

        Ok(Daemon { state, workers, listen_addr, status_addr, shutdown, tasks })
    } // end method spawn_with_clock

    /// Address the primary listener is bound to. With a `:0` bind this is the
    /// real port.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn status_addr(&self) -> Option<SocketAddr> {
        self.status_addr
    }

    pub fn instance_id(&self) -> &str {
        &self.state.config.instance_id
    }

    /// How this node should appear in a peer list.
    pub fn peer_info(&self) -> PeerInfo {
        let address = if self.state.config.advertise_address.is_empty() {
            self.listen_addr.to_string()
        } else {
            self.state.config.advertise_address.clone()
        };
        PeerInfo {
            address,
            data_center: self.state.config.data_center.clone(),
            is_self: true,
        }
    }

    /// A client pointed at this daemon.
    pub fn client(&self) -> Result<Client, PeermitError> {
        Client::new(&self.listen_addr.to_string())
    }

    /// Replace cluster membership.
    ///
    /// Builds a new picker and client pool and publishes them atomically.
    /// Clients for unchanged peers are reused; removed peers drain as their
    /// in-flight calls finish and are then closed by drop.
    pub fn set_peers(&self, peers: Vec<PeerInfo>) -> Result<(), PeermitError> {
        let self_address = self.peer_info().address;
        let previous = self.state.picker.read().expect("picker lock poisoned").clone();

        let mut clients = Vec::with_capacity(peers.len());
        for mut info in peers {
            if info.address.is_empty() {
                return Err(PeermitError::InvalidArgument("peer address is required".into()));
            }
            info.is_self = info.is_self || info.address == self_address;

            let reused = previous
                .peers()
                .iter()
                .find(|client| client.info() == &info)
                .cloned();
            clients.push(match reused {
                Some(client) => client,
                None => PeerClient::new(info, &self.state.config.behaviors)?,
            });
        }

        let next = Arc::new(PeerPicker::new(clients, self.state.config.replicas));
        if next.self_peer().is_none() {
            tracing::warn!(
                advertise = %self_address,
                "local node is not in the peer list; every key will be forwarded"
            );
        }
        let removed = previous
            .peers()
            .iter()
            .filter(|old| {
                !next.peers().iter().any(|new| new.info().address == old.info().address)
            })
            .count();

        *self.state.picker.write().expect("picker lock poisoned") = Arc::clone(&next);
        self.state.metrics.peer_count.set(next.peer_count() as i64);
        tracing::info!(
            peers = next.peer_count(),
            removed,
            "cluster membership updated"
        );
        Ok(())
    } // end method set_peers

    pub fn peer_count(&self) -> usize {
        self.state.picker.read().expect("picker lock poisoned").peer_count()
    }

    /// Stop serving and abandon pending work.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        self.workers.shutdown();
        for task in self.tasks.drain(..) {
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                tracing::warn!("background task did not stop within the shutdown grace period");
            }
        }
        tracing::info!(instance_id = %self.state.config.instance_id, "peermit daemon stopped");
    }
}

fn primary_app(state: Arc<DaemonState>) -> AxumRouter {
    AxumRouter::new()
        .route(RPC_CHECK_RATE_LIMITS, post(check_rate_limits_handler))
        .route(RPC_PEER_FORWARD, post(peer_forward_handler))
        .route(RPC_PEER_UPDATE, post(peer_update_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/peers", get(peers_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health and metrics only: the listener deployments point probes at when the
/// primary listener requires client certificates.
fn status_app(state: Arc<DaemonState>) -> AxumRouter {
    AxumRouter::new()
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn serve(listener: TcpListener, app: AxumRouter, mut shutdown: watch::Receiver<bool>) {
    let graceful = async move {
        let _ = shutdown.changed().await;
    };
    if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(graceful).await {
        tracing::error!(error = %err, "http server exited with error");
    }
}

fn run_sweeper(
    store: Arc<Mutex<CounterStore>>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let now_ms = clock.now_millis();
                    let (swept, live) = {
                        let mut store = store.lock().expect("counter store lock poisoned");
                        (store.sweep(now_ms), store.len())
                    };
                    metrics.cache_entries.set(live as i64);
                    if swept > 0 {
                        tracing::debug!(swept, live, "swept expired counters");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

async fn check_rate_limits_handler(
    State(state): State<Arc<DaemonState>>,
    Json(request): Json<CheckRateLimitsRequest>,
) -> Response {
    state
        .metrics
        .rpc_calls
        .with_label_values(&[RPC_CHECK_RATE_LIMITS])
        .inc();
    match state.service.check_rate_limits(request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => envelope_error(err),
    }
}

async fn peer_forward_handler(
    State(state): State<Arc<DaemonState>>,
    Json(request): Json<ForwardRequest>,
) -> Response {
    state
        .metrics
        .rpc_calls
        .with_label_values(&[RPC_PEER_FORWARD])
        .inc();
    match state.service.forward(request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => envelope_error(err),
    }
}

async fn peer_update_handler(
    State(state): State<Arc<DaemonState>>,
    Json(request): Json<UpdateRequest>,
) -> Response {
    state
        .metrics
        .rpc_calls
        .with_label_values(&[RPC_PEER_UPDATE])
        .inc();
    match state.service.update(request).await {
        Ok(()) => Json(serde_json::json!({})).into_response(),
        Err(err) => envelope_error(err),
    }
}

/// Introspection: the membership this node currently routes by.
async fn peers_handler(State(state): State<Arc<DaemonState>>) -> Json<Vec<PeerInfo>> {
    let snapshot = state.picker.read().expect("picker lock poisoned").clone();
    Json(snapshot.peers().iter().map(|peer| peer.info().clone()).collect())
}

async fn healthz_handler(State(state): State<Arc<DaemonState>>) -> Json<HealthResponse> {
    let peer_count = state.picker.read().expect("picker lock poisoned").peer_count();
    Json(HealthResponse { status: "healthy".to_string(), peer_count })
}

async fn metrics_handler(State(state): State<Arc<DaemonState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

fn envelope_error(err: PeermitError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}
