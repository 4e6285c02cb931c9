use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::common::{
    CheckRateLimitsRequest, CheckRateLimitsResponse, ForwardRequest, ForwardResponse,
    HealthResponse, RateLimitRequest, RateLimitResponse, UpdateRequest,
};
use crate::config::{BehaviorConfig, PeerInfo};
use crate::error::PeermitError;

/// How long a peer is considered down after a connection failure. Calls made
/// inside the window fail fast instead of re-dialing.
const COOLDOWN: Duration = Duration::from_secs(1);

/// A forwarded line waiting for its batch to fly.
pub(crate) struct PendingForward {
    pub line: RateLimitRequest,
    pub reply: oneshot::Sender<Result<RateLimitResponse, PeermitError>>,
}

/// Reusable transport to one remote peer.
///
/// The underlying connection is dialed lazily on first use and pooled for
/// reuse. A connect failure puts the peer in a short cool-down rather than
/// poisoning the client. Each client also owns a batcher task that coalesces
/// forwarded lines destined for this peer.
pub(crate) struct PeerClient {
    info: PeerInfo,
    base_url: String,
    http: reqwest::Client,
    cooldown_until: Mutex<Option<Instant>>,
    batch_tx: async_channel::Sender<PendingForward>,
}

impl PeerClient {
    pub(crate) fn new(info: PeerInfo, behaviors: &BehaviorConfig) -> Result<Arc<Self>, PeermitError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| PeermitError::Internal(format!("building http client: {err}")))?;

        let capacity = behaviors.batch_limit.saturating_mul(2).max(1);
        let (batch_tx, batch_rx) = async_channel::bounded(capacity);

        let client = Arc::new(Self {
            base_url: format!("http://{}", info.address),
            info,
            http,
            cooldown_until: Mutex::new(None),
            batch_tx,
        });

        Self::run_batcher(&client, batch_rx, behaviors.clone());
        Ok(client)
    }

    pub(crate) fn info(&self) -> &PeerInfo {
        &self.info
    }

    pub(crate) fn is_self(&self) -> bool {
        self.info.is_self
    }

    /// Delegate a batch of lines to this peer, which must own all of them.
    pub(crate) async fn forward(
        &self,
        request: &ForwardRequest,
        timeout: Duration,
    ) -> Result<ForwardResponse, PeermitError> {
        self.check_cooldown()?;
        let response = self
            .http
            .post(format!("{}/v1/peer.forward", self.base_url))
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|err| self.classify(err))?;
        decode(response).await
    }

    /// Best-effort push of global counter state. The caller treats failures
    /// as staleness, never as a client-visible error.
    pub(crate) async fn update(
        &self,
        request: &UpdateRequest,
        timeout: Duration,
    ) -> Result<(), PeermitError> {
        self.check_cooldown()?;
        let response = self
            .http
            .post(format!("{}/v1/peer.update", self.base_url))
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|err| self.classify(err))?;
        check_status(&response)?;
        Ok(())
    }

    /// Queue one line for the next batch to this peer. The returned channel
    /// resolves when the batch it joined has been answered.
    pub(crate) fn forward_batched(
        &self,
        line: RateLimitRequest,
    ) -> Result<oneshot::Receiver<Result<RateLimitResponse, PeermitError>>, PeermitError> {
        let (reply, rx) = oneshot::channel();
        self.batch_tx
            .try_send(PendingForward { line, reply })
            .map_err(|err| match err {
                async_channel::TrySendError::Full(_) => PeermitError::QueueFull(format!(
                    "forward batch queue for {} is full",
                    self.info.address
                )),
                async_channel::TrySendError::Closed(_) => PeermitError::Unavailable(format!(
                    "forward batcher for {} has shut down",
                    self.info.address
                )),
            })?;
        Ok(rx)
    }

    /// Collect queued lines into `ForwardRequest` batches and answer every
    /// waiter. One batch is closed by whichever comes first: the wait window
    /// elapsing or the batch cap filling up.
    fn run_batcher(
        this: &Arc<Self>,
        rx: async_channel::Receiver<PendingForward>,
        behaviors: BehaviorConfig,
    ) {
        let weak: Weak<Self> = Arc::downgrade(this);

        tokio::spawn(async move {
            let batch_wait = Duration::from_millis(behaviors.batch_wait_ms);
            let batch_timeout = Duration::from_millis(behaviors.batch_timeout_ms);

            while let Ok(first) = rx.recv().await {
                let mut pending = vec![first];
                let window_end = tokio::time::Instant::now() + batch_wait;

                while pending.len() < behaviors.batch_limit {
                    match tokio::time::timeout_at(window_end, rx.recv()).await {
                        Ok(Ok(item)) => pending.push(item),
                        Ok(Err(_)) | Err(_) => break,
                    }
                }

                let Some(client) = weak.upgrade() else {
                    fail_all(pending, &PeermitError::Unavailable("peer removed".into()));
                    break;
                };

                let request = ForwardRequest {
                    requests: pending.iter().map(|item| item.line.clone()).collect(),
                };

                match client.forward(&request, batch_timeout).await {
                    Ok(response) if response.rate_limits.len() == pending.len() => {
                        for (item, line) in pending.into_iter().zip(response.rate_limits) {
                            let _ = item.reply.send(Ok(line));
                        }
                    }
                    Ok(_) => {
                        fail_all(
                            pending,
                            &PeermitError::Protocol("forward response length mismatch".into()),
                        );
                    }
                    Err(err) => fail_all(pending, &err),
                }
            }
        });
    } // end method run_batcher

    fn check_cooldown(&self) -> Result<(), PeermitError> {
        let until = self.cooldown_until.lock().expect("cooldown lock poisoned");
        if let Some(until) = *until
            && Instant::now() < until
        {
            return Err(PeermitError::Unavailable(format!(
                "peer {} is cooling down after a connection failure",
                self.info.address
            )));
        }
        Ok(())
    }

    fn classify(&self, err: reqwest::Error) -> PeermitError {
        if err.is_timeout() {
            return PeermitError::Deadline(format!("peer {}: {err}", self.info.address));
        }
        if err.is_connect() {
            let mut until = self.cooldown_until.lock().expect("cooldown lock poisoned");
            *until = Some(Instant::now() + COOLDOWN);
        }
        PeermitError::Unavailable(format!("peer {}: {err}", self.info.address))
    }
}

fn fail_all(pending: Vec<PendingForward>, err: &PeermitError) {
    for item in pending {
        let _ = item.reply.send(Err(err.clone()));
    }
}

fn check_status(response: &reqwest::Response) -> Result<(), PeermitError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(PeermitError::Auth(format!("peer answered {status}")));
    }
    if !status.is_success() {
        return Err(PeermitError::Protocol(format!("peer answered {status}")));
    }
    Ok(())
}

async fn decode(response: reqwest::Response) -> Result<ForwardResponse, PeermitError> {
    check_status(&response)?;
    response
        .json::<ForwardResponse>()
        .await
        .map_err(|err| PeermitError::Protocol(format!("decoding forward response: {err}")))
}

/// Client for talking to a peermit daemon.
///
/// The same plumbing the daemons use among themselves, exposed for embedders
/// and tests.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    /// Build a client for the daemon listening at `address` (`host:port`).
    pub fn new(address: &str) -> Result<Self, PeermitError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| PeermitError::Internal(format!("building http client: {err}")))?;
        Ok(Self { http, base_url: format!("http://{address}") })
    }

    pub async fn check_rate_limits(
        &self,
        request: &CheckRateLimitsRequest,
    ) -> Result<CheckRateLimitsResponse, PeermitError> {
        let response = self
            .http
            .post(format!("{}/v1/check-rate-limits", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|err| PeermitError::Unavailable(err.to_string()))?;
        check_status(&response)?;
        response
            .json::<CheckRateLimitsResponse>()
            .await
            .map_err(|err| PeermitError::Protocol(format!("decoding response: {err}")))
    }

    pub async fn health(&self) -> Result<HealthResponse, PeermitError> {
        let response = self
            .http
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await
            .map_err(|err| PeermitError::Unavailable(err.to_string()))?;
        check_status(&response)?;
        response
            .json::<HealthResponse>()
            .await
            .map_err(|err| PeermitError::Protocol(format!("decoding health response: {err}")))
    }

    /// Fetch the Prometheus text exposition.
    pub async fn metrics(&self) -> Result<String, PeermitError> {
        let response = self
            .http
            .get(format!("{}/metrics", self.base_url))
            .send()
            .await
            .map_err(|err| PeermitError::Unavailable(err.to_string()))?;
        check_status(&response)?;
        response
            .text()
            .await
            .map_err(|err| PeermitError::Protocol(format!("reading metrics body: {err}")))
    }
}
