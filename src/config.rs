use serde::{Deserialize, Serialize};

use crate::error::PeermitError;
use crate::tls::TlsConfig;

/// One cluster member as pushed by an external peer discovery source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Address peers use to reach this member, `host:port`.
    pub address: String,
    /// Optional locality label.
    #[serde(default)]
    pub data_center: String,
    /// True for the entry describing the local node.
    #[serde(default)]
    pub is_self: bool,
}

/// Tuning for batching, forwarding and global reconciliation.
#[derive(Clone, Debug, PartialEq)]
pub struct BehaviorConfig {
    /// How long a forwarded line may wait for more lines to the same owner.
    pub batch_wait_ms: u64,
    /// Max lines per forward batch.
    pub batch_limit: usize,
    /// Deadline for a check, including any forward hop.
    pub batch_timeout_ms: u64,
    /// Coalescing window for global deltas and broadcasts.
    pub global_sync_wait_ms: u64,
    /// Per-peer deadline for global forwards and broadcasts.
    pub global_timeout_ms: u64,
    /// Max entries per global forward or broadcast envelope.
    pub global_batch_limit: usize,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            batch_wait_ms: 2,
            batch_limit: 1_000,
            batch_timeout_ms: 500,
            global_sync_wait_ms: 100,
            global_timeout_ms: 500,
            global_batch_limit: 1_000,
        }
    }
}

/// Daemon configuration.
///
/// Plain data: parsing from files or the environment is a collaborator's
/// concern, as are peer discovery and TLS socket termination.
#[derive(Clone, Debug)]
pub struct DaemonConfig {
    /// Primary listen bind.
    pub http_address: String,
    /// Optional admin listen bind serving only health and metrics, intended
    /// for deployments whose primary listener requires client certificates.
    pub http_status_address: Option<String>,
    /// Address peers use to reach this node. Empty means `http_address`.
    pub advertise_address: String,
    /// Stable identity for logs and introspection. Never empty; a random
    /// value is generated when unset.
    pub instance_id: String,
    /// Optional locality label.
    pub data_center: String,
    /// Counter store capacity before LRU eviction.
    pub cache_size: usize,
    pub behaviors: BehaviorConfig,
    /// Virtual nodes per peer on the consistent hash ring.
    pub replicas: usize,
    /// Bound on each per-key inbox.
    pub worker_inbox_size: usize,
    /// TLS material description, handed to the embedder's listener setup.
    pub tls: Option<TlsConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            http_address: "127.0.0.1:1050".to_string(),
            http_status_address: None,
            advertise_address: String::new(),
            instance_id: uuid::Uuid::new_v4().to_string(),
            data_center: String::new(),
            cache_size: 50_000,
            behaviors: BehaviorConfig::default(),
            replicas: 512,
            worker_inbox_size: 1_024,
            tls: None,
        }
    }
}

impl DaemonConfig {
    /// The address other peers should use for this node.
    pub fn advertise(&self) -> &str {
        if self.advertise_address.is_empty() {
            &self.http_address
        } else {
            &self.advertise_address
        }
    }

    pub fn validate(&self) -> Result<(), PeermitError> {
        if self.http_address.is_empty() {
            return Err(PeermitError::InvalidArgument("http_address is required".into()));
        }
        if self.instance_id.is_empty() {
            return Err(PeermitError::InvalidArgument("instance_id must not be empty".into()));
        }
        if self.cache_size == 0 {
            return Err(PeermitError::InvalidArgument("cache_size must be positive".into()));
        }
        if self.replicas == 0 {
            return Err(PeermitError::InvalidArgument("replicas must be positive".into()));
        }
        if self.behaviors.batch_limit == 0 || self.behaviors.global_batch_limit == 0 {
            return Err(PeermitError::InvalidArgument("batch limits must be positive".into()));
        }
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        Ok(())
    }
}
