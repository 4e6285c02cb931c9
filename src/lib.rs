//! Peermit is a distributed rate limiting service: a cluster of peer daemons
//! that collectively enforce counting limits on named keys.
//!
//! Each counter has exactly one authoritative owner, chosen by a consistent
//! hash over the cluster. A daemon answers checks for keys it owns directly,
//! delegates the rest to their owners in coalesced batches, and can serve
//! `GLOBAL` keys from a local shadow copy that is reconciled with the owner
//! asynchronously, trading exactness for the cost of a per-hit RPC.
//!
//! This crate is still in development (pre-release); APIs and behavior may
//! change.
//!
//! # Quick start
//!
//! ```no_run
//! use peermit::{
//!     CheckRateLimitsRequest, Daemon, DaemonConfig, RateLimitRequest,
//! };
//!
//! # async fn example() -> Result<(), peermit::PeermitError> {
//! let daemon = Daemon::spawn(DaemonConfig {
//!     http_address: "127.0.0.1:1050".to_string(),
//!     ..DaemonConfig::default()
//! })
//! .await?;
//!
//! let client = daemon.client()?;
//! let response = client
//!     .check_rate_limits(&CheckRateLimitsRequest {
//!         requests: vec![RateLimitRequest {
//!             name: "requests_per_sec".to_string(),
//!             unique_key: "account:995".to_string(),
//!             hits: 1,
//!             limit: 100,
//!             duration: 30_000,
//!             ..Default::default()
//!         }],
//!     })
//!     .await?;
//!
//! assert!(response.responses[0].error.is_empty());
//! # Ok(())
//! # }
//! ```

mod algorithms;
mod global;
mod metrics;
mod router;
mod service;
mod store;
mod workers;

pub mod clock;
pub mod tls;

mod common;
pub use common::{
    Algorithm, Behavior, CheckRateLimitsRequest, CheckRateLimitsResponse, CounterState,
    Fingerprint, ForwardRequest, ForwardResponse, HealthResponse, RateLimitRequest,
    RateLimitResponse, Status, UpdateRateLimit, UpdateRequest, fingerprint,
};

mod config;
pub use config::{BehaviorConfig, DaemonConfig, PeerInfo};

mod daemon;
pub use daemon::{Daemon, RPC_CHECK_RATE_LIMITS, RPC_PEER_FORWARD, RPC_PEER_UPDATE};

mod error;
pub use error::PeermitError;

mod peers;
pub use peers::Client;

#[cfg(test)]
mod tests;
