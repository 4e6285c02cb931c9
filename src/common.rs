//! Wire messages and domain types shared across the crate.
//!
//! Requests carry `algorithm` and `behavior` as raw integers so that values
//! this build does not recognize surface as per-line `INVALID_ARGUMENT`
//! responses instead of failing the whole envelope at deserialization.

use std::hash::Hasher;

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

/// Stable hash of `(name, unique_key)` used as the sole counter key.
pub type Fingerprint = u64;

/// Compute the fingerprint for a rate limit identity.
///
/// The separator byte keeps `("ab", "c")` and `("a", "bc")` distinct. Every
/// peer must agree on this value, so the hasher is a fixed, keyless one.
pub fn fingerprint(name: &str, unique_key: &str) -> Fingerprint {
    let mut hasher = FxHasher::default();
    hasher.write(name.as_bytes());
    hasher.write_u8(0);
    hasher.write(unique_key.as_bytes());
    hasher.finish()
}

/// Counting algorithm for a rate limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    TokenBucket,
    LeakyBucket,
}

impl Algorithm {
    /// Decode the wire representation. Returns `None` for values this build
    /// does not know, which callers turn into a per-line error.
    pub fn from_wire(raw: i32) -> Option<Algorithm> {
        match raw {
            0 => Some(Algorithm::TokenBucket),
            1 => Some(Algorithm::LeakyBucket),
            _ => None,
        }
    }

    pub fn as_wire(self) -> i32 {
        match self {
            Algorithm::TokenBucket => 0,
            Algorithm::LeakyBucket => 1,
        }
    }
}

/// Per-request behavior bitset.
///
/// `BATCHING` is the absence of `NO_BATCHING`; the remaining flags are single
/// bits that may be combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Behavior(u32);

impl Behavior {
    /// Default behavior: forwarded lines may be coalesced into batches.
    pub const BATCHING: Behavior = Behavior(0);
    /// Forward this line immediately instead of waiting for a batch window.
    pub const NO_BATCHING: Behavior = Behavior(1);
    /// Answer from local state on any peer and reconcile asynchronously.
    pub const GLOBAL: Behavior = Behavior(2);
    /// Interpret `duration` as a calendar interval code rather than
    /// milliseconds; the counter resets at the next calendar boundary.
    pub const DURATION_IS_GREGORIAN: Behavior = Behavior(4);
    /// Refill the counter to its burst value without consuming hits.
    pub const RESET_REMAINING: Behavior = Behavior(8);
    /// Reserved on the wire; requests carrying it are rejected.
    pub const MULTI_REGION: Behavior = Behavior(16);
    /// On an over-limit token bucket answer, clamp the remainder to zero.
    pub const DRAIN_OVER_LIMIT: Behavior = Behavior(32);

    const KNOWN: u32 = 1 | 2 | 4 | 8 | 16 | 32;

    /// Decode the wire representation, rejecting unknown bits.
    pub fn from_wire(raw: u32) -> Option<Behavior> {
        (raw & !Self::KNOWN == 0).then_some(Behavior(raw))
    }

    pub fn as_wire(self) -> u32 {
        self.0
    }

    pub fn has(self, flag: Behavior) -> bool {
        self.0 & flag.0 != 0
    }

    pub fn with(self, flag: Behavior) -> Behavior {
        Behavior(self.0 | flag.0)
    }

    pub fn without(self, flag: Behavior) -> Behavior {
        Behavior(self.0 & !flag.0)
    }
}

/// Outcome of a rate limit check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    UnderLimit,
    OverLimit,
}

/// One rate limit check line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRequest {
    /// Namespace of the limit, e.g. `"requests_per_sec"`.
    pub name: String,
    /// Caller-chosen identity within the namespace, e.g. `"account:995"`.
    pub unique_key: String,
    /// Hits to apply. Zero peeks at the counter without consuming.
    #[serde(default = "default_hits")]
    pub hits: i64,
    /// Counter capacity.
    pub limit: i64,
    /// Window length in milliseconds, or a calendar interval code when
    /// [`Behavior::DURATION_IS_GREGORIAN`] is set.
    pub duration: i64,
    #[serde(default)]
    pub algorithm: i32,
    #[serde(default)]
    pub behavior: u32,
    /// Token bucket burst capacity. Defaults to `limit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<i64>,
    /// Client-side creation time in epoch milliseconds, for callers that
    /// compensate for clock drift between themselves and the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

fn default_hits() -> i64 {
    1
}

impl Default for RateLimitRequest {
    fn default() -> Self {
        Self {
            name: String::new(),
            unique_key: String::new(),
            hits: 1,
            limit: 0,
            duration: 0,
            algorithm: 0,
            behavior: 0,
            burst: None,
            created_at: None,
        }
    }
}

/// Answer for one request line.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitResponse {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub remaining: i64,
    /// Epoch milliseconds when the counter fully replenishes.
    #[serde(default)]
    pub reset_time: i64,
    /// Empty on success. When non-empty, `status` is not meaningful.
    #[serde(default)]
    pub error: String,
}

/// Client-facing batch envelope.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CheckRateLimitsRequest {
    pub requests: Vec<RateLimitRequest>,
}

/// Responses in the same order as the request lines.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CheckRateLimitsResponse {
    pub responses: Vec<RateLimitResponse>,
}

/// Peer-to-peer delegation envelope. The receiver must own every fingerprint
/// in the batch and never re-forwards.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ForwardRequest {
    pub requests: Vec<RateLimitRequest>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ForwardResponse {
    pub rate_limits: Vec<RateLimitResponse>,
}

/// Owner-to-peers push of authoritative state for global keys.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub globals: Vec<UpdateRateLimit>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateRateLimit {
    pub name: String,
    pub unique_key: String,
    pub state: RateLimitResponse,
    pub algorithm: i32,
    /// Window length in milliseconds.
    pub duration: i64,
    /// Epoch milliseconds the authoritative window started. Receivers discard
    /// updates older than what they hold.
    pub created_at: i64,
}

/// Body of `GET /healthz`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub peer_count: usize,
}

/// In-memory counter state for one fingerprint.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CounterState {
    pub algorithm: Algorithm,
    pub limit: i64,
    pub duration_ms: i64,
    /// Epoch milliseconds the window started or was last reset.
    pub created_at_ms: i64,
    pub remaining: i64,
    pub status: Status,
}

impl CounterState {
    /// The `(algorithm, limit, duration)` identity of a counter. Two states
    /// with different triples do not describe the same limit, and existing
    /// state is discarded when the triple changes.
    pub fn triple(&self) -> (Algorithm, i64, i64) {
        (self.algorithm, self.limit, self.duration_ms)
    }
}

/// A validated request line, with gregorian durations resolved, defaults
/// filled in and the fingerprint computed once.
#[derive(Clone, Debug)]
pub(crate) struct CheckRequest {
    pub name: String,
    pub unique_key: String,
    pub fingerprint: Fingerprint,
    pub hits: i64,
    pub limit: i64,
    pub burst: i64,
    pub duration_ms: i64,
    pub algorithm: Algorithm,
    pub behavior: Behavior,
    pub created_at_ms: i64,
}

impl CheckRequest {
    /// Rebuild a wire line for forwarding to the owning peer.
    ///
    /// Durations are already resolved to milliseconds and `created_at` is
    /// pinned, so the owner evaluates the same window this node saw. The
    /// gregorian flag is cleared for the same reason.
    pub(crate) fn to_wire(&self) -> RateLimitRequest {
        RateLimitRequest {
            name: self.name.clone(),
            unique_key: self.unique_key.clone(),
            hits: self.hits,
            limit: self.limit,
            duration: self.duration_ms,
            algorithm: self.algorithm.as_wire(),
            behavior: self.behavior.without(Behavior::DURATION_IS_GREGORIAN).as_wire(),
            burst: Some(self.burst),
            created_at: Some(self.created_at_ms),
        }
    }
}
