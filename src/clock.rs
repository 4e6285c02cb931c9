use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond wall-clock abstraction.
///
/// Counter state and reset times cross the wire between peers, so the origin
/// is the UNIX epoch rather than process start. Implementations must be safe
/// to call concurrently.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since the UNIX epoch.
    fn now_millis(&self) -> i64;
}

/// Production clock backed by [`SystemTime`].
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Starts at the value given to [`FrozenClock::at`] and only moves when
/// [`advance`](FrozenClock::advance) or [`set`](FrozenClock::set) is called.
#[derive(Debug, Default)]
pub struct FrozenClock {
    now_ms: AtomicI64,
}

impl FrozenClock {
    pub fn at(now_ms: i64) -> Self {
        Self { now_ms: AtomicI64::new(now_ms) }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for FrozenClock {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
