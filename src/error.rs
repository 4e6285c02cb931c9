/// Error type for this crate.
///
/// Variants mirror the wire taxonomy: per-line failures render as
/// `CODE: message` in the response `error` field, envelope failures map to an
/// HTTP status via [`PeermitError::http_status`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum PeermitError {
    /// Validation failure. No state change.
    #[error("INVALID_ARGUMENT: {0}")]
    InvalidArgument(String),
    /// A per-key inbox or batch queue overflowed. Safe to retry.
    #[error("QUEUE_FULL: {0}")]
    QueueFull(String),
    /// A forward target was unreachable.
    #[error("UNAVAILABLE: {0}")]
    Unavailable(String),
    /// The deadline expired before the operation completed.
    #[error("DEADLINE: {0}")]
    Deadline(String),
    /// Pending work was abandoned by shutdown.
    #[error("CANCELLED: {0}")]
    Cancelled(String),
    /// The remote rejected our credentials.
    #[error("AUTH: {0}")]
    Auth(String),
    /// The remote answered with something other than the expected envelope.
    #[error("PROTOCOL: {0}")]
    Protocol(String),
    /// Unexpected algorithm or store fault.
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl PeermitError {
    /// HTTP status for envelope-level failures.
    pub fn http_status(&self) -> u16 {
        match self {
            PeermitError::InvalidArgument(_) => 400,
            PeermitError::Auth(_) => 401,
            PeermitError::QueueFull(_) => 429,
            PeermitError::Unavailable(_) => 503,
            PeermitError::Deadline(_) => 504,
            PeermitError::Cancelled(_)
            | PeermitError::Protocol(_)
            | PeermitError::Internal(_) => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PeermitError::QueueFull(_)
                | PeermitError::Unavailable(_)
                | PeermitError::Deadline(_)
        )
    }
}
