use thiserror::Error;
use trip_logger_data_management::StoreError;

/// Faults a recording session survives. Each is appended to the runtime
/// error list and surfaced on the snapshot; recording keeps going.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecoverableError {
    #[error("Positioning unavailable: {message}")]
    PositioningUnavailable { message: String },

    #[error("Positioning timed out after {attempts} attempts")]
    PositioningTimeout { attempts: u32 },

    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    #[error("Storage quota exceeded: {message}")]
    StorageQuotaExceeded { message: String },

    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },
}

impl RecoverableError {
    /// Whether re-issuing the failed command can clear this error.
    /// Invariant violations are reported once and never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RecoverableError::InvariantViolation { .. })
    }

    pub(crate) fn from_store(err: &StoreError) -> Self {
        match err {
            StoreError::QuotaExceeded(message) => RecoverableError::StorageQuotaExceeded {
                message: message.clone(),
            },
            other => RecoverableError::StorageUnavailable {
                message: other.to_string(),
            },
        }
    }
}

/// Errors returned from the session command surface.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Recoverable(#[from] RecoverableError),

    #[error("session service is not running")]
    ServiceStopped,
}
