/*
[INPUT]:  Error sources surfaced by the exchange adapter and domain validators
[OUTPUT]: Structured error taxonomy with retry/backoff hints
[POS]:    Error handling layer - shared error type for adapter + orchestrator
[UPDATE]: When adding a new error source or a new domain error kind
*/

use thiserror::Error;

/// Error taxonomy shared by the exchange adapter interface and the orchestrator.
///
/// Mirrors the domain error kinds rather than language-level causes: a caller
/// deciding whether to retry, escalate, or halt only needs to match on these.
#[derive(Error, Debug)]
pub enum HeliosError {
    /// Arithmetic precondition or payload validation failed. Fatal to the call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Network error, 5xx, timeout, or transient 4xx including 429.
    #[error("transient exchange error: {0}")]
    TransientExchange(String),

    /// HTTP 429 specifically; callers must also notify the rate manager.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Cancellation of an order that is already filled/canceled. Treated as success.
    #[error("order already terminal: {0}")]
    OrderAlreadyTerminal(String),

    /// Exchange explicitly rejected a valid-looking payload. Not retried.
    #[error("permanent exchange error: {0}")]
    PermanentExchange(String),

    /// All retries exhausted; emergency close fired successfully.
    #[error("stop unprotected, emergency close executed for {symbol}")]
    StopUnprotected { symbol: String },

    /// Emergency close itself failed. Critical alert, no further automation.
    #[error("critical: position unprotected for {symbol}: {reason}")]
    CriticalUnprotected { symbol: String, reason: String },

    /// Reconciler found a mismatch between local and exchange truth.
    #[error("drift detected for {symbol}: {reason}")]
    Drift { symbol: String, reason: String },

    /// Exception inside a variant's tick processing. Isolated at the variant boundary.
    #[error("variant error ({variant_id}): {reason}")]
    VariantError { variant_id: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HeliosError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HeliosError::TransientExchange(_) | HeliosError::RateLimited { .. }
        )
    }

    pub fn is_terminal_already(&self) -> bool {
        matches!(self, HeliosError::OrderAlreadyTerminal(_))
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        HeliosError::InvalidInput(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, HeliosError>;
