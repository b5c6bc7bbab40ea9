//! Common error types for the SCOURT sync engine

use thiserror::Error;

/// Common result type for sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared across the sync engine.
///
/// Low-level transport and parsing failures are normalized into these
/// variants at the portal-client / fragment-resolver boundary; the worker
/// only ever sees this taxonomy and drives its retry-vs-terminal decision
/// from [`Error::retry_class`].
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Profile pool has no remaining capacity for a new profile
    #[error("Profile pool exhausted: {0}")]
    PoolExhausted(String),

    /// A specific profile has reached its case capacity
    #[error("Profile full: {0}")]
    ProfileFull(String),

    /// Portal session handshake failed (retryable)
    #[error("Session init failed: {0}")]
    SessionInitFailed(String),

    /// Portal rejected or throttled the request
    #[error("Rate limited by portal: {0}")]
    RateLimited(String),

    /// Portal call timed out
    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    /// Captcha answer rejected after bounded in-process retries
    #[error("Captcha rejected after {attempts} attempt(s)")]
    CaptchaRejected { attempts: u32 },

    /// Portal reports no case for the search terms (terminal for the job)
    #[error("Case not found on portal: {0}")]
    CaseNotFound(String),

    /// Stored per-case access token is stale; caller must re-run search
    #[error("Access token expired for case {0}")]
    AccessTokenExpired(String),

    /// Fragment or response shape was unexpected; partial data may be usable
    #[error("Parse error at {path}: {message}")]
    Parse { path: String, message: String },

    /// Invalid caller input (bad case number, unknown sync type, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

/// How the worker should treat a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Standard exponential backoff
    Transient,
    /// Capacity problems do not self-resolve quickly; use the longer floor
    Capacity,
    /// Do not retry; mark the job failed
    Terminal,
}

impl Error {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Error::PoolExhausted(_) | Error::ProfileFull(_) => RetryClass::Capacity,
            Error::SessionInitFailed(_)
            | Error::RateLimited(_)
            | Error::NetworkTimeout(_)
            | Error::CaptchaRejected { .. }
            | Error::Database(_)
            | Error::Io(_) => RetryClass::Transient,
            Error::CaseNotFound(_)
            | Error::InvalidInput(_)
            | Error::Config(_)
            | Error::Internal(_) => RetryClass::Terminal,
            // Expired tokens are recovered in-job by re-searching; if one
            // still escapes to the worker, a retry gets a fresh search.
            Error::AccessTokenExpired(_) => RetryClass::Transient,
            // Partial parses are handled inline; a full parse failure is
            // worth retrying once the portal shape settles.
            Error::Parse { .. } => RetryClass::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_errors_use_capacity_class() {
        assert_eq!(
            Error::PoolExhausted("6/6 profiles".into()).retry_class(),
            RetryClass::Capacity
        );
        assert_eq!(
            Error::ProfileFull("50/50".into()).retry_class(),
            RetryClass::Capacity
        );
    }

    #[test]
    fn case_not_found_is_terminal() {
        assert_eq!(
            Error::CaseNotFound("2024드단26718".into()).retry_class(),
            RetryClass::Terminal
        );
    }

    #[test]
    fn transient_errors_retry() {
        assert_eq!(
            Error::NetworkTimeout("search".into()).retry_class(),
            RetryClass::Transient
        );
        assert_eq!(
            Error::CaptchaRejected { attempts: 3 }.retry_class(),
            RetryClass::Transient
        );
    }
}
