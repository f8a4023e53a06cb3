//! Error types for remote-sampler

use thiserror::Error;

/// Sampler error type
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid construction parameters (bad endpoint, non-positive interval).
    /// Fatal to the caller, reported synchronously at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// HTTP transport failure or non-2xx response from the rules backend.
    #[error("transport error (status {status:?}): {message}")]
    Transport {
        /// HTTP status code, when one was received.
        status: Option<u16>,
        /// Human-readable failure description.
        message: String,
    },

    /// JSON decode failure or a required field missing from the payload.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// A `5xx` entry in `UnprocessedStatistics`; the whole targets refresh
    /// aborts and the live manifest is left unchanged.
    #[error("backend reported a server-side failure: {0}")]
    Backend(String),

    /// Wildcard matcher failure. The reference matcher never fails, but the
    /// variant exists so the decision path always has somewhere to route a
    /// matcher error to (spec.md §9(iii) / §4.1).
    #[error("matcher error: {0}")]
    Matcher(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
