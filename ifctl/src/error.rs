//! Error types for session operations.

use std::io;
use std::time::Duration;

/// Alias for `Result<T, ifctl::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds surfaced by session operations.
///
/// Transport and codec failures are converted into one of these kinds
/// before they cross the session boundary; each renders as a short
/// human-readable line on the status surface and in the event log.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The daemon endpoint is missing or refused the connection.
    #[error("daemon unavailable at {path}: {source}")]
    Unavailable {
        /// Socket path that was tried.
        path: String,
        /// Underlying connect error.
        source: io::Error,
    },

    /// No complete response arrived within the exchange budget.
    #[error("no response within {:.1}s", elapsed.as_secs_f64())]
    Timeout {
        /// How long the exchange waited.
        elapsed: Duration,
    },

    /// The connection dropped mid-exchange.
    #[error("connection lost: {0}")]
    ConnectionLost(#[source] io::Error),

    /// Received bytes matched no known response grammar.
    #[error("malformed message: {raw}")]
    Malformed {
        /// Offending bytes, verbatim.
        raw: String,
    },

    /// The named interface is not in the registry.
    #[error("unknown interface '{0}'")]
    NotFound(String),

    /// A required static-addressing field was empty.
    #[error("incomplete input: {0} is required")]
    IncompleteInput(&'static str),

    /// An exchange is already outstanding on the connection.
    #[error("an exchange is already in flight")]
    Busy,
}

impl Error {
    /// Failure reported when the dispatcher has already shut down.
    pub(crate) fn closed() -> Self {
        Self::ConnectionLost(io::Error::new(io::ErrorKind::BrokenPipe, "session is shut down"))
    }
}
