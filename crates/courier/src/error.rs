//! Error types shared across the crate.
//!
//! Errors are split by concern so callers can tell a dropped connection
//! (retry it) from a malformed body (answer it) from a broken configuration
//! (stop the process).

use std::time::Duration;

/// The result type used throughout courier.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while talking to the broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The connection or channel could not be established or was lost.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// The channel was closed underneath an operation.
    #[error("channel closed")]
    ChannelClosed,

    /// The broker blocked the connection for longer than the configured timeout.
    #[error("connection blocked for more than {0:?}")]
    Blocked(Duration),

    /// The broker URI could not be parsed.
    #[error("invalid broker uri: {0}")]
    InvalidUri(String),

    /// The broker refused an operation because of how it was configured
    /// (e.g. a queue redeclared with different arguments).
    #[error("invalid broker configuration: {0}")]
    Configuration(String),
}

impl BrokerError {
    /// Returns true when the failure is a programmer or configuration error
    /// that no amount of reconnecting will fix.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidUri(_) | Self::Configuration(_))
    }

    /// Returns true when the operation may succeed on a fresh connection.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !self.is_fatal()
    }
}

/// Errors raised while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The body is not valid JSON or does not match the envelope schema.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the connection supervisor.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// A non-retryable broker error.
    #[error("fatal broker error: {0}")]
    Fatal(#[source] BrokerError),

    /// The retry policy ran out of attempts.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error returned by the final attempt.
        #[source]
        last: BrokerError,
    },

    /// Shutdown was requested while connecting.
    #[error("interrupted by shutdown")]
    Interrupted,
}

/// Errors surfaced to callers of the dispatch client.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Publishing the request failed.
    #[error("failed to publish request: {0}")]
    Publish(#[from] BrokerError),

    /// The connection could not be (re)established.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// Encoding the request failed.
    #[error("failed to encode request: {0}")]
    Encode(#[from] EnvelopeError),

    /// A request with the same correlation id is already waiting.
    #[error("correlation id {0} is already pending")]
    DuplicateCorrelationId(String),

    /// No reply arrived within the configured wait.
    #[error("no reply for {correlation_id} within {timeout:?}")]
    Timeout {
        /// Correlation id of the abandoned request.
        correlation_id: String,
        /// The bounded wait that elapsed.
        timeout: Duration,
    },

    /// The reply router stopped before a reply arrived.
    #[error("reply channel closed for {0}")]
    Closed(String),
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The layered configuration could not be built or deserialized.
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),

    /// A setting is present but unusable.
    #[error("invalid setting `{key}`: {reason}")]
    Invalid {
        /// Dotted key of the offending setting.
        key: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Broker failure.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Envelope failure.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Supervisor failure.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// Dispatch failure.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_and_configuration_errors_are_fatal() {
        assert!(BrokerError::InvalidUri("nope".into()).is_fatal());
        assert!(BrokerError::Configuration("precondition".into()).is_fatal());
    }

    #[test]
    fn test_connection_errors_are_retryable() {
        assert!(BrokerError::Connection("refused".into()).is_retryable());
        assert!(BrokerError::ChannelClosed.is_retryable());
        assert!(BrokerError::Blocked(Duration::from_secs(1)).is_retryable());
    }
}
