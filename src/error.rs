//! Error types
//!
//! Each concern has its own error enum; [`Error`] wraps all of them for the
//! public client API.

use std::time::Duration;

use crate::broker::BrokerError;
use crate::client::StreamKind;
use crate::registry::CorrelationKey;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error returned by the client
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No response arrived before the caller's deadline
    #[error("no response for correlation key {key} within {timeout:?}")]
    Timeout {
        key: CorrelationKey,
        timeout: Duration,
    },

    /// One or more consumers could not be re-established after a (re)connect
    #[error("failed to start {} consumer(s): {}", .0.len(), restart_summary(.0))]
    ConsumerRestart(Vec<ConsumerRestartError>),

    /// Closing the connection handles failed
    #[error("failed to close connection: {0}")]
    Close(#[source] BrokerError),

    /// The client has been closed
    #[error("client is closed")]
    Closed,
}

fn restart_summary(errors: &[ConsumerRestartError]) -> String {
    errors
        .iter()
        .map(|e| e.stream.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Which logical channel failed to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Publish,
    Consume,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Publish => write!(f, "publish"),
            ChannelKind::Consume => write!(f, "consume"),
        }
    }
}

/// Dial or channel-open failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to dial broker: {0}")]
    Dial(#[source] BrokerError),

    #[error("failed to open {kind} channel: {source}")]
    Channel {
        kind: ChannelKind,
        #[source]
        source: BrokerError,
    },

    /// Shutdown already started, no new connection is installed
    #[error("connection manager is closed")]
    Closed,
}

/// Inbound frame could not be decoded
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Top-level envelope is malformed
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// Payload does not match the record for its action
    #[error("malformed {action} payload: {source}")]
    Payload {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Outbound request could not be delivered
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to encode {action} request: {source}")]
    Encode {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The broker rejected the publish. `retried` is set when the failure
    /// happened on the retry after a reconnect.
    #[error("publish failed (retried: {retried}): {source}")]
    Broker {
        #[source]
        source: BrokerError,
        retried: bool,
    },

    /// The channel was dead and reconnecting failed
    #[error("reconnect before retry failed: {0}")]
    Reconnect(#[source] ConnectError),
}

/// A consumer failed to start on a fresh channel
#[derive(Debug, Clone, thiserror::Error)]
#[error("{stream} consumer failed to start: {source}")]
pub struct ConsumerRestartError {
    pub stream: StreamKind,
    #[source]
    pub source: BrokerError,
}

/// Waiter registration or delivery failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    /// A live waiter already exists for this key
    #[error("a response for key {0} is already awaited")]
    AlreadyWaiting(CorrelationKey),

    /// The waiter was retired without a response (client closed or cancelled)
    #[error("waiter for key {0} was closed before a response arrived")]
    WaiterClosed(CorrelationKey),

    /// The registry was shut down
    #[error("correlation registry is closed")]
    Closed,
}

/// Invalid client configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown server variant: {0:?}")]
    UnknownServer(String),

    #[error("user must not be empty")]
    EmptyUser,

    #[error("stream capacity must be greater than zero")]
    ZeroCapacity,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Category;

    #[test]
    fn test_consumer_restart_display() {
        let err = Error::ConsumerRestart(vec![
            ConsumerRestartError {
                stream: StreamKind::Updates,
                source: BrokerError::new(404, "no queue"),
            },
            ConsumerRestartError {
                stream: StreamKind::Category(Category::Deals),
                source: BrokerError::new(404, "no queue"),
            },
        ]);

        assert_eq!(
            err.to_string(),
            "failed to start 2 consumer(s): updates, deals"
        );
    }

    #[test]
    fn test_connect_error_display() {
        let err = ConnectError::Channel {
            kind: ChannelKind::Consume,
            source: BrokerError::channel_error("gone"),
        };
        assert_eq!(
            err.to_string(),
            "failed to open consume channel: broker error 504: gone"
        );
    }
}
