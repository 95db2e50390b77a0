//! Broker transport abstraction
//!
//! The session layer talks to the message broker only through the traits in
//! this module. A transport dials a [`BrokerConnection`], which hands out
//! logical [`BrokerChannel`]s used for publishing and consuming.
//!
//! ```text
//!   Broker::dial(url)
//!         │
//!         ▼
//!   BrokerConnection ──── closed() fires when the server drops us
//!     │          │
//!     ▼          ▼
//!  publish    consume ──► mpsc::Receiver<Delivery>
//!  channel    channel
//! ```
//!
//! Errors carry AMQP-style reply codes so callers can tell a dead channel
//! (`504 CHANNEL_ERROR`) from every other failure.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

pub use memory::{MemoryBroker, PublishedFrame};

/// Reply code for a normal, client-initiated close
pub const REPLY_SUCCESS: u16 = 200;

/// Reply code used when the server forcibly closes a connection
pub const CONNECTION_FORCED: u16 = 320;

/// Reply code for an operation on an unknown queue or exchange
pub const NOT_FOUND: u16 = 404;

/// Reply code for a channel that can no longer be used
pub const CHANNEL_ERROR: u16 = 504;

/// Error reported by the broker transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("broker error {code}: {reason}")]
pub struct BrokerError {
    /// AMQP-style reply code
    pub code: u16,
    /// Human readable reason
    pub reason: String,
}

impl BrokerError {
    /// Create a new broker error
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The channel (or its connection) is closed
    pub fn channel_error(reason: impl Into<String>) -> Self {
        Self::new(CHANNEL_ERROR, reason)
    }

    /// The server dropped the connection
    pub fn connection_forced(reason: impl Into<String>) -> Self {
        Self::new(CONNECTION_FORCED, reason)
    }

    /// Whether this error means the channel handle is dead and a reconnect
    /// may help
    pub fn is_channel_unusable(&self) -> bool {
        self.code == CHANNEL_ERROR
    }
}

/// A frame received from a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Routing key the frame was published with
    pub routing_key: String,
    /// Raw frame body
    pub body: Bytes,
}

impl Delivery {
    /// Create a delivery
    pub fn new(routing_key: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            routing_key: routing_key.into(),
            body: body.into(),
        }
    }
}

/// Entry point of a broker transport
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a new connection to the broker at `url`
    async fn dial(&self, url: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

/// One live connection to the broker
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a logical channel on this connection
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError>;

    /// Close the connection and every channel opened on it
    async fn close(&self) -> Result<(), BrokerError>;

    /// Resolves once the connection is closed, by either side, with the
    /// close reason
    async fn closed(&self) -> BrokerError;
}

/// A logical channel used for publishing or consuming
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Publish `body` to `exchange` with `routing_key`
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), BrokerError>;

    /// Start consuming `queue`
    ///
    /// The receiver ends when the channel or its connection is closed.
    async fn consume(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>, BrokerError>;

    /// Close the channel
    async fn close(&self) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_unusable() {
        assert!(BrokerError::channel_error("closed").is_channel_unusable());
        assert!(!BrokerError::connection_forced("gone").is_channel_unusable());
        assert!(!BrokerError::new(NOT_FOUND, "no queue").is_channel_unusable());
    }

    #[test]
    fn test_error_display() {
        let err = BrokerError::channel_error("channel/connection is not open");
        assert_eq!(
            err.to_string(),
            "broker error 504: channel/connection is not open"
        );
    }
}
