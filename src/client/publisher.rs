//! Request publisher
//!
//! Encodes requests and publishes them to the user's exchange with the
//! outbound routing key. Retrying after a dead channel is left to the client,
//! which owns the reconnect path.

use bytes::Bytes;

use super::config::QueueNames;
use super::connector::Connection;
use crate::broker::BrokerError;
use crate::error::PublishError;
use crate::protocol::constants::CONTENT_TYPE;
use crate::protocol::{self, Request};

/// Publishing side of a client
pub(crate) struct Publisher {
    exchange: String,
    routing_key: String,
}

impl Publisher {
    pub fn new(names: &QueueNames) -> Self {
        Self {
            exchange: names.exchange().to_string(),
            routing_key: names.outbound_routing_key().to_string(),
        }
    }

    /// Encode `request` into a frame body
    pub fn encode(&self, request: &Request) -> Result<Bytes, PublishError> {
        protocol::encode(request)
    }

    /// Publish an encoded frame on the publish channel of `connection`
    pub async fn send(&self, connection: &Connection, body: Bytes) -> Result<(), BrokerError> {
        connection
            .publish_channel()
            .publish(&self.exchange, &self.routing_key, body, CONTENT_TYPE)
            .await
    }
}
