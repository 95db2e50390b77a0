//! Session client
//!
//! Provides the client side of the broker API:
//! - Connection management with generation-checked reconnects
//! - Consumer loops for the response queue and the public feeds
//! - Request publishing with one retry on a dead channel
//! - Request/response correlation on top of the broadcast streams

pub mod config;
mod connector;
mod consumer;
mod handle;
mod publisher;

pub use config::{ClientConfig, QueueNames, ReconnectPolicy, ServerVariant};
pub use consumer::StreamKind;
pub use handle::Client;
