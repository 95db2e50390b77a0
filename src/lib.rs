//! cwapi-rs: session client for a broker-backed request/response API
//!
//! Requests are JSON envelopes published to a per-user exchange; responses
//! and unsolicited updates arrive on a per-user queue, and public feeds on
//! per-category queues. This crate keeps that session alive across broker
//! disconnects and matches responses to the callers waiting for them.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────── Client ────────────────────────┐
//!   publish() ───►│ Publisher ──► publish channel ──► {user}_ex / {user}_o │
//!                 │                                                        │
//!   request() ───►│ CorrelationRegistry ◄── resolve(key) ◄─┐               │
//!                 │                                         │ decode        │
//!                 │ consume channel ──► {user}_i ──► response consumer     │
//!                 │                 └─► {user}_deals ... feed consumers    │
//!                 │                                         │ unclaimed     │
//!   subscribe() ◄─│ BroadcastHub (updates + category streams) ◄┘          │
//!                 │                                                        │
//!                 │ Connector: generation-checked reconnect + close watcher │
//!                 └────────────────────────────────────────────────────────┘
//! ```
//!
//! The transport is pluggable through the [`broker`] traits; the in-memory
//! [`broker::MemoryBroker`] backs the tests and demos.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cwapi_rs::broker::MemoryBroker;
//! use cwapi_rs::protocol::{Category, Request, RequestPayload};
//! use cwapi_rs::protocol::request::CreateAuthCode;
//! use cwapi_rs::{Client, ClientConfig, ServerVariant};
//!
//! #[tokio::main]
//! async fn main() -> cwapi_rs::Result<()> {
//!     let config = ClientConfig::new("alice", "secret")
//!         .server(ServerVariant::Cw3)
//!         .category(Category::Deals);
//!
//!     let client = Client::connect(Arc::new(MemoryBroker::new()), config).await?;
//!
//!     let request = Request::new(RequestPayload::CreateAuthCode(CreateAuthCode { user_id: 42 }));
//!     let response = client.request(42, &request).await?;
//!     println!("{} -> {:?}", response.action, response.result);
//!
//!     client.close().await
//! }
//! ```

pub mod broker;
pub mod client;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod stats;

pub use client::{Client, ClientConfig, ReconnectPolicy, ServerVariant};
pub use error::{Error, Result};
pub use protocol::{Action, Category, Request, Response};
