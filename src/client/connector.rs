//! Broker connection management
//!
//! Owns the installed [`Connection`] and swaps it on reconnect. Readers clone
//! the `Arc` under a read lock, so a swap is observed atomically: a publisher
//! sees either the old handles or the new ones, never a mix.
//!
//! Reconnect and shutdown must hold the [`LifecycleGuard`], which serializes
//! them with each other and with consumer (re)starts done by the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, MutexGuard, RwLock};

use crate::broker::{Broker, BrokerChannel, BrokerConnection, BrokerError};
use crate::error::{ChannelKind, ConnectError};
use crate::session::ConnectionState;

/// One live session to the broker
pub struct Connection {
    generation: u64,
    transport: Arc<dyn BrokerConnection>,
    publish: Arc<dyn BrokerChannel>,
    consume: Arc<dyn BrokerChannel>,
}

impl Connection {
    /// Monotonic id of this connection, starting at 1
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn transport(&self) -> &Arc<dyn BrokerConnection> {
        &self.transport
    }

    pub fn publish_channel(&self) -> &Arc<dyn BrokerChannel> {
        &self.publish
    }

    pub fn consume_channel(&self) -> &Arc<dyn BrokerChannel> {
        &self.consume
    }

    /// Close the consume channel, the publish channel and the transport, in
    /// that order
    ///
    /// Every step is attempted; the first error is returned.
    pub async fn close(&self) -> Result<(), BrokerError> {
        let consume = self.consume.close().await;
        let publish = self.publish.close().await;
        let transport = self.transport.close().await;
        consume.and(publish).and(transport)
    }
}

/// Outcome of [`Connector::reconnect`]
pub enum Swap {
    /// A fresh connection was installed
    Installed {
        connection: Arc<Connection>,
        /// Whether a previous connection was replaced (and closed)
        replaced: bool,
    },
    /// The stale generation was already replaced by someone else
    AlreadyCurrent,
}

/// Proof that the caller holds the lifecycle lock
pub struct LifecycleGuard<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

/// Dials the broker and keeps the installed connection
pub struct Connector {
    broker: Arc<dyn Broker>,
    url: String,
    current: RwLock<Option<Arc<Connection>>>,
    generation: AtomicU64,
    lifecycle: Mutex<()>,
    state: watch::Sender<ConnectionState>,
}

impl Connector {
    pub fn new(broker: Arc<dyn Broker>, url: String) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            broker,
            url,
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            lifecycle: Mutex::new(()),
            state,
        }
    }

    /// Acquire the lifecycle lock
    pub async fn lifecycle(&self) -> LifecycleGuard<'_> {
        LifecycleGuard(self.lifecycle.lock().await)
    }

    /// The installed connection
    pub async fn current(&self) -> Option<Arc<Connection>> {
        self.current.read().await.clone()
    }

    /// Generation of the installed connection, 0 if none was ever installed
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                tracing::debug!(from = %state, to = %next, "Connection state changed");
                *state = next;
                true
            } else {
                false
            }
        });
    }

    /// Record that the broker closed the connection of `generation`
    ///
    /// The dead handles stay installed until the next successful reconnect.
    pub fn mark_lost(&self, _guard: &LifecycleGuard<'_>, generation: u64) {
        if self.generation() == generation {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Dial and open both channels without installing anything
    async fn open(&self, generation: u64) -> Result<Connection, ConnectError> {
        let transport = self
            .broker
            .dial(&self.url)
            .await
            .map_err(ConnectError::Dial)?;

        let publish = match transport.open_channel().await {
            Ok(channel) => channel,
            Err(source) => {
                let _ = transport.close().await;
                return Err(ConnectError::Channel {
                    kind: ChannelKind::Publish,
                    source,
                });
            }
        };

        let consume = match transport.open_channel().await {
            Ok(channel) => channel,
            Err(source) => {
                let _ = publish.close().await;
                let _ = transport.close().await;
                return Err(ConnectError::Channel {
                    kind: ChannelKind::Consume,
                    source,
                });
            }
        };

        Ok(Connection {
            generation,
            transport,
            publish,
            consume,
        })
    }

    /// Open a fresh connection and install it in place of the current one
    ///
    /// With `stale` set, nothing is dialed when the installed connection is
    /// already newer than `stale`. On failure the previous connection stays
    /// installed.
    pub async fn reconnect(
        &self,
        _guard: &LifecycleGuard<'_>,
        stale: Option<u64>,
    ) -> Result<Swap, ConnectError> {
        let fallback = self.state();
        if fallback.is_closed() {
            return Err(ConnectError::Closed);
        }

        if let (Some(stale), Some(current)) = (stale, self.current().await) {
            if current.generation != stale {
                tracing::debug!(
                    stale = stale,
                    current = current.generation,
                    "Connection already replaced"
                );
                return Ok(Swap::AlreadyCurrent);
            }
        }

        self.set_state(if fallback == ConnectionState::Connected {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        let generation = self.generation() + 1;
        let connection = match self.open(generation).await {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                self.set_state(fallback);
                tracing::warn!(error = %e, generation = generation, "Connect failed");
                return Err(e);
            }
        };

        let previous = {
            let mut current = self.current.write().await;
            let previous = current.replace(Arc::clone(&connection));
            self.generation.store(generation, Ordering::Release);
            previous
        };

        if let Some(ref previous) = previous {
            if let Err(e) = previous.close().await {
                tracing::debug!(
                    error = %e,
                    generation = previous.generation,
                    "Previous connection was already closed"
                );
            }
        }

        self.set_state(ConnectionState::Connected);
        tracing::info!(generation = generation, "Connection installed");

        Ok(Swap::Installed {
            connection,
            replaced: previous.is_some(),
        })
    }

    /// Close the installed connection and refuse further reconnects
    pub async fn shutdown(&self, _guard: &LifecycleGuard<'_>) -> Result<(), BrokerError> {
        let state = self.state();
        if state.is_closed() {
            return Ok(());
        }
        self.set_state(ConnectionState::Closed);

        let Some(connection) = self.current.write().await.take() else {
            return Ok(());
        };
        match connection.close().await {
            // The broker already dropped it
            Err(e) if !state.has_connection() => {
                tracing::debug!(error = %e, generation = connection.generation, "Lost connection closed");
                Ok(())
            }
            result => result,
        }
    }
}
