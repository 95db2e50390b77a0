//! Client handle
//!
//! Ties the connector, the consumer loops, the correlation registry and the
//! broadcast streams together behind one cloneable [`Client`].
//!
//! # Lifecycle
//!
//! ```text
//!   connect ──► reconnect(None) ──► install connection (generation N)
//!                                        │
//!                                        ├─► arm close watcher (N)
//!                                        └─► start consumers: updates, then
//!                                            enabled categories in order
//!
//!   watcher(N): broker closed N ──► mark lost ──► reconnect(Some(N))
//!   publish:    504 on N        ──► reconnect(Some(N)) ──► retry once
//!
//!   close: shutdown signal ─► retire waiters ─► close streams ─► close handles
//! ```
//!
//! `reconnect(Some(N))` is a no-op once generation N has been replaced, so a
//! watcher and any number of failing publishers share one reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::config::{ClientConfig, QueueNames};
use super::connector::{Connection, Connector, Swap};
use super::consumer::{self, ConsumerContext, StreamKind};
use super::publisher::Publisher;
use crate::broker::Broker;
use crate::error::{ConnectError, CorrelationError, Error, PublishError, Result};
use crate::protocol::{Category, Request, Response};
use crate::registry::{
    BroadcastHub, CategoryUpdate, CorrelationKey, CorrelationRegistry, PendingResponse,
};
use crate::session::ConnectionState;
use crate::stats::{ClientStats, StatsCounters};

/// Session client
///
/// Cloning yields another handle to the same session.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use cwapi_rs::broker::MemoryBroker;
/// use cwapi_rs::protocol::{Action, Request};
/// use cwapi_rs::{Client, ClientConfig};
///
/// # async fn example() -> cwapi_rs::Result<()> {
/// let client = Client::connect(Arc::new(MemoryBroker::new()), ClientConfig::new("alice", "pw")).await?;
///
/// let mut updates = client.subscribe_updates()?;
/// tokio::spawn(async move {
///     while let Ok(update) = updates.recv().await {
///         println!("update: {}", update.action);
///     }
/// });
///
/// let profile = client
///     .request(42, &Request::token_only(Action::RequestProfile, "token"))
///     .await?;
/// println!("result: {:?}", profile.result);
///
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    names: Arc<QueueNames>,
    connector: Connector,
    publisher: Publisher,
    waiters: CorrelationRegistry,
    streams: Arc<BroadcastHub>,
    stats: Arc<StatsCounters>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Client {
    /// Connect to the broker and start the configured consumers
    ///
    /// Nothing is left running when this fails.
    pub async fn connect(broker: Arc<dyn Broker>, config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let names = Arc::new(config.names());
        let streams = Arc::new(BroadcastHub::new(config.stream_capacity));
        for category in &config.categories {
            streams.enable(*category);
        }

        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(ClientInner {
            connector: Connector::new(broker, config.broker_url()),
            publisher: Publisher::new(&names),
            names,
            waiters: CorrelationRegistry::new(),
            streams,
            stats: Arc::new(StatsCounters::default()),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            config,
        });

        tracing::info!(
            user = %inner.config.user,
            server = %inner.config.server,
            categories = inner.config.categories.len(),
            "Connecting"
        );

        if let Err(e) = inner.reconnect(None).await {
            tracing::error!(error = %e, "Initial connect failed");
            if let Err(close) = inner.close().await {
                tracing::debug!(error = %close, "Cleanup after failed connect");
            }
            return Err(e);
        }

        Ok(Self { inner })
    }

    /// The configuration this client was created with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Derived queue and exchange names
    pub fn names(&self) -> &QueueNames {
        &self.inner.names
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.connector.state()
    }

    /// Watch connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connector.watch_state()
    }

    /// Snapshot of the client counters
    pub fn stats(&self) -> ClientStats {
        self.inner.stats.snapshot()
    }

    /// Subscribe to unclaimed responses
    pub fn subscribe_updates(&self) -> Result<broadcast::Receiver<Response>> {
        self.inner.streams.subscribe_updates().ok_or(Error::Closed)
    }

    /// Subscribe to a category stream, enabling it if needed
    ///
    /// Enabling a category while connected starts its feed consumer right
    /// away. If that fails the category stays enabled and is retried on the
    /// next reconnect.
    pub async fn subscribe(&self, category: Category) -> Result<broadcast::Receiver<CategoryUpdate>> {
        let inner = &self.inner;
        let _guard = inner.connector.lifecycle().await;

        let (rx, enabled) = inner.streams.enable(category).ok_or(Error::Closed)?;
        if !enabled || !inner.connector.state().has_connection() {
            return Ok(rx);
        }

        if let Some(connection) = inner.connector.current().await {
            let kind = StreamKind::Category(category);
            match consumer::start(kind, &connection, &inner.consumer_context()).await {
                Ok(handle) => inner.track(handle),
                Err(e) => return Err(Error::ConsumerRestart(vec![e])),
            }
        }

        Ok(rx)
    }

    /// Register a waiter for `key`
    ///
    /// Register before publishing the request so a fast response cannot be
    /// missed.
    pub fn register(&self, key: CorrelationKey) -> Result<PendingResponse> {
        if self.inner.is_closed() {
            return Err(Error::Closed);
        }
        match self.inner.waiters.register(key) {
            Ok(pending) => Ok(pending),
            Err(CorrelationError::Closed) => Err(Error::Closed),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait up to `timeout` for the response carrying `key`
    pub async fn await_response(&self, key: CorrelationKey, timeout: Duration) -> Result<Response> {
        self.register(key)?.wait(timeout).await
    }

    /// Publish a request
    ///
    /// A dead publish channel triggers one reconnect and one retry.
    pub async fn publish(&self, request: &Request) -> Result<()> {
        self.inner.publish(request).await
    }

    /// Publish `request` and wait for the response carrying `key`, using the
    /// configured request timeout
    pub async fn request(&self, key: CorrelationKey, request: &Request) -> Result<Response> {
        self.request_with_timeout(key, request, self.inner.config.request_timeout)
            .await
    }

    /// Publish `request` and wait up to `timeout` for the response carrying
    /// `key`
    pub async fn request_with_timeout(
        &self,
        key: CorrelationKey,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response> {
        let pending = self.register(key)?;
        self.publish(request).await?;
        pending.wait(timeout).await
    }

    /// Replace the connection with a fresh one and restart every consumer
    ///
    /// On a connect failure the previous connection stays installed.
    pub async fn reconnect(&self) -> Result<()> {
        self.inner.reconnect(None).await
    }

    /// Shut the session down
    ///
    /// Outstanding waits fail, broadcast subscribers see the streams end, and
    /// the broker handles are closed. Calling it again does nothing.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    /// Check if [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("user", &self.inner.config.user)
            .field("server", &self.inner.config.server)
            .field("state", &self.state())
            .finish()
    }
}

impl ClientInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.lock_tasks();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn consumer_context(&self) -> ConsumerContext {
        ConsumerContext {
            names: Arc::clone(&self.names),
            waiters: self.waiters.clone(),
            streams: Arc::clone(&self.streams),
            stats: Arc::clone(&self.stats),
            shutdown: self.shutdown.subscribe(),
        }
    }

    /// Install a fresh connection unless `stale` was already replaced, then
    /// arm its watcher and restart the consumers
    async fn reconnect(self: &Arc<Self>, stale: Option<u64>) -> Result<()> {
        let guard = self.connector.lifecycle().await;
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let connection = match self.connector.reconnect(&guard, stale).await? {
            Swap::AlreadyCurrent => return Ok(()),
            Swap::Installed {
                connection,
                replaced,
            } => {
                if replaced {
                    self.stats.reconnect();
                    tracing::info!(generation = connection.generation(), "Reconnected");
                }
                connection
            }
        };

        self.arm_watcher(&connection);
        self.start_consumers(&connection).await
    }

    /// Start every enabled consumer on `connection`, best effort
    async fn start_consumers(&self, connection: &Connection) -> Result<()> {
        let ctx = self.consumer_context();
        let kinds = std::iter::once(StreamKind::Updates).chain(
            self.streams
                .enabled_categories()
                .into_iter()
                .map(StreamKind::Category),
        );

        let mut failures = Vec::new();
        for kind in kinds {
            match consumer::start(kind, connection, &ctx).await {
                Ok(handle) => self.track(handle),
                Err(e) => {
                    tracing::error!(stream = %kind, error = %e.source, "Consumer failed to start");
                    failures.push(e);
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::ConsumerRestart(failures))
        }
    }

    /// Spawn the close watcher of `connection`
    fn arm_watcher(self: &Arc<Self>, connection: &Connection) {
        let weak = Arc::downgrade(self);
        let transport = Arc::clone(connection.transport());
        let generation = connection.generation();
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let reason = tokio::select! {
                biased;

                _ = shutdown.wait_for(|closed| *closed) => return,
                reason = transport.closed() => reason,
            };
            drop(transport);

            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.is_closed() || inner.connector.generation() != generation {
                return;
            }

            tracing::warn!(generation = generation, reason = %reason, "Broker closed the connection");
            {
                let guard = inner.connector.lifecycle().await;
                inner.connector.mark_lost(&guard, generation);
            }
            inner.reconnect_with_policy(generation).await;
        });

        self.track(handle);
    }

    async fn reconnect_with_policy(self: &Arc<Self>, generation: u64) {
        let policy = self.config.reconnect;
        let attempts = policy.max_attempts.max(1);
        let mut shutdown = self.shutdown.subscribe();

        for attempt in 1..=attempts {
            match self.reconnect(Some(generation)).await {
                Ok(()) => return,
                Err(Error::ConsumerRestart(failures)) => {
                    tracing::error!(failed = failures.len(), "Reconnected with consumers missing");
                    return;
                }
                Err(Error::Closed | Error::Connect(ConnectError::Closed)) => return,
                Err(e) if attempt < attempts => {
                    let delay = policy.delay_after(attempt);
                    tracing::warn!(attempt = attempt, error = %e, ?delay, "Reconnect failed, retrying");
                    tokio::select! {
                        biased;

                        _ = shutdown.wait_for(|closed| *closed) => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(
                        attempts = attempts,
                        error = %e,
                        "Reconnect failed, giving up until the next publish or reconnect()"
                    );
                }
            }
        }
    }

    async fn publish(self: &Arc<Self>, request: &Request) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let action = request.action();
        let body = self.publisher.encode(request)?;
        let connection = self.connector.current().await.ok_or(Error::Closed)?;

        match self.publisher.send(&connection, body.clone()).await {
            Ok(()) => {}
            Err(source) if source.is_channel_unusable() => {
                self.stats.publish_retry();
                tracing::warn!(
                    action = %action,
                    generation = connection.generation(),
                    error = %source,
                    "Publish channel unusable, reconnecting"
                );

                match self.reconnect(Some(connection.generation())).await {
                    // The publish channel is up even if a consumer is not
                    Ok(()) | Err(Error::ConsumerRestart(_)) => {}
                    Err(Error::Connect(e)) => return Err(PublishError::Reconnect(e).into()),
                    Err(e) => return Err(e),
                }

                let connection = self.connector.current().await.ok_or(Error::Closed)?;
                self.publisher
                    .send(&connection, body)
                    .await
                    .map_err(|source| PublishError::Broker {
                        source,
                        retried: true,
                    })?;
            }
            Err(source) => {
                return Err(PublishError::Broker {
                    source,
                    retried: false,
                }
                .into())
            }
        }

        self.stats.request_published();
        tracing::debug!(action = %action, "Request published");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::info!(user = %self.config.user, "Closing client");
        self.shutdown.send_replace(true);
        let retired = self.waiters.close_all();
        self.streams.close();

        let result = {
            let guard = self.connector.lifecycle().await;
            self.connector.shutdown(&guard).await
        };

        let tasks = std::mem::take(&mut *self.lock_tasks());
        for task in tasks {
            task.abort();
            let _ = task.await;
        }

        tracing::debug!(retired_waiters = retired, "Client closed");
        result.map_err(Error::Close)
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
    }
}
