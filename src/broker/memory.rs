//! In-memory broker
//!
//! A loopback implementation of the broker traits. Queues are plain names,
//! exchanges are not modelled: the test (or a scripted responder) decides
//! which queue a published frame lands in.
//!
//! Failures can be scripted per operation, and the server side can drop every
//! live connection to exercise the reconnect path.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use super::{
    Broker, BrokerChannel, BrokerConnection, BrokerError, Delivery, NOT_FOUND, REPLY_SUCCESS,
};

/// Per-consumer buffer size
const CONSUMER_BUFFER: usize = 256;

type Responder = Arc<dyn Fn(&PublishedFrame) -> Vec<(String, Delivery)> + Send + Sync>;

/// A frame recorded by [`MemoryBroker`] on publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedFrame {
    pub exchange: String,
    pub routing_key: String,
    pub content_type: String,
    pub body: Bytes,
}

struct Binding {
    connection_id: u64,
    channel_id: u64,
    tx: mpsc::Sender<Delivery>,
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    dial_count: usize,
    last_url: Option<String>,
    /// Close notifiers of live connections
    connections: HashMap<u64, watch::Sender<Option<BrokerError>>>,
    bindings: HashMap<String, Vec<Binding>>,
    published: Vec<PublishedFrame>,
    dial_failures: VecDeque<BrokerError>,
    channel_failures: VecDeque<BrokerError>,
    publish_failures: VecDeque<BrokerError>,
    consume_failures: HashMap<String, VecDeque<BrokerError>>,
    responder: Option<Responder>,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn close_connection(&mut self, connection_id: u64, reason: BrokerError) -> bool {
        let Some(notify) = self.connections.remove(&connection_id) else {
            return false;
        };
        let _ = notify.send(Some(reason));
        for bindings in self.bindings.values_mut() {
            bindings.retain(|b| b.connection_id != connection_id);
        }
        true
    }
}

/// Loopback broker for tests and demos
///
/// Cloning yields another handle to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver a frame to the consumers of `queue`
    ///
    /// Returns the number of consumers the frame was handed to.
    pub fn deliver(&self, queue: &str, routing_key: &str, body: impl Into<Bytes>) -> usize {
        self.route(queue, Delivery::new(routing_key, body))
    }

    fn route(&self, queue: &str, delivery: Delivery) -> usize {
        let state = self.lock();
        let Some(bindings) = state.bindings.get(queue) else {
            tracing::debug!(queue = %queue, "No consumer for queue, frame dropped");
            return 0;
        };

        bindings
            .iter()
            .filter(|b| b.tx.try_send(delivery.clone()).is_ok())
            .count()
    }

    /// Install a responder that answers every published frame
    ///
    /// The responder returns `(queue, delivery)` pairs that are routed
    /// right after the publish completes.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&PublishedFrame) -> Vec<(String, Delivery)> + Send + Sync + 'static,
    {
        self.lock().responder = Some(Arc::new(responder));
    }

    /// Fail the next dial with `err`
    pub fn fail_next_dial(&self, err: BrokerError) {
        self.lock().dial_failures.push_back(err);
    }

    /// Fail the next channel open with `err`
    pub fn fail_next_channel(&self, err: BrokerError) {
        self.lock().channel_failures.push_back(err);
    }

    /// Fail the next publish with `err`
    pub fn fail_next_publish(&self, err: BrokerError) {
        self.lock().publish_failures.push_back(err);
    }

    /// Fail the next consume of `queue` with `err`
    pub fn fail_next_consume(&self, queue: &str, err: BrokerError) {
        self.lock()
            .consume_failures
            .entry(queue.to_string())
            .or_default()
            .push_back(err);
    }

    /// Close every live connection from the server side
    ///
    /// Returns the number of connections dropped.
    pub fn drop_connections(&self, reason: &str) -> usize {
        let mut state = self.lock();
        let ids: Vec<u64> = state.connections.keys().copied().collect();
        ids.into_iter()
            .filter(|id| state.close_connection(*id, BrokerError::connection_forced(reason)))
            .count()
    }

    /// Frames published so far
    pub fn published(&self) -> Vec<PublishedFrame> {
        self.lock().published.clone()
    }

    /// Number of connections that are currently open
    pub fn live_connections(&self) -> usize {
        self.lock().connections.len()
    }

    /// Number of dial attempts, failed ones included
    pub fn dial_count(&self) -> usize {
        self.lock().dial_count
    }

    /// URL used by the most recent dial
    pub fn last_url(&self) -> Option<String> {
        self.lock().last_url.clone()
    }

    /// Number of active consumers on `queue`
    pub fn consumer_count(&self, queue: &str) -> usize {
        self.lock().bindings.get(queue).map_or(0, Vec::len)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn dial(&self, url: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let mut state = self.lock();
        state.dial_count += 1;
        state.last_url = Some(url.to_string());

        if let Some(err) = state.dial_failures.pop_front() {
            return Err(err);
        }

        let id = state.next_id();
        let (notify, closed) = watch::channel(None);
        state.connections.insert(id, notify);

        Ok(Arc::new(MemoryConnection {
            id,
            broker: self.clone(),
            closed,
        }))
    }
}

struct MemoryConnection {
    id: u64,
    broker: MemoryBroker,
    closed: watch::Receiver<Option<BrokerError>>,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let mut state = self.broker.lock();
        if !state.connections.contains_key(&self.id) {
            return Err(BrokerError::channel_error("connection is not open"));
        }
        if let Some(err) = state.channel_failures.pop_front() {
            return Err(err);
        }

        let id = state.next_id();
        Ok(Arc::new(MemoryChannel {
            id,
            connection_id: self.id,
            broker: self.broker.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let closed = self
            .broker
            .lock()
            .close_connection(self.id, BrokerError::new(REPLY_SUCCESS, "closed by client"));
        if closed {
            Ok(())
        } else {
            Err(BrokerError::channel_error("connection already closed"))
        }
    }

    async fn closed(&self) -> BrokerError {
        let mut closed = self.closed.clone();
        let reason = match closed.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone(),
            Err(_) => None,
        };
        reason.unwrap_or_else(|| BrokerError::connection_forced("connection lost"))
    }
}

struct MemoryChannel {
    id: u64,
    connection_id: u64,
    broker: MemoryBroker,
    closed: AtomicBool,
}

impl MemoryChannel {
    fn check_open(&self, state: &BrokerState) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) || !state.connections.contains_key(&self.connection_id)
        {
            return Err(BrokerError::channel_error("channel/connection is not open"));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), BrokerError> {
        let (frame, responder) = {
            let mut state = self.broker.lock();
            self.check_open(&state)?;
            if let Some(err) = state.publish_failures.pop_front() {
                return Err(err);
            }

            let frame = PublishedFrame {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                content_type: content_type.to_string(),
                body,
            };
            state.published.push(frame.clone());
            (frame, state.responder.clone())
        };

        if let Some(responder) = responder {
            for (queue, delivery) in responder(&frame) {
                self.broker.route(&queue, delivery);
            }
        }

        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        let mut state = self.broker.lock();
        self.check_open(&state)?;

        if let Some(err) = state
            .consume_failures
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        if queue.is_empty() {
            return Err(BrokerError::new(NOT_FOUND, "no queue ''"));
        }

        let (tx, rx) = mpsc::channel(CONSUMER_BUFFER);
        state.bindings.entry(queue.to_string()).or_default().push(Binding {
            connection_id: self.connection_id,
            channel_id: self.id,
            tx,
        });

        Ok(rx)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(BrokerError::channel_error("channel already closed"));
        }

        let mut state = self.broker.lock();
        for bindings in state.bindings.values_mut() {
            bindings.retain(|b| b.channel_id != self.id);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryBroker")
            .field("live_connections", &state.connections.len())
            .field("published", &state.published.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::CONNECTION_FORCED;

    #[tokio::test]
    async fn test_publish_and_consume() {
        let broker = MemoryBroker::new();
        let conn = broker.dial("amqp://local").await.unwrap();
        let channel = conn.open_channel().await.unwrap();

        let mut rx = channel.consume("alice_i").await.unwrap();
        assert_eq!(broker.deliver("alice_i", "alice_i", "hello"), 1);

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.routing_key, "alice_i");
        assert_eq!(delivery.body, Bytes::from_static(b"hello"));

        channel
            .publish("alice_ex", "alice_o", Bytes::from_static(b"{}"), "text/plain")
            .await
            .unwrap();
        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, "alice_ex");
    }

    #[tokio::test]
    async fn test_channel_close_ends_consumer() {
        let broker = MemoryBroker::new();
        let conn = broker.dial("amqp://local").await.unwrap();
        let channel = conn.open_channel().await.unwrap();
        let mut rx = channel.consume("q").await.unwrap();

        channel.close().await.unwrap();
        assert!(rx.recv().await.is_none());

        let err = channel
            .publish("ex", "rk", Bytes::new(), "text/plain")
            .await
            .unwrap_err();
        assert!(err.is_channel_unusable());
    }

    #[tokio::test]
    async fn test_server_drop_notifies_close() {
        let broker = MemoryBroker::new();
        let conn = broker.dial("amqp://local").await.unwrap();
        assert_eq!(broker.live_connections(), 1);

        assert_eq!(broker.drop_connections("heartbeat timeout"), 1);
        let reason = conn.closed().await;
        assert_eq!(reason.code, CONNECTION_FORCED);
        assert_eq!(broker.live_connections(), 0);
        assert!(conn.open_channel().await.is_err());
    }

    #[tokio::test]
    async fn test_close_wakes_pending_closed_wait() {
        let broker = MemoryBroker::new();
        let conn = broker.dial("amqp://local").await.unwrap();

        let waiting = Arc::clone(&conn);
        let mut watcher = tokio_test::task::spawn(async move { waiting.closed().await });
        tokio_test::assert_pending!(watcher.poll());

        conn.close().await.unwrap();
        assert!(watcher.is_woken());
        let reason = tokio_test::assert_ready!(watcher.poll());
        assert_eq!(reason.code, REPLY_SUCCESS);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let broker = MemoryBroker::new();
        broker.fail_next_dial(BrokerError::new(403, "ACCESS_REFUSED"));
        assert!(broker.dial("amqp://local").await.is_err());

        let conn = broker.dial("amqp://local").await.unwrap();
        assert_eq!(broker.dial_count(), 2);

        broker.fail_next_consume("q", BrokerError::new(NOT_FOUND, "no queue 'q'"));
        let channel = conn.open_channel().await.unwrap();
        assert!(channel.consume("q").await.is_err());
        assert!(channel.consume("q").await.is_ok());
        assert_eq!(broker.consumer_count("q"), 1);
    }

    #[tokio::test]
    async fn test_responder_routes_reply() {
        let broker = MemoryBroker::new();
        broker.set_responder(|frame| {
            vec![(
                "bob_i".to_string(),
                Delivery::new("bob_i", frame.body.clone()),
            )]
        });

        let conn = broker.dial("amqp://local").await.unwrap();
        let channel = conn.open_channel().await.unwrap();
        let mut rx = channel.consume("bob_i").await.unwrap();

        channel
            .publish("bob_ex", "bob_o", Bytes::from_static(b"ping"), "text/plain")
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().body, Bytes::from_static(b"ping"));
    }
}
