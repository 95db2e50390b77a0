//! Consumer loops
//!
//! One task per enabled stream and per connection generation. The response
//! loop reads the user's inbound queue and routes every frame either to its
//! waiter or to the broadcast streams; feed loops forward public feed frames
//! to their category stream.
//!
//! A loop ends after the current frame when the shutdown signal fires, or
//! when the broker ends its delivery channel (the channel or connection was
//! closed, typically by a reconnect swapping in fresh handles).

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::config::QueueNames;
use super::connector::Connection;
use crate::broker::Delivery;
use crate::error::ConsumerRestartError;
use crate::protocol::{self, Category, Response};
use crate::registry::{BroadcastHub, CategoryUpdate, CorrelationRegistry};
use crate::stats::StatsCounters;

/// A stream fed by a consumer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// The user's response queue
    Updates,
    /// A public category feed
    Category(Category),
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Updates => f.write_str("updates"),
            StreamKind::Category(category) => write!(f, "{}", category),
        }
    }
}

/// Shared state every consumer loop routes into
#[derive(Clone)]
pub(crate) struct ConsumerContext {
    pub names: Arc<QueueNames>,
    pub waiters: CorrelationRegistry,
    pub streams: Arc<BroadcastHub>,
    pub stats: Arc<StatsCounters>,
    pub shutdown: watch::Receiver<bool>,
}

impl ConsumerContext {
    fn queue(&self, kind: StreamKind) -> String {
        match kind {
            StreamKind::Updates => self.names.inbound_queue().to_string(),
            StreamKind::Category(category) => self.names.feed_queue(category),
        }
    }

    fn routing_key(&self, kind: StreamKind) -> String {
        match kind {
            StreamKind::Updates => self.names.inbound_queue().to_string(),
            StreamKind::Category(category) => self.names.feed_routing_key(category),
        }
    }
}

/// Start consuming `kind` on the consume channel of `connection`
pub(crate) async fn start(
    kind: StreamKind,
    connection: &Connection,
    ctx: &ConsumerContext,
) -> Result<JoinHandle<()>, ConsumerRestartError> {
    let queue = ctx.queue(kind);
    let deliveries = connection
        .consume_channel()
        .consume(&queue)
        .await
        .map_err(|source| ConsumerRestartError { stream: kind, source })?;

    tracing::info!(
        stream = %kind,
        queue = %queue,
        generation = connection.generation(),
        "Consumer started"
    );

    let ctx = ctx.clone();
    let generation = connection.generation();
    Ok(tokio::spawn(async move {
        run(kind, deliveries, ctx).await;
        tracing::debug!(stream = %kind, generation = generation, "Consumer stopped");
    }))
}

async fn run(kind: StreamKind, mut deliveries: mpsc::Receiver<Delivery>, mut ctx: ConsumerContext) {
    let routing_key = ctx.routing_key(kind);

    loop {
        if *ctx.shutdown.borrow() {
            return;
        }

        tokio::select! {
            biased;

            changed = ctx.shutdown.changed() => {
                // Sender gone means the client was dropped
                if changed.is_err() || *ctx.shutdown.borrow() {
                    return;
                }
            }
            delivery = deliveries.recv() => match delivery {
                Some(delivery) => handle_delivery(kind, &routing_key, delivery, &ctx),
                None => return,
            },
        }
    }
}

/// Route one frame
pub(crate) fn handle_delivery(
    kind: StreamKind,
    routing_key: &str,
    delivery: Delivery,
    ctx: &ConsumerContext,
) {
    ctx.stats.frame_received();

    if delivery.routing_key != routing_key {
        ctx.stats.frame_ignored();
        tracing::debug!(
            stream = %kind,
            routing_key = %delivery.routing_key,
            expected = %routing_key,
            "Ignoring frame with foreign routing key"
        );
        return;
    }

    match kind {
        StreamKind::Updates => match protocol::decode(&delivery.body) {
            Ok(response) => route_response(response, ctx),
            Err(e) => {
                ctx.stats.decode_error();
                tracing::warn!(error = %e, len = delivery.body.len(), "Failed to decode response");
            }
        },
        StreamKind::Category(category) => {
            match serde_json::from_slice::<Value>(&delivery.body) {
                Ok(value) => {
                    ctx.stats.feed_event();
                    ctx.streams.send_category(category, CategoryUpdate::Feed(value));
                }
                Err(e) => {
                    ctx.stats.decode_error();
                    tracing::warn!(category = %category, error = %e, "Failed to decode feed frame");
                }
            }
        }
    }
}

fn route_response(response: Response, ctx: &ConsumerContext) {
    let response = match response.correlation_key() {
        Some(key) => match ctx.waiters.resolve(key, response) {
            Ok(()) => {
                ctx.stats.response_resolved();
                tracing::debug!(key = key, "Response delivered to waiter");
                return;
            }
            Err(unclaimed) => unclaimed,
        },
        None => response,
    };

    if let Some(category) = response.action.category() {
        ctx.streams
            .send_category(category, CategoryUpdate::Response(response.clone()));
    }

    let receivers = ctx.streams.send_update(response);
    ctx.stats.update_broadcast();
    tracing::debug!(receivers = receivers, "Update broadcast");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ServerVariant;
    use crate::protocol::Action;

    fn context() -> (ConsumerContext, watch::Sender<bool>) {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let ctx = ConsumerContext {
            names: Arc::new(QueueNames::new("alice", ServerVariant::Cw2)),
            waiters: CorrelationRegistry::new(),
            streams: Arc::new(BroadcastHub::new(16)),
            stats: Arc::new(StatsCounters::default()),
            shutdown,
        };
        (ctx, shutdown_tx)
    }

    fn want_to_buy(key: i64) -> Delivery {
        let body = format!(
            r#"{{"action":"wantToBuy","result":"Ok","payload":{{"userId":{},"itemName":"Thread","quantity":2}}}}"#,
            key
        );
        Delivery::new("alice_i", body)
    }

    #[tokio::test]
    async fn test_claimed_response_skips_streams() {
        let (ctx, _shutdown) = context();
        let mut updates = ctx.streams.subscribe_updates().unwrap();
        let pending = ctx.waiters.register(42).unwrap();

        handle_delivery(StreamKind::Updates, "alice_i", want_to_buy(42), &ctx);

        let response = pending.wait(std::time::Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.action, Action::WantToBuy);
        assert!(updates.try_recv().is_err());
        assert_eq!(ctx.stats.snapshot().responses_resolved, 1);
    }

    #[tokio::test]
    async fn test_unclaimed_response_broadcast() {
        let (ctx, _shutdown) = context();
        let mut updates = ctx.streams.subscribe_updates().unwrap();
        let (mut deals, _) = ctx.streams.enable(Category::Deals).unwrap();

        handle_delivery(StreamKind::Updates, "alice_i", want_to_buy(7), &ctx);

        assert_eq!(updates.recv().await.unwrap().correlation_key(), Some(7));
        match deals.recv().await.unwrap() {
            CategoryUpdate::Response(response) => assert_eq!(response.action, Action::WantToBuy),
            other => panic!("unexpected update: {:?}", other),
        }
        assert_eq!(ctx.stats.snapshot().updates_broadcast, 1);
    }

    #[tokio::test]
    async fn test_foreign_routing_key_ignored() {
        let (ctx, _shutdown) = context();
        let mut updates = ctx.streams.subscribe_updates().unwrap();

        let mut delivery = want_to_buy(7);
        delivery.routing_key = "bob_i".into();
        handle_delivery(StreamKind::Updates, "alice_i", delivery, &ctx);

        assert!(updates.try_recv().is_err());
        let stats = ctx.stats.snapshot();
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.frames_ignored, 1);
    }

    #[tokio::test]
    async fn test_garbage_frame_counted() {
        let (ctx, _shutdown) = context();
        handle_delivery(
            StreamKind::Updates,
            "alice_i",
            Delivery::new("alice_i", "not json"),
            &ctx,
        );
        assert_eq!(ctx.stats.snapshot().decode_errors, 1);
    }

    #[tokio::test]
    async fn test_feed_frame_forwarded() {
        let (ctx, _shutdown) = context();
        let (mut duels, _) = ctx.streams.enable(Category::Duels).unwrap();

        handle_delivery(
            StreamKind::Category(Category::Duels),
            "cw2-duels",
            Delivery::new("cw2-duels", r#"{"winner":{"name":"a"}}"#),
            &ctx,
        );

        match duels.recv().await.unwrap() {
            CategoryUpdate::Feed(value) => assert_eq!(value["winner"]["name"], "a"),
            other => panic!("unexpected update: {:?}", other),
        }
        assert_eq!(ctx.stats.snapshot().feed_events, 1);
    }

    #[tokio::test]
    async fn test_loop_exits_on_shutdown() {
        let (ctx, shutdown) = context();
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(run(StreamKind::Updates, rx, ctx));

        shutdown.send(true).unwrap();
        handle.await.unwrap();
        drop(tx);
    }

    #[tokio::test]
    async fn test_loop_exits_when_channel_ends() {
        let (ctx, _shutdown) = context();
        let mut updates = ctx.streams.subscribe_updates().unwrap();
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(run(StreamKind::Updates, rx, ctx));

        tx.send(Delivery::new("alice_i", "garbage")).await.unwrap();
        tx.send(want_to_buy(7)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        // Survived the bad frame
        assert!(updates.recv().await.is_ok());
    }

    #[test]
    fn test_stream_kind_display() {
        assert_eq!(StreamKind::Updates.to_string(), "updates");
        assert_eq!(
            StreamKind::Category(Category::AuctionDigest).to_string(),
            "au_digest"
        );
    }
}
