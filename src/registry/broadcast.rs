//! Broadcast streams
//!
//! Fan-out for everything no waiter claimed: one generic update stream plus
//! one optional stream per [`Category`].
//!
//! Streams are `tokio::sync::broadcast` channels. Sending never blocks: when
//! a subscriber falls more than `capacity` items behind, the oldest items are
//! overwritten and the subscriber's next `recv()` reports
//! `RecvError::Lagged(n)` before resuming with the oldest retained item.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::protocol::{Category, Response};

/// Item of a category stream
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryUpdate {
    /// An unclaimed response whose action implies this category
    Response(Response),
    /// A frame from the category's public feed
    Feed(Value),
}

struct Streams {
    updates: Option<broadcast::Sender<Response>>,
    categories: BTreeMap<Category, broadcast::Sender<CategoryUpdate>>,
    closed: bool,
}

/// The set of broadcast streams of one client
pub struct BroadcastHub {
    capacity: usize,
    streams: RwLock<Streams>,
}

impl BroadcastHub {
    /// Create a hub with the update stream enabled
    pub fn new(capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity);
        Self {
            capacity,
            streams: RwLock::new(Streams {
                updates: Some(updates),
                categories: BTreeMap::new(),
                closed: false,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Streams> {
        self.streams.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Streams> {
        self.streams.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Capacity of every stream
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe to the generic update stream, `None` once closed
    pub fn subscribe_updates(&self) -> Option<broadcast::Receiver<Response>> {
        self.read().updates.as_ref().map(broadcast::Sender::subscribe)
    }

    /// Enable `category` (if needed) and subscribe to it
    ///
    /// The flag is `true` when this call enabled the stream. Returns `None`
    /// once closed.
    pub fn enable(&self, category: Category) -> Option<(broadcast::Receiver<CategoryUpdate>, bool)> {
        let mut streams = self.write();
        if streams.closed {
            return None;
        }

        let mut enabled = false;
        let tx = streams.categories.entry(category).or_insert_with(|| {
            enabled = true;
            broadcast::channel(self.capacity).0
        });

        Some((tx.subscribe(), enabled))
    }

    /// Whether `category` is enabled
    pub fn is_enabled(&self, category: Category) -> bool {
        self.read().categories.contains_key(&category)
    }

    /// Enabled categories in restart order
    pub fn enabled_categories(&self) -> Vec<Category> {
        self.read().categories.keys().copied().collect()
    }

    /// Send an unclaimed response to the update stream
    ///
    /// Returns the number of subscribers that received it.
    pub fn send_update(&self, response: Response) -> usize {
        match self.read().updates.as_ref() {
            Some(tx) => tx.send(response).unwrap_or(0),
            None => 0,
        }
    }

    /// Send an item to a category stream; dropped if the category is not
    /// enabled
    pub fn send_category(&self, category: Category, update: CategoryUpdate) -> usize {
        match self.read().categories.get(&category) {
            Some(tx) => tx.send(update).unwrap_or(0),
            None => 0,
        }
    }

    /// Close every stream
    ///
    /// Subscribers drain what is buffered and then observe
    /// `RecvError::Closed`.
    pub fn close(&self) {
        let mut streams = self.write();
        streams.closed = true;
        streams.updates = None;
        streams.categories.clear();
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.read().closed
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::RecvError;

    use super::*;
    use crate::protocol::{Action, ResponsePayload};

    fn unknown() -> Response {
        Response {
            action: Action::Unknown,
            result: None,
            required_operation: None,
            token: None,
            payload: ResponsePayload::Empty,
        }
    }

    #[tokio::test]
    async fn test_update_fan_out() {
        let hub = BroadcastHub::new(8);
        let mut a = hub.subscribe_updates().unwrap();
        let mut b = hub.subscribe_updates().unwrap();

        assert_eq!(hub.send_update(unknown()), 2);
        assert_eq!(a.recv().await.unwrap().action, Action::Unknown);
        assert_eq!(b.recv().await.unwrap().action, Action::Unknown);
    }

    #[tokio::test]
    async fn test_category_disabled_by_default() {
        let hub = BroadcastHub::new(8);
        assert!(!hub.is_enabled(Category::Deals));
        assert_eq!(
            hub.send_category(Category::Deals, CategoryUpdate::Feed(Value::Null)),
            0
        );

        let (mut rx, enabled) = hub.enable(Category::Deals).unwrap();
        assert!(enabled);
        let (_, enabled_again) = hub.enable(Category::Deals).unwrap();
        assert!(!enabled_again);

        hub.send_category(Category::Deals, CategoryUpdate::Feed(Value::Bool(true)));
        assert_eq!(rx.recv().await.unwrap(), CategoryUpdate::Feed(Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_enabled_categories_in_restart_order() {
        let hub = BroadcastHub::new(8);
        hub.enable(Category::AuctionDigest);
        hub.enable(Category::Deals);
        hub.enable(Category::Offers);

        assert_eq!(
            hub.enabled_categories(),
            vec![Category::Deals, Category::Offers, Category::AuctionDigest]
        );
    }

    #[tokio::test]
    async fn test_full_stream_drops_oldest() {
        let hub = BroadcastHub::new(2);
        let mut rx = hub.subscribe_updates().unwrap();

        // Never blocks even though nobody drains
        for _ in 0..5 {
            hub.send_update(unknown());
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert!(rx.recv().await.is_ok());
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_ends_subscribers() {
        let hub = BroadcastHub::new(4);
        let mut updates = hub.subscribe_updates().unwrap();
        let (mut deals, _) = hub.enable(Category::Deals).unwrap();

        hub.send_update(unknown());
        hub.close();

        // Buffered item is still delivered
        assert!(updates.recv().await.is_ok());
        assert!(matches!(updates.recv().await, Err(RecvError::Closed)));
        assert!(matches!(deals.recv().await, Err(RecvError::Closed)));

        assert!(hub.is_closed());
        assert!(hub.subscribe_updates().is_none());
        assert!(hub.enable(Category::Duels).is_none());
        assert_eq!(hub.send_update(unknown()), 0);
    }
}
