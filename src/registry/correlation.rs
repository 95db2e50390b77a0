//! Correlation registry
//!
//! Maps a correlation key to the one-shot conduit of the caller waiting for
//! the matching response. Entries are retired on delivery, on cancel, on
//! shutdown, and when the caller drops its [`PendingResponse`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{CorrelationError, Error};
use crate::protocol::Response;

/// Correlation key: the numeric user id carried by request and response
pub type CorrelationKey = i64;

struct Waiter {
    /// Distinguishes successive registrations of the same key
    id: u64,
    tx: oneshot::Sender<Response>,
}

#[derive(Default)]
struct Waiters {
    next_id: u64,
    entries: HashMap<CorrelationKey, Waiter>,
    closed: bool,
}

/// Registry of outstanding waits
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct CorrelationRegistry {
    waiters: Arc<Mutex<Waiters>>,
}

impl CorrelationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a waiter for `key`
    ///
    /// Fails if a live waiter for `key` is already registered or the registry
    /// was closed. A previous waiter whose receiver was dropped is replaced.
    pub fn register(&self, key: CorrelationKey) -> Result<PendingResponse, CorrelationError> {
        let mut waiters = self.lock();
        if waiters.closed {
            return Err(CorrelationError::Closed);
        }

        if let Some(existing) = waiters.entries.get(&key) {
            if !existing.tx.is_closed() {
                return Err(CorrelationError::AlreadyWaiting(key));
            }
        }

        waiters.next_id += 1;
        let id = waiters.next_id;
        let (tx, rx) = oneshot::channel();
        waiters.entries.insert(key, Waiter { id, tx });

        tracing::debug!(key = key, "Waiter registered");

        Ok(PendingResponse {
            key,
            id,
            rx,
            registry: self.clone(),
        })
    }

    /// Deliver `response` to the waiter for `key`
    ///
    /// Returns the response back when nobody is waiting for it, so the caller
    /// can route it elsewhere.
    pub fn resolve(&self, key: CorrelationKey, response: Response) -> Result<(), Response> {
        let waiter = self.lock().entries.remove(&key);

        match waiter {
            Some(waiter) => waiter.tx.send(response).inspect(|_| {
                tracing::debug!(key = key, "Waiter resolved");
            }),
            None => Err(response),
        }
    }

    /// Retire the waiter for `key` without a response
    ///
    /// Returns `true` if a waiter was registered.
    pub fn cancel(&self, key: CorrelationKey) -> bool {
        self.lock().entries.remove(&key).is_some()
    }

    /// Retire every waiter and refuse new ones; blocked callers observe
    /// [`CorrelationError::WaiterClosed`]
    ///
    /// Returns the number of waiters retired.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut waiters = self.lock();
            waiters.closed = true;
            waiters.entries.drain().collect()
        };
        drained.len()
    }

    /// Whether [`close_all`](Self::close_all) has run
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of outstanding waiters
    pub fn pending_count(&self) -> usize {
        self.lock().entries.len()
    }

    fn retire(&self, key: CorrelationKey, id: u64) {
        let mut waiters = self.lock();
        if waiters.entries.get(&key).is_some_and(|w| w.id == id) {
            waiters.entries.remove(&key);
        }
    }
}

/// Handle to an outstanding wait
///
/// Dropping the handle retires its registry entry.
pub struct PendingResponse {
    key: CorrelationKey,
    id: u64,
    rx: oneshot::Receiver<Response>,
    registry: CorrelationRegistry,
}

impl PendingResponse {
    /// The key this handle waits on
    pub fn key(&self) -> CorrelationKey {
        self.key
    }

    /// Wait for the response, at most `timeout`
    pub async fn wait(mut self, timeout: Duration) -> Result<Response, Error> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(CorrelationError::WaiterClosed(self.key).into()),
            Err(_) => {
                tracing::debug!(key = self.key, ?timeout, "Waiter timed out");
                Err(Error::Timeout {
                    key: self.key,
                    timeout,
                })
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.registry.retire(self.key, self.id);
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("key", &self.key)
            .finish()
    }
}
