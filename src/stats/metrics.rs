//! Statistics for a client session

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of client counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Frames read from any consume channel
    pub frames_received: u64,
    /// Frames dropped because their routing key did not match
    pub frames_ignored: u64,
    /// Frames that failed to decode
    pub decode_errors: u64,
    /// Responses handed to a waiting caller
    pub responses_resolved: u64,
    /// Responses sent to the generic update stream
    pub updates_broadcast: u64,
    /// Public feed frames sent to category streams
    pub feed_events: u64,
    /// Requests published successfully
    pub requests_published: u64,
    /// Publishes retried after a reconnect
    pub publish_retries: u64,
    /// Successful reconnects (the first connect excluded)
    pub reconnects: u64,
}

/// Live counters shared by the client tasks
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    frames_received: AtomicU64,
    frames_ignored: AtomicU64,
    decode_errors: AtomicU64,
    responses_resolved: AtomicU64,
    updates_broadcast: AtomicU64,
    feed_events: AtomicU64,
    requests_published: AtomicU64,
    publish_retries: AtomicU64,
    reconnects: AtomicU64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl StatsCounters {
            $(
                pub(crate) fn $name(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

counter! {
    frame_received => frames_received,
    frame_ignored => frames_ignored,
    decode_error => decode_errors,
    response_resolved => responses_resolved,
    update_broadcast => updates_broadcast,
    feed_event => feed_events,
    request_published => requests_published,
    publish_retry => publish_retries,
    reconnect => reconnects,
}

impl StatsCounters {
    /// Take a snapshot
    pub(crate) fn snapshot(&self) -> ClientStats {
        ClientStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_ignored: self.frames_ignored.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            responses_resolved: self.responses_resolved.load(Ordering::Relaxed),
            updates_broadcast: self.updates_broadcast.load(Ordering::Relaxed),
            feed_events: self.feed_events.load(Ordering::Relaxed),
            requests_published: self.requests_published.load(Ordering::Relaxed),
            publish_retries: self.publish_retries.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
