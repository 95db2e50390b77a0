//! Response routing
//!
//! Inbound responses are routed either to the caller waiting for them or,
//! when nobody claimed them, to the broadcast streams.
//!
//! # Architecture
//!
//! ```text
//!                     Update Consumer
//!                           │ decode
//!                           ▼
//!             CorrelationRegistry::resolve(key)
//!                  │                    │
//!             waiter found         Err(response)
//!                  │                    │
//!                  ▼                    ▼
//!         oneshot::Sender      BroadcastHub::send_update()
//!                  │                    │ + send_category() if the
//!                  ▼                    ▼   action implies one
//!         PendingResponse       broadcast::Receiver (per subscriber)
//! ```

pub mod broadcast;
pub mod correlation;

pub use broadcast::{BroadcastHub, CategoryUpdate};
pub use correlation::{CorrelationKey, CorrelationRegistry, PendingResponse};
