//! Wire-level constants

/// Sentinel action for responses whose tag is not recognized
pub const UNKNOWN_ACTION: &str = "unknownMethod";

/// Content type of published request frames
pub const CONTENT_TYPE: &str = "text/plain";

/// Suffix of the inbound queue (and its routing key): `{user}_i`
pub const INBOUND_SUFFIX: &str = "_i";

/// Suffix of the per-user exchange: `{user}_ex`
pub const EXCHANGE_SUFFIX: &str = "_ex";

/// Suffix of the outbound routing key: `{user}_o`
pub const OUTBOUND_SUFFIX: &str = "_o";

/// Default capacity of every broadcast stream
pub const DEFAULT_STREAM_CAPACITY: usize = 100;
