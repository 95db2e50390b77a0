//! Connection state machine
//!
//! Tracks the lifecycle of the broker session from the first dial to
//! shutdown.
//!
//! ```text
//! Disconnected ─► Connecting ─► Connected ─► Reconnecting ─► Connected ─► ...
//!   ▲    ▲            │             │                            │
//!   │    └─ failure ──┘             │  failure keeps the old handles: Connected
//!   └──── broker closed the link ───┘
//!
//! any state ─► Closed (terminal)
//! ```

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No usable connection (never connected, or the broker closed it)
    Disconnected,
    /// Dialing while no usable connection is installed
    Connecting,
    /// A connection is installed
    Connected,
    /// Dialing a replacement while the previous connection stays installed
    Reconnecting,
    /// Shut down
    Closed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected | Disconnected) => true,
            (Connected, Reconnecting | Disconnected) => true,
            (Reconnecting, Connected) => true,
            _ => false,
        }
    }

    /// Whether a live connection is installed
    pub fn has_connection(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Reconnecting)
    }

    /// Check if the session is shut down
    pub fn is_closed(&self) -> bool {
        *self == ConnectionState::Closed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        use ConnectionState::*;

        let path = [Disconnected, Connecting, Connected, Reconnecting, Connected, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_closed_is_terminal() {
        use ConnectionState::*;

        for next in [Disconnected, Connecting, Connected, Reconnecting, Closed] {
            assert!(!Closed.can_transition_to(next));
        }
    }

    #[test]
    fn test_failed_first_dial() {
        use ConnectionState::*;

        assert!(Connecting.can_transition_to(Disconnected));
        assert!(!Disconnected.has_connection());
        assert!(Reconnecting.has_connection());
        assert!(!Disconnected.can_transition_to(Connected));
    }

    #[test]
    fn test_lost_connection() {
        use ConnectionState::*;

        assert!(Connected.can_transition_to(Disconnected));
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(!Reconnecting.can_transition_to(Disconnected));
    }
}
