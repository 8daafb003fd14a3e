// Connection state machine
// Pure transition table; side effects live in the manager

use serde::Serialize;
use std::fmt;

/// Connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Mock,
    Connecting,
    Open,
    Closing,
    Closed,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Mock => "mock",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Error => "error",
        }
    }

    /// States from which `connect()` starts a new attempt
    pub fn accepts_connect(&self) -> bool {
        matches!(
            self,
            ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Error
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Things that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Connect { mock: bool },
    TransportOpen,
    TransportError,
    TransportClose,
    Disconnect,
    Settled,
}

/// Next state for `trigger`, or `None` when the trigger does not apply
pub fn next_state(current: ConnectionState, trigger: Trigger) -> Option<ConnectionState> {
    use ConnectionState::*;

    match (current, trigger) {
        (Idle | Closed | Error, Trigger::Connect { mock: true }) => Some(Mock),
        (Idle | Closed | Error, Trigger::Connect { mock: false }) => Some(Connecting),

        (Connecting, Trigger::TransportOpen) => Some(Open),
        // loopback open keeps the dedicated mock state
        (Mock, Trigger::TransportOpen) => Some(Mock),

        (Connecting | Open | Mock, Trigger::TransportError) => Some(Error),
        (Connecting | Open | Mock, Trigger::TransportClose) => Some(Closed),

        (Closed, Trigger::Disconnect) => None,
        (_, Trigger::Disconnect) => Some(Closing),
        (Closing, Trigger::Settled) => Some(Closed),

        _ => None,
    }
}

/// Immutable view returned by `status()` and carried by `status` events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    pub url: Option<String>,
    pub is_mock: bool,
    pub reconnect_attempt: u32,
    pub last_open_at_ms: Option<i64>,
    pub last_inbound_at_ms: Option<i64>,
    pub queued_count: usize,
}
