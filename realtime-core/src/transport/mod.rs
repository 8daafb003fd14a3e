// Transport abstraction
// The connection manager only sees this capability set, never a concrete socket

use crate::error::{ConnectionError, ConnectionResult};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use self::destination::{normalize_address, resolve_destination, Destination};
pub use self::loopback::LoopbackTransport;
pub use self::websocket::{WebSocketConnector, WebSocketTransport};

mod destination;
mod loopback;
mod websocket;

/// Close code used for orderly client-initiated closes
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code used when the heartbeat declares the connection stale
pub const CLOSE_STALE: u16 = 4000;

/// Transport readiness, mirroring the WebSocket `readyState` values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Ready state shared between a transport handle and its background task
#[derive(Debug, Clone)]
pub(crate) struct SharedReadyState(Arc<AtomicU8>);

impl SharedReadyState {
    pub(crate) fn new(state: ReadyState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub(crate) fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ReadyState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move to `Closed`; false if another path got there first
    pub(crate) fn finish(&self) -> bool {
        self.0.swap(ReadyState::Closed as u8, Ordering::AcqRel) != ReadyState::Closed as u8
    }

    /// Move from `from` to `to`; false if the state was something else
    pub(crate) fn transition(&self, from: ReadyState, to: ReadyState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Callbacks a transport reports through
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed { code: u16, reason: String },
    Errored(ConnectionError),
}

/// Where a transport delivers its events.
///
/// Delivery is queued, never synchronous, so a transport may report from
/// inside any of its own methods.
#[derive(Clone)]
pub struct TransportSink {
    notify: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl TransportSink {
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn(TransportEvent) + Send + Sync + 'static,
    {
        Self {
            notify: Arc::new(notify),
        }
    }

    /// Sink backed by a channel, mostly useful for driving a transport directly
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    pub fn opened(&self) {
        (self.notify)(TransportEvent::Opened);
    }

    pub fn message(&self, frame: String) {
        (self.notify)(TransportEvent::Message(frame));
    }

    pub fn closed(&self, code: u16, reason: impl Into<String>) {
        (self.notify)(TransportEvent::Closed {
            code,
            reason: reason.into(),
        });
    }

    pub fn errored(&self, error: ConnectionError) {
        (self.notify)(TransportEvent::Errored(error));
    }
}

impl fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSink").finish_non_exhaustive()
    }
}

/// A realtime duplex channel.
///
/// Methods never block; outcomes arrive through the [`TransportSink`].
pub trait Transport: Send {
    /// Start connecting; events are reported to `sink` from now on
    fn open(&mut self, sink: TransportSink) -> ConnectionResult<()>;

    /// Transmit one text frame; only valid while [`ReadyState::Open`]
    fn send(&mut self, frame: &str) -> ConnectionResult<()>;

    /// Close the channel; a `Closed` event follows once the close completes or times out
    fn close(&mut self, code: u16, reason: &str);

    fn ready_state(&self) -> ReadyState;
}

/// Builds real network transports.
///
/// A manager without a connector has no network support and runs in mock mode.
pub trait TransportConnector: Send + Sync {
    fn create(&self, url: &str, subprotocols: &[String]) -> ConnectionResult<Box<dyn Transport>>;
}
