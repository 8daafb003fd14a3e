//! Realtime connection client
//!
//! A single logical duplex channel to a backend that tolerates backend
//! absence, network failure and staleness without surfacing fatal errors.
//! Without a usable destination it falls back to an in-process loopback
//! so every consumer code path runs the same way offline.

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod logging;
pub mod protocol;
pub mod transport;

pub use config::{ConnectOptions, ConnectionConfig};
pub use connection::{ConnectionManager, ConnectionState, StatusSnapshot};
pub use error::{ConnectionError, ConnectionResult, ErrorKind};
pub use events::{EventName, EventPayload, EventRegistry, Subscription};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
