// Wire format module
// UTF-8 JSON text frames with an optional {event, data} envelope

pub mod frames;

// Re-export key types
pub use frames::{Envelope, InboundMessage, OutboundMessage, PingFrame};
