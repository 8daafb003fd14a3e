// Connection management module

pub mod heartbeat;
pub mod manager;
pub mod queue;
pub mod reconnect;
pub mod state_machine;
mod timer;

pub use heartbeat::HeartbeatMonitor;
pub use manager::ConnectionManager;
pub use queue::OutboundQueue;
pub use reconnect::{base_delay, jittered_delay, ReconnectScheduler};
pub use state_machine::{next_state, ConnectionState, StatusSnapshot, Trigger};
