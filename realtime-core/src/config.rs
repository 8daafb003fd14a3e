// Connection configuration
// Builder-style config for the manager plus per-call connect options

use std::time::Duration;

/// Environment variable holding an explicitly configured address
pub const ADDRESS_ENV: &str = "REALTIME_WS_URL";

/// Environment variable holding the page origin used for address inference
pub const ORIGIN_ENV: &str = "REALTIME_ORIGIN";

/// Path used when the destination has to be derived from an origin
pub const DEFAULT_DESTINATION_PATH: &str = "/ws";

/// Reconnect backoff configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on the un-jittered delay
    pub max_delay: Duration,
    /// Symmetric jitter applied to each delay, in [0, 1]
    pub jitter_ratio: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.2,
        }
    }
}

/// Heartbeat configuration
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    /// Time between heartbeat pings
    pub interval: Duration,
    /// Maximum silence tolerated before the connection is considered stale
    pub stale_threshold: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            stale_threshold: Duration::from_secs(45),
        }
    }
}

/// Outbound queue configuration
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 200 }
    }
}

/// Manager-wide connection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Explicitly configured address (`ws://`, `wss://`, `http(s)://` or bare `host:port`)
    pub address: Option<String>,
    /// Origin to infer an address from when none is configured
    pub origin: Option<String>,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    pub queue: QueueConfig,
    /// Simulated latency before the loopback transport reports open
    pub mock_open_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: None,
            origin: None,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            queue: QueueConfig::default(),
            mock_open_delay: Duration::from_millis(50),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration builder
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Default configuration with address and origin taken from the environment
    pub fn from_env() -> Self {
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            address: read(ADDRESS_ENV),
            origin: read(ORIGIN_ENV),
            ..Self::default()
        }
    }
}

/// Connection configuration builder
#[derive(Default)]
pub struct ConnectionConfigBuilder {
    address: Option<String>,
    origin: Option<String>,
    reconnect: Option<ReconnectConfig>,
    heartbeat: Option<HeartbeatConfig>,
    queue_capacity: Option<usize>,
    mock_open_delay: Option<Duration>,
}

impl ConnectionConfigBuilder {
    /// Set an explicit destination address
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the origin used for address inference
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Set reconnect backoff parameters
    pub fn reconnect(
        mut self,
        initial_delay: Duration,
        max_delay: Duration,
        jitter_ratio: f64,
    ) -> Self {
        self.reconnect = Some(ReconnectConfig {
            initial_delay,
            max_delay,
            jitter_ratio,
        });
        self
    }

    /// Set heartbeat interval and staleness threshold
    pub fn heartbeat(mut self, interval: Duration, stale_threshold: Duration) -> Self {
        self.heartbeat = Some(HeartbeatConfig {
            interval,
            stale_threshold,
        });
        self
    }

    /// Set outbound queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set simulated open delay of the loopback transport
    pub fn mock_open_delay(mut self, delay: Duration) -> Self {
        self.mock_open_delay = Some(delay);
        self
    }

    /// Build configuration, clamping out-of-range values
    pub fn build(self) -> ConnectionConfig {
        let default = ConnectionConfig::default();

        let mut reconnect = self.reconnect.unwrap_or(default.reconnect);
        if !reconnect.jitter_ratio.is_finite() {
            reconnect.jitter_ratio = 0.0;
        }
        reconnect.jitter_ratio = reconnect.jitter_ratio.clamp(0.0, 1.0);
        reconnect.max_delay = reconnect.max_delay.max(reconnect.initial_delay);

        let mut heartbeat = self.heartbeat.unwrap_or(default.heartbeat);
        heartbeat.interval = heartbeat.interval.max(Duration::from_millis(1));
        heartbeat.stale_threshold = heartbeat.stale_threshold.max(Duration::from_millis(1));

        ConnectionConfig {
            address: self.address,
            origin: self.origin,
            reconnect,
            heartbeat,
            queue: QueueConfig {
                capacity: self.queue_capacity.unwrap_or(default.queue.capacity).max(1),
            },
            mock_open_delay: self.mock_open_delay.unwrap_or(default.mock_open_delay),
        }
    }
}

/// Subprotocols requested during the handshake; accepts one or many
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subprotocols(Vec<String>);

impl Subprotocols {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Subprotocols {
    fn from(value: &str) -> Self {
        Self(vec![value.to_string()])
    }
}

impl From<String> for Subprotocols {
    fn from(value: String) -> Self {
        Self(vec![value])
    }
}

impl From<Vec<String>> for Subprotocols {
    fn from(value: Vec<String>) -> Self {
        Self(value)
    }
}

impl From<&[&str]> for Subprotocols {
    fn from(value: &[&str]) -> Self {
        Self(value.iter().map(|s| s.to_string()).collect())
    }
}

/// Per-call options for [`crate::connection::ConnectionManager::connect`]
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub destination_path: Option<String>,
    pub subprotocols: Subprotocols,
    pub auto_reconnect: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            destination_path: None,
            subprotocols: Subprotocols::default(),
            auto_reconnect: true,
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn destination_path(mut self, path: impl Into<String>) -> Self {
        self.destination_path = Some(path.into());
        self
    }

    pub fn subprotocols(mut self, protocols: impl Into<Subprotocols>) -> Self {
        self.subprotocols = protocols.into();
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }
}
