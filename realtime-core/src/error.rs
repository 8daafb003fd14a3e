// Error types for the realtime connection client
// None of these escape a public operation; they travel as `error` events

use thiserror::Error;

/// Type alias for connection results
pub type ConnectionResult<T> = Result<T, ConnectionError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectionError {
    #[error("Transport construction failed: {message}")]
    ConstructionFailure {
        message: String,
        cause: Option<String>,
    },

    #[error("Transport error: {message}")]
    TransportError {
        message: String,
        cause: Option<String>,
    },

    #[error("Stale connection: {message}")]
    StaleConnection {
        message: String,
        idle_ms: u64,
    },

    #[error("Send failed: {message}")]
    SendFailure {
        message: String,
        cause: Option<String>,
    },

    #[error("Invalid address: {message}")]
    InvalidAddress {
        message: String,
    },
}

/// Coarse classification of a [`ConnectionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConstructionFailure,
    TransportError,
    StaleConnection,
    SendFailure,
    InvalidAddress,
}

impl ConnectionError {
    /// Create a construction failure with the underlying cause
    pub fn construction(message: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::ConstructionFailure {
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportError {
            message: message.into(),
            cause: None,
        }
    }

    /// Create a transport error with the underlying cause
    pub fn transport_with_cause(message: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::TransportError {
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }

    /// Create a staleness error
    pub fn stale(idle_ms: u64, threshold_ms: u64) -> Self {
        Self::StaleConnection {
            message: format!(
                "no inbound traffic for {}ms (threshold {}ms)",
                idle_ms, threshold_ms
            ),
            idle_ms,
        }
    }

    /// Create a send failure
    pub fn send(message: impl Into<String>) -> Self {
        Self::SendFailure {
            message: message.into(),
            cause: None,
        }
    }

    /// Create a send failure with the underlying cause
    pub fn send_with_cause(message: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::SendFailure {
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }

    /// Create an invalid address error
    pub fn invalid_address(message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::ConstructionFailure { .. } => ErrorKind::ConstructionFailure,
            ConnectionError::TransportError { .. } => ErrorKind::TransportError,
            ConnectionError::StaleConnection { .. } => ErrorKind::StaleConnection,
            ConnectionError::SendFailure { .. } => ErrorKind::SendFailure,
            ConnectionError::InvalidAddress { .. } => ErrorKind::InvalidAddress,
        }
    }

    /// Original cause, where one was captured
    pub fn cause(&self) -> Option<&str> {
        match self {
            ConnectionError::ConstructionFailure { cause, .. }
            | ConnectionError::TransportError { cause, .. }
            | ConnectionError::SendFailure { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ConnectionError::ConstructionFailure { message, .. }
            | ConnectionError::TransportError { message, .. }
            | ConnectionError::StaleConnection { message, .. }
            | ConnectionError::SendFailure { message, .. }
            | ConnectionError::InvalidAddress { message } => message,
        }
    }
}
