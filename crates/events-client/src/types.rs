//! Core types: connection status, errors, and observer callbacks.

use std::fmt;
use std::sync::Arc;

use pulse_protocol::EventMessage;

/// Lifecycle state of the sole transport connection.
///
/// Exactly one value holds at any time. Transitions are observable via the
/// status-change callback registered on the builder, which fires only on
/// actual changes (same-state re-entry is suppressed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No transport, no connection attempt in flight. Initial state.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Transport is open and events are flowing.
    Connected,
    /// The transport failed, or reconnect attempts were exhausted.
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Errors surfaced through the `on_error` callback.
///
/// Connection-level failures never escape the client's internal loop as
/// panics or returned errors; they are reported here, fire-and-forget.
#[derive(thiserror::Error, Debug)]
pub enum EventClientError {
    /// Invalid builder configuration.
    #[error("config: {0}")]
    Config(String),
    /// Transport construction or runtime failure.
    #[error("transport: {0}")]
    Transport(String),
    /// The attempt counter reached the configured maximum. No further
    /// automatic retries; call `reconnect()` to resume.
    #[error("max reconnection attempts reached ({0} attempts)")]
    ReconnectExhausted(u32),
}

/// Callback invoked with each event message matching a subscribed pattern.
pub type EventHandler = Arc<dyn Fn(&EventMessage) + Send + Sync>;

/// Observer for connection status transitions.
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Observer for connection-level errors.
pub type ErrorCallback = Arc<dyn Fn(&EventClientError) + Send + Sync>;
