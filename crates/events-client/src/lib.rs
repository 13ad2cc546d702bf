//! `pulse-events` — event subscription client for the Pulse platform's
//! event gateway.
//!
//! The client owns at most one transport connection (WebSocket by default,
//! SSE as a push-only fallback), a registry of pattern → handler
//! subscriptions, and a reconnection policy. Callers subscribe to patterns;
//! the client lazily opens a connection, matches each pushed event against
//! every registered pattern, and invokes the matching handlers. On transport
//! failure it schedules an exponential-backoff reconnect that resends the
//! full pattern set.
//!
//! # Example
//!
//! ```rust,no_run
//! # use pulse_events::EventClientBuilder;
//! # async fn demo() -> Result<(), pulse_events::EventClientError> {
//! let client = EventClientBuilder::new()
//!     .base_url("https://events.example.com")
//!     .on_status_change(|status| tracing::info!(%status, "gateway status"))
//!     .on_error(|err| tracing::warn!(%err, "gateway error"))
//!     .build()?;
//!
//! let sub = client.subscribe("counter.*", |event| {
//!     println!("{}: {}", event.effective_type(), event.payload);
//! });
//!
//! // ... later:
//! sub.unsubscribe(); // last subscription gone -> transport closes
//! # Ok(())
//! # }
//! ```
//!
//! # Connection flow
//!
//! 1. First `subscribe()` on a disconnected client starts a connection
//!    attempt (`disconnected` → `connecting`).
//! 2. On open: attempt counter resets, all pending patterns are flushed as
//!    one full-resync subscribe frame, keep-alive pings start (WebSocket).
//! 3. Events are dispatched to every handler whose pattern matches, in
//!    registration order per pattern; handler panics are isolated.
//! 4. On drop: reconnect with capped exponential backoff — but only while at
//!    least one subscription is alive. Delivery is at-most-once; events
//!    pushed while disconnected are never replayed.

pub mod builder;
pub mod client;
pub mod reconnect;
mod registry;
pub mod transport;
pub mod types;

pub use builder::EventClientBuilder;
pub use client::{EventClient, Subscription};
pub use reconnect::ReconnectBackoff;
pub use registry::matches_pattern;
pub use transport::TransportKind;
pub use types::{ConnectionStatus, EventClientError};

// Re-export the wire types so applications never need pulse-protocol directly.
pub use pulse_protocol::{ClientFrame, ControlFrame, EventMessage, InboundFrame};
