//! Builder pattern for constructing an [`EventClient`].

use std::sync::Arc;
use std::time::Duration;

use crate::client::{ClientConfig, EventClient};
use crate::reconnect::ReconnectBackoff;
use crate::transport::TransportKind;
use crate::types::{ConnectionStatus, EventClientError};

/// Fluent builder for [`EventClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use pulse_events::EventClientBuilder;
/// let client = EventClientBuilder::new()
///     .base_url("https://events.example.com")
///     .reconnect_base_delay(std::time::Duration::from_secs(3))
///     .on_status_change(|status| eprintln!("status: {status}"))
///     .build()
///     .unwrap();
/// ```
pub struct EventClientBuilder {
    base_url: String,
    project: Option<String>,
    transport: TransportKind,
    sse_path: String,
    keep_alive_interval: Duration,
    backoff: ReconnectBackoff,
    on_error: Option<crate::types::ErrorCallback>,
    on_status_change: Option<crate::types::StatusCallback>,
}

impl EventClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            project: None,
            transport: TransportKind::default(),
            sse_path: "/sse/subscribe".into(),
            keep_alive_interval: Duration::from_secs(25),
            backoff: ReconnectBackoff::default(),
            on_error: None,
            on_status_change: None,
        }
    }

    /// Override the gateway base URL (e.g. `https://events.example.com`).
    /// `http(s)` schemes are swapped for `ws(s)` on WebSocket connects.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Project slug appended to the connect URL for local development
    /// gateways (localhost/127.0.0.1 only).
    pub fn project(mut self, slug: impl Into<String>) -> Self {
        self.project = Some(slug.into());
        self
    }

    /// Select the transport. WebSocket is the default; SSE is the push-only
    /// fallback (see [`TransportKind::Sse`] for its constraints).
    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.transport = kind;
        self
    }

    /// Override the SSE endpoint path (default `/sse/subscribe`; use
    /// `/stream` when routing through the platform proxy).
    pub fn sse_path(mut self, path: impl Into<String>) -> Self {
        self.sse_path = path.into();
        self
    }

    /// Override the keep-alive ping interval (default 25 s, WebSocket only).
    pub fn keep_alive_interval(mut self, d: Duration) -> Self {
        self.keep_alive_interval = d;
        self
    }

    /// Delay before the first reconnect attempt (default 3 s).
    pub fn reconnect_base_delay(mut self, d: Duration) -> Self {
        self.backoff.base_delay = d;
        self
    }

    /// Maximum consecutive reconnect attempts before giving up
    /// (default 0 = unbounded).
    pub fn max_reconnect_attempts(mut self, n: u32) -> Self {
        self.backoff.max_attempts = n;
        self
    }

    /// Replace the whole backoff policy.
    pub fn reconnect_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Register the connection-error observer. All connection/retry-level
    /// failures are reported here; nothing is ever thrown at the caller.
    pub fn on_error(
        mut self,
        f: impl Fn(&EventClientError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Register the status-transition observer. Fired only when the status
    /// actually changes.
    pub fn on_status_change(
        mut self,
        f: impl Fn(ConnectionStatus) + Send + Sync + 'static,
    ) -> Self {
        self.on_status_change = Some(Arc::new(f));
        self
    }

    /// Build the [`EventClient`].
    pub fn build(self) -> Result<EventClient, EventClientError> {
        if self.base_url.is_empty() {
            return Err(EventClientError::Config("base_url is required".into()));
        }
        if self.backoff.factor < 1.0 || !self.backoff.factor.is_finite() {
            return Err(EventClientError::Config(
                "backoff factor must be >= 1.0".into(),
            ));
        }

        Ok(EventClient::from_config(ClientConfig {
            base_url: self.base_url,
            project: self.project,
            transport: self.transport,
            sse_path: self.sse_path,
            keep_alive_interval: self.keep_alive_interval,
            backoff: self.backoff,
            on_error: self.on_error,
            on_status_change: self.on_status_change,
        }))
    }
}

impl Default for EventClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_base_url_rejected() {
        let err = EventClientBuilder::new().base_url("").build().err().unwrap();
        assert!(matches!(err, EventClientError::Config(_)));
    }

    #[test]
    fn bad_backoff_factor_rejected() {
        let err = EventClientBuilder::new()
            .reconnect_backoff(ReconnectBackoff {
                factor: 0.5,
                ..Default::default()
            })
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, EventClientError::Config(_)));
    }

    #[test]
    fn defaults_build() {
        let client = EventClientBuilder::new().build().unwrap();
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(client.subscriptions().is_empty());
    }
}
