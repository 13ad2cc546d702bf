//! Event subscription client — owns at most one transport connection to the
//! event gateway, multiplexes pattern subscriptions over it, and recovers
//! from transport failure without dropping caller-held subscriptions.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pulse_protocol::{decode_frame, ClientFrame, ControlFrame, EventMessage, InboundFrame};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::reconnect::ReconnectBackoff;
use crate::registry::SubscriptionRegistry;
use crate::transport::{build_sse_url, build_ws_url, SseParser, TransportKind};
use crate::types::{
    ConnectionStatus, ErrorCallback, EventClientError, EventHandler, StatusCallback,
};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;

/// Resolved configuration, produced by the builder.
pub(crate) struct ClientConfig {
    pub base_url: String,
    pub project: Option<String>,
    pub transport: TransportKind,
    pub sse_path: String,
    pub keep_alive_interval: Duration,
    pub backoff: ReconnectBackoff,
    pub on_error: Option<ErrorCallback>,
    pub on_status_change: Option<StatusCallback>,
}

/// Handle to the live connection driver task.
struct ConnHandle {
    id: u64,
    /// Control-frame channel. `None` for SSE, which has no client→server path.
    cmd_tx: Option<mpsc::UnboundedSender<ClientFrame>>,
    cancel: CancellationToken,
}

struct State {
    registry: SubscriptionRegistry,
    status: ConnectionStatus,
    /// Consecutive reconnect attempts; reset to zero on every successful open.
    attempts: u32,
    next_conn_id: u64,
    conn: Option<ConnHandle>,
    reconnect_timer: Option<CancellationToken>,
}

pub(crate) struct Inner {
    config: ClientConfig,
    state: Mutex<State>,
}

/// Client for the event gateway's push channel.
///
/// Cheap to clone (Arc-backed); one instance is enough for most apps, built
/// once at the composition root and handed to whoever needs it. Connections
/// open lazily on the first [`subscribe`](Self::subscribe) and are torn down
/// when the last subscription goes away. Must be used within a Tokio runtime.
///
/// Create via [`EventClientBuilder`](crate::builder::EventClientBuilder).
#[derive(Clone)]
pub struct EventClient {
    inner: Arc<Inner>,
}

/// Caller-held handle for one registered handler.
///
/// Dropping the handle does nothing; call [`unsubscribe`](Self::unsubscribe)
/// to remove the handler. Removing the last handler for a pattern deletes the
/// pattern; removing the last pattern closes the transport.
pub struct Subscription {
    inner: Arc<Inner>,
    pattern: String,
    id: Uuid,
}

impl EventClient {
    /// Start a new builder.
    pub fn builder() -> crate::builder::EventClientBuilder {
        crate::builder::EventClientBuilder::new()
    }

    pub(crate) fn from_config(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State {
                    registry: SubscriptionRegistry::new(),
                    status: ConnectionStatus::Disconnected,
                    attempts: 0,
                    next_conn_id: 0,
                    conn: None,
                    reconnect_timer: None,
                }),
            }),
        }
    }

    /// Register `handler` under `pattern` and return its handle.
    ///
    /// Patterns are an exact event type (`"user.created"`), a dot-star
    /// prefix (`"counter.*"`), or the global wildcard (`"*"`). If the
    /// transport is open, a full-resync subscribe frame is pushed right away;
    /// otherwise the pattern is flushed when the connection opens. A client
    /// that is `Disconnected` starts connecting.
    ///
    /// Never fails; transport problems surface through `on_error`.
    pub fn subscribe(
        &self,
        pattern: impl Into<String>,
        handler: impl Fn(&EventMessage) + Send + Sync + 'static,
    ) -> Subscription {
        let pattern = pattern.into();
        let handler: EventHandler = Arc::new(handler);

        let mut attempt = None;
        let id;
        {
            let mut st = self.inner.state.lock();
            let (new_id, brand_new) = st.registry.insert(&pattern, handler);
            id = new_id;

            if brand_new {
                if st.status == ConnectionStatus::Connected {
                    let patterns = st.registry.all_active();
                    Inner::send_control(&st, ClientFrame::Subscribe { patterns });
                } else {
                    st.registry.mark_pending(&pattern);
                }
            }

            if st.status == ConnectionStatus::Disconnected {
                attempt = begin_connect(&self.inner, &mut st);
            }
        }
        if let Some(attempt) = attempt {
            attempt.launch(&self.inner);
        }

        Subscription {
            inner: self.inner.clone(),
            pattern,
            id,
        }
    }

    /// Current connection status. Synchronous, no side effects.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    /// Snapshot of the registered pattern keys, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.state.lock().registry.registered()
    }

    /// Force-close any existing transport, reset the attempt counter, and —
    /// if at least one pattern is registered — connect again immediately.
    pub fn reconnect(&self) {
        let disconnected;
        let attempt;
        {
            let mut st = self.inner.state.lock();
            if let Some(timer) = st.reconnect_timer.take() {
                timer.cancel();
            }
            if let Some(conn) = st.conn.take() {
                conn.cancel.cancel();
            }
            disconnected = Inner::set_status_locked(&mut st, ConnectionStatus::Disconnected);
            st.attempts = 0;
            attempt = if st.registry.is_empty() {
                None
            } else {
                begin_connect(&self.inner, &mut st)
            };
        }
        if disconnected {
            self.inner.notify_status(ConnectionStatus::Disconnected);
        }
        if let Some(attempt) = attempt {
            attempt.launch(&self.inner);
        }
    }

    /// Tear down transport-level resources: cancel any scheduled reconnect,
    /// stop the keep-alive ping, close the transport, set `Disconnected`.
    ///
    /// Subscriptions are *not* cleared; they persist across a
    /// `close()`/`reconnect()` cycle. Idempotent.
    pub fn close(&self) {
        let changed;
        {
            let mut st = self.inner.state.lock();
            if let Some(timer) = st.reconnect_timer.take() {
                timer.cancel();
            }
            if let Some(conn) = st.conn.take() {
                conn.cancel.cancel();
            }
            changed = Inner::set_status_locked(&mut st, ConnectionStatus::Disconnected);
        }
        if changed {
            self.inner.notify_status(ConnectionStatus::Disconnected);
        }
    }
}

impl Subscription {
    /// The pattern this handler is registered under.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Remove exactly this handler instance from the registry.
    ///
    /// If it was the pattern's last handler, the pattern is dropped and — on
    /// an open WebSocket — a single-pattern unsubscribe frame is sent. If the
    /// registry is then empty, the transport is closed, pending reconnect
    /// timers included.
    pub fn unsubscribe(self) {
        let mut notify = None;
        let mut cancel_timer = None;
        let mut close_conn = None;
        {
            let mut st = self.inner.state.lock();
            let pattern_removed = st.registry.remove(&self.pattern, self.id);
            if pattern_removed {
                if st.status == ConnectionStatus::Connected {
                    Inner::send_control(
                        &st,
                        ClientFrame::Unsubscribe {
                            patterns: vec![self.pattern.clone()],
                        },
                    );
                }
                if st.registry.is_empty() {
                    cancel_timer = st.reconnect_timer.take();
                    close_conn = st.conn.take();
                    if Inner::set_status_locked(&mut st, ConnectionStatus::Disconnected) {
                        notify = Some(ConnectionStatus::Disconnected);
                    }
                }
            }
        }
        if let Some(timer) = cancel_timer {
            timer.cancel();
        }
        if let Some(conn) = close_conn {
            conn.cancel.cancel();
        }
        if let Some(status) = notify {
            self.inner.notify_status(status);
        }
    }
}

impl Inner {
    /// Update status in place. Returns whether it actually changed; the
    /// caller fires the observer *after* releasing the state lock.
    fn set_status_locked(st: &mut State, new: ConnectionStatus) -> bool {
        if st.status == new {
            return false;
        }
        st.status = new;
        true
    }

    fn notify_status(&self, status: ConnectionStatus) {
        tracing::debug!(status = %status, "connection status changed");
        if let Some(cb) = &self.config.on_status_change {
            cb(status);
        }
    }

    fn notify_error(&self, err: &EventClientError) {
        tracing::warn!(error = %err, "event client error");
        if let Some(cb) = &self.config.on_error {
            cb(err);
        }
    }

    /// Push a control frame to the live connection, if the transport has a
    /// client→server channel. SSE does not: pattern changes there only take
    /// effect after a full reconnect.
    fn send_control(st: &State, frame: ClientFrame) {
        match st.conn.as_ref().and_then(|c| c.cmd_tx.as_ref()) {
            Some(tx) => {
                let _ = tx.send(frame);
            }
            None => {
                tracing::debug!(
                    "transport cannot push pattern changes; reconnect to apply them"
                );
            }
        }
    }
}

/// A prepared connection attempt: the `connecting` notification to deliver
/// (when the status actually changed) and the driver task to spawn.
///
/// The driver is spawned only after the notification is out, so observers
/// always see `connecting` before the driver's `connected` — even when the
/// driver wins the race on a multi-threaded runtime.
struct ConnectAttempt {
    notify: Option<ConnectionStatus>,
    driver: BoxFuture<'static, ()>,
}

impl ConnectAttempt {
    fn launch(self, inner: &Inner) {
        if let Some(status) = self.notify {
            inner.notify_status(status);
        }
        tokio::spawn(self.driver);
    }
}

/// Prepare a connection attempt unless one is already in flight or open.
/// The caller releases the state lock, then calls [`ConnectAttempt::launch`].
fn begin_connect(inner: &Arc<Inner>, st: &mut State) -> Option<ConnectAttempt> {
    if matches!(
        st.status,
        ConnectionStatus::Connecting | ConnectionStatus::Connected
    ) {
        return None;
    }
    let changed = Inner::set_status_locked(st, ConnectionStatus::Connecting);

    st.next_conn_id += 1;
    let conn_id = st.next_conn_id;
    let cancel = CancellationToken::new();

    let driver: BoxFuture<'static, ()> = match inner.config.transport {
        TransportKind::WebSocket => {
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
            st.conn = Some(ConnHandle {
                id: conn_id,
                cmd_tx: Some(cmd_tx),
                cancel: cancel.clone(),
            });
            Box::pin(run_ws(inner.clone(), conn_id, cmd_rx, cancel))
        }
        TransportKind::Sse => {
            st.conn = Some(ConnHandle {
                id: conn_id,
                cmd_tx: None,
                cancel: cancel.clone(),
            });
            Box::pin(run_sse(inner.clone(), conn_id, cancel))
        }
    };

    Some(ConnectAttempt {
        notify: changed.then_some(ConnectionStatus::Connecting),
        driver,
    })
}

/// Schedule a one-shot reconnect timer per the backoff policy.
///
/// No-op for an idle client (nothing registered or pending): with no
/// subscribers there is nothing to reconnect for. When the attempt counter
/// has hit the configured maximum, surfaces the exhausted-retries error and
/// stops retrying until the caller invokes `reconnect()`.
fn schedule_reconnect(inner: &Arc<Inner>) {
    let mut st = inner.state.lock();
    if !st.registry.has_active() {
        tracing::debug!("no active subscriptions; staying disconnected");
        return;
    }

    if inner.config.backoff.exhausted(st.attempts) {
        let attempts = st.attempts;
        let changed = Inner::set_status_locked(&mut st, ConnectionStatus::Error);
        drop(st);
        if changed {
            inner.notify_status(ConnectionStatus::Error);
        }
        inner.notify_error(&EventClientError::ReconnectExhausted(attempts));
        return;
    }

    st.attempts += 1;
    let attempt = st.attempts;
    let delay = inner.config.backoff.delay_for_attempt(attempt);
    let token = CancellationToken::new();
    st.reconnect_timer = Some(token.clone());
    drop(st);

    tracing::info!(
        attempt,
        delay_ms = delay.as_millis() as u64,
        "scheduling reconnect"
    );

    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                let attempt;
                {
                    let mut st = inner.state.lock();
                    st.reconnect_timer = None;
                    attempt = begin_connect(&inner, &mut st);
                }
                if let Some(attempt) = attempt {
                    attempt.launch(&inner);
                }
            }
            _ = token.cancelled() => {}
        }
    });
}

#[derive(Debug)]
enum OpenOutcome {
    /// The connection this driver served was replaced or closed; stop.
    Stale,
    /// Transition to `Connected` done; the frame is the full-resync subscribe
    /// to send (WebSocket only), `None` when nothing is registered yet.
    Proceed(Option<ClientFrame>),
}

/// Transport open succeeded: reset the attempt counter, flush pending
/// patterns as one subscribe frame listing every active pattern.
fn on_transport_open(inner: &Arc<Inner>, conn_id: u64) -> OpenOutcome {
    let changed;
    let resync;
    {
        let mut st = inner.state.lock();
        if st.conn.as_ref().map(|c| c.id) != Some(conn_id) {
            return OpenOutcome::Stale;
        }
        st.attempts = 0;
        changed = Inner::set_status_locked(&mut st, ConnectionStatus::Connected);
        let patterns = st.registry.all_active();
        st.registry.clear_pending();
        resync = (!patterns.is_empty()).then_some(ClientFrame::Subscribe { patterns });
    }
    if changed {
        inner.notify_status(ConnectionStatus::Connected);
    }
    OpenOutcome::Proceed(resync)
}

/// Transport construction failed (bad address, refused connection, handshake
/// error). Same recovery path as a runtime failure.
fn connect_failed(inner: &Arc<Inner>, conn_id: u64, err: anyhow::Error) {
    let changed;
    {
        let mut st = inner.state.lock();
        if st.conn.as_ref().map(|c| c.id) != Some(conn_id) {
            return;
        }
        st.conn = None;
        changed = Inner::set_status_locked(&mut st, ConnectionStatus::Error);
    }
    if changed {
        inner.notify_status(ConnectionStatus::Error);
    }
    inner.notify_error(&EventClientError::Transport(err.to_string()));
    schedule_reconnect(inner);
}

/// Transport-level error on an established connection. Surfaces the error;
/// reconnection itself is driven by the subsequent stream end.
fn runtime_error(inner: &Arc<Inner>, conn_id: u64, err: anyhow::Error) {
    let changed;
    {
        let mut st = inner.state.lock();
        if st.conn.as_ref().map(|c| c.id) != Some(conn_id) {
            return;
        }
        changed = Inner::set_status_locked(&mut st, ConnectionStatus::Error);
    }
    if changed {
        inner.notify_status(ConnectionStatus::Error);
    }
    inner.notify_error(&EventClientError::Transport(err.to_string()));
}

/// The transport closed (remote disconnect or network drop): back to
/// `Disconnected`, then schedule a reconnect.
fn handle_disconnect(inner: &Arc<Inner>, conn_id: u64) {
    let changed;
    {
        let mut st = inner.state.lock();
        if st.conn.as_ref().map(|c| c.id) != Some(conn_id) {
            return;
        }
        st.conn = None;
        changed = Inner::set_status_locked(&mut st, ConnectionStatus::Disconnected);
    }
    if changed {
        inner.notify_status(ConnectionStatus::Disconnected);
    }
    schedule_reconnect(inner);
}

/// Classify one inbound text frame and act on it. Control frames are consumed
/// here; event frames go to dispatch; unparseable frames are dropped without
/// surfacing anything (not actionable by the caller).
fn handle_text(inner: &Arc<Inner>, text: &str) {
    match decode_frame(text) {
        Some(InboundFrame::Control(ctl)) => match ctl {
            ControlFrame::Connected { client_id } => {
                tracing::debug!(?client_id, "gateway acknowledged connection");
            }
            ControlFrame::Subscribed { patterns } => {
                tracing::debug!(?patterns, "subscribe acknowledged");
            }
            ControlFrame::Unsubscribed { patterns } => {
                tracing::debug!(?patterns, "unsubscribe acknowledged");
            }
            ControlFrame::Pong => {
                tracing::trace!("pong");
            }
        },
        Some(InboundFrame::Event(message)) => dispatch(inner, &message),
        None => {
            tracing::debug!("dropping unparseable frame");
        }
    }
}

/// Invoke every handler registered under a matching pattern, in registration
/// order within each pattern. A panicking handler is logged and isolated; the
/// remaining handlers still run.
fn dispatch(inner: &Arc<Inner>, message: &EventMessage) {
    let event_type = message.effective_type().to_string();
    // Collect outside the lock so handlers can call back into the client.
    let handlers = inner.state.lock().registry.handlers_matching(&event_type);
    for handler in handlers {
        if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
            tracing::error!(event_type = %event_type, "event handler panicked");
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &ClientFrame) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize control frame");
            return true;
        }
    };
    sink.send(Message::Text(json)).await.is_ok()
}

/// Single WebSocket connection lifecycle: connect, resync, then the message
/// loop with keep-alive until the stream ends or the client closes.
async fn run_ws(
    inner: Arc<Inner>,
    conn_id: u64,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientFrame>,
    cancel: CancellationToken,
) {
    let url = {
        let st = inner.state.lock();
        build_ws_url(
            &inner.config.base_url,
            inner.config.project.as_deref(),
            &st.registry.all_active(),
        )
    };
    tracing::info!(url = %url, "connecting to event gateway");

    let connected = tokio::select! {
        r = tokio_tungstenite::connect_async(url.as_str()) => r,
        _ = cancel.cancelled() => return,
    };
    let ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            connect_failed(&inner, conn_id, e.into());
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();

    let resync = match on_transport_open(&inner, conn_id) {
        OpenOutcome::Stale => return,
        OpenOutcome::Proceed(frame) => frame,
    };
    if let Some(frame) = resync {
        if !send_frame(&mut sink, &frame).await {
            handle_disconnect(&inner, conn_id);
            return;
        }
    }

    // Keep-alive starts one interval after open; it dies with this task, so
    // it can never ping a transport that is not open.
    let period = inner.config.keep_alive_interval;
    let mut keep_alive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        // Biased so queued control frames (e.g. a final unsubscribe) flush
        // before a teardown is honored.
        tokio::select! {
            biased;
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(frame) => {
                        if !send_frame(&mut sink, &frame).await {
                            break;
                        }
                    }
                    // Sender gone: this connection was torn down and state
                    // already updated by whoever replaced it.
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                }
            }
            _ = cancel.cancelled() => {
                // close()/reconnect() already updated state.
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            _ = keep_alive.tick() => {
                if !send_frame(&mut sink, &ClientFrame::Ping).await {
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_text(&inner, &text),
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("gateway closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        runtime_error(&inner, conn_id, e.into());
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    handle_disconnect(&inner, conn_id);
}

/// Single SSE connection lifecycle. Patterns ride in the connect URL; there
/// is no client→server channel and no keep-alive ping. An SSE stream error
/// does not raise a separate close event, so it triggers teardown and
/// reconnect scheduling directly.
async fn run_sse(inner: Arc<Inner>, conn_id: u64, cancel: CancellationToken) {
    let url = {
        let st = inner.state.lock();
        build_sse_url(
            &inner.config.base_url,
            &inner.config.sse_path,
            &st.registry.all_active(),
        )
    };
    tracing::info!(url = %url, "connecting to event stream");

    let client = reqwest::Client::new();
    let response = tokio::select! {
        r = client.get(&url).send() => r,
        _ = cancel.cancelled() => return,
    };
    let response = match response.and_then(|r| r.error_for_status()) {
        Ok(r) => r,
        Err(e) => {
            connect_failed(&inner, conn_id, e.into());
            return;
        }
    };

    match on_transport_open(&inner, conn_id) {
        OpenOutcome::Stale => return,
        // The pattern set was baked into the URL; nothing to send.
        OpenOutcome::Proceed(_) => {}
    }

    let mut body = response.bytes_stream();
    let mut parser = SseParser::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = body.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        for data in parser.feed(&bytes) {
                            handle_text(&inner, &data);
                        }
                    }
                    Some(Err(e)) => {
                        runtime_error(&inner, conn_id, e.into());
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    handle_disconnect(&inner, conn_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_client() -> (EventClient, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let client = EventClient::builder()
            .on_status_change(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();
        (client, count)
    }

    #[test]
    fn status_notification_suppressed_for_same_value() {
        let (client, count) = counting_client();

        // Already disconnected: close() must not re-announce.
        client.close();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        client.inner.state.lock().status = ConnectionStatus::Connected;
        client.close();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        client.close();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reconnect_suppressed_when_idle() {
        let (client, _) = counting_client();
        schedule_reconnect(&client.inner);

        let st = client.inner.state.lock();
        assert!(st.reconnect_timer.is_none());
        assert_eq!(st.attempts, 0);
        assert_eq!(st.status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn reconnect_scheduled_when_patterns_active() {
        let (client, _) = counting_client();
        client
            .inner
            .state
            .lock()
            .registry
            .insert("counter.*", Arc::new(|_| {}));

        schedule_reconnect(&client.inner);
        {
            let st = client.inner.state.lock();
            assert!(st.reconnect_timer.is_some());
            assert_eq!(st.attempts, 1);
        }
        client.close();
    }

    #[test]
    fn exhausted_retries_surface_distinct_error() {
        let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let client = EventClient::builder()
            .max_reconnect_attempts(2)
            .on_error(move |e| sink.lock().push(e.to_string()))
            .build()
            .unwrap();
        {
            let mut st = client.inner.state.lock();
            st.registry.insert("counter.*", Arc::new(|_| {}));
            st.attempts = 2;
        }

        schedule_reconnect(&client.inner);

        let st = client.inner.state.lock();
        assert_eq!(st.status, ConnectionStatus::Error);
        assert!(st.reconnect_timer.is_none());
        drop(st);
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("max reconnection attempts reached"));
    }

    #[test]
    fn transport_open_sends_full_resync_and_clears_pending() {
        let (client, _) = counting_client();
        {
            let mut st = client.inner.state.lock();
            st.registry.insert("counter.*", Arc::new(|_| {}));
            st.registry.insert("user.created", Arc::new(|_| {}));
            st.registry.mark_pending("user.created");
            st.status = ConnectionStatus::Connecting;
            st.attempts = 3;
            st.next_conn_id = 1;
            st.conn = Some(ConnHandle {
                id: 1,
                cmd_tx: None,
                cancel: CancellationToken::new(),
            });
        }

        match on_transport_open(&client.inner, 1) {
            OpenOutcome::Proceed(Some(ClientFrame::Subscribe { patterns })) => {
                assert_eq!(patterns, vec!["counter.*", "user.created"]);
            }
            other => panic!("expected full resync frame, got {other:?}"),
        }

        let st = client.inner.state.lock();
        assert_eq!(st.status, ConnectionStatus::Connected);
        assert_eq!(st.attempts, 0);
        assert_eq!(st.registry.all_active(), vec!["counter.*", "user.created"]);
    }

    #[test]
    fn stale_driver_callbacks_are_ignored() {
        let (client, count) = counting_client();
        {
            let mut st = client.inner.state.lock();
            st.registry.insert("counter.*", Arc::new(|_| {}));
            st.next_conn_id = 2;
            st.conn = Some(ConnHandle {
                id: 2,
                cmd_tx: None,
                cancel: CancellationToken::new(),
            });
        }

        // Driver for a replaced connection must not touch state.
        assert!(matches!(
            on_transport_open(&client.inner, 1),
            OpenOutcome::Stale
        ));
        handle_disconnect(&client.inner, 1);

        let st = client.inner.state.lock();
        assert!(st.conn.is_some());
        assert_eq!(st.status, ConnectionStatus::Disconnected);
        drop(st);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispatch_isolates_panicking_handlers() {
        let (client, _) = counting_client();
        let reached = Arc::new(AtomicUsize::new(0));
        let second = reached.clone();
        {
            let mut st = client.inner.state.lock();
            st.registry
                .insert("counter.*", Arc::new(|_| panic!("handler bug")));
            st.registry.insert("*", Arc::new(move |_| {
                second.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let message = EventMessage {
            channel: "events:counter".into(),
            event_type: Some("counter.updated".into()),
            payload: serde_json::json!({"value": 5}),
            timestamp: None,
            source_module: None,
            correlation_id: None,
        };
        dispatch(&client.inner, &message);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_uses_channel_tail_when_type_missing() {
        let (client, _) = counting_client();
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = hits.clone();
        client.inner.state.lock().registry.insert(
            "counter.updated",
            Arc::new(move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let message = EventMessage {
            channel: "events:counter.updated".into(),
            event_type: None,
            payload: serde_json::Value::Null,
            timestamp: None,
            source_module: None,
            correlation_id: None,
        };
        dispatch(&client.inner, &message);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
