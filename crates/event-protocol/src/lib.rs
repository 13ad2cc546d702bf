//! Event gateway wire protocol: frame types and boundary decoding.
//!
//! The gateway speaks JSON frames over WebSocket (and a push-only subset over
//! SSE). Frames split into two kinds:
//!
//! - **Control frames** — protocol-internal acknowledgements
//!   (`connected`, `subscribed`, `unsubscribed`, `pong`). Consumed by the
//!   client, never delivered to application handlers.
//! - **Event frames** — any other parseable JSON object, carrying a channel,
//!   an event type, and an arbitrary payload.
//!
//! [`decode_frame`] classifies an inbound frame exactly once at the wire
//! boundary so the dispatch path works on a typed sum, not raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client → gateway control frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Declare the full set of active patterns (full resync, not a delta).
    Subscribe { patterns: Vec<String> },
    /// Drop the given patterns.
    Unsubscribe { patterns: Vec<String> },
    /// Keep-alive.
    Ping,
}

/// Gateway → client control frames.
///
/// Extra fields the gateway may attach are tolerated and ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Connection accepted.
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    /// Subscribe acknowledged.
    Subscribed {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        patterns: Vec<String>,
    },
    /// Unsubscribe acknowledged.
    Unsubscribed {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        patterns: Vec<String>,
    },
    /// Keep-alive reply.
    Pong,
}

/// One push notification from the gateway.
///
/// Constructed on receipt, consumed synchronously by dispatch, then dropped —
/// there is no persistence or replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMessage {
    /// Wire-level routing identifier the message arrived on
    /// (e.g. `"events:counter"`).
    #[serde(default)]
    pub channel: String,
    /// Explicit event type (e.g. `"counter.updated"`). When absent, the type
    /// is derived from the channel — see [`effective_type`](Self::effective_type).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Arbitrary event data.
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Originating module, when the gateway attaches provenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl EventMessage {
    /// The event type used for pattern matching: the explicit `event_type`
    /// field if present, otherwise the trailing segment after the last `:` in
    /// the channel, otherwise the empty string.
    pub fn effective_type(&self) -> &str {
        if let Some(t) = &self.event_type {
            return t;
        }
        self.channel.rsplit(':').next().unwrap_or("")
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Control(ControlFrame),
    Event(EventMessage),
}

/// Classify one inbound text frame.
///
/// Frames with a recognized control `type` decode as [`InboundFrame::Control`];
/// every other parseable JSON object is an event. Unparseable frames return
/// `None` and are dropped by the caller.
pub fn decode_frame(text: &str) -> Option<InboundFrame> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    // Only objects are frames. Serde would happily fill a struct from a
    // positional array, which must not pass for an event.
    if !value.is_object() {
        return None;
    }
    if let Ok(ctl) = serde_json::from_value::<ControlFrame>(value.clone()) {
        return Some(InboundFrame::Control(ctl));
    }
    serde_json::from_value::<EventMessage>(value)
        .ok()
        .map(InboundFrame::Event)
}
