//! Transport selection, wire-address construction, and SSE framing.

use std::fmt::Write as _;

/// Which transport the client uses. Fixed at construction, never switched
/// mid-life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Bidirectional WebSocket (default). Dynamic subscribe/unsubscribe is
    /// pushed as JSON control frames after the connection opens.
    #[default]
    WebSocket,
    /// Server-Sent Events fallback. Push-only: the pattern set is baked into
    /// the connect URL and cannot change afterwards — picking up new patterns
    /// requires a full reconnect. This asymmetry is a platform limitation of
    /// the SSE relay, not something the client papers over.
    Sse,
}

/// Comma-joined channels parameter, `*` when no patterns are active yet.
fn channels_param(patterns: &[String]) -> String {
    if patterns.is_empty() {
        "*".to_string()
    } else {
        patterns.join(",")
    }
}

/// Swap an `http(s)` base for the matching `ws(s)` scheme. Bases already in
/// `ws(s)` form pass through; a bare host defaults to `ws://`.
fn ws_base(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        format!("ws://{base}")
    }
}

/// Host portion of a base URL, without scheme, port, or path.
fn host_of(base: &str) -> &str {
    let rest = base
        .split_once("://")
        .map_or(base, |(_, rest)| rest);
    let rest = rest.split('/').next().unwrap_or(rest);
    rest.split(':').next().unwrap_or(rest)
}

fn is_local_host(base: &str) -> bool {
    matches!(host_of(base), "localhost" | "127.0.0.1")
}

/// WebSocket connect URL: `{ws_base}/ws?channels=...[&project=...]`.
///
/// The project slug is only appended for local development hosts, where the
/// gateway multiplexes several projects behind one port.
pub(crate) fn build_ws_url(base: &str, project: Option<&str>, patterns: &[String]) -> String {
    let mut url = format!("{}/ws?channels={}", ws_base(base), channels_param(patterns));
    if let Some(slug) = project {
        if is_local_host(base) {
            let _ = write!(url, "&project={slug}");
        }
    }
    url
}

/// SSE connect URL: `{base}{path}?channels=...`.
pub(crate) fn build_sse_url(base: &str, path: &str, patterns: &[String]) -> String {
    format!(
        "{}{}?channels={}",
        base.trim_end_matches('/'),
        path,
        channels_param(patterns)
    )
}

/// Incremental parser for `text/event-stream` bodies.
///
/// Feed raw chunks as they arrive; complete events come back as the joined
/// `data:` payload. Comment lines and fields other than `data` are skipped —
/// the gateway only ever sends JSON event frames over SSE.
#[derive(Default)]
pub(crate) struct SseParser {
    buf: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        // Raw CR cannot appear inside JSON strings unescaped, so normalizing
        // CRLF by dropping CR is lossless for our payloads.
        for c in String::from_utf8_lossy(chunk).chars() {
            if c != '\r' {
                self.buf.push(c);
            }
        }

        let mut events = Vec::new();
        while let Some(idx) = self.buf.find("\n\n") {
            let block: String = self.buf.drain(..idx + 2).collect();
            let mut data_lines: Vec<&str> = Vec::new();
            for line in block.lines() {
                if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
                }
            }
            if !data_lines.is_empty() {
                events.push(data_lines.join("\n"));
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pats(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ws_url_scheme_swap() {
        assert_eq!(
            build_ws_url("http://localhost:8000", None, &pats(&["counter.*"])),
            "ws://localhost:8000/ws?channels=counter.*"
        );
        assert_eq!(
            build_ws_url("https://events.example.com/", None, &[]),
            "wss://events.example.com/ws?channels=*"
        );
        assert_eq!(
            build_ws_url("wss://events.example.com", None, &[]),
            "wss://events.example.com/ws?channels=*"
        );
    }

    #[test]
    fn ws_url_joins_patterns() {
        assert_eq!(
            build_ws_url(
                "http://localhost:8000",
                None,
                &pats(&["counter.*", "user.created"])
            ),
            "ws://localhost:8000/ws?channels=counter.*,user.created"
        );
    }

    #[test]
    fn project_param_only_for_local_hosts() {
        assert_eq!(
            build_ws_url("http://localhost:8000", Some("demo"), &[]),
            "ws://localhost:8000/ws?channels=*&project=demo"
        );
        assert_eq!(
            build_ws_url("http://127.0.0.1:8000", Some("demo"), &[]),
            "ws://127.0.0.1:8000/ws?channels=*&project=demo"
        );
        assert_eq!(
            build_ws_url("https://events.example.com", Some("demo"), &[]),
            "wss://events.example.com/ws?channels=*"
        );
    }

    #[test]
    fn sse_url() {
        assert_eq!(
            build_sse_url("http://localhost:8000", "/sse/subscribe", &pats(&["counter.*"])),
            "http://localhost:8000/sse/subscribe?channels=counter.*"
        );
        assert_eq!(
            build_sse_url("http://localhost:8000/", "/stream", &[]),
            "http://localhost:8000/stream?channels=*"
        );
    }

    #[test]
    fn sse_parser_single_event() {
        let mut p = SseParser::new();
        let events = p.feed(b"data: {\"channel\":\"x\"}\n\n");
        assert_eq!(events, vec![r#"{"channel":"x"}"#]);
    }

    #[test]
    fn sse_parser_chunk_boundaries() {
        let mut p = SseParser::new();
        assert!(p.feed(b"data: {\"chan").is_empty());
        assert!(p.feed(b"nel\":\"x\"}\n").is_empty());
        let events = p.feed(b"\ndata: {\"channel\":\"y\"}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], r#"{"channel":"x"}"#);
        assert_eq!(events[1], r#"{"channel":"y"}"#);
    }

    #[test]
    fn sse_parser_crlf_and_comments() {
        let mut p = SseParser::new();
        let events = p.feed(b": keep-alive comment\r\n\r\ndata: {\"a\":1}\r\n\r\n");
        assert_eq!(events, vec![r#"{"a":1}"#]);
    }

    #[test]
    fn sse_parser_multiline_data() {
        let mut p = SseParser::new();
        let events = p.feed(b"data: line1\ndata: line2\n\n");
        assert_eq!(events, vec!["line1\nline2"]);
    }

    #[test]
    fn sse_parser_ignores_event_field() {
        let mut p = SseParser::new();
        let events = p.feed(b"event: message\nid: 7\ndata: {\"a\":1}\n\n");
        assert_eq!(events, vec![r#"{"a":1}"#]);
    }
}
