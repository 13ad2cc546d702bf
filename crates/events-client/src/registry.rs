//! Subscription registry — pattern → handler set, pending patterns, and
//! pattern matching for dispatch.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::types::EventHandler;

/// One registered handler. Identity is the `Uuid`, not the callback, so two
/// registrations of behaviorally identical closures stay distinct and a
/// handle's unsubscribe removes exactly its own entry.
struct HandlerEntry {
    id: Uuid,
    handler: EventHandler,
}

/// Pattern-keyed handler store plus the set of patterns not yet communicated
/// to the transport.
///
/// Invariants:
/// - A pattern key exists iff it has at least one handler.
/// - A pattern is pending only while it has not been flushed over an open
///   connection; the pending set is cleared when the transport opens.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    patterns: BTreeMap<String, Vec<HandlerEntry>>,
    pending: BTreeSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `pattern`. Returns the handler's id and
    /// whether the pattern is brand new to the registry.
    pub fn insert(&mut self, pattern: &str, handler: EventHandler) -> (Uuid, bool) {
        let id = Uuid::new_v4();
        let entries = self.patterns.entry(pattern.to_string()).or_default();
        let brand_new = entries.is_empty();
        entries.push(HandlerEntry { id, handler });
        (id, brand_new)
    }

    /// Remove one handler entry. Returns `true` if this was the last handler
    /// for the pattern (key deleted from registry and pending).
    pub fn remove(&mut self, pattern: &str, id: Uuid) -> bool {
        let Some(entries) = self.patterns.get_mut(pattern) else {
            return false;
        };
        entries.retain(|e| e.id != id);
        if entries.is_empty() {
            self.patterns.remove(pattern);
            self.pending.remove(pattern);
            return true;
        }
        false
    }

    /// Mark a pattern as awaiting flush to the transport.
    pub fn mark_pending(&mut self, pattern: &str) {
        self.pending.insert(pattern.to_string());
    }

    /// Clear the pending set (called once the transport opens and the full
    /// pattern set has been sent).
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Registered pattern keys, sorted.
    pub fn registered(&self) -> Vec<String> {
        self.patterns.keys().cloned().collect()
    }

    /// Union of registered and still-pending patterns, sorted. This is the
    /// full set sent on every (re)connect — a resync, never a delta.
    pub fn all_active(&self) -> Vec<String> {
        let mut set: BTreeSet<&str> = self.patterns.keys().map(String::as_str).collect();
        set.extend(self.pending.iter().map(String::as_str));
        set.into_iter().map(String::from).collect()
    }

    /// `true` when no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// `true` when either registered or pending patterns exist. Reconnects
    /// are only scheduled while this holds.
    pub fn has_active(&self) -> bool {
        !self.patterns.is_empty() || !self.pending.is_empty()
    }

    /// All handlers whose pattern matches `event_type`, in registration order
    /// within each pattern.
    pub fn handlers_matching(&self, event_type: &str) -> Vec<EventHandler> {
        let mut out = Vec::new();
        for (pattern, entries) in &self.patterns {
            if matches_pattern(event_type, pattern) {
                out.extend(entries.iter().map(|e| e.handler.clone()));
            }
        }
        out
    }
}

/// Does `event_type` match `pattern`?
///
/// Matching rules, in order:
/// 1. `"*"` matches everything.
/// 2. Exact equality.
/// 3. `prefix.*` matches `prefix.<anything>`.
/// 4. A bare `prefix` matches `prefix.<anything>` too, so callers don't have
///    to spell out the `.*`.
pub fn matches_pattern(event_type: &str, pattern: &str) -> bool {
    if pattern == "*" || pattern == event_type {
        return true;
    }
    let prefix = pattern.strip_suffix(".*").unwrap_or(pattern);
    event_type
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('.'))
}
