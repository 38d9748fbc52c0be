//! The table of subscribed channel patterns and their callbacks.
//!
//! The table records subscription *intent*: entries survive transport loss
//! and are replayed on reconnect, and they outlive the server's view of the
//! session entirely.

use std::sync::Arc;

use serde_json::Value;

use crate::channel::ChannelPattern;

/// Callback invoked with the `data` of every matching message.
pub type MessageCallback = Arc<dyn Fn(Value) + Send + Sync>;

struct Entry {
    pattern: ChannelPattern,
    callbacks: Vec<MessageCallback>,
}

#[derive(Default)]
pub(crate) struct SubscriptionTable {
    entries: Vec<Entry>,
}

impl SubscriptionTable {
    pub(crate) fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registers `callback` under `pattern`. Re-adding the same callback
    /// (by `Arc` identity) for the same pattern is a no-op, so a message is
    /// delivered once per registration, not once per subscribe call.
    pub(crate) fn add(&mut self, pattern: ChannelPattern, callback: MessageCallback) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.pattern == pattern) {
            if entry.callbacks.iter().any(|cb| Arc::ptr_eq(cb, &callback)) {
                return false
            }
            entry.callbacks.push(callback);
            return true
        }
        self.entries.push(Entry { pattern, callbacks: vec![callback] });
        true
    }

    /// Drops every callback registered under `pattern`.
    pub(crate) fn remove(&mut self, pattern: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.pattern.as_str() != pattern);
        self.entries.len() != before
    }

    /// Drops one callback (by `Arc` identity) registered under `pattern`.
    /// The entry goes away with its last callback.
    pub(crate) fn remove_callback(&mut self, pattern: &str, callback: &MessageCallback) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.pattern.as_str() == pattern) {
            entry.callbacks.retain(|cb| !Arc::ptr_eq(cb, callback));
        }
        self.entries.retain(|e| !e.callbacks.is_empty());
    }

    pub(crate) fn remove_all(&mut self) {
        self.entries.clear();
    }

    /// Subscribed patterns in registration order.
    pub(crate) fn patterns(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.pattern.as_str().to_owned()).collect()
    }

    /// Feeds every callback whose pattern accepts `channel` to `sink`, in
    /// registration order, and returns how many matched.
    pub(crate) fn dispatch<F>(&self, channel: &str, mut sink: F) -> usize
    where
        F: FnMut(&MessageCallback),
    {
        let mut matched = 0;
        for entry in &self.entries {
            if entry.pattern.matches(channel) {
                for callback in &entry.callbacks {
                    sink(callback);
                    matched += 1;
                }
            }
        }
        matched
    }
}
