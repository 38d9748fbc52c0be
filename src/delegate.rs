//! The observer surface and the executors outbound calls are dispatched on.

use std::time::Duration;

use crate::{error::ClientError, message::Message};

/// Observer for session lifecycle events.
///
/// Every method has a no-op (or pass-through) default, so implementations
/// override only what they care about. The notification methods are
/// dispatched fire-and-forget on the configured delegate queue; the two
/// advisory methods are called synchronously on the engine task because
/// their answer steers the reconnect schedule, and must not block.
pub trait ClientDelegate: Send + Sync {
    /// Transport open, handshake and connect all succeeded; the session is
    /// ready for subscriptions and publishes.
    fn client_connected(&self) {}

    /// The server confirmed a `/meta/subscribe` for `channel`.
    fn subscription_succeeded(&self, _channel: &str) {}

    /// A message arrived on a user channel with no matching subscription.
    fn received_unexpected_message(&self, _message: &Message) {}

    /// The session ended. `error` without `message` is a transport failure;
    /// `error` with `message` is a Bayeux-level failure; neither means the
    /// application asked for the disconnect.
    fn client_disconnected(&self, _message: Option<&Message>, _error: Option<&ClientError>) {}

    /// A recoverable error that does not change the session state.
    fn failed_with_error(&self, _error: &ClientError) {}

    /// The server advised a `/meta/connect` retry after `proposed`. Return a
    /// different interval to reschedule, or `None` to cancel the retry.
    fn was_advised_to_retry(&self, proposed: Duration) -> Option<Duration> {
        Some(proposed)
    }

    /// The server terminated the session and advised a fresh handshake.
    /// Return `false` to veto the automatic re-handshake.
    fn was_advised_to_handshake(&self) -> bool {
        true
    }
}

/// Execution context for outbound calls (delegate notifications and
/// subscription callbacks).
pub trait TaskQueue: Send + Sync {
    fn dispatch(&self, task: Box<dyn FnOnce() + Send>);
}

/// Dispatches every task onto the tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioQueue;

impl TaskQueue for TokioQueue {
    fn dispatch(&self, task: Box<dyn FnOnce() + Send>) {
        tokio::spawn(async move { task() });
    }
}

/// Runs every task inline on the dispatching thread. Deterministic ordering
/// makes this the queue of choice in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineQueue;

impl TaskQueue for InlineQueue {
    fn dispatch(&self, task: Box<dyn FnOnce() + Send>) {
        task()
    }
}
