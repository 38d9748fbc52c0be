use std::{
    fmt,
    sync::{Arc, Mutex},
};

use serde_json::Value;

use crate::subscription::MessageCallback;

/// One-shot continuation for a `connect` call, run on the callback queue.
pub(crate) type ConnectCallback = Box<dyn FnOnce() + Send>;

/// Requests from the user-facing [`BayeuxClient`](super::BayeuxClient) to
/// the session engine.
pub(crate) enum Instruction {
    Connect { extension: Option<Value>, on_success: Option<ConnectCallback> },
    Reconnect,
    Disconnect,
    Subscribe { channels: Vec<String>, callback: MessageCallback, extension: Option<Value> },
    Unsubscribe { channels: Vec<String> },
    UnsubscribeAll,
    Publish { channel: String, data: Value, extension: Option<Value> },
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Instruction::Connect { .. } => "Connect",
            Instruction::Reconnect => "Reconnect",
            Instruction::Disconnect => "Disconnect",
            Instruction::Subscribe { .. } => "Subscribe",
            Instruction::Unsubscribe { .. } => "Unsubscribe",
            Instruction::UnsubscribeAll => "UnsubscribeAll",
            Instruction::Publish { .. } => "Publish",
        };
        f.write_str(name)
    }
}

/// Where the session stands in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    /// The transport is opening.
    Opening,
    /// Handshake sent, awaiting its response.
    Handshaking,
    /// Handshake confirmed, `/meta/connect` in flight.
    Connecting,
    Connected,
    /// The connection was lost and re-establishment is under way.
    Reconnecting,
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        self == SessionState::Connected
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Opening => "opening",
            SessionState::Handshaking => "handshaking",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Session observables mirrored out of the engine for the frontend's
/// accessors.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    pub state: SessionState,
    pub client_id: Option<String>,
    pub reconnecting: bool,
    pub channels: Vec<String>,
}

pub(crate) type Shared = Arc<Mutex<SharedState>>;
