//! The user-facing Bayeux client.
//!
//! [`BayeuxClient`] is a cheap, cloneable handle; the session itself lives
//! in a spawned [`engine`](self::engine) task that the handle talks to over
//! an instruction channel. Dropping every handle ends the engine unless the
//! session was built with [`ClientBuilder::persist`].

pub mod backend;
mod engine;
pub mod mock;
mod types;

use std::{
    fmt,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use futures_channel::mpsc;
use serde_json::Value;
use url::Url;

use crate::{
    delegate::{ClientDelegate, TaskQueue, TokioQueue},
    error::ClientError,
    subscription::MessageCallback,
    urls,
};
use backend::{Connector, WsConnector};
use engine::SessionEngine;
use types::{Instruction, Shared, SharedState};

pub use types::SessionState;

/// Fallback interval between reconnect attempts when the server's advice
/// does not carry one.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) struct ClientOptions {
    pub may_send_handshake_async: bool,
    pub await_only_handshake: bool,
    pub persist: bool,
    pub default_reconnect_interval: Duration,
    pub delegate: Option<Weak<dyn ClientDelegate>>,
    pub delegate_queue: Arc<dyn TaskQueue>,
    pub callback_queue: Arc<dyn TaskQueue>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            may_send_handshake_async: true,
            await_only_handshake: false,
            persist: false,
            default_reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            delegate: None,
            delegate_queue: Arc::new(TokioQueue),
            callback_queue: Arc::new(TokioQueue),
        }
    }
}

/// Configures and spawns a [`BayeuxClient`].
pub struct ClientBuilder {
    url: String,
    options: ClientOptions,
    connector: Option<Arc<dyn Connector>>,
}

impl ClientBuilder {
    /// Send the handshake over a one-shot HTTP POST while the socket is
    /// still opening, instead of waiting for the open. Defaults to `true`;
    /// some server implementations cope badly with the early handshake.
    pub fn may_send_handshake_async(mut self, yes: bool) -> Self {
        self.options.may_send_handshake_async = yes;
        self
    }

    /// Fire the connect continuation on handshake success instead of on the
    /// first `/meta/connect` success. Defaults to `false`.
    pub fn await_only_handshake(mut self, yes: bool) -> Self {
        self.options.await_only_handshake = yes;
        self
    }

    /// Keep the session engine alive after every client handle is dropped,
    /// until an explicit [`BayeuxClient::disconnect`]. Defaults to `false`.
    pub fn persist(mut self, yes: bool) -> Self {
        self.options.persist = yes;
        self
    }

    /// Interval between reconnect attempts when advice carries none.
    pub fn default_reconnect_interval(mut self, interval: Duration) -> Self {
        self.options.default_reconnect_interval = interval;
        self
    }

    /// Observer for lifecycle events. Held by non-owning reference: the
    /// application keeps the `Arc`, and notifications stop when it drops.
    pub fn delegate(mut self, delegate: &Arc<dyn ClientDelegate>) -> Self {
        self.options.delegate = Some(Arc::downgrade(delegate));
        self
    }

    /// Executor for delegate notifications.
    pub fn delegate_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.options.delegate_queue = queue;
        self
    }

    /// Executor for subscription callbacks.
    pub fn callback_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.options.callback_queue = queue;
        self
    }

    /// Transport factory override. The default connects real WebSockets;
    /// tests plug in [`mock::MockConnector`].
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Validates the URL and spawns the session engine (requires a running
    /// tokio runtime). The session starts out disconnected.
    pub fn build(self) -> Result<BayeuxClient, ClientError> {
        let base_url = Url::parse(&self.url)?;
        urls::validate(&base_url)?;

        let connector = self.connector.unwrap_or_else(|| Arc::new(WsConnector::new()));
        let (instructions, instructions_rx) = mpsc::unbounded();
        let shared: Shared = Arc::new(Mutex::new(SharedState::default()));

        SessionEngine::new(base_url.clone(), self.options, connector, instructions_rx, shared.clone())
            .spawn();

        Ok(BayeuxClient { instructions, shared, base_url })
    }
}

/// Handle on a Bayeux session.
#[derive(Clone)]
pub struct BayeuxClient {
    instructions: mpsc::UnboundedSender<Instruction>,
    shared: Shared,
    base_url: Url,
}

impl BayeuxClient {
    /// Starts configuring a client for `url`, whose scheme must be one of
    /// `ws`, `wss`, `http` or `https`.
    pub fn builder(url: impl Into<String>) -> ClientBuilder {
        ClientBuilder { url: url.into(), options: ClientOptions::default(), connector: None }
    }

    /// Opens the transport and negotiates the session.
    pub fn connect(&self) -> Result<(), ClientError> {
        self.send(Instruction::Connect { extension: None, on_success: None })
    }

    /// Like [`connect`](Self::connect), sending `extension` in the `ext`
    /// field of the handshake.
    pub fn connect_with_extension(&self, extension: Value) -> Result<(), ClientError> {
        self.send(Instruction::Connect { extension: Some(extension), on_success: None })
    }

    /// Like [`connect`](Self::connect); `on_success` runs on the callback
    /// queue once the session is live (or already at handshake success if
    /// the client was built with `await_only_handshake`).
    pub fn connect_on_success<F>(&self, on_success: F) -> Result<(), ClientError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Instruction::Connect { extension: None, on_success: Some(Box::new(on_success)) })
    }

    pub fn connect_with_extension_on_success<F>(
        &self,
        extension: Value,
        on_success: F,
    ) -> Result<(), ClientError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Instruction::Connect {
            extension: Some(extension),
            on_success: Some(Box::new(on_success)),
        })
    }

    /// Sends `/meta/disconnect` and closes the transport. Subscribed
    /// channels are kept so that [`reconnect`](Self::reconnect) can replay
    /// them.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.send(Instruction::Disconnect)
    }

    /// Re-establishes the session with the last connect extension and
    /// re-subscribes every channel in the table, keeping the registered
    /// callbacks. A no-op while another reconnect is in flight.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.send(Instruction::Reconnect)
    }

    /// Registers interest in a channel name or pattern. `callback` receives
    /// the `data` of every matching message on the callback queue, once the
    /// server confirms the subscription.
    pub fn subscribe<F>(&self, channel: impl Into<String>, callback: F) -> Result<(), ClientError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe_many(vec![channel.into()], callback)
    }

    pub fn subscribe_with_extension<F>(
        &self,
        channel: impl Into<String>,
        extension: Value,
        callback: F,
    ) -> Result<(), ClientError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe_many_with_extension(vec![channel.into()], extension, callback)
    }

    /// Subscribes several channels to one callback in a single batch.
    pub fn subscribe_many<F>(&self, channels: Vec<String>, callback: F) -> Result<(), ClientError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.send(Instruction::Subscribe {
            channels,
            callback: Arc::new(callback),
            extension: None,
        })
    }

    pub fn subscribe_many_with_extension<F>(
        &self,
        channels: Vec<String>,
        extension: Value,
        callback: F,
    ) -> Result<(), ClientError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.send(Instruction::Subscribe {
            channels,
            callback: Arc::new(callback),
            extension: Some(extension),
        })
    }

    /// Subscribes with an already-shared callback, letting the application
    /// hold the same `Arc` it registered (re-adding it is a no-op).
    pub fn subscribe_callback(
        &self,
        channel: impl Into<String>,
        callback: MessageCallback,
    ) -> Result<(), ClientError> {
        self.send(Instruction::Subscribe {
            channels: vec![channel.into()],
            callback,
            extension: None,
        })
    }

    /// Cancels interest in a channel. Local callbacks are removed right
    /// away, whatever the server answers.
    pub fn unsubscribe(&self, channel: impl Into<String>) -> Result<(), ClientError> {
        self.send(Instruction::Unsubscribe { channels: vec![channel.into()] })
    }

    pub fn unsubscribe_many(&self, channels: Vec<String>) -> Result<(), ClientError> {
        self.send(Instruction::Unsubscribe { channels })
    }

    pub fn unsubscribe_all(&self) -> Result<(), ClientError> {
        self.send(Instruction::UnsubscribeAll)
    }

    /// Publishes `data` on a user channel. Fire-and-forget: a server ack is
    /// advisory, and a negative ack surfaces through the delegate.
    pub fn publish(&self, channel: impl Into<String>, data: Value) -> Result<(), ClientError> {
        self.send(Instruction::Publish { channel: channel.into(), data, extension: None })
    }

    pub fn publish_with_extension(
        &self,
        channel: impl Into<String>,
        data: Value,
        extension: Value,
    ) -> Result<(), ClientError> {
        self.send(Instruction::Publish {
            channel: channel.into(),
            data,
            extension: Some(extension),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().unwrap().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Whether a reconnect (explicit or advice-driven) is in flight.
    pub fn is_reconnecting(&self) -> bool {
        self.shared.lock().unwrap().reconnecting
    }

    /// The session id obtained at handshake, while one is held.
    pub fn client_id(&self) -> Option<String> {
        self.shared.lock().unwrap().client_id.clone()
    }

    /// Patterns currently subscribed (intent, not server confirmation).
    pub fn subscribed_channels(&self) -> Vec<String> {
        self.shared.lock().unwrap().channels.clone()
    }

    fn send(&self, instruction: Instruction) -> Result<(), ClientError> {
        self.instructions.unbounded_send(instruction).map_err(|_| ClientError::DeadChannel)
    }
}

impl fmt::Debug for BayeuxClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BayeuxClient").field("url", &self.base_url.as_str()).finish_non_exhaustive()
    }
}
