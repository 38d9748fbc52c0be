//! The session engine: one spawned task owning all session state.
//!
//! Public operations arrive as [`Instruction`]s, transport traffic as
//! [`TransportEvent`]s, and the engine serializes both through a single
//! select loop, so session state needs no locking. Responses on meta
//! channels are correlated twice: by request id against the in-flight map
//! (duplicates and stragglers are dropped), and by channel against the actor
//! registry, which carries the per-request continuations.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use futures_channel::mpsc;
use futures_util::{
    future::{self, Either},
    select_biased, FutureExt, StreamExt,
};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::{
    backend::{BackendDriver, Connector, TransportEvent},
    types::{Instruction, SessionState, Shared},
    ClientOptions,
};
use crate::{
    actor::ActorRegistry,
    channel::ChannelPattern,
    delegate::ClientDelegate,
    error::ClientError,
    message::{
        Advice, ConnectionType, Message, MetaChannel, Reconnect, Subscription,
        BAYEUX_MINIMUM_VERSION, BAYEUX_VERSION,
    },
    subscription::{MessageCallback, SubscriptionTable},
    urls,
};

/// What a pending request id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Meta(MetaChannel),
    Publish,
}

/// What to do when the retry timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryAction {
    /// Re-issue `/meta/connect` on the live transport, same `clientId`.
    Connect,
    /// Open a fresh transport and run the handshake again.
    Reopen,
}

/// Events the engine posts to itself from spawned one-shot work.
enum EngineEvent {
    PostResponse(Result<String, ClientError>),
}

pub(crate) struct SessionEngine {
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    // The URL the client was built with, and the one currently connected to
    // (these diverge once advice carries replacement hosts).
    base_url: Url,
    current_url: Url,

    state: SessionState,
    client_id: Option<String>,
    advice: Option<Advice>,
    connect_extension: Option<serde_json::Value>,
    // Next request id
    next_id: u64,

    actors: ActorRegistry<SessionEngine>,
    subscriptions: SubscriptionTable,
    // Callbacks awaiting their /meta/subscribe confirmation, keyed by the
    // channel the server will echo in `subscription`
    pending_subscribes: HashMap<String, Vec<MessageCallback>>,
    // Requests awaiting their response, keyed by request id
    in_flight: HashMap<String, InFlight>,

    backend: Option<BackendDriver>,
    transport_open: bool,
    handshake_sent: bool,
    reconnecting: bool,
    scheduled: Option<(Instant, RetryAction)>,

    shared: Shared,
    instructions: mpsc::UnboundedReceiver<Instruction>,
    instructions_closed: bool,
    internal_tx: mpsc::UnboundedSender<EngineEvent>,
    internal_rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl SessionEngine {
    pub(crate) fn new(
        base_url: Url,
        options: ClientOptions,
        connector: Arc<dyn Connector>,
        instructions: mpsc::UnboundedReceiver<Instruction>,
        shared: Shared,
    ) -> Self {
        let mut actors = ActorRegistry::new();
        actors.set(MetaChannel::Handshake, Self::handle_handshake);
        actors.set(MetaChannel::Connect, Self::handle_connect);
        actors.set(MetaChannel::Subscribe, Self::handle_subscribe);
        actors.set(MetaChannel::Unsubscribe, Self::handle_unsubscribe);
        actors.set(MetaChannel::Disconnect, Self::handle_disconnect);

        let (internal_tx, internal_rx) = mpsc::unbounded();
        Self {
            options,
            connector,
            current_url: base_url.clone(),
            base_url,
            state: SessionState::Disconnected,
            client_id: None,
            advice: None,
            connect_extension: None,
            next_id: 0,
            actors,
            subscriptions: SubscriptionTable::new(),
            pending_subscribes: HashMap::new(),
            in_flight: HashMap::new(),
            backend: None,
            transport_open: false,
            handshake_sent: false,
            reconnecting: false,
            scheduled: None,
            shared,
            instructions,
            instructions_closed: false,
            internal_tx,
            internal_rx,
        }
    }

    pub(crate) fn spawn(mut self) {
        tokio::spawn(async move { self.run().await });
    }

    async fn run(&mut self) {
        loop {
            if self.instructions_closed
                && self.state == SessionState::Disconnected
                && self.scheduled.is_none()
            {
                break
            }

            let retry = match self.scheduled.as_ref() {
                Some((at, _)) => Either::Left(sleep_until(*at)),
                None => Either::Right(future::pending()),
            }
            .fuse();
            tokio::pin!(retry);

            // We bias the loop so transport traffic and timer work are
            // handled before new instructions are accepted.
            select_biased! {
                event = match self.backend.as_mut() {
                    Some(driver) => Either::Left(driver.events.next()),
                    None => Either::Right(future::pending()),
                }
                .fuse() => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => self.handle_transport_failure(None),
                },
                event = self.internal_rx.next() => {
                    if let Some(event) = event {
                        self.handle_engine_event(event);
                    }
                },
                _ = retry => {
                    if let Some((_, action)) = self.scheduled.take() {
                        self.perform_retry(action);
                    }
                },
                instruction = match self.instructions_closed {
                    false => Either::Left(self.instructions.next()),
                    true => Either::Right(future::pending()),
                }
                .fuse() => match instruction {
                    Some(instruction) => self.handle_instruction(instruction),
                    None => {
                        self.instructions_closed = true;
                        if !self.options.persist {
                            break
                        }
                    }
                },
            }

            self.sync_shared();
        }

        if let Some(backend) = self.backend.take() {
            backend.shutdown();
        }
        debug!("Session engine exited");
    }

    // ---------- instructions ----------

    fn handle_instruction(&mut self, instruction: Instruction) {
        trace!(?instruction, state = %self.state, "Servicing instruction");
        match instruction {
            Instruction::Connect { extension, on_success } => {
                self.connect_extension = extension;
                self.begin_connect(on_success)
            }
            Instruction::Reconnect => self.begin_reconnect(),
            Instruction::Disconnect => self.begin_disconnect(),
            Instruction::Subscribe { channels, callback, extension } => {
                self.begin_subscribe(channels, callback, extension)
            }
            Instruction::Unsubscribe { channels } => self.begin_unsubscribe(channels),
            Instruction::UnsubscribeAll => {
                let channels = self.subscriptions.patterns();
                if !channels.is_empty() {
                    self.begin_unsubscribe(channels);
                }
            }
            Instruction::Publish { channel, data, extension } => {
                self.begin_publish(channel, data, extension)
            }
        }
    }

    fn begin_connect(&mut self, on_success: Option<Box<dyn FnOnce() + Send>>) {
        // A fresh connect starts from a clean slate; only the subscription
        // table and the extension survive.
        self.reconnecting = false;
        self.client_id = None;
        self.advice = None;
        self.current_url = self.base_url.clone();
        self.in_flight.clear();
        self.pending_subscribes.clear();
        self.scheduled = None;
        self.reset_connect_actors();

        if let Some(on_success) = on_success {
            let target = if self.options.await_only_handshake {
                MetaChannel::Handshake
            } else {
                MetaChannel::Connect
            };
            let queue = self.options.callback_queue.clone();
            self.actors.chain_once(
                target,
                Box::new(move |_: &mut SessionEngine, message: &Message| {
                    // Dropped silently when the awaited response failed; the
                    // delegate learns through client_disconnected.
                    if message.is_successful() {
                        queue.dispatch(on_success);
                    }
                }),
            );
        }

        self.open_transport();
    }

    fn begin_reconnect(&mut self) {
        if self.reconnecting {
            debug!("Reconnect already under way");
            return
        }
        self.reconnecting = true;
        self.client_id = None;
        self.in_flight.clear();
        self.scheduled = None;
        self.reset_connect_actors();
        self.open_transport();
    }

    fn begin_disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            debug!("Already disconnected");
            return
        }
        if self.transport_open {
            if let Some(client_id) = self.client_id.clone() {
                let id = self.next_id();
                let mut message = Message::new(MetaChannel::Disconnect.as_str());
                message.client_id = Some(client_id);
                message.id = Some(id);
                self.send_batch(vec![message]);
            }
        }
        info!("Disconnecting");
        self.teardown();
        self.notify(|delegate| delegate.client_disconnected(None, None));
    }

    fn begin_subscribe(
        &mut self,
        channels: Vec<String>,
        callback: MessageCallback,
        extension: Option<serde_json::Value>,
    ) {
        if self.state != SessionState::Connected {
            self.notify_failed(ClientError::NotConnected { operation: "subscribe" });
            return
        }

        let mut batch = Vec::with_capacity(channels.len());
        for channel in channels {
            let pattern = match ChannelPattern::parse(&channel) {
                Ok(pattern) => pattern,
                Err(err) => {
                    self.notify_failed(err.into());
                    continue
                }
            };
            // Intent is recorded at send time, so it survives a transport
            // drop before the confirmation arrives and is replayed like any
            // other subscription. A refusal rolls it back.
            if self.subscriptions.add(pattern, callback.clone()) {
                self.pending_subscribes.entry(channel.clone()).or_default().push(callback.clone());
            }

            let id = self.next_id();
            let mut message = Message::new(MetaChannel::Subscribe.as_str());
            message.client_id = self.client_id.clone();
            message.subscription = Some(Subscription::One(channel));
            message.ext = extension.clone();
            message.id = Some(id.clone());
            self.in_flight.insert(id, InFlight::Meta(MetaChannel::Subscribe));
            batch.push(message);
        }
        self.send_batch(batch);
    }

    fn begin_unsubscribe(&mut self, channels: Vec<String>) {
        if self.state != SessionState::Connected {
            self.notify_failed(ClientError::NotConnected { operation: "unsubscribe" });
            return
        }

        let mut batch = Vec::with_capacity(channels.len());
        for channel in channels {
            // Local interest goes away regardless of what the server answers.
            self.subscriptions.remove(&channel);

            let id = self.next_id();
            let mut message = Message::new(MetaChannel::Unsubscribe.as_str());
            message.client_id = self.client_id.clone();
            message.subscription = Some(Subscription::One(channel));
            message.id = Some(id.clone());
            self.in_flight.insert(id, InFlight::Meta(MetaChannel::Unsubscribe));
            batch.push(message);
        }
        self.send_batch(batch);
    }

    fn begin_publish(
        &mut self,
        channel: String,
        data: serde_json::Value,
        extension: Option<serde_json::Value>,
    ) {
        if self.state != SessionState::Connected {
            self.notify_failed(ClientError::NotConnected { operation: "publish" });
            return
        }

        let id = self.next_id();
        let mut message = Message::new(channel);
        message.client_id = self.client_id.clone();
        message.data = Some(data);
        message.ext = extension;
        message.id = Some(id.clone());
        self.in_flight.insert(id, InFlight::Publish);
        self.send_batch(vec![message]);
    }

    // ---------- connection sequencing ----------

    fn open_transport(&mut self) {
        if let Some(old) = self.backend.take() {
            old.shutdown();
        }
        self.transport_open = false;
        self.handshake_sent = false;

        // Honor replacement hosts from the last advice on this attempt.
        let advised_host = self
            .advice
            .as_ref()
            .and_then(|a| a.hosts.as_ref())
            .and_then(|hosts| hosts.first())
            .cloned();
        if let Some(host) = advised_host {
            match urls::with_host(&self.current_url, &host) {
                Ok(url) => {
                    if url != self.current_url {
                        info!(%url, "Switching to advised host");
                        self.current_url = url;
                    }
                }
                Err(err) => self.notify_failed(err),
            }
        }

        let ws_url = urls::websocket(&self.current_url);
        debug!(url = %ws_url, "Opening transport");
        self.backend = Some(self.connector.open(&ws_url));
        self.set_state(if self.reconnecting {
            SessionState::Reconnecting
        } else {
            SessionState::Opening
        });

        if self.options.may_send_handshake_async {
            self.send_handshake();
        }
    }

    fn send_handshake(&mut self) {
        let id = self.next_id();
        let mut message = Message::new(MetaChannel::Handshake.as_str());
        message.version = Some(BAYEUX_VERSION.to_owned());
        message.minimum_version = Some(BAYEUX_MINIMUM_VERSION.to_owned());
        message.supported_connection_types = Some(ConnectionType::supported());
        message.ext = self.connect_extension.clone();
        message.id = Some(id.clone());
        self.in_flight.insert(id, InFlight::Meta(MetaChannel::Handshake));
        self.handshake_sent = true;

        if self.transport_open {
            self.set_state(SessionState::Handshaking);
            self.send_batch(vec![message]);
        } else {
            // Socket not ready yet: race the handshake over a one-shot POST.
            self.post_handshake(vec![message]);
        }
    }

    fn post_handshake(&mut self, batch: Vec<Message>) {
        let body = match serde_json::to_string(&batch) {
            Ok(body) => body,
            Err(err) => {
                self.notify_failed(err.into());
                return
            }
        };
        let url = urls::handshake_post(&self.current_url);
        debug!(%url, "Posting handshake");
        let response = self.connector.post(&url, body);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let _ = tx.unbounded_send(EngineEvent::PostResponse(response.await));
        });
    }

    fn send_connect(&mut self) {
        let client_id = match self.client_id.clone() {
            Some(client_id) => client_id,
            None => return,
        };
        if self.in_flight.values().any(|p| *p == InFlight::Meta(MetaChannel::Connect)) {
            trace!("A /meta/connect is already outstanding");
            return
        }

        let id = self.next_id();
        let mut message = Message::new(MetaChannel::Connect.as_str());
        message.client_id = Some(client_id);
        message.connection_type = Some(ConnectionType::WebSocket.as_str().to_owned());
        message.id = Some(id.clone());
        self.in_flight.insert(id, InFlight::Meta(MetaChannel::Connect));
        if self.state != SessionState::Connected {
            self.set_state(SessionState::Connecting);
        }
        self.send_batch(vec![message]);
    }

    fn replay_subscriptions(&mut self) {
        let patterns = self.subscriptions.patterns();
        if patterns.is_empty() {
            return
        }
        debug!(count = patterns.len(), "Re-issuing subscriptions");
        let mut batch = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let id = self.next_id();
            let mut message = Message::new(MetaChannel::Subscribe.as_str());
            message.client_id = self.client_id.clone();
            message.subscription = Some(Subscription::One(pattern));
            message.id = Some(id.clone());
            self.in_flight.insert(id, InFlight::Meta(MetaChannel::Subscribe));
            batch.push(message);
        }
        self.send_batch(batch);
    }

    fn perform_retry(&mut self, action: RetryAction) {
        debug!(?action, "Retry timer fired");
        match action {
            RetryAction::Connect => self.send_connect(),
            RetryAction::Reopen => self.open_transport(),
        }
    }

    // ---------- transport events ----------

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.handle_transport_open(),
            TransportEvent::Message(text) => self.handle_incoming_text(&text),
            TransportEvent::Closed { frame } => {
                debug!(?frame, "Transport closed");
                self.handle_transport_failure(Some(ClientError::UnexpectedClose));
            }
            TransportEvent::Error(err) => {
                error!(%err, "Transport error");
                self.handle_transport_failure(Some(err.into()));
            }
        }
    }

    fn handle_transport_open(&mut self) {
        self.transport_open = true;
        if !self.handshake_sent {
            self.send_handshake();
        } else if self.client_id.is_some() {
            // The racing POST handshake already finished.
            self.send_connect();
        } else if self.state == SessionState::Opening {
            self.set_state(SessionState::Handshaking);
        }
    }

    fn handle_transport_failure(&mut self, error: Option<ClientError>) {
        self.backend = None;
        self.transport_open = false;
        self.handshake_sent = false;
        match self.state {
            SessionState::Disconnected => {}
            SessionState::Opening if !self.reconnecting => {
                self.fail_connection(None, error.or(Some(ClientError::UnexpectedClose)));
            }
            _ => {
                // The socket died under a live session: recovery needs a new
                // transport and a fresh handshake, advice permitting.
                // Subscribe intent, confirmed or not, stays in the table for
                // the replay.
                self.client_id = None;
                self.reconnecting = true;
                self.in_flight.clear();
                self.set_state(SessionState::Reconnecting);
                self.follow_advice(None, error);
            }
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::PostResponse(Ok(text)) => self.handle_incoming_text(&text),
            EngineEvent::PostResponse(Err(err)) => {
                error!(%err, "Handshake POST failed");
                if self.state == SessionState::Disconnected {
                    return
                }
                if self.reconnecting {
                    self.follow_advice(None, Some(err));
                } else {
                    self.fail_connection(None, Some(err));
                }
            }
        }
    }

    // ---------- incoming messages ----------

    fn handle_incoming_text(&mut self, text: &str) {
        let batch: Vec<Message> = match serde_json::from_str(text) {
            Ok(batch) => batch,
            // Tolerate servers that skip the array wrapping on single
            // envelopes.
            Err(_) => match serde_json::from_str::<Message>(text) {
                Ok(single) => vec![single],
                Err(err) => {
                    error!(%err, "Failed to decode incoming frame");
                    self.notify_failed(err.into());
                    return
                }
            },
        };
        for message in batch {
            self.handle_message(message);
        }
    }

    fn handle_message(&mut self, message: Message) {
        trace!(%message, "Handling message");
        if message.advice.is_some() {
            // New advice always supersedes the previous advice.
            self.advice = message.advice.clone();
        }

        match message.meta() {
            Some(meta) => {
                match message.id.as_deref() {
                    Some(id) => match self.in_flight.remove(id) {
                        Some(InFlight::Meta(expected)) if expected == meta => {}
                        Some(stray) => {
                            warn!(id, ?stray, channel = %message.channel, "Response does not match its request");
                            return
                        }
                        None => {
                            debug!(id, channel = %message.channel, "Ignoring uncorrelated response");
                            return
                        }
                    },
                    None => {
                        debug!(channel = %message.channel, "Unsolicited meta message");
                        if message.advice.is_some() {
                            match self.advice.as_ref().map(|a| a.reconnect()) {
                                Some(Reconnect::Handshake) | Some(Reconnect::None) => {
                                    self.follow_advice(Some(&message), None)
                                }
                                _ => {}
                            }
                        }
                        return
                    }
                }
                self.fire_actor(meta, &message);
            }
            None => self.handle_user_channel(message),
        }
    }

    fn fire_actor(&mut self, channel: MetaChannel, message: &Message) {
        if let Some(actor) = self.actors.take(channel) {
            let restored = actor.invoke(self, message);
            self.actors.restore(channel, restored);
        }
    }

    fn handle_user_channel(&mut self, message: Message) {
        if let Some(id) = message.id.as_deref() {
            if self.in_flight.get(id) == Some(&InFlight::Publish) {
                self.in_flight.remove(id);
                if message.successful == Some(false) {
                    let err = ClientError::bayeux(&message);
                    self.notify(move |delegate| delegate.failed_with_error(&err));
                } else {
                    trace!(channel = %message.channel, "Publish acknowledged");
                }
                return
            }
        }

        match message.data.clone() {
            Some(data) => {
                let queue = self.options.callback_queue.clone();
                let delivered = self.subscriptions.dispatch(&message.channel, |callback| {
                    let callback = callback.clone();
                    let data = data.clone();
                    queue.dispatch(Box::new(move || callback(data)));
                });
                if delivered == 0 {
                    debug!(channel = %message.channel, "No subscription matches");
                    self.notify(move |delegate| delegate.received_unexpected_message(&message));
                }
            }
            None => self.notify(move |delegate| delegate.received_unexpected_message(&message)),
        }
    }

    // ---------- meta channel actors ----------

    fn handle_handshake(&mut self, message: &Message) {
        if message.is_successful() {
            debug!(client_id = ?message.client_id, "Handshake confirmed");
            self.client_id = message.client_id.clone();
            if self.transport_open {
                self.send_connect();
            }
            // Not open yet: /meta/connect goes out on the open event.
        } else {
            warn!(error = ?message.error, "Handshake refused");
            self.fail_connection(Some(message.clone()), Some(ClientError::bayeux(message)));
        }
    }

    fn handle_connect(&mut self, message: &Message) {
        if message.is_successful() {
            let first = self.state != SessionState::Connected;
            self.set_state(SessionState::Connected);
            if first {
                info!(client_id = ?self.client_id, "Connected");
                self.notify(|delegate| delegate.client_connected());
                if self.reconnecting {
                    self.reconnecting = false;
                    self.replay_subscriptions();
                }
            }
            // The connect loop is the keepalive: the next one goes out
            // immediately.
            self.send_connect();
        } else {
            debug!(error = ?message.error, "Connect refused");
            self.follow_advice(Some(message), None);
        }
    }

    fn handle_subscribe(&mut self, message: &Message) {
        let channel = match message.subscription.as_ref().and_then(|s| s.first()) {
            Some(channel) => channel.to_owned(),
            None => {
                warn!("Subscribe response without a subscription field");
                return
            }
        };

        if message.is_successful() {
            self.pending_subscribes.remove(&channel);
            debug!(%channel, "Subscription confirmed");
            self.notify(move |delegate| delegate.subscription_succeeded(&channel));
        } else {
            // Roll back the intent recorded at send time.
            if let Some(callbacks) = self.pending_subscribes.remove(&channel) {
                for callback in &callbacks {
                    self.subscriptions.remove_callback(&channel, callback);
                }
            }
            warn!(%channel, error = ?message.error, "Subscription refused");
            self.notify_failed(ClientError::bayeux(message));
        }
    }

    fn handle_unsubscribe(&mut self, message: &Message) {
        if message.is_successful() {
            trace!(subscription = ?message.subscription, "Unsubscribe confirmed");
        } else {
            self.notify_failed(ClientError::bayeux(message));
        }
    }

    fn handle_disconnect(&mut self, message: &Message) {
        trace!(successful = ?message.successful, "Disconnect acknowledged");
    }

    // ---------- advice ----------

    fn follow_advice(&mut self, failed: Option<&Message>, error: Option<ClientError>) {
        let advice = self.advice.clone().unwrap_or_default();
        debug!(?advice, "Following advice");
        match advice.reconnect() {
            Reconnect::Retry => {
                let proposed =
                    advice.interval().unwrap_or(self.options.default_reconnect_interval);
                let interval = match self.advisory() {
                    Some(delegate) => delegate.was_advised_to_retry(proposed),
                    None => Some(proposed),
                };
                match interval {
                    Some(interval) => {
                        let action = if self.transport_open {
                            RetryAction::Connect
                        } else {
                            RetryAction::Reopen
                        };
                        if self.state == SessionState::Connected {
                            self.set_state(SessionState::Reconnecting);
                        }
                        debug!(?interval, ?action, "Scheduling retry");
                        self.scheduled = Some((Instant::now() + interval, action));
                    }
                    None => {
                        debug!("Delegate cancelled the advised retry");
                        self.fail_from(failed, error);
                    }
                }
            }
            Reconnect::Handshake => {
                if self.advisory().map_or(true, |delegate| delegate.was_advised_to_handshake()) {
                    info!("Re-handshaking on advice");
                    self.client_id = None;
                    self.reconnecting = true;
                    if self.transport_open {
                        self.send_handshake();
                    } else {
                        self.set_state(SessionState::Reconnecting);
                        let interval = advice
                            .interval()
                            .unwrap_or(self.options.default_reconnect_interval);
                        self.scheduled = Some((Instant::now() + interval, RetryAction::Reopen));
                    }
                } else {
                    debug!("Delegate vetoed the advised handshake");
                    self.fail_from(failed, error);
                }
            }
            Reconnect::None => {
                info!("Advised not to reconnect");
                self.fail_from(failed, error);
            }
        }
    }

    fn fail_from(&mut self, failed: Option<&Message>, error: Option<ClientError>) {
        let error = error.or_else(|| failed.map(ClientError::bayeux));
        self.fail_connection(failed.cloned(), error);
    }

    // ---------- bookkeeping ----------

    fn teardown(&mut self) {
        if let Some(backend) = self.backend.take() {
            backend.shutdown();
        }
        self.transport_open = false;
        self.handshake_sent = false;
        self.client_id = None;
        self.reconnecting = false;
        self.in_flight.clear();
        self.pending_subscribes.clear();
        self.scheduled = None;
        self.reset_connect_actors();
        // The subscription table survives for a later reconnect().
        self.set_state(SessionState::Disconnected);
    }

    /// Reinstalls the plain handshake/connect handlers, discarding any
    /// un-fired connect continuation still chained onto them.
    fn reset_connect_actors(&mut self) {
        self.actors.set(MetaChannel::Handshake, Self::handle_handshake);
        self.actors.set(MetaChannel::Connect, Self::handle_connect);
    }

    fn fail_connection(&mut self, message: Option<Message>, error: Option<ClientError>) {
        self.teardown();
        self.notify(move |delegate| delegate.client_disconnected(message.as_ref(), error.as_ref()));
    }

    fn send_batch(&mut self, batch: Vec<Message>) {
        if batch.is_empty() {
            return
        }
        let text = match serde_json::to_string(&batch) {
            Ok(text) => text,
            Err(err) => {
                self.notify_failed(err.into());
                return
            }
        };
        trace!(%text, "Sending batch");
        let sent = match self.backend.as_ref() {
            Some(driver) => driver.dispatcher.unbounded_send(text).is_ok(),
            None => false,
        };
        if !sent {
            // The transport task is gone; its closed event stream follows.
            warn!("Dropped outgoing batch, transport gone");
        }
    }

    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "State transition");
            self.state = state;
        }
    }

    fn sync_shared(&self) {
        let mut shared = self.shared.lock().unwrap();
        shared.state = self.state;
        shared.client_id = self.client_id.clone();
        shared.reconnecting = self.reconnecting;
        shared.channels = self.subscriptions.patterns();
    }

    fn advisory(&self) -> Option<Arc<dyn ClientDelegate>> {
        self.options.delegate.as_ref().and_then(Weak::upgrade)
    }

    fn notify<F>(&self, call: F)
    where
        F: FnOnce(&dyn ClientDelegate) + Send + 'static,
    {
        if let Some(delegate) = self.advisory() {
            self.options.delegate_queue.dispatch(Box::new(move || call(&*delegate)));
        }
    }

    fn notify_failed(&self, error: ClientError) {
        warn!(%error, "Recoverable error");
        self.notify(move |delegate| delegate.failed_with_error(&error));
    }
}
