//! In-memory transport used in test environments.
//!
//! [`mock()`] yields a [`Connector`] for the client under test and a
//! [`MockControl`] for the test itself. Every transport the engine opens
//! surfaces as a [`MockHandle`] (the server side of that socket), and every
//! async-handshake POST surfaces as a [`PostRequest`] to be answered by the
//! test.

use futures_channel::{mpsc, oneshot};
use futures_util::{future::BoxFuture, FutureExt, StreamExt};
use url::Url;

use super::backend::{BackendDriver, BackendHalf, Connector, TransportEvent, WsError};
use crate::{error::ClientError, message::Message};

/// Builds a connector/control pair.
pub fn mock() -> (MockConnector, MockControl) {
    let (handles_tx, handles_rx) = mpsc::unbounded();
    let (posts_tx, posts_rx) = mpsc::unbounded();
    (
        MockConnector { handles: handles_tx, posts: posts_tx },
        MockControl { handles: handles_rx, posts: posts_rx },
    )
}

/// Mock transport factory handed to
/// [`ClientBuilder::connector`](super::ClientBuilder::connector).
#[derive(Clone)]
pub struct MockConnector {
    handles: mpsc::UnboundedSender<MockHandle>,
    posts: mpsc::UnboundedSender<PostRequest>,
}

impl Connector for MockConnector {
    fn open(&self, url: &Url) -> BackendDriver {
        let (half, driver) = BackendDriver::channels();
        let _ = self.handles.unbounded_send(MockHandle { url: url.clone(), half });
        driver
    }

    fn post(&self, url: &Url, body: String) -> BoxFuture<'static, Result<String, ClientError>> {
        let (respond, response) = oneshot::channel();
        let _ = self.posts.unbounded_send(PostRequest { url: url.clone(), body, respond });
        async move { response.await.map_err(|_| ClientError::DeadChannel)? }.boxed()
    }
}

/// The test's view of the transports and POSTs a session opens.
pub struct MockControl {
    handles: mpsc::UnboundedReceiver<MockHandle>,
    posts: mpsc::UnboundedReceiver<PostRequest>,
}

impl MockControl {
    /// Waits for the engine to open its next transport.
    pub async fn next_handle(&mut self) -> MockHandle {
        self.handles.next().await.expect("no further transport was opened")
    }

    /// Waits for the engine's next handshake POST.
    pub async fn next_post(&mut self) -> PostRequest {
        self.posts.next().await.expect("no further handshake was posted")
    }
}

/// The server side of one opened transport.
pub struct MockHandle {
    url: Url,
    half: BackendHalf,
}

impl MockHandle {
    /// The URL the engine connected to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Reports the connection as established.
    pub fn open(&self) {
        let _ = self.half.events.unbounded_send(TransportEvent::Opened);
    }

    /// Delivers a batch of messages to the client.
    pub fn server_send(&self, batch: &[Message]) {
        let text = serde_json::to_string(batch).expect("mock batch serializes");
        self.server_send_text(text);
    }

    /// Delivers a raw text frame to the client.
    pub fn server_send_text(&self, text: impl Into<String>) {
        let _ = self.half.events.unbounded_send(TransportEvent::Message(text.into()));
    }

    /// Closes the connection from the server side.
    pub fn close(&self) {
        let _ = self.half.events.unbounded_send(TransportEvent::Closed { frame: None });
    }

    /// Fails the connection (also how an unopened transport reports a
    /// connect failure).
    pub fn error(&self) {
        let _ = self.half.events.unbounded_send(TransportEvent::Error(WsError::ConnectionClosed));
    }

    /// The next frame the client dispatched, decoded.
    pub async fn recv_batch(&mut self) -> Vec<Message> {
        let text = self.recv_raw().await;
        serde_json::from_str(&text).expect("client frames are message batches")
    }

    /// The next frame the client dispatched, still encoded.
    pub async fn recv_raw(&mut self) -> String {
        self.try_recv_raw().await.expect("client dropped the transport")
    }

    /// Like [`recv_raw`](Self::recv_raw), resolving `None` once the client
    /// has dropped this transport.
    pub async fn try_recv_raw(&mut self) -> Option<String> {
        self.half.to_dispatch.next().await
    }

    /// Whether the engine asked this transport to shut down.
    pub fn shutdown_requested(&mut self) -> bool {
        matches!(self.half.shutdown.try_recv(), Ok(Some(())) | Err(_))
    }
}

/// One captured async-handshake POST, to be answered by the test.
pub struct PostRequest {
    pub url: Url,
    pub body: String,
    respond: oneshot::Sender<Result<String, ClientError>>,
}

impl PostRequest {
    /// The handshake batch the client posted.
    pub fn batch(&self) -> Vec<Message> {
        serde_json::from_str(&self.body).expect("posted handshakes are message batches")
    }

    pub fn respond(self, response: Result<String, ClientError>) {
        let _ = self.respond.send(response);
    }

    /// Responds with a batch of messages.
    pub fn respond_messages(self, batch: &[Message]) {
        let text = serde_json::to_string(batch).expect("mock batch serializes");
        self.respond(Ok(text));
    }
}
