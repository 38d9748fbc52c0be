//! The transport task behind a session.
//!
//! `WsBackend` owns the tungstenite stream: it connects, reports readiness,
//! forwards inbound text frames, writes outbound frames, and keeps the
//! connection alive with a periodic ping. The engine holds the other end of
//! its channels as a `BackendDriver`. Reconnection swaps in a whole new
//! backend; a driver is never reused across sockets.

use std::time::Duration;

use futures_channel::{mpsc, oneshot};
use futures_util::{future::BoxFuture, select, sink::SinkExt, stream::StreamExt, FutureExt};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, error, trace};
use url::Url;

use crate::error::ClientError;

pub type WsError = tungstenite::Error;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Events surfaced by a transport task.
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is established and frames may be dispatched.
    Opened,
    /// An inbound text frame, still encoded.
    Message(String),
    /// The remote closed the connection.
    Closed { frame: Option<String> },
    /// The connection failed while opening, reading or writing.
    Error(WsError),
}

/// The engine's handle on a live transport task.
pub struct BackendDriver {
    pub(crate) events: mpsc::UnboundedReceiver<TransportEvent>,
    pub(crate) dispatcher: mpsc::UnboundedSender<String>,
    shutdown: oneshot::Sender<()>,
}

impl BackendDriver {
    /// Builds the channel quartet shared between a backend task and its
    /// driver. Also the seam mock transports plug into.
    pub fn channels() -> (BackendHalf, BackendDriver) {
        let (events_tx, events_rx) = mpsc::unbounded();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        (
            BackendHalf { events: events_tx, to_dispatch: dispatch_rx, shutdown: shutdown_rx },
            BackendDriver { events: events_rx, dispatcher: dispatch_tx, shutdown: shutdown_tx },
        )
    }

    /// Asks the transport task to exit. Failure means it is already gone.
    pub(crate) fn shutdown(self) {
        let _ = self.shutdown.send(());
    }
}

/// The transport side of the channel quartet.
pub struct BackendHalf {
    pub(crate) events: mpsc::UnboundedSender<TransportEvent>,
    pub(crate) to_dispatch: mpsc::UnboundedReceiver<String>,
    pub(crate) shutdown: oneshot::Receiver<()>,
}

pub struct WsBackend {
    url: Url,
    half: BackendHalf,
}

impl WsBackend {
    pub fn new(url: Url) -> (Self, BackendDriver) {
        let (half, driver) = BackendDriver::channels();
        (Self { url, half }, driver)
    }

    pub fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(mut self) {
        let ws = match connect_async(self.url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(err) => {
                error!(url = %self.url, %err, "Failed to open websocket");
                let _ = self.half.events.unbounded_send(TransportEvent::Error(err));
                return
            }
        };
        debug!(url = %self.url, "Websocket open");
        if self.half.events.unbounded_send(TransportEvent::Opened).is_err() {
            return
        }

        let mut server = ws.fuse();
        loop {
            let keepalive = tokio::time::sleep(KEEPALIVE_INTERVAL).fuse();
            tokio::pin!(keepalive);

            select! {
                _ = keepalive => {
                    if let Err(err) = server.send(WsMessage::Ping(Vec::new())).await {
                        let _ = self.half.events.unbounded_send(TransportEvent::Error(err));
                        break
                    }
                }
                frame = server.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            trace!(%text, "Received frame");
                            if self.half.events.unbounded_send(TransportEvent::Message(text)).is_err() {
                                break
                            }
                        }
                        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                        Some(Ok(WsMessage::Binary(_))) => {
                            error!("Dropping unexpected binary frame");
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let reason = frame.map(|f| f.reason.into_owned());
                            let _ = self.half.events.unbounded_send(TransportEvent::Closed { frame: reason });
                            break
                        }
                        Some(Err(err)) => {
                            error!(%err, "Websocket error");
                            let _ = self.half.events.unbounded_send(TransportEvent::Error(err));
                            break
                        }
                        None => {
                            let _ = self.half.events.unbounded_send(TransportEvent::Closed { frame: None });
                            break
                        }
                    }
                }
                out = self.half.to_dispatch.next() => {
                    match out {
                        Some(text) => {
                            trace!(%text, "Dispatching frame");
                            if let Err(err) = server.send(WsMessage::Text(text)).await {
                                let _ = self.half.events.unbounded_send(TransportEvent::Error(err));
                                break
                            }
                        }
                        // Driver dropped, nothing left to dispatch for.
                        None => break,
                    }
                }
                _ = &mut self.half.shutdown => {
                    let _ = server.send(WsMessage::Close(None)).await;
                    break
                }
            }
        }
    }
}

/// Factory for the two connection paths of a session: the WebSocket itself
/// and the one-shot HTTP POST carrying an early handshake.
pub trait Connector: Send + Sync + 'static {
    /// Spawns a transport task towards `url`. Readiness and failure arrive
    /// as [`TransportEvent`]s on the returned driver.
    fn open(&self, url: &Url) -> BackendDriver;

    /// Performs a one-shot HTTP POST of `body` and resolves with the
    /// response body.
    fn post(&self, url: &Url, body: String) -> BoxFuture<'static, Result<String, ClientError>>;
}

/// Production [`Connector`]: tungstenite sockets and a shared reqwest client.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    http: reqwest::Client,
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for WsConnector {
    fn open(&self, url: &Url) -> BackendDriver {
        let (backend, driver) = WsBackend::new(url.clone());
        backend.spawn();
        driver
    }

    fn post(&self, url: &Url, body: String) -> BoxFuture<'static, Result<String, ClientError>> {
        let client = self.http.clone();
        let url = url.clone();
        async move {
            let response = client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await?
                .error_for_status()?;
            Ok(response.text().await?)
        }
        .boxed()
    }
}
