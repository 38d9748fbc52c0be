#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

//! A [Bayeux] publish/subscribe client over WebSocket.
//!
//! The crate multiplexes any number of application channels over a single
//! long-lived connection: it negotiates the session handshake, keeps the
//! session identity alive across reconnects, correlates meta-channel
//! responses with their requests, honors server advice (retry intervals,
//! forced re-handshakes, replacement hosts), and routes pushed messages to
//! the registered callbacks, with `/foo/*` and `/foo/**` pattern support.
//!
//! ```no_run
//! use bayeux_client::BayeuxClient;
//!
//! # async fn run() -> Result<(), bayeux_client::ClientError> {
//! let client = BayeuxClient::builder("wss://example.com:8000/faye").build()?;
//! let handle = client.clone();
//! client.connect_on_success(move || {
//!     handle.subscribe("/weather/*", |data| println!("{data}")).ok();
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! [Bayeux]: https://docs.cometd.org/current/reference/#_bayeux

mod actor;
pub mod channel;
pub mod client;
pub mod delegate;
mod error;
pub mod message;
mod subscription;
mod urls;

pub use channel::{ChannelPattern, InvalidPattern};
pub use client::{
    backend::{BackendDriver, Connector, TransportEvent, WsConnector, WsError},
    mock, BayeuxClient, ClientBuilder, SessionState, DEFAULT_RECONNECT_INTERVAL,
};
pub use delegate::{ClientDelegate, InlineQueue, TaskQueue, TokioQueue};
pub use error::ClientError;
pub use message::{
    Advice, ConnectionType, ErrorField, Message, MetaChannel, Reconnect, Subscription,
    BAYEUX_MINIMUM_VERSION, BAYEUX_VERSION,
};
pub use subscription::MessageCallback;
