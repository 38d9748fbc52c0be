//! The Bayeux message envelope and its wire representation.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Protocol version sent in `/meta/handshake` requests.
pub const BAYEUX_VERSION: &str = "1.0";

/// Oldest protocol version this client can handle.
pub const BAYEUX_MINIMUM_VERSION: &str = "1.0beta";

/// The reserved `/meta/*` channels used for protocol control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaChannel {
    Handshake,
    Connect,
    Subscribe,
    Unsubscribe,
    Disconnect,
}

impl MetaChannel {
    /// The channel name in its wire form.
    pub const fn as_str(self) -> &'static str {
        match self {
            MetaChannel::Handshake => "/meta/handshake",
            MetaChannel::Connect => "/meta/connect",
            MetaChannel::Subscribe => "/meta/subscribe",
            MetaChannel::Unsubscribe => "/meta/unsubscribe",
            MetaChannel::Disconnect => "/meta/disconnect",
        }
    }

    /// Maps a channel name back to its meta channel, if it is one.
    pub fn from_channel(channel: &str) -> Option<Self> {
        match channel {
            "/meta/handshake" => Some(MetaChannel::Handshake),
            "/meta/connect" => Some(MetaChannel::Connect),
            "/meta/subscribe" => Some(MetaChannel::Subscribe),
            "/meta/unsubscribe" => Some(MetaChannel::Unsubscribe),
            "/meta/disconnect" => Some(MetaChannel::Disconnect),
            _ => None,
        }
    }
}

impl fmt::Display for MetaChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection types this client advertises during the handshake.
///
/// Only `websocket` is implemented; the polling types are kept in the
/// advertisement for compatibility with servers that refuse handshakes
/// listing a single transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    WebSocket,
    LongPolling,
    CallbackPolling,
}

impl ConnectionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionType::WebSocket => "websocket",
            ConnectionType::LongPolling => "long-polling",
            ConnectionType::CallbackPolling => "callback-polling",
        }
    }

    /// The `supportedConnectionTypes` advertisement sent on handshake.
    pub fn supported() -> Vec<String> {
        [ConnectionType::WebSocket, ConnectionType::LongPolling, ConnectionType::CallbackPolling]
            .iter()
            .map(|c| c.as_str().to_owned())
            .collect()
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server reconnect directive carried in [`Advice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reconnect {
    /// The session is gone; a full `/meta/handshake` is required.
    Handshake,
    /// Do not attempt any automatic recovery.
    None,
    /// Reconnect with a `/meta/connect` after the advised interval.
    #[serde(other)]
    Retry,
}

/// Server-issued operational advice.
///
/// Any advice received completely supersedes previously received advice.
/// Interval fields are transmitted in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<Reconnect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<String>>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Advice {
    /// The reconnect directive, defaulting to `retry` when absent.
    pub fn reconnect(&self) -> Reconnect {
        self.reconnect.unwrap_or(Reconnect::Retry)
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval.map(Duration::from_millis)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }
}

/// A parsed Bayeux `error` field of the form `code:args:text`.
///
/// A string that does not follow the format is carried opaquely in `text`
/// with no code and no args, and reserializes verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorField {
    pub code: Option<u16>,
    pub args: Vec<String>,
    pub text: String,
}

impl ErrorField {
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.splitn(3, ':');
        if let (Some(code), Some(args), Some(text)) = (parts.next(), parts.next(), parts.next()) {
            if code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit()) {
                return Self {
                    code: code.parse().ok(),
                    args: if args.is_empty() {
                        Vec::new()
                    } else {
                        args.split(',').map(str::to_owned).collect()
                    },
                    text: text.to_owned(),
                }
            }
        }
        Self { code: None, args: Vec::new(), text: raw.to_owned() }
    }

    pub fn opaque(text: impl Into<String>) -> Self {
        Self { code: None, args: Vec::new(), text: text.into() }
    }
}

impl fmt::Display for ErrorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{:03}:{}:{}", code, self.args.join(","), self.text),
            None => f.write_str(&self.text),
        }
    }
}

impl Serialize for ErrorField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ErrorField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ErrorField::parse(&raw))
    }
}

/// The `subscription` field: a single channel or a list of channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Subscription {
    One(String),
    Many(Vec<String>),
}

impl Subscription {
    pub fn first(&self) -> Option<&str> {
        match self {
            Subscription::One(channel) => Some(channel),
            Subscription::Many(channels) => channels.first().map(String::as_str),
        }
    }

    pub fn channels(&self) -> Vec<&str> {
        match self {
            Subscription::One(channel) => vec![channel.as_str()],
            Subscription::Many(channels) => channels.iter().map(String::as_str).collect(),
        }
    }
}

/// One Bayeux message envelope.
///
/// Every field except `channel` is optional; fields this model does not
/// know about are preserved in `rest` so that an envelope round-trips
/// through [`Message::from_value`] / [`Message::to_value`] unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Message {
    pub fn new(channel: impl Into<String>) -> Self {
        Self { channel: channel.into(), ..Default::default() }
    }

    /// Builds a message from its decoded JSON form.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// The JSON form of this message.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// The meta channel this message belongs to, if any.
    pub fn meta(&self) -> Option<MetaChannel> {
        MetaChannel::from_channel(&self.channel)
    }

    pub fn is_successful(&self) -> bool {
        self.successful == Some(true)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} (id {id})", self.channel),
            None => f.write_str(&self.channel),
        }
    }
}
