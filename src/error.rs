use crate::{
    channel::InvalidPattern,
    client::backend::WsError,
    message::{ErrorField, Message},
};

/// Errors surfaced by the client, either as return values of the public
/// operations or through [`ClientDelegate`](crate::delegate::ClientDelegate).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Thrown if a payload failed to encode or decode
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Underlying WebSocket failure
    #[error(transparent)]
    Ws(#[from] WsError),

    /// Failure of the one-shot HTTP handshake request
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Thrown if the base URL or an advised replacement host failed to parse
    #[error(transparent)]
    Url(#[from] url::ParseError),

    /// Thrown if a subscription pattern violates the channel grammar
    #[error(transparent)]
    InvalidChannel(#[from] InvalidPattern),

    /// Bayeux-level failure reported by the server
    #[error("server error on `{channel}`: {error}")]
    Bayeux {
        /// The meta or user channel the failing response arrived on
        channel: String,
        /// The parsed `error` field of the response
        error: ErrorField,
    },

    /// The requested operation needs a connected session
    #[error("`{operation}` requires a connected session")]
    NotConnected { operation: &'static str },

    /// Base URLs must use the `ws`, `wss`, `http` or `https` scheme
    #[error("unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),

    /// Remote closed the socket without a disconnect
    #[error("websocket closed unexpectedly")]
    UnexpectedClose,

    /// The session engine is no longer running
    #[error("session engine is gone")]
    DeadChannel,
}

impl ClientError {
    /// The error for an unsuccessful response, built from its `error` field
    /// when the server sent one.
    pub(crate) fn bayeux(message: &Message) -> Self {
        let error = message
            .error
            .clone()
            .unwrap_or_else(|| ErrorField::opaque("request was not successful"));
        ClientError::Bayeux { channel: message.channel.clone(), error }
    }
}
