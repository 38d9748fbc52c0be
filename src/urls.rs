//! Scheme and host juggling for the two connection paths.
//!
//! The session accepts `ws`, `wss`, `http` and `https` base URLs. The
//! WebSocket connects on the `ws(s)` form; the async-handshake POST uses the
//! `http(s)` form of the same URL. Advice may also swap out the host.

use url::Url;

use crate::error::ClientError;

/// Checks that `url` carries a scheme the client can connect with.
pub(crate) fn validate(url: &Url) -> Result<(), ClientError> {
    match url.scheme() {
        "ws" | "wss" | "http" | "https" => Ok(()),
        other => Err(ClientError::UnsupportedScheme(other.to_owned())),
    }
}

/// The `ws(s)` form of `url`.
pub(crate) fn websocket(url: &Url) -> Url {
    let mut url = url.clone();
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => other,
    }
    .to_owned();
    // Infallible between the four accepted (all "special") schemes.
    let _ = url.set_scheme(&scheme);
    url
}

/// The `http(s)` form of `url`, used for the one-shot handshake POST.
pub(crate) fn handshake_post(url: &Url) -> Url {
    let mut url = url.clone();
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => other,
    }
    .to_owned();
    let _ = url.set_scheme(&scheme);
    url
}

/// `url` with its host replaced, scheme and path kept.
pub(crate) fn with_host(url: &Url, host: &str) -> Result<Url, ClientError> {
    let mut url = url.clone();
    url.set_host(Some(host))?;
    Ok(url)
}
