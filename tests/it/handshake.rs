//! Handshake paths: the async POST race, `await_only_handshake`, refusals
//! and URL validation.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use bayeux_client::{BayeuxClient, ClientError, Message, SessionState, BAYEUX_MINIMUM_VERSION};

use crate::*;

#[tokio::test]
async fn async_handshake_races_the_transport_open() {
    let mut h = harness(|b| b.may_send_handshake_async(true));
    h.client.connect().unwrap();

    // The transport comes up while the handshake goes out over POST.
    let mut handle = h.control.next_handle().await;
    let post = h.control.next_post().await;
    assert_eq!(post.url.scheme(), "http");
    assert_eq!(post.url.host_str(), Some("server.test"));

    let batch = post.batch();
    assert_eq!(batch[0].channel, "/meta/handshake");
    assert_eq!(batch[0].minimum_version.as_deref(), Some(BAYEUX_MINIMUM_VERSION));
    let id = batch[0].id.clone().unwrap();
    post.respond_messages(&[handshake_ok(&id, "c9")]);

    wait_for(|| h.client.client_id().as_deref() == Some("c9")).await;

    // Only once the socket is open does /meta/connect go out, on the socket.
    handle.open();
    let batch = handle.recv_batch().await;
    assert_eq!(batch[0].channel, "/meta/connect");
    assert_eq!(batch[0].client_id.as_deref(), Some("c9"));
    handle.server_send(&[connect_ok(batch[0].id.as_deref().unwrap())]);

    wait_for(|| h.client.is_connected()).await;
}

#[tokio::test]
async fn failed_handshake_post_reports_a_disconnect() {
    let mut h = harness(|b| b.may_send_handshake_async(true));
    h.client.connect().unwrap();

    let _handle = h.control.next_handle().await;
    let post = h.control.next_post().await;
    post.respond(Err(ClientError::UnexpectedClose));

    wait_for(|| h.delegate.saw(&Event::Disconnected { with_message: false, with_error: true }))
        .await;
    assert_eq!(h.client.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn connect_continuation_fires_on_first_connect_by_default() {
    let mut h = harness(|b| b);
    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    h.client.connect_on_success(move || flag.store(true, Ordering::SeqCst)).unwrap();

    let mut handle = h.control.next_handle().await;
    handle.open();
    let batch = handle.recv_batch().await;
    handle.server_send(&[handshake_ok(batch[0].id.as_deref().unwrap(), "c1")]);

    // Handshake success alone is not enough.
    let batch = handle.recv_batch().await;
    assert_eq!(batch[0].channel, "/meta/connect");
    assert!(!fired.load(Ordering::SeqCst));

    handle.server_send(&[connect_ok(batch[0].id.as_deref().unwrap())]);
    wait_for(|| fired.load(Ordering::SeqCst)).await;
}

#[tokio::test]
async fn connect_continuation_fires_at_handshake_when_configured() {
    let mut h = harness(|b| b.await_only_handshake(true));
    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    h.client.connect_on_success(move || flag.store(true, Ordering::SeqCst)).unwrap();

    let mut handle = h.control.next_handle().await;
    handle.open();
    let batch = handle.recv_batch().await;
    handle.server_send(&[handshake_ok(batch[0].id.as_deref().unwrap(), "c1")]);

    wait_for(|| fired.load(Ordering::SeqCst)).await;
    // The session still completes its connect afterwards.
    let batch = handle.recv_batch().await;
    assert_eq!(batch[0].channel, "/meta/connect");
}

#[tokio::test]
async fn refused_handshake_disconnects_with_the_message() {
    let mut h = harness(|b| b);
    h.client.connect().unwrap();

    let mut handle = h.control.next_handle().await;
    handle.open();
    let batch = handle.recv_batch().await;

    let mut refusal = Message::new("/meta/handshake");
    refusal.successful = Some(false);
    refusal.error = Some(bayeux_client::ErrorField::parse("401::Unknown client"));
    refusal.id = batch[0].id.clone();
    handle.server_send(&[refusal]);

    wait_for(|| h.delegate.saw(&Event::Disconnected { with_message: true, with_error: true }))
        .await;
    assert_eq!(h.client.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn dropped_continuation_on_connect_failure() {
    let mut h = harness(|b| b);
    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    h.client.connect_on_success(move || flag.store(true, Ordering::SeqCst)).unwrap();

    let mut handle = h.control.next_handle().await;
    handle.open();
    let batch = handle.recv_batch().await;
    handle.server_send(&[handshake_ok(batch[0].id.as_deref().unwrap(), "c1")]);

    let batch = handle.recv_batch().await;
    handle
        .server_send(&[connect_fail(batch[0].id.as_deref().unwrap(), serde_json::json!({"reconnect": "none"}))]);

    wait_for(|| h.client.state() == SessionState::Disconnected).await;
    // The continuation is dropped silently; the delegate carries the news.
    assert!(!fired.load(Ordering::SeqCst));
    assert!(h.delegate.saw(&Event::Disconnected { with_message: true, with_error: true }));
}

#[tokio::test]
async fn failed_continuation_does_not_leak_into_the_next_connect() {
    let mut h = harness(|b| b);
    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    h.client.connect_on_success(move || flag.store(true, Ordering::SeqCst)).unwrap();

    let mut handle = h.control.next_handle().await;
    handle.open();
    let batch = handle.recv_batch().await;
    let mut refusal = Message::new("/meta/handshake");
    refusal.successful = Some(false);
    refusal.id = batch[0].id.clone();
    handle.server_send(&[refusal]);
    wait_for(|| h.client.state() == SessionState::Disconnected).await;

    // A later connect succeeds without resurrecting the dead continuation.
    h.client.connect().unwrap();
    let reopened = h.control.next_handle().await;
    open_and_settle(reopened, "c2").await;
    wait_for(|| h.client.is_connected()).await;
    assert!(!fired.load(Ordering::SeqCst));
}

#[tokio::test]
async fn transport_failure_before_open_fails_the_connect() {
    let mut h = harness(|b| b);
    h.client.connect().unwrap();

    let handle = h.control.next_handle().await;
    handle.error();

    wait_for(|| h.delegate.saw(&Event::Disconnected { with_message: false, with_error: true }))
        .await;
    assert_eq!(h.client.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn rejects_unsupported_schemes() {
    let err = BayeuxClient::builder("ftp://server.test/bayeux").build().unwrap_err();
    assert!(matches!(err, ClientError::UnsupportedScheme(scheme) if scheme == "ftp"));
}

#[tokio::test]
async fn upgrades_http_base_urls_to_websocket() {
    let (connector, mut control) = bayeux_client::mock::mock();
    let client = BayeuxClient::builder("https://server.test/bayeux")
        .connector(Arc::new(connector))
        .may_send_handshake_async(false)
        .build()
        .unwrap();

    client.connect().unwrap();
    let handle = control.next_handle().await;
    assert_eq!(handle.url().scheme(), "wss");
}
