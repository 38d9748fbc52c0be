//! Connected-session behavior: handshake/connect sequencing, subscriptions,
//! dispatch, publishes and explicit disconnect.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use serde_json::json;

use bayeux_client::{Message, MessageCallback, SessionState, BAYEUX_VERSION};

use crate::*;

#[tokio::test]
async fn happy_connect() {
    let mut h = harness(|b| b);
    h.client.connect().unwrap();

    let mut handle = h.control.next_handle().await;
    assert_eq!(handle.url().as_str(), "ws://server.test/bayeux");
    handle.open();

    let batch = handle.recv_batch().await;
    assert_eq!(batch.len(), 1);
    let handshake = &batch[0];
    assert_eq!(handshake.channel, "/meta/handshake");
    assert_eq!(handshake.version.as_deref(), Some(BAYEUX_VERSION));
    let advertised = handshake.supported_connection_types.clone().unwrap();
    assert_eq!(advertised, vec!["websocket", "long-polling", "callback-polling"]);
    let id = handshake.id.clone().unwrap();
    handle.server_send(&[handshake_ok(&id, "c1")]);

    let batch = handle.recv_batch().await;
    let connect = &batch[0];
    assert_eq!(connect.channel, "/meta/connect");
    assert_eq!(connect.client_id.as_deref(), Some("c1"));
    assert_eq!(connect.connection_type.as_deref(), Some("websocket"));
    handle.server_send(&[connect_ok(connect.id.as_deref().unwrap())]);

    wait_for(|| h.client.is_connected()).await;
    assert_eq!(h.client.client_id().as_deref(), Some("c1"));
    assert_eq!(h.delegate.count(&Event::Connected), 1);

    // The confirmed connect starts the keepalive loop.
    let batch = handle.recv_batch().await;
    assert_eq!(batch[0].channel, "/meta/connect");
}

#[tokio::test]
async fn subscribe_and_receive() {
    let mut h = harness(|b| b);
    let mut session = establish(&h.client, &mut h.control).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    h.client.subscribe("/weather/*", move |data| sink.lock().unwrap().push(data)).unwrap();

    let batch = session.handle.recv_batch().await;
    let subscribe = &batch[0];
    assert_eq!(subscribe.channel, "/meta/subscribe");
    assert_eq!(subscribe.client_id.as_deref(), Some("c1"));
    assert_eq!(subscribe.subscription.as_ref().unwrap().first(), Some("/weather/*"));
    session.handle.server_send(&[subscribe_ok(subscribe.id.as_deref().unwrap(), "/weather/*")]);

    wait_for(|| h.delegate.saw(&Event::SubscriptionSucceeded("/weather/*".into()))).await;
    assert_eq!(h.client.subscribed_channels(), vec!["/weather/*"]);

    session.handle.server_send(&[deliver("/weather/berlin", json!({"t": 17}))]);
    wait_for(|| !seen.lock().unwrap().is_empty()).await;
    assert_eq!(*seen.lock().unwrap(), vec![json!({"t": 17})]);
    assert_eq!(h.delegate.count(&Event::SubscriptionSucceeded("/weather/*".into())), 1);
}

#[tokio::test]
async fn concurrent_subscribes_correlate_by_channel() {
    let mut h = harness(|b| b);
    let mut session = establish(&h.client, &mut h.control).await;

    let hits = Arc::new(AtomicUsize::new(0));
    let sink = hits.clone();
    h.client
        .subscribe_many(vec!["/stocks/*".into(), "/news/**".into()], move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    // Both requests travel in one array envelope.
    let batch = session.handle.recv_batch().await;
    assert_eq!(batch.len(), 2);
    let first = batch[0].id.clone().unwrap();
    let second = batch[1].id.clone().unwrap();

    // Confirm out of order; correlation is by the echoed channel.
    session.handle.server_send(&[subscribe_ok(&second, "/news/**")]);
    session.handle.server_send(&[subscribe_ok(&first, "/stocks/*")]);

    wait_for(|| h.client.subscribed_channels().len() == 2).await;
    session.handle.server_send(&[deliver("/news/tech/rust", json!(1))]);
    wait_for(|| hits.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn unexpected_messages_go_to_the_delegate() {
    let mut h = harness(|b| b);
    let session = establish(&h.client, &mut h.control).await;

    session.handle.server_send(&[deliver("/notes/x", json!({"n": 1}))]);
    wait_for(|| h.delegate.saw(&Event::UnexpectedMessage("/notes/x".into()))).await;
    assert_eq!(h.delegate.count(&Event::UnexpectedMessage("/notes/x".into())), 1);
}

#[tokio::test]
async fn publish_sends_and_handles_acks() {
    let mut h = harness(|b| b);
    let mut session = establish(&h.client, &mut h.control).await;

    h.client.publish("/chat/lobby", json!({"text": "hi"})).unwrap();
    let batch = session.handle.recv_batch().await;
    let publish = &batch[0];
    assert_eq!(publish.channel, "/chat/lobby");
    assert_eq!(publish.client_id.as_deref(), Some("c1"));
    assert_eq!(publish.data, Some(json!({"text": "hi"})));
    let id = publish.id.clone().unwrap();

    // Positive ack is silent.
    let mut ack = Message::new("/chat/lobby");
    ack.successful = Some(true);
    ack.id = Some(id);
    session.handle.server_send(&[ack]);
    expect_silence(&mut session.handle).await;
    assert!(!h.delegate.events().iter().any(|e| matches!(e, Event::Failed(_))));
}

#[tokio::test]
async fn failed_publish_ack_surfaces_as_error() {
    let mut h = harness(|b| b);
    let mut session = establish(&h.client, &mut h.control).await;

    h.client.publish("/chat/lobby", json!({"text": "hi"})).unwrap();
    let batch = session.handle.recv_batch().await;
    let id = batch[0].id.clone().unwrap();

    let mut ack = Message::new("/chat/lobby");
    ack.successful = Some(false);
    ack.error = Some(bayeux_client::ErrorField::parse("403:/chat/lobby:denied"));
    ack.id = Some(id);
    session.handle.server_send(&[ack]);

    wait_for(|| h.delegate.events().iter().any(|e| matches!(e, Event::Failed(text) if text.contains("denied"))))
        .await;
    assert!(h.client.is_connected());
}

#[tokio::test]
async fn operations_without_a_session_are_usage_errors() {
    let h = harness(|b| b);

    h.client.publish("/chat/lobby", json!(1)).unwrap();
    wait_for(|| {
        h.delegate.events().iter().any(|e| matches!(e, Event::Failed(text) if text.contains("publish")))
    })
    .await;

    h.client.subscribe("/a/*", |_| {}).unwrap();
    wait_for(|| {
        h.delegate.events().iter().any(|e| matches!(e, Event::Failed(text) if text.contains("subscribe")))
    })
    .await;

    assert_eq!(h.client.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn duplicate_responses_fire_continuations_at_most_once() {
    let mut h = harness(|b| b);
    let mut session = establish(&h.client, &mut h.control).await;

    h.client.subscribe("/a/*", |_| {}).unwrap();
    let batch = session.handle.recv_batch().await;
    let id = batch[0].id.clone().unwrap();

    session.handle.server_send(&[subscribe_ok(&id, "/a/*")]);
    session.handle.server_send(&[subscribe_ok(&id, "/a/*")]);

    wait_for(|| h.delegate.saw(&Event::SubscriptionSucceeded("/a/*".into()))).await;
    expect_silence(&mut session.handle).await;
    assert_eq!(h.delegate.count(&Event::SubscriptionSucceeded("/a/*".into())), 1);
}

#[tokio::test]
async fn resubscribing_the_same_callback_delivers_once() {
    let mut h = harness(|b| b);
    let mut session = establish(&h.client, &mut h.control).await;

    let hits = Arc::new(AtomicUsize::new(0));
    let sink = hits.clone();
    let callback: MessageCallback = Arc::new(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });

    for _ in 0..2 {
        h.client.subscribe_callback("/a/*", callback.clone()).unwrap();
        let batch = session.handle.recv_batch().await;
        let id = batch[0].id.clone().unwrap();
        session.handle.server_send(&[subscribe_ok(&id, "/a/*")]);
    }
    wait_for(|| h.delegate.count(&Event::SubscriptionSucceeded("/a/*".into())) == 2).await;

    session.handle.server_send(&[deliver("/a/b", json!(1))]);
    wait_for(|| hits.load(Ordering::SeqCst) > 0).await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refused_subscription_discards_the_callbacks() {
    let mut h = harness(|b| b);
    let mut session = establish(&h.client, &mut h.control).await;

    h.client.subscribe("/a/*", |_| {}).unwrap();
    let batch = session.handle.recv_batch().await;

    let mut refusal = Message::new("/meta/subscribe");
    refusal.successful = Some(false);
    refusal.subscription = Some(bayeux_client::Subscription::One("/a/*".into()));
    refusal.error = Some(bayeux_client::ErrorField::parse("403:/a/*:denied"));
    refusal.id = batch[0].id.clone();
    session.handle.server_send(&[refusal]);

    wait_for(|| h.delegate.events().iter().any(|e| matches!(e, Event::Failed(text) if text.contains("denied"))))
        .await;
    // The intent recorded at send time is rolled back.
    assert!(h.client.subscribed_channels().is_empty());
    session.handle.server_send(&[deliver("/a/b", json!(1))]);
    wait_for(|| h.delegate.saw(&Event::UnexpectedMessage("/a/b".into()))).await;
}

#[tokio::test]
async fn unsubscribe_removes_interest_immediately() {
    let mut h = harness(|b| b);
    let mut session = establish(&h.client, &mut h.control).await;

    h.client.subscribe("/a/*", |_| {}).unwrap();
    let batch = session.handle.recv_batch().await;
    let id = batch[0].id.clone().unwrap();
    session.handle.server_send(&[subscribe_ok(&id, "/a/*")]);
    wait_for(|| !h.client.subscribed_channels().is_empty()).await;

    h.client.unsubscribe("/a/*").unwrap();
    let batch = session.handle.recv_batch().await;
    assert_eq!(batch[0].channel, "/meta/unsubscribe");
    assert_eq!(batch[0].subscription.as_ref().unwrap().first(), Some("/a/*"));

    // Callbacks are gone regardless of the (still pending) response.
    session.handle.server_send(&[deliver("/a/b", json!(1))]);
    wait_for(|| h.delegate.saw(&Event::UnexpectedMessage("/a/b".into()))).await;
    assert!(h.client.subscribed_channels().is_empty());
}

#[tokio::test]
async fn dropping_every_handle_ends_the_session() {
    let mut h = harness(|b| b);
    let mut session = establish(&h.client, &mut h.control).await;

    drop(h.client);
    // The engine exits and lets go of the transport.
    wait_for_closed(&mut session.handle).await;
}

#[tokio::test]
async fn persist_keeps_the_session_alive_without_handles() {
    let mut h = harness(|b| b.persist(true));
    let session = establish(&h.client, &mut h.control).await;

    drop(h.client);
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    // Still dispatching: a pushed message reaches the delegate.
    session.handle.server_send(&[deliver("/notes/x", json!(1))]);
    wait_for(|| h.delegate.saw(&Event::UnexpectedMessage("/notes/x".into()))).await;
}

async fn wait_for_closed(handle: &mut bayeux_client::mock::MockHandle) {
    let outcome =
        tokio::time::timeout(std::time::Duration::from_secs(1), handle.try_recv_raw()).await;
    assert_eq!(outcome.expect("engine did not exit"), None);
}

#[tokio::test]
async fn disconnect_notifies_and_keeps_the_table() {
    let mut h = harness(|b| b);
    let mut session = establish(&h.client, &mut h.control).await;

    h.client.subscribe("/a/*", |_| {}).unwrap();
    let batch = session.handle.recv_batch().await;
    let id = batch[0].id.clone().unwrap();
    session.handle.server_send(&[subscribe_ok(&id, "/a/*")]);
    wait_for(|| !h.client.subscribed_channels().is_empty()).await;

    h.client.disconnect().unwrap();
    let batch = session.handle.recv_batch().await;
    assert_eq!(batch[0].channel, "/meta/disconnect");
    assert_eq!(batch[0].client_id.as_deref(), Some("c1"));

    wait_for(|| h.client.state() == SessionState::Disconnected).await;
    assert!(h.delegate.saw(&Event::Disconnected { with_message: false, with_error: false }));
    assert_eq!(h.client.client_id(), None);
    // Intent survives for a later reconnect().
    assert_eq!(h.client.subscribed_channels(), vec!["/a/*"]);
}
