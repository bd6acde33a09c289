mod common;

use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use vex_net::transport::{memory, MemoryPeer};
use vex_net::{
    spawn_session, CloseReason, ConnectorError, ConnectorEvent, Dialer, SecurityFailure,
    SessionEnd, SessionEvent, Target, Transport,
};
use vex_shared::Identity;

use common::*;

/// Hands the server side of every dialed connection to the test.
struct QueueDialer {
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl Dialer for QueueDialer {
    fn dial(&self, _target: &Target) -> BoxFuture<'static, Result<Transport, ConnectorError>> {
        let (transport, peer) = memory();
        let sent = self.peers.send(peer).is_ok();
        Box::pin(async move {
            if sent {
                Ok(transport)
            } else {
                Err(ConnectorError::Transport("test is gone".into()))
            }
        })
    }
}

struct RefusingDialer;

impl Dialer for RefusingDialer {
    fn dial(&self, _target: &Target) -> BoxFuture<'static, Result<Transport, ConnectorError>> {
        Box::pin(async { Err(ConnectorError::Transport("connection refused".into())) })
    }
}

async fn next_session_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    loop {
        match events.recv().await.expect("session stream ended") {
            SessionEvent::Connector(ConnectorEvent::Phase(_)) => continue,
            event => return event,
        }
    }
}

async fn until_end(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> (SessionEnd, u32) {
    let mut reconnects = 0;
    loop {
        match next_session_event(events).await {
            SessionEvent::Reconnecting { .. } => reconnects += 1,
            SessionEvent::Ended(end) => return (end, reconnects),
            SessionEvent::Connector(_) => {}
        }
    }
}

#[tokio::test(start_paused = true)]
async fn transport_loss_reconnects_into_the_same_channel() {
    let ctx = context();
    known_account(&ctx.db);
    let (peers_tx, mut peers) = mpsc::unbounded_channel();
    let channel = Uuid::new_v4();
    let key = Identity::generate();
    pin(&ctx.db, &key);

    let (handle, mut events) = spawn_session(
        QueueDialer { peers: peers_tx },
        Target::new(HOST, 8000),
        ctx.clone(),
        Some(channel),
    );

    let mut server = FakeServer::with_key(peers.recv().await.unwrap(), key.clone());
    server.accept_known_client().await;
    server.send_channel_list(&[(1, channel, "general")]);
    let join = server.expect("channel").await;
    assert_eq!(join["method"], "JOIN");
    assert_eq!(join["channelID"], channel.to_string());
    server.send(json!({"type": "channelJoinRes", "status": "SUCCESS", "channelID": channel, "name": "general"}));
    server.expect("historyReq").await;

    let connector = handle.connector().unwrap();
    assert_eq!(connector.channel_id(), Some(channel));

    server.peer.hang_up(None);
    let reconnecting = loop {
        match next_session_event(&mut events).await {
            event @ SessionEvent::Reconnecting { .. } => break event,
            SessionEvent::Ended(end) => panic!("session ended early: {end:?}"),
            SessionEvent::Connector(_) => {}
        }
    };
    assert!(matches!(
        reconnecting,
        SessionEvent::Reconnecting { attempt: 1, delay } if delay == Duration::from_secs(5)
    ));

    // Same key, so the replacement connector passes the pin check.
    let mut server = FakeServer::with_key(peers.recv().await.unwrap(), key);
    server.accept_known_client().await;
    server.send_channel_list(&[(1, channel, "general")]);
    let join = server.expect("channel").await;
    assert_eq!(join["method"], "JOIN");
    assert_eq!(join["channelID"], channel.to_string());

    let replacement = handle.connector().unwrap();
    assert!(replacement.is_authenticated());

    handle.stop();
    let (end, reconnects) = until_end(&mut events).await;
    assert_eq!(end, SessionEnd::Closed(CloseReason::Local));
    assert_eq!(reconnects, 0);
    handle.join().await;
}

#[tokio::test]
async fn first_connect_failure_ends_the_session() {
    let ctx = context();
    let (handle, mut events) = spawn_session(RefusingDialer, Target::default(), ctx, None);

    let (end, reconnects) = until_end(&mut events).await;
    assert!(matches!(end, SessionEnd::ConnectFailed(ref e) if e.contains("connection refused")));
    assert_eq!(reconnects, 0);
    assert!(handle.connector().is_none());
    handle.join().await;
}

#[tokio::test]
async fn security_failure_is_not_retried() {
    let ctx = context();
    known_account(&ctx.db);
    let (peers_tx, mut peers) = mpsc::unbounded_channel();

    let (handle, mut events) = spawn_session(
        QueueDialer { peers: peers_tx },
        Target::new(HOST, 8000),
        ctx.clone(),
        None,
    );

    let mut server = FakeServer::new(peers.recv().await.unwrap());
    let challenge = server.expect("challenge").await;
    server.send(json!({
        "type": "challengeRes",
        "messageID": challenge["messageID"],
        "pubkey": server.key.public_key_hex(),
        "response": server.key.sign_hex(b"not the nonce"),
    }));

    let (end, reconnects) = until_end(&mut events).await;
    assert_eq!(
        end,
        SessionEnd::Closed(CloseReason::Security(SecurityFailure::BadSignature))
    );
    assert_eq!(reconnects, 0);
    handle.join().await;
    assert!(peers.try_recv().is_err());
}

#[tokio::test]
async fn stop_before_handshake_ends_locally() {
    let ctx = context();
    known_account(&ctx.db);
    let (peers_tx, mut peers) = mpsc::unbounded_channel();

    let (handle, mut events) = spawn_session(
        QueueDialer { peers: peers_tx },
        Target::new(HOST, 8000),
        ctx,
        None,
    );

    let mut server = FakeServer::new(peers.recv().await.unwrap());
    server.expect("challenge").await;

    handle.stop();
    let (end, _) = until_end(&mut events).await;
    assert_eq!(end, SessionEnd::Closed(CloseReason::Local));
    handle.join().await;
}
