//! Scripted vex server over the in-memory transport.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use vex_net::transport::MemoryPeer;
use vex_net::{ConnectorConfig, ConnectorContext, ConnectorEvent, SharedDatabase};
use vex_shared::Identity;
use vex_store::{Account, Database, ServerRecord};

pub const HOST: &str = "H";

pub fn context() -> ConnectorContext {
    ConnectorContext {
        identity: Arc::new(Identity::generate()),
        db: Arc::new(Mutex::new(Database::open_in_memory().unwrap())),
        config: ConnectorConfig::default(),
    }
}

pub fn known_account(db: &SharedDatabase) {
    db.lock()
        .unwrap()
        .insert_account(&Account {
            hostname: HOST.into(),
            username: "Anonymous".into(),
            uuid: "U0".into(),
        })
        .unwrap();
}

pub fn pin(db: &SharedDatabase, key: &Identity) {
    db.lock()
        .unwrap()
        .upsert_server(&ServerRecord {
            hostname: HOST.into(),
            port: 8000,
            pubkey: Some(key.public_key_bytes()),
        })
        .unwrap();
}

pub fn pinned_key(db: &SharedDatabase) -> Option<[u8; 32]> {
    db.lock()
        .unwrap()
        .get_server(HOST)
        .unwrap()
        .and_then(|s| s.pubkey)
}

pub struct FakeServer {
    pub peer: MemoryPeer,
    pub key: Identity,
}

impl FakeServer {
    pub fn new(peer: MemoryPeer) -> Self {
        Self::with_key(peer, Identity::generate())
    }

    pub fn with_key(peer: MemoryPeer, key: Identity) -> Self {
        Self { peer, key }
    }

    pub async fn recv(&mut self) -> Value {
        let text = self
            .peer
            .from_client
            .recv()
            .await
            .expect("client closed the connection");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Next frame of `kind`, skipping heartbeat pings.
    pub async fn expect(&mut self, kind: &str) -> Value {
        loop {
            let frame = self.recv().await;
            if frame["type"] == "ping" && kind != "ping" {
                continue;
            }
            assert_eq!(frame["type"], kind, "unexpected frame {frame}");
            return frame;
        }
    }

    pub fn send(&self, frame: Value) {
        self.peer.send(frame.to_string());
    }

    /// Answer the client's challenge with a signature over its nonce.
    pub fn answer_challenge(&self, challenge: &Value) {
        let nonce = challenge["messageID"].as_str().unwrap();
        self.send(json!({
            "type": "challengeRes",
            "messageID": nonce,
            "pubkey": self.key.public_key_hex(),
            "response": self.key.sign_hex(nonce.as_bytes()),
        }));
    }

    /// Handshake with a client that already has an account, through to the
    /// channel list request that follows authentication.
    pub async fn accept_known_client(&mut self) {
        let challenge = self.expect("challenge").await;
        self.answer_challenge(&challenge);
        self.send(json!({"type": "authResult", "status": "SUCCESS"}));
        let list = self.expect("channel").await;
        assert_eq!(list["method"], "RETRIEVE");
    }

    pub fn send_channel_list(&self, channels: &[(i64, Uuid, &str)]) {
        let channels: Vec<Value> = channels
            .iter()
            .map(|(index, id, name)| {
                json!({"ID": index, "channelID": id, "name": name, "public": true, "admin": ""})
            })
            .collect();
        self.send(json!({"type": "channelListResponse", "channels": channels}));
    }
}

pub fn chat_frame(channel_id: Uuid, second: u32, text: &str) -> (Uuid, Value) {
    let message_id = Uuid::new_v4();
    let frame = json!({
        "type": "chat",
        "messageID": message_id,
        "channelID": channel_id,
        "userID": Uuid::new_v4(),
        "username": "bob",
        "message": text,
        "CreatedAt": format!("2020-05-01T12:00:{second:02}Z"),
    });
    (message_id, frame)
}

/// Next event matching `pred`, discarding the rest.
pub async fn wait_for<F>(
    events: &mut UnboundedReceiver<ConnectorEvent>,
    mut pred: F,
) -> ConnectorEvent
where
    F: FnMut(&ConnectorEvent) -> bool,
{
    loop {
        let event = events.recv().await.expect("event stream ended");
        if pred(&event) {
            return event;
        }
    }
}

/// Next event that is not a phase change.
pub async fn next_event(events: &mut UnboundedReceiver<ConnectorEvent>) -> ConnectorEvent {
    wait_for(events, |e| !matches!(e, ConnectorEvent::Phase(_))).await
}
