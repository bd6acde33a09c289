//! Wire protocol spoken with a vex server.
//!
//! Every frame is a JSON object with a `type` discriminator. Requests that
//! expect a reply carry a correlation token, either `transmissionID` or
//! `messageID` depending on the request kind, and the server echoes it back
//! on the reply.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::STATUS_SUCCESS;
use crate::error::ProtocolError;

/// Generate a fresh correlation token.
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Raw envelope
// ---------------------------------------------------------------------------

/// A parsed inbound frame whose payload has not been decoded yet.
///
/// The correlation table routes on the envelope alone; only unclaimed
/// envelopes are decoded into [`Inbound`].
#[derive(Debug, Clone)]
pub struct Envelope {
    kind: String,
    body: Value,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let body: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let kind = body
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();
        Ok(Self { kind, body })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The token linking this frame to an outstanding request, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.body
            .get("transmissionID")
            .and_then(Value::as_str)
            .or_else(|| self.body.get("messageID").and_then(Value::as_str))
    }

    /// Decode the payload as a reply shape known to the caller.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&self.body).map_err(|source| ProtocolError::Payload {
            kind: self.kind.clone(),
            source,
        })
    }

    pub fn into_inbound(self) -> Result<Inbound, ProtocolError> {
        let Self { kind, body } = self;
        Inbound::deserialize(body).map_err(|source| ProtocolError::Payload { kind, source })
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Frames the server pushes that are not replies to a pending request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Inbound {
    /// Our own account as the server sees it
    #[serde(rename = "clientInfo")]
    ClientInfo { client: UserInfo },

    #[serde(rename = "serverMessage")]
    ServerMessage { message: String },

    #[serde(rename = "channelPermRes")]
    ChannelPermRes { status: String },

    #[serde(rename = "userInfoRes")]
    UserInfoRes {
        #[serde(rename = "matchList", default)]
        match_list: Vec<UserInfo>,
    },

    #[serde(rename = "channelLeaveMsgRes")]
    ChannelLeaveRes {
        #[serde(rename = "channelID")]
        channel_id: Uuid,
    },

    #[serde(rename = "authResult")]
    AuthResult { status: String },

    #[serde(rename = "welcomeMessage")]
    WelcomeMessage { message: String },

    #[serde(rename = "chat")]
    Chat(ChatPayload),

    #[serde(rename = "channelListResponse")]
    ChannelList {
        #[serde(default)]
        channels: Vec<ChannelInfo>,
    },

    #[serde(rename = "channelJoinRes")]
    ChannelJoinRes {
        status: String,
        #[serde(rename = "channelID", default)]
        channel_id: Option<Uuid>,
        #[serde(default)]
        name: String,
    },

    #[serde(rename = "error")]
    Error { message: String },

    /// Server-issued nonce we must sign.
    ///
    /// Servers put the nonce in `nonce`, older ones in `messageID`. When both
    /// are present `nonce` wins.
    #[serde(rename = "challenge")]
    Challenge {
        #[serde(default)]
        nonce: Option<String>,
        #[serde(rename = "messageID", default)]
        message_id: Option<String>,
    },

    #[serde(rename = "pong")]
    Pong,

    #[serde(other)]
    Unknown,
}

/// A chat message as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(rename = "messageID")]
    pub message_id: Uuid,
    #[serde(rename = "channelID")]
    pub channel_id: Uuid,
    #[serde(rename = "userID")]
    pub user_id: Uuid,
    #[serde(default)]
    pub username: String,
    pub message: String,
    #[serde(rename = "CreatedAt", alias = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "UpdatedAt", alias = "updatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "DeletedAt", alias = "deletedAt", default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A user record as returned by `clientInfo` and `userInfoRes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(rename = "UUID", alias = "userID")]
    pub user_id: Uuid,
    #[serde(rename = "Username", alias = "username", default)]
    pub username: String,
    #[serde(rename = "PubKey", alias = "pubkey", default)]
    pub pubkey: String,
    #[serde(rename = "PowerLevel", alias = "powerLevel", default)]
    pub power_level: i64,
}

/// One entry of a channel list broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Server-side sequence number, used as the short handle for joining
    #[serde(rename = "ID", default)]
    pub index: i64,
    #[serde(rename = "channelID")]
    pub channel_id: Uuid,
    pub name: String,
    #[serde(rename = "public", default)]
    pub is_public: bool,
    #[serde(default)]
    pub admin: String,
}

// ---------------------------------------------------------------------------
// Correlated reply shapes
// ---------------------------------------------------------------------------

/// Reply to `identity/CREATE`: the token to sign and register.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityCreated {
    pub uuid: String,
}

/// Generic `{status}` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusReply {
    #[serde(default)]
    pub status: String,
}

impl StatusReply {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

/// Reply to our own `challenge`: the server's signature over our nonce.
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeReply {
    pub pubkey: String,
    pub response: String,
}

/// Body of an `error` frame sent in reply to a correlated request.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorReply {
    #[serde(default)]
    pub message: String,
}

/// Reply to `userInfo/RETRIEVE`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserSearchReply {
    #[serde(rename = "matchList", default)]
    pub match_list: Vec<UserInfo>,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Every frame the client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Outbound {
    #[serde(rename = "identity")]
    Identity(IdentityRequest),

    /// Client-issued nonce the server must sign
    #[serde(rename = "challenge")]
    Challenge {
        #[serde(rename = "messageID")]
        message_id: String,
        pubkey: String,
    },

    /// Our signature over a server-issued nonce
    #[serde(rename = "challengeRes")]
    ChallengeRes {
        #[serde(rename = "messageID")]
        message_id: String,
        pubkey: String,
        response: String,
    },

    #[serde(rename = "channel")]
    Channel(ChannelRequest),

    #[serde(rename = "chat")]
    Chat(ChatRequest),

    #[serde(rename = "channelPerm")]
    ChannelPerm(PermissionRequest),

    #[serde(rename = "userInfo")]
    UserInfo(UserInfoRequest),

    #[serde(rename = "user")]
    User(UserRequest),

    #[serde(rename = "historyReq")]
    HistoryReq(HistoryRequest),

    #[serde(rename = "ping")]
    Ping {
        #[serde(rename = "messageID")]
        message_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum IdentityRequest {
    #[serde(rename = "CREATE")]
    Create {
        #[serde(rename = "messageID")]
        message_id: String,
    },
    #[serde(rename = "REGISTER")]
    Register {
        #[serde(rename = "messageID")]
        message_id: String,
        pubkey: String,
        signed: String,
        uuid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum ChannelRequest {
    #[serde(rename = "CREATE")]
    Create {
        #[serde(rename = "transmissionID")]
        transmission_id: String,
        name: String,
        #[serde(rename = "privateChannel")]
        private_channel: bool,
    },
    #[serde(rename = "DELETE")]
    Delete {
        #[serde(rename = "transmissionID")]
        transmission_id: String,
        #[serde(rename = "channelID")]
        channel_id: Uuid,
    },
    #[serde(rename = "RETRIEVE")]
    List {
        #[serde(rename = "messageID")]
        message_id: String,
    },
    #[serde(rename = "JOIN")]
    Join {
        #[serde(rename = "transmissionID")]
        transmission_id: String,
        #[serde(rename = "channelID")]
        channel_id: Uuid,
    },
    #[serde(rename = "LEAVE")]
    Leave {
        #[serde(rename = "transmissionID")]
        transmission_id: String,
        #[serde(rename = "channelID")]
        channel_id: Uuid,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum ChatRequest {
    #[serde(rename = "CREATE")]
    Create {
        #[serde(rename = "transmissionID")]
        transmission_id: String,
        #[serde(rename = "channelID")]
        channel_id: Uuid,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(rename = "channelID")]
    pub channel_id: Uuid,
    #[serde(rename = "userID")]
    pub user_id: Uuid,
    #[serde(rename = "powerLevel")]
    pub power_level: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum PermissionRequest {
    #[serde(rename = "CREATE")]
    Grant {
        #[serde(rename = "transmissionID")]
        transmission_id: String,
        permission: Permission,
    },
    #[serde(rename = "DELETE")]
    Revoke {
        #[serde(rename = "transmissionID")]
        transmission_id: String,
        permission: Permission,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum UserInfoRequest {
    #[serde(rename = "RETRIEVE")]
    Retrieve {
        #[serde(rename = "transmissionID")]
        transmission_id: String,
        username: String,
        #[serde(rename = "userTag")]
        user_tag: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum UserRequest {
    #[serde(rename = "NICK")]
    Nick {
        #[serde(rename = "channelID", default)]
        channel_id: Option<Uuid>,
        username: String,
    },
    #[serde(rename = "UPDATE")]
    PowerLevel {
        #[serde(rename = "userID")]
        user_id: Uuid,
        #[serde(rename = "powerLevel")]
        power_level: i64,
    },
    #[serde(rename = "KICK")]
    Kick {
        #[serde(rename = "userID")]
        user_id: Uuid,
    },
    #[serde(rename = "BAN")]
    Ban {
        #[serde(rename = "userID")]
        user_id: Uuid,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum HistoryRequest {
    #[serde(rename = "RETRIEVE")]
    Retrieve {
        #[serde(rename = "messageID")]
        message_id: String,
        #[serde(rename = "channelID")]
        channel_id: Uuid,
        /// Newest message the client already holds
        #[serde(rename = "topMessage")]
        top_message: Uuid,
    },
}

impl Outbound {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Identity(_) => "identity",
            Self::Challenge { .. } => "challenge",
            Self::ChallengeRes { .. } => "challengeRes",
            Self::Channel(_) => "channel",
            Self::Chat(_) => "chat",
            Self::ChannelPerm(_) => "channelPerm",
            Self::UserInfo(_) => "userInfo",
            Self::User(_) => "user",
            Self::HistoryReq(_) => "historyReq",
            Self::Ping { .. } => "ping",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_chat_from_server_json() {
        let raw = r#"{
            "type": "chat",
            "ID": 17,
            "messageID": "5b0e5b8e-6a55-4d44-9d6c-0d5f0d0b7a11",
            "channelID": "3cd23d1a-c267-4b4b-ab2a-1649b3aec322",
            "userID": "8f2f6c1e-2dcb-4a7e-9c43-0f8d6f2c0a90",
            "username": "Anonymous",
            "message": "hello",
            "CreatedAt": "2020-05-01T12:00:00Z",
            "UpdatedAt": "2020-05-01T12:00:00Z",
            "DeletedAt": null
        }"#;

        let env = Envelope::parse(raw).unwrap();
        assert_eq!(env.kind(), "chat");
        match env.into_inbound().unwrap() {
            Inbound::Chat(chat) => {
                assert_eq!(chat.message, "hello");
                assert_eq!(chat.username, "Anonymous");
                assert!(chat.deleted_at.is_none());
                assert!(chat.updated_at.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_falls_back() {
        let env = Envelope::parse(r#"{"type":"typing","user":"x"}"#).unwrap();
        assert_eq!(env.into_inbound().unwrap(), Inbound::Unknown);

        let env = Envelope::parse(r#"{"type":"pong","messageID":"abc"}"#).unwrap();
        assert_eq!(env.into_inbound().unwrap(), Inbound::Pong);
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(matches!(
            Envelope::parse("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::parse(r#"{"message":"no type"}"#),
            Err(ProtocolError::MissingType)
        ));

        let env = Envelope::parse(r#"{"type":"chat","message":"missing ids"}"#).unwrap();
        assert!(matches!(
            env.into_inbound(),
            Err(ProtocolError::Payload { .. })
        ));
    }

    #[test]
    fn test_correlation_prefers_transmission_id() {
        let env =
            Envelope::parse(r#"{"type":"userInfoRes","transmissionID":"t1","messageID":"m1"}"#)
                .unwrap();
        assert_eq!(env.correlation_id(), Some("t1"));

        let env = Envelope::parse(r#"{"type":"pong","messageID":"m1"}"#).unwrap();
        assert_eq!(env.correlation_id(), Some("m1"));

        let env = Envelope::parse(r#"{"type":"welcomeMessage","message":"hi"}"#).unwrap();
        assert_eq!(env.correlation_id(), None);
    }

    #[test]
    fn test_challenge_nonce_fields() {
        let env = Envelope::parse(r#"{"type":"challenge","nonce":"N1"}"#).unwrap();
        assert_eq!(
            env.into_inbound().unwrap(),
            Inbound::Challenge {
                nonce: Some("N1".into()),
                message_id: None,
            }
        );

        let env = Envelope::parse(r#"{"type":"challenge","messageID":"c-1","nonce":"N1"}"#)
            .unwrap();
        assert_eq!(
            env.into_inbound().unwrap(),
            Inbound::Challenge {
                nonce: Some("N1".into()),
                message_id: Some("c-1".into()),
            }
        );
    }

    #[test]
    fn test_error_reply_message() {
        let env = Envelope::parse(
            r#"{"type":"error","transmissionID":"t1","message":"insufficient power level"}"#,
        )
        .unwrap();
        assert_eq!(
            env.decode::<ErrorReply>().unwrap().message,
            "insufficient power level"
        );
    }

    #[test]
    fn test_outbound_carries_type_and_method() {
        let channel_id = Uuid::new_v4();
        let join = Outbound::Channel(ChannelRequest::Join {
            transmission_id: "t1".into(),
            channel_id,
        });
        let value: Value = serde_json::from_str(&join.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "channel");
        assert_eq!(value["method"], "JOIN");
        assert_eq!(value["channelID"], channel_id.to_string());
        assert_eq!(value["transmissionID"], "t1");

        let history = Outbound::HistoryReq(HistoryRequest::Retrieve {
            message_id: "m1".into(),
            channel_id,
            top_message: Uuid::nil(),
        });
        let value: Value = serde_json::from_str(&history.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "historyReq");
        assert_eq!(value["method"], "RETRIEVE");
        assert_eq!(value["topMessage"], "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_status_reply() {
        let env = Envelope::parse(r#"{"type":"identityRes","messageID":"m","status":"SUCCESS"}"#)
            .unwrap();
        assert!(env.decode::<StatusReply>().unwrap().is_success());
        let env = Envelope::parse(r#"{"type":"identityRes","messageID":"m"}"#).unwrap();
        assert!(!env.decode::<StatusReply>().unwrap().is_success());
    }
}
