//! Records persisted in the local database.

use chrono::{DateTime, Utc};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A server this client has contacted, and the key it trusts for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    /// Hostname as typed by the user; unique.
    pub hostname: String,
    pub port: u16,
    /// Ed25519 public key pinned on first successful verification.
    /// `None` while the record is provisional.
    pub pubkey: Option<[u8; 32]>,
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Our registered identity on one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub hostname: String,
    pub username: String,
    /// Identity token the server assigned at registration.
    pub uuid: String,
}

// ---------------------------------------------------------------------------
// Chat message
// ---------------------------------------------------------------------------

/// A cached chat message. `message_id` is the primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub message_id: Uuid,
    pub channel_id: Uuid,
    /// Hostname of the server the message came from.
    pub server: String,
    pub user_id: Uuid,
    pub username: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}
