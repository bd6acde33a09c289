//! v001 -- Initial schema creation.
//!
//! Creates the three client tables: `servers`, `accounts` and
//! `chat_messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Servers (trust store)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS servers (
    hostname TEXT PRIMARY KEY NOT NULL,
    port     INTEGER NOT NULL,
    pubkey   TEXT                          -- hex Ed25519 key, NULL until pinned
);

-- ----------------------------------------------------------------
-- Accounts (our identity per server)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS accounts (
    hostname TEXT PRIMARY KEY NOT NULL,
    username TEXT NOT NULL,
    uuid     TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Chat messages (history cache)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_messages (
    message_id TEXT PRIMARY KEY NOT NULL,  -- UUID, idempotency key
    channel_id TEXT NOT NULL,
    server     TEXT NOT NULL,              -- hostname
    user_id    TEXT NOT NULL,
    username   TEXT NOT NULL,
    message    TEXT NOT NULL,
    created_at TEXT NOT NULL,              -- RFC-3339, fixed width UTC
    updated_at TEXT,
    deleted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_chat_messages_channel_ts
    ON chat_messages(channel_id, server, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
