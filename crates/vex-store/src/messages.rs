//! History cache. `message_id` is the idempotency key: re-inserting a
//! message the cache already holds is silently ignored.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::{format_ts, parse_ts, Database};
use crate::error::Result;
use crate::models::ChatMessage;

const COLUMNS: &str =
    "message_id, channel_id, server, user_id, username, message, created_at, updated_at, deleted_at";

impl Database {
    /// Insert a message. Returns `false` when the id was already cached.
    pub fn insert_message(&self, message: &ChatMessage) -> Result<bool> {
        let affected = self.conn().execute(
            &format!(
                "INSERT OR IGNORE INTO chat_messages ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                message.message_id.to_string(),
                message.channel_id.to_string(),
                message.server,
                message.user_id.to_string(),
                message.username,
                message.message,
                format_ts(&message.created_at),
                message.updated_at.as_ref().map(format_ts),
                message.deleted_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Most recent cached message for a channel on a server.
    pub fn get_latest_message(&self, channel_id: Uuid, server: &str) -> Result<Option<ChatMessage>> {
        let message = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM chat_messages
                     WHERE channel_id = ?1 AND server = ?2
                     ORDER BY created_at DESC
                     LIMIT 1"
                ),
                params![channel_id.to_string(), server],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Up to `limit` messages created at or before `cursor_ts`, oldest first.
    pub fn get_messages_before(
        &self,
        channel_id: Uuid,
        server: &str,
        cursor_ts: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM chat_messages
             WHERE channel_id = ?1 AND server = ?2 AND created_at <= ?3
             ORDER BY created_at DESC
             LIMIT ?4"
        ))?;

        let rows = stmt.query_map(
            params![channel_id.to_string(), server, format_ts(&cursor_ts), limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }

    pub fn count_messages(&self, channel_id: Uuid, server: &str) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chat_messages WHERE channel_id = ?1 AND server = ?2",
            params![channel_id.to_string(), server],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn parse_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let message_id: String = row.get(0)?;
    let channel_id: String = row.get(1)?;
    let user_id: String = row.get(3)?;
    let created_at: String = row.get(6)?;
    let updated_at: Option<String> = row.get(7)?;
    let deleted_at: Option<String> = row.get(8)?;

    Ok(ChatMessage {
        message_id: parse_uuid(0, &message_id)?,
        channel_id: parse_uuid(1, &channel_id)?,
        server: row.get(2)?,
        user_id: parse_uuid(3, &user_id)?,
        username: row.get(4)?,
        message: row.get(5)?,
        created_at: parse_ts(6, &created_at)?,
        updated_at: updated_at.map(|ts| parse_ts(7, &ts)).transpose()?,
        deleted_at: deleted_at.map(|ts| parse_ts(8, &ts)).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn message_at(channel_id: Uuid, server: &str, secs: i64) -> ChatMessage {
        let base = DateTime::parse_from_rfc3339("2020-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        ChatMessage {
            message_id: Uuid::new_v4(),
            channel_id,
            server: server.to_string(),
            user_id: Uuid::new_v4(),
            username: "Anonymous".into(),
            message: format!("message {secs}"),
            created_at: base + Duration::seconds(secs),
            updated_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn duplicate_insert_keeps_one_row() {
        let db = Database::open_in_memory().unwrap();
        let channel = Uuid::new_v4();
        let msg = message_at(channel, "h", 0);

        assert!(db.insert_message(&msg).unwrap());
        assert!(!db.insert_message(&msg).unwrap());
        assert_eq!(db.count_messages(channel, "h").unwrap(), 1);
        assert_eq!(db.get_latest_message(channel, "h").unwrap().unwrap(), msg);
    }

    #[test]
    fn latest_is_scoped_to_channel_and_server() {
        let db = Database::open_in_memory().unwrap();
        let channel = Uuid::new_v4();
        let other = Uuid::new_v4();

        let old = message_at(channel, "h", 1);
        let new = message_at(channel, "h", 5);
        db.insert_message(&new).unwrap();
        db.insert_message(&old).unwrap();
        db.insert_message(&message_at(other, "h", 9)).unwrap();
        db.insert_message(&message_at(channel, "elsewhere", 9)).unwrap();

        let latest = db.get_latest_message(channel, "h").unwrap().unwrap();
        assert_eq!(latest.message_id, new.message_id);
        assert!(db.get_latest_message(Uuid::new_v4(), "h").unwrap().is_none());
    }

    #[test]
    fn messages_before_are_oldest_first_and_limited() {
        let db = Database::open_in_memory().unwrap();
        let channel = Uuid::new_v4();
        let all: Vec<_> = (0..10).map(|s| message_at(channel, "h", s)).collect();
        for msg in all.iter().rev() {
            db.insert_message(msg).unwrap();
        }

        let window = db
            .get_messages_before(channel, "h", all[7].created_at, 3)
            .unwrap();
        let ids: Vec<_> = window.iter().map(|m| m.message_id).collect();
        assert_eq!(
            ids,
            vec![all[5].message_id, all[6].message_id, all[7].message_id]
        );
    }
}
