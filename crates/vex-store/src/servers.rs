//! Trust store: one row per server hostname with the key pinned for it.

use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::ServerRecord;

impl Database {
    pub fn get_server(&self, hostname: &str) -> Result<Option<ServerRecord>> {
        let server = self
            .conn()
            .query_row(
                "SELECT hostname, port, pubkey FROM servers WHERE hostname = ?1",
                params![hostname],
                row_to_server,
            )
            .optional()?;
        Ok(server)
    }

    /// Insert a server, or overwrite port and key if the hostname is known.
    pub fn upsert_server(&self, server: &ServerRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO servers (hostname, port, pubkey)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(hostname) DO UPDATE SET port = excluded.port, pubkey = excluded.pubkey",
            params![
                server.hostname,
                server.port,
                server.pubkey.map(hex::encode),
            ],
        )?;
        Ok(())
    }

    /// Pin (or re-pin) the trusted key for a hostname. Returns `false` if the
    /// hostname has no record.
    pub fn pin_server_key(&self, hostname: &str, pubkey: &[u8; 32]) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE servers SET pubkey = ?1 WHERE hostname = ?2",
            params![hex::encode(pubkey), hostname],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_server(row: &rusqlite::Row<'_>) -> rusqlite::Result<ServerRecord> {
    let hostname: String = row.get(0)?;
    let port: u16 = row.get(1)?;
    let pubkey_hex: Option<String> = row.get(2)?;

    let pubkey = match pubkey_hex {
        Some(hex_key) => {
            let bytes = hex::decode(&hex_key).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
            })?;
            let key: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    format!("pinned key is {} bytes", b.len()).into(),
                )
            })?;
            Some(key)
        }
        None => None,
    };

    Ok(ServerRecord {
        hostname,
        port,
        pubkey,
    })
}
