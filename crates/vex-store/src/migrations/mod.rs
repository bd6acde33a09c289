//! Schema migrations, applied in order on every open.
//!
//! `PRAGMA user_version` records the last applied step. Each step runs in its
//! own transaction together with the version bump, so a failed step leaves
//! the database at the previous version.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// `(version, name, step)`, in ascending version order.
const MIGRATIONS: &[(u32, &str, Step)] = &[(1, "v001_initial", v001_initial::up)];

/// Schema version a fully migrated database reports.
pub fn current_version() -> u32 {
    MIGRATIONS.last().map_or(0, |(version, _, _)| *version)
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let applied: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    tracing::debug!(
        applied,
        target_version = current_version(),
        "checking database migrations"
    );

    if applied > current_version() {
        return Err(StoreError::Migration(format!(
            "database is at schema version {applied}, newer than this build ({})",
            current_version()
        )));
    }

    for (version, name, step) in MIGRATIONS.iter().filter(|(v, _, _)| *v > applied) {
        tracing::info!(migration = name, "applying migration");
        let tx = conn.unchecked_transaction()?;
        step(&tx).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }

    Ok(())
}
