use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::Account;

impl Database {
    pub fn get_account(&self, hostname: &str) -> Result<Option<Account>> {
        let account = self
            .conn()
            .query_row(
                "SELECT hostname, username, uuid FROM accounts WHERE hostname = ?1",
                params![hostname],
                |row| {
                    Ok(Account {
                        hostname: row.get(0)?,
                        username: row.get(1)?,
                        uuid: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(account)
    }

    pub fn insert_account(&self, account: &Account) -> Result<()> {
        self.conn().execute(
            "INSERT INTO accounts (hostname, username, uuid) VALUES (?1, ?2, ?3)",
            params![account.hostname, account.username, account.uuid],
        )?;
        Ok(())
    }

    /// Refresh the username after the server pushes our identity.
    pub fn update_account_username(&self, hostname: &str, username: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE accounts SET username = ?1 WHERE hostname = ?2",
            params![username, hostname],
        )?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_rename() {
        let db = Database::open_in_memory().unwrap();
        db.insert_account(&Account {
            hostname: "h".into(),
            username: "Anonymous".into(),
            uuid: "U1".into(),
        })
        .unwrap();

        assert!(db.update_account_username("h", "alice").unwrap());
        let account = db.get_account("h").unwrap().unwrap();
        assert_eq!(account.username, "alice");
        assert_eq!(account.uuid, "U1");

        assert!(!db.update_account_username("other", "bob").unwrap());
    }

    #[test]
    fn one_account_per_host() {
        let db = Database::open_in_memory().unwrap();
        let account = Account {
            hostname: "h".into(),
            username: "Anonymous".into(),
            uuid: "U1".into(),
        };
        db.insert_account(&account).unwrap();
        assert!(db.insert_account(&account).is_err());
    }
}
