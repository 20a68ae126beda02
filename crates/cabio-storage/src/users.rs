//! User accounts and their broker credentials, stored in redb.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{open_database, Error, Result};

// Users table: key = user_id, value = User (JSON)
const USERS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("users");

// Email index: key = email, value = user_id
const EMAIL_INDEX: TableDefinition<&str, &str> = TableDefinition::new("users_by_email");

// Username index: key = username, value = user_id
const USERNAME_INDEX: TableDefinition<&str, &str> = TableDefinition::new("users_by_username");

/// Account role. Non-admin accounts are subject to the relay caps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// A user account.
///
/// `broker_username` / `broker_key` are the per-user device cloud
/// credentials; both must be present before a broker session can be
/// opened for the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub fullname: String,
    pub email: String,
    /// bcrypt hash, never the plaintext password.
    pub password_hash: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub broker_username: Option<String>,
    #[serde(default)]
    pub broker_key: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub created_at: i64,
}

impl User {
    /// Both broker credentials present?
    pub fn has_broker_credentials(&self) -> bool {
        matches!(
            (&self.broker_username, &self.broker_key),
            (Some(u), Some(k)) if !u.is_empty() && !k.is_empty()
        )
    }
}

/// User store backed by redb.
pub struct UserStore {
    db: Arc<Database>,
}

impl UserStore {
    /// Open or create the user store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = open_database(path.as_ref())?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS_TABLE)?;
            let _ = write_txn.open_table(EMAIL_INDEX)?;
            let _ = write_txn.open_table(USERNAME_INDEX)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Create a user. Fails with `Conflict` when the email or username is
    /// already taken; the check and the insert share one transaction.
    pub fn create(&self, user: &User) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut users = write_txn.open_table(USERS_TABLE)?;
            let mut by_email = write_txn.open_table(EMAIL_INDEX)?;
            let mut by_username = write_txn.open_table(USERNAME_INDEX)?;

            if by_email.get(user.email.as_str())?.is_some() {
                return Err(Error::Conflict("email".to_string()));
            }
            if by_username.get(user.username.as_str())?.is_some() {
                return Err(Error::Conflict("username".to_string()));
            }

            let json = serde_json::to_string(user)?;
            users.insert(user.id.as_str(), json.as_str())?;
            by_email.insert(user.email.as_str(), user.id.as_str())?;
            by_username.insert(user.username.as_str(), user.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a user by id.
    pub fn get(&self, user_id: &str) -> Result<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS_TABLE)?;
        match table.get(user_id)? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// Load a user by email.
    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(EMAIL_INDEX)?;
        let user_id = match index.get(email)? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        let table = read_txn.open_table(USERS_TABLE)?;
        match table.get(user_id.as_str())? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// Load a user by username.
    pub fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(USERNAME_INDEX)?;
        let user_id = match index.get(username)? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        let table = read_txn.open_table(USERS_TABLE)?;
        match table.get(user_id.as_str())? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// List all users.
    pub fn list(&self) -> Result<Vec<User>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS_TABLE)?;
        let mut users = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            if let Ok(user) = serde_json::from_str::<User>(value.value()) {
                users.push(user);
            }
        }
        Ok(users)
    }

    /// Update a user row, moving the email/username indexes when they
    /// changed. The new values must not collide with another account.
    pub fn update(&self, user: &User) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut users = write_txn.open_table(USERS_TABLE)?;
            let previous: User = match users.get(user.id.as_str())? {
                Some(value) => serde_json::from_str(value.value())?,
                None => return Err(Error::NotFound(format!("user {}", user.id))),
            };

            let mut by_email = write_txn.open_table(EMAIL_INDEX)?;
            if previous.email != user.email {
                if by_email.get(user.email.as_str())?.is_some() {
                    return Err(Error::Conflict("email".to_string()));
                }
                by_email.remove(previous.email.as_str())?;
                by_email.insert(user.email.as_str(), user.id.as_str())?;
            }

            let mut by_username = write_txn.open_table(USERNAME_INDEX)?;
            if previous.username != user.username {
                if by_username.get(user.username.as_str())?.is_some() {
                    return Err(Error::Conflict("username".to_string()));
                }
                by_username.remove(previous.username.as_str())?;
                by_username.insert(user.username.as_str(), user.id.as_str())?;
            }

            let json = serde_json::to_string(user)?;
            users.insert(user.id.as_str(), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Delete a user row and its index entries. Dependent entities are
    /// removed by `Stores::delete_user`.
    pub fn delete(&self, user_id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut users = write_txn.open_table(USERS_TABLE)?;
            let previous: Option<User> = match users.remove(user_id)? {
                Some(value) => Some(serde_json::from_str(value.value())?),
                None => None,
            };
            match previous {
                Some(user) => {
                    let mut by_email = write_txn.open_table(EMAIL_INDEX)?;
                    by_email.remove(user.email.as_str())?;
                    let mut by_username = write_txn.open_table(USERNAME_INDEX)?;
                    by_username.remove(user.username.as_str())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Number of accounts.
    pub fn count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS_TABLE)?;
        Ok(table.iter()?.count())
    }
}
