//! Account storage.
//!
//! The core only ever reads `phone` and `password` and updates the password
//! after SMS verification; everything else about identity lives with the
//! embedding application. [`SqliteAccountStore`] persists accounts the way
//! the original deployment did; [`MemoryAccountStore`] backs tests and
//! embedders that persist elsewhere.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::{Error, Result};

/// A registered user's service credentials
///
/// `password` stays `None` until SMS/PIN verification succeeds (or a
/// pre-existing password is supplied directly).
#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct Account {
    /// Opaque identifier assigned by the embedding application
    pub user_id: String,
    /// Phone number in normalized `53XXXXXXXX` form
    pub phone: String,
    /// Long-lived account password, set once verification completes
    pub password: Option<String>,
}

impl Account {
    /// Returns true once the account has completed verification
    pub fn is_verified(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Keyed record store mapping a user identifier to phone and password
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Look up an account by user id
    async fn get(&self, user_id: &str) -> Result<Option<Account>>;

    /// Create an account with no password yet
    async fn add(&self, user_id: &str, phone: &str) -> Result<()>;

    /// Store the password obtained from code verification
    async fn set_password(&self, user_id: &str, password: &str) -> Result<()>;

    /// Forget an account
    async fn delete(&self, user_id: &str) -> Result<()>;
}

/// SQLite-backed account store
pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    /// Open (creating if missing) the account database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS accounts (
                user_id TEXT PRIMARY KEY,
                phone TEXT NOT NULL,
                password TEXT
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn get(&self, user_id: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT user_id, phone, password FROM accounts WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn add(&self, user_id: &str, phone: &str) -> Result<()> {
        sqlx::query("INSERT INTO accounts (user_id, phone, password) VALUES (?, ?, NULL)")
            .bind(user_id)
            .bind(phone)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_password(&self, user_id: &str, password: &str) -> Result<()> {
        sqlx::query("UPDATE accounts SET password = ? WHERE user_id = ?")
            .bind(password)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM accounts WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory account store for tests and non-persistent embeddings
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<String, Account>>,
}

impl MemoryAccountStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Account>> {
        self.accounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get(&self, user_id: &str) -> Result<Option<Account>> {
        Ok(self.lock().get(user_id).cloned())
    }

    async fn add(&self, user_id: &str, phone: &str) -> Result<()> {
        self.lock().insert(
            user_id.to_string(),
            Account {
                user_id: user_id.to_string(),
                phone: phone.to_string(),
                password: None,
            },
        );
        Ok(())
    }

    async fn set_password(&self, user_id: &str, password: &str) -> Result<()> {
        if let Some(account) = self.lock().get_mut(user_id) {
            account.password = Some(password.to_string());
        }
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        self.lock().remove(user_id);
        Ok(())
    }
}

/// Normalize a phone number to `53XXXXXXXX`.
///
/// Accepts an optional leading `+`, embedded spaces, and an optional `53`
/// country prefix before the eight subscriber digits.
pub fn parse_phone(phone: &str) -> Result<String> {
    static PHONE_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    #[allow(clippy::expect_used)]
    let re = PHONE_RE.get_or_init(|| Regex::new(r"^(53)?(\d{8})").expect("static pattern"));

    let cleaned: String = phone.trim_start_matches('+').replace(' ', "");
    let captures = re.captures(&cleaned).ok_or_else(|| Error::Config {
        message: format!("invalid phone number: {}", phone),
        key: None,
    })?;
    Ok(format!("53{}", &captures[2]))
}
