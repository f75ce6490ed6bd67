//! The storage contract shared by every backend.
//!
//! [`DataBase`] is a single table of [`User`] records addressed by their
//! ordinal id. Two implementations exist:
//!
//! - [`FileStore`]: the whole table mirrored in memory and rewritten as one JSON
//!   array on every mutation
//! - [`SqlStore`]: one row per user in a SQL table (sqlite or postgres)
//!
//! Use [`connect`] to build the one selected by a [`Backend`].
use std::{fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Query, StoreError, User};

mod file;
mod sql;

pub use file::FileStore;
pub use sql::SqlStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait DataBase: Send + Sync {
    /// Prepare the storage: create the table or load the file.
    async fn init(&self) -> StoreResult<()>;

    /// Store a new record. `user.id` must be equal to [`DataBase::len`].
    async fn create(&self, user: &User) -> StoreResult<()>;

    async fn get_all(&self) -> StoreResult<Vec<User>>;

    async fn get_one(&self, id: u64) -> StoreResult<User>;

    async fn get_all_by(&self, query: &Query) -> StoreResult<Vec<User>> {
        self.get_num_by(query, -1).await
    }

    /// Records matching `query` in id order, at most `limit` of them.
    /// A negative `limit` means no limit.
    async fn get_num_by(&self, query: &Query, limit: i64) -> StoreResult<Vec<User>>;

    async fn get_one_by(&self, query: &Query) -> StoreResult<Option<User>> {
        Ok(self.get_num_by(query, 1).await?.into_iter().next())
    }

    /// Add `delta` to the solid balance.
    async fn update_solids(&self, id: u64, delta: i64) -> StoreResult<User>;

    /// Add `delta` to the stock balance.
    async fn update_stocks(&self, id: u64, delta: i64) -> StoreResult<User>;

    async fn update_name(&self, id: u64, name: &str) -> StoreResult<User>;

    /// `password` is the already hashed value.
    async fn update_password(&self, id: u64, password: &str) -> StoreResult<User>;

    async fn update_block(&self, id: u64, blocked: bool) -> StoreResult<User>;

    /// Set `last_farming` to now.
    async fn update_last_farm(&self, id: u64) -> StoreResult<User>;

    /// Apply a [`BalanceChange`] as one atomic step.
    async fn settle(&self, id: u64, change: BalanceChange) -> StoreResult<User>;

    /// The id the next created record must have.
    async fn len(&self) -> StoreResult<u64>;

    async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Compare `key` with the shared administration key.
    fn check_key(&self, key: &str) -> bool;

    async fn close(&self) -> StoreResult<()>;
}

/// Condition a record must satisfy for a [`BalanceChange`] to apply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Guard {
    #[default]
    Unconditional,
    /// The last farm happened at or before the given instant.
    FarmedBefore(DateTime<Utc>),
    /// The solid balance covers the given amount.
    SolidsAtLeast(i64),
}

impl Guard {
    pub fn holds(&self, user: &User) -> bool {
        match *self {
            Self::Unconditional => true,
            Self::FarmedBefore(at) => user.last_farming <= at,
            Self::SolidsAtLeast(amount) => user.solid_balance >= amount,
        }
    }

    pub(crate) fn check(&self, user: &User) -> StoreResult<()> {
        if self.holds(user) {
            Ok(())
        } else {
            Err(StoreError::PreconditionFailed(format!(
                "user {}: {self}",
                user.id
            )))
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconditional => f.write_str("unconditional"),
            Self::FarmedBefore(at) => write!(f, "last farm not after {at}"),
            Self::SolidsAtLeast(amount) => write!(f, "solid balance of at least {amount}"),
        }
    }
}

/// Balance deltas applied together, checked against a [`Guard`] first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BalanceChange {
    pub solids: i64,
    pub stocks: i64,
    /// New `last_farming`, if the change is a farm.
    pub farmed_at: Option<DateTime<Utc>>,
    pub guard: Guard,
}

impl BalanceChange {
    /// Check the guard and apply the deltas to `user`.
    pub(crate) fn apply(&self, user: &mut User) -> StoreResult<()> {
        self.guard.check(user)?;
        let solids = user.solid_balance.checked_add(self.solids).ok_or_else(|| {
            StoreError::PreconditionFailed(format!("user {}: solid balance overflow", user.id))
        })?;
        let stocks = user.stock_balance.checked_add(self.stocks).ok_or_else(|| {
            StoreError::PreconditionFailed(format!("user {}: stock balance overflow", user.id))
        })?;
        user.solid_balance = solids;
        user.stock_balance = stocks;
        if let Some(at) = self.farmed_at {
            user.last_farming = at;
        }
        Ok(())
    }
}

/// Storage selection, as read from the settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backend {
    #[serde(alias = "fs")]
    File { path: PathBuf },
    Sqlite { path: PathBuf },
    #[serde(alias = "postgresql")]
    Postgres {
        host: String,
        port: u16,
        username: String,
        password: String,
        name: String,
    },
    /// In memory sqlite, lost on exit.
    Memory,
}

impl Backend {
    /// Connection url for the SQL backends.
    pub fn url(&self) -> Option<String> {
        match self {
            Self::File { .. } => None,
            Self::Sqlite { path } => Some(format!("sqlite:{}?mode=rwc", path.display())),
            Self::Postgres {
                host,
                port,
                username,
                password,
                name,
            } => Some(format!(
                "postgres://{}:{}@{host}:{port}/{}",
                utf8_percent_encode(username, NON_ALPHANUMERIC),
                utf8_percent_encode(password, NON_ALPHANUMERIC),
                utf8_percent_encode(name, NON_ALPHANUMERIC),
            )),
            Self::Memory => Some("sqlite::memory:".to_string()),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { path } => write!(f, "file {}", path.display()),
            Self::Sqlite { path } => write!(f, "sqlite {}", path.display()),
            Self::Postgres {
                host, port, name, ..
            } => write!(f, "postgres {host}:{port}/{name}"),
            Self::Memory => f.write_str("in memory sqlite"),
        }
    }
}

/// Build and initialize the storage selected by `backend`.
pub async fn connect(backend: &Backend, key: &str) -> StoreResult<Arc<dyn DataBase>> {
    let db: Arc<dyn DataBase> = match backend {
        Backend::File { path } => Arc::new(FileStore::open(path.clone(), key)),
        Backend::Sqlite { .. } | Backend::Postgres { .. } | Backend::Memory => {
            let url = backend.url().unwrap_or_default();
            Arc::new(SqlStore::connect(&url, key).await?)
        }
    };
    db.init().await?;
    info!(%backend, "storage ready");
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        let mut user = User::new(2, "carol", "hash".to_string());
        user.solid_balance = 100;
        user.stock_balance = 1;
        user
    }

    #[test]
    fn guard_blocks_the_change() {
        let mut user = user();
        let change = BalanceChange {
            solids: -120,
            stocks: 4,
            guard: Guard::SolidsAtLeast(120),
            ..Default::default()
        };
        assert!(matches!(
            change.apply(&mut user),
            Err(StoreError::PreconditionFailed(_))
        ));
        assert_eq!(user.solid_balance, 100);
        assert_eq!(user.stock_balance, 1);
    }

    #[test]
    fn change_applies_every_delta() {
        let mut user = user();
        let at = Utc::now();
        let change = BalanceChange {
            solids: 7,
            stocks: 0,
            farmed_at: Some(at),
            guard: Guard::FarmedBefore(at),
        };
        change.apply(&mut user).unwrap();
        assert_eq!(user.solid_balance, 107);
        assert_eq!(user.last_farming, at);

        // The same guard no longer holds once the farm is recorded.
        assert!(!Guard::FarmedBefore(at - chrono::TimeDelta::seconds(1)).holds(&user));
    }

    #[test]
    fn overflow_is_rejected() {
        let mut user = user();
        let change = BalanceChange {
            solids: i64::MAX,
            ..Default::default()
        };
        assert!(change.apply(&mut user).is_err());
        assert_eq!(user.solid_balance, 100);
    }

    #[test]
    fn backend_names_and_urls() {
        let backend: Backend =
            serde_json::from_str(r#"{"kind": "fs", "path": "users.json"}"#).unwrap();
        assert_eq!(
            backend,
            Backend::File {
                path: "users.json".into()
            }
        );
        assert_eq!(backend.url(), None);

        let backend: Backend = serde_json::from_str(
            r#"{"kind": "postgresql", "host": "db", "port": 5432, "username": "u", "password": "p", "name": "stocks"}"#,
        )
        .unwrap();
        assert_eq!(backend.url().unwrap(), "postgres://u:p@db:5432/stocks");
        assert_eq!(backend.to_string(), "postgres db:5432/stocks");

        let backend = Backend::Postgres {
            host: "db".to_string(),
            port: 5432,
            username: "stock user".to_string(),
            password: "p@ss/w#rd:?".to_string(),
            name: "stocks".to_string(),
        };
        assert_eq!(
            backend.url().unwrap(),
            "postgres://stock%20user:p%40ss%2Fw%23rd%3A%3F@db:5432/stocks"
        );

        let backend: Backend = serde_json::from_str(r#"{"kind": "memory"}"#).unwrap();
        assert_eq!(backend.url().unwrap(), "sqlite::memory:");
        assert!(serde_json::from_str::<Backend>(r#"{"kind": "redis"}"#).is_err());
    }
}
