use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{Query, StoreError, User, user::now};

use super::{BalanceChange, DataBase, StoreResult};

/// Users kept in memory and persisted as one JSON array.
///
/// The mirror and the file form a single critical section: every mutation
/// holds the lock while it rewrites the file, so writers never interleave.
/// The file is replaced through a temporary sibling and a rename, a crash
/// leaves either the old or the new content.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    key: String,
    mirror: Mutex<Vec<User>>,
}

impl FileStore {
    /// Create a store over `path`. Nothing is read until [`DataBase::init`].
    pub fn open(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
            mirror: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, users: &[User]) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(users)?;
        let mut tmp = OsString::from(self.path.as_os_str());
        tmp.push(".tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), users = users.len(), "storage file written");
        Ok(())
    }

    /// Mutate one record and persist the table, restoring the record when
    /// the write fails.
    async fn modify<F>(&self, id: u64, change: F) -> StoreResult<User>
    where
        F: FnOnce(&mut User) -> StoreResult<()> + Send,
    {
        let mut users = self.mirror.lock().await;
        let index = usize::try_from(id).map_err(|_| StoreError::NotFound(id))?;
        let Some(user) = users.get_mut(index) else {
            return Err(StoreError::NotFound(id));
        };

        let previous = user.clone();
        change(user)?;
        let updated = user.clone();

        if let Err(err) = self.persist(&users).await {
            if let Some(user) = users.get_mut(index) {
                *user = previous;
            }
            return Err(err);
        }
        Ok(updated)
    }
}

#[async_trait]
impl DataBase for FileStore {
    async fn init(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        let loaded: Vec<User> = if bytes.iter().all(u8::is_ascii_whitespace) {
            Vec::new()
        } else {
            serde_json::from_slice(&bytes)?
        };

        for (position, user) in loaded.iter().enumerate() {
            if usize::try_from(user.id).ok() != Some(position) {
                return Err(StoreError::Corrupted(format!(
                    "user {} stored at position {position}",
                    user.id
                )));
            }
        }

        let mut users = self.mirror.lock().await;
        self.persist(&loaded).await?;
        *users = loaded;
        Ok(())
    }

    async fn create(&self, user: &User) -> StoreResult<()> {
        let mut users = self.mirror.lock().await;
        if usize::try_from(user.id).ok() != Some(users.len()) {
            return Err(StoreError::InvalidId(user.id));
        }
        users.push(user.clone());
        if let Err(err) = self.persist(&users).await {
            users.pop();
            return Err(err);
        }
        Ok(())
    }

    async fn get_all(&self) -> StoreResult<Vec<User>> {
        Ok(self.mirror.lock().await.clone())
    }

    async fn get_one(&self, id: u64) -> StoreResult<User> {
        let users = self.mirror.lock().await;
        usize::try_from(id)
            .ok()
            .and_then(|index| users.get(index))
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn get_num_by(&self, query: &Query, limit: i64) -> StoreResult<Vec<User>> {
        let users = self.mirror.lock().await;
        Ok(query.apply(&users, limit)?)
    }

    async fn update_solids(&self, id: u64, delta: i64) -> StoreResult<User> {
        self.settle(
            id,
            BalanceChange {
                solids: delta,
                ..Default::default()
            },
        )
        .await
    }

    async fn update_stocks(&self, id: u64, delta: i64) -> StoreResult<User> {
        self.settle(
            id,
            BalanceChange {
                stocks: delta,
                ..Default::default()
            },
        )
        .await
    }

    async fn update_name(&self, id: u64, name: &str) -> StoreResult<User> {
        self.modify(id, |user| {
            user.name = name.to_string();
            Ok(())
        })
        .await
    }

    async fn update_password(&self, id: u64, password: &str) -> StoreResult<User> {
        self.modify(id, |user| {
            user.password = password.to_string();
            Ok(())
        })
        .await
    }

    async fn update_block(&self, id: u64, blocked: bool) -> StoreResult<User> {
        self.modify(id, |user| {
            user.is_blocked = blocked;
            Ok(())
        })
        .await
    }

    async fn update_last_farm(&self, id: u64) -> StoreResult<User> {
        let at = now();
        self.modify(id, |user| {
            user.last_farming = at;
            Ok(())
        })
        .await
    }

    async fn settle(&self, id: u64, change: BalanceChange) -> StoreResult<User> {
        self.modify(id, |user| change.apply(user)).await
    }

    async fn len(&self) -> StoreResult<u64> {
        Ok(self.mirror.lock().await.len() as u64)
    }

    fn check_key(&self, key: &str) -> bool {
        self.key == key
    }

    async fn close(&self) -> StoreResult<()> {
        let users = self.mirror.lock().await;
        self.persist(&users).await
    }
}
