//! The module contains the `User` record and its table mapping.

use std::{fmt, sync::LazyLock};

use chrono::{DateTime, SubsecRound, Utc};
use regex::Regex;
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{EngineError, ResultEngine, StoreError};

#[allow(clippy::expect_used)]
static NAME_CHARSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9 _-]*$").expect("name pattern compiles"));

#[allow(clippy::expect_used)]
static PASSWORD_CHARSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9!#$*_&-]*$").expect("password pattern compiles"));

/// `last_farming` of a user that never farmed.
pub const NEVER_FARMED: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// A user of the economy.
///
/// The `id` is assigned at creation as the number of users already stored and
/// it never changes. `password` always holds the salted hash produced by
/// [`PasswordHasher`](crate::PasswordHasher), never the plaintext.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub password: String,
    pub solid_balance: i64,
    pub stock_balance: i64,
    pub is_blocked: bool,
    pub last_farming: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub(crate) fn new(id: u64, name: &str, password_hash: String) -> Self {
        Self {
            id,
            name: name.to_string(),
            password: password_hash,
            solid_balance: 0,
            stock_balance: 0,
            is_blocked: false,
            last_farming: NEVER_FARMED,
            created_at: now(),
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_blocked {
            write!(f, "[BLOCKED] ")?;
        }
        write!(
            f,
            "user {} ({}). balance: solids - {}, stocks - {}",
            self.id, self.name, self.solid_balance, self.stock_balance
        )
    }
}

/// Current time at the precision every storage keeps.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn validate_name(name: &str) -> ResultEngine<()> {
    if name.is_empty() {
        return Err(EngineError::InvalidName("name must not be empty".to_string()));
    }
    if !NAME_CHARSET.is_match(name) {
        return Err(EngineError::InvalidName(format!(
            "name {name} has not allowed symbols"
        )));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> ResultEngine<()> {
    if password.is_empty() {
        return Err(EngineError::InvalidPassword(
            "password must not be empty".to_string(),
        ));
    }
    if !PASSWORD_CHARSET.is_match(password) {
        return Err(EngineError::InvalidPassword(
            "password has not allowed symbols".to_string(),
        ));
    }
    Ok(())
}

/// Convert a user id into the signed key used by the table.
pub(crate) fn row_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::InvalidId(id))
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub name: String,
    pub password: String,
    pub solid_balance: i64,
    pub stock_balance: i64,
    pub is_blocked: bool,
    pub last_farming: DateTimeUtc,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for User {
    type Error = StoreError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let id = u64::try_from(model.id)
            .map_err(|_| StoreError::Corrupted(format!("negative user id {}", model.id)))?;
        Ok(Self {
            id,
            name: model.name,
            password: model.password,
            solid_balance: model.solid_balance,
            stock_balance: model.stock_balance,
            is_blocked: model.is_blocked,
            last_farming: model.last_farming,
            created_at: model.created_at,
        })
    }
}

impl TryFrom<&User> for ActiveModel {
    type Error = StoreError;

    fn try_from(user: &User) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ActiveValue::Set(row_id(user.id)?),
            name: ActiveValue::Set(user.name.clone()),
            password: ActiveValue::Set(user.password.clone()),
            solid_balance: ActiveValue::Set(user.solid_balance),
            stock_balance: ActiveValue::Set(user.stock_balance),
            is_blocked: ActiveValue::Set(user.is_blocked),
            last_farming: ActiveValue::Set(user.last_farming),
            created_at: ActiveValue::Set(user.created_at),
        })
    }
}
