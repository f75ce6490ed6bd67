//! User domain operations on top of a [`DataBase`].
//!
//! Every rule of the economy lives here: who may sign in, how much farming
//! yields and how often, what stocks cost and how the periodic sweep turns
//! stocks into solids. Storage only ever sees already validated values.
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use tracing::{debug, info};

use crate::{
    BalanceChange, DataBase, EngineError, Field, Guard, Operator, PasswordHasher, Predicate,
    Query, ResultEngine, StoreError, User,
    user::{self, now},
};

/// Tunables of the economy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Economy {
    /// Minimum time between two farms of the same user.
    pub farm_cooldown: TimeDelta,
    /// Solids paid for one stock.
    pub stock_cost: i64,
}

impl Default for Economy {
    fn default() -> Self {
        Self {
            farm_cooldown: TimeDelta::hours(1),
            stock_cost: 30,
        }
    }
}

impl Economy {
    pub fn new(farm_cooldown: TimeDelta, stock_cost: i64) -> ResultEngine<Self> {
        if farm_cooldown < TimeDelta::zero() {
            return Err(EngineError::InvalidAmount(
                "farm cooldown must not be negative".to_string(),
            ));
        }
        if user::NEVER_FARMED.checked_add_signed(farm_cooldown).is_none() {
            return Err(EngineError::InvalidAmount(format!(
                "farm cooldown of {} seconds is out of range",
                farm_cooldown.num_seconds()
            )));
        }
        if stock_cost <= 0 {
            return Err(EngineError::InvalidAmount(format!(
                "stock cost must be positive, got {stock_cost}"
            )));
        }
        Ok(Self {
            farm_cooldown,
            stock_cost,
        })
    }

    /// When a user that last farmed at `last` may farm again. An instant past
    /// the calendar range means never.
    pub fn ready_at(&self, last: DateTime<Utc>) -> DateTime<Utc> {
        last.checked_add_signed(self.farm_cooldown)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Latest `last_farming` that allows farming at `at`.
    fn farmed_before(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at.checked_sub_signed(self.farm_cooldown)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Outcome of a successful farm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Farmed {
    pub amount: i64,
    pub user: User,
}

/// Concurrent sign ups can race for the same id; retry that many times.
const SIGN_UP_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct UserService {
    db: Arc<dyn DataBase>,
    hasher: PasswordHasher,
    economy: Economy,
}

impl UserService {
    pub fn new(db: Arc<dyn DataBase>, hasher: PasswordHasher, economy: Economy) -> Self {
        Self {
            db,
            hasher,
            economy,
        }
    }

    pub fn database(&self) -> &Arc<dyn DataBase> {
        &self.db
    }

    pub fn economy(&self) -> Economy {
        self.economy
    }

    /// Register a new user with the next free id.
    pub async fn sign_up(&self, name: &str, password: &str) -> ResultEngine<User> {
        user::validate_name(name)?;
        user::validate_password(password)?;
        let hash = self.hasher.hash(password);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let user = User::new(self.db.len().await?, name, hash.clone());
            match self.db.create(&user).await {
                Ok(()) => {
                    info!(user_id = user.id, user_name = name, "user signed up");
                    return Ok(user);
                }
                Err(StoreError::InvalidId(id)) if attempt < SIGN_UP_ATTEMPTS => {
                    debug!(id, attempt, "id taken by a concurrent sign up, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Check a user's password.
    ///
    /// Returns `Ok(None)` when the id does not exist or the password is
    /// wrong, errors are reserved for storage failures.
    pub async fn sign_in(&self, id: u64, password: &str) -> ResultEngine<Option<User>> {
        let user = match self.db.get_one(id).await {
            Ok(user) => user,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if self.hasher.verify(password, &user.password) {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    /// Privileged access to any user with the shared key.
    pub async fn sign_in_with_key(&self, key: &str, id: u64) -> ResultEngine<User> {
        if !self.db.check_key(key) {
            return Err(EngineError::WrongKey);
        }
        Ok(self.db.get_one(id).await?)
    }

    pub fn check_key(&self, key: &str) -> bool {
        self.db.check_key(key)
    }

    pub async fn get(&self, id: u64) -> ResultEngine<User> {
        Ok(self.db.get_one(id).await?)
    }

    pub async fn search(&self, query: &Query, limit: i64) -> ResultEngine<Vec<User>> {
        Ok(self.db.get_num_by(query, limit).await?)
    }

    /// Grant a random amount of solids, at most once per cooldown.
    ///
    /// The reward is drawn from `[0, max(stock_balance, stock_cost))`.
    pub async fn farm(&self, id: u64) -> ResultEngine<Farmed> {
        let user = self.db.get_one(id).await?;
        let at = now();
        let ready_at = self.economy.ready_at(user.last_farming);
        if at < ready_at {
            return Err(EngineError::TooEarlyFarming {
                user: Box::new(user),
                ready_at,
            });
        }

        let ceiling = user.stock_balance.max(self.economy.stock_cost);
        let amount = if ceiling > 0 {
            rand::rng().random_range(0..ceiling)
        } else {
            0
        };

        let change = BalanceChange {
            solids: amount,
            stocks: 0,
            farmed_at: Some(at),
            guard: Guard::FarmedBefore(self.economy.farmed_before(at)),
        };
        match self.db.settle(id, change).await {
            Ok(user) => {
                info!(user_id = id, amount, "user farmed");
                Ok(Farmed { amount, user })
            }
            Err(StoreError::PreconditionFailed(reason)) => {
                // Someone else farmed in between.
                let user = self.db.get_one(id).await?;
                let ready_at = self.economy.ready_at(user.last_farming);
                if at < ready_at {
                    Err(EngineError::TooEarlyFarming {
                        user: Box::new(user),
                        ready_at,
                    })
                } else {
                    Err(StoreError::PreconditionFailed(reason).into())
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Exchange `num * stock_cost` solids for `num` stocks.
    pub async fn buy_stocks(&self, id: u64, num: i64) -> ResultEngine<User> {
        if num <= 0 {
            return Err(EngineError::InvalidAmount(format!(
                "number of stocks must be positive, got {num}"
            )));
        }
        let cost = num.checked_mul(self.economy.stock_cost).ok_or_else(|| {
            EngineError::InvalidAmount(format!("cannot afford {num} stocks"))
        })?;

        let user = self.db.get_one(id).await?;
        if user.solid_balance < cost {
            return Err(EngineError::InsufficientFunds {
                user: Box::new(user),
                need: cost,
            });
        }

        let change = BalanceChange {
            solids: -cost,
            stocks: num,
            farmed_at: None,
            guard: Guard::SolidsAtLeast(cost),
        };
        match self.db.settle(id, change).await {
            Ok(user) => {
                info!(user_id = id, num, cost, "stocks bought");
                Ok(user)
            }
            Err(StoreError::PreconditionFailed(reason)) => {
                let user = self.db.get_one(id).await?;
                if user.solid_balance < cost {
                    Err(EngineError::InsufficientFunds {
                        user: Box::new(user),
                        need: cost,
                    })
                } else {
                    Err(StoreError::PreconditionFailed(reason).into())
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The users the sweep pays out: holding stock and not blocked.
    pub fn sweep_query() -> Query {
        Query::new()
            .filter(Predicate::new(Field::StockBalance, Operator::Greater, 0u64))
            .and(Predicate::new(Field::IsBlocked, Operator::Equal, false))
    }

    /// Credit every eligible user's stock balance into their solids.
    ///
    /// The stock balance itself is kept: stocks keep paying out on every
    /// sweep. A failing update stops the sweep with
    /// [`EngineError::ConversionInterrupted`], which carries the users
    /// credited so far.
    pub async fn convert_stocks(&self) -> ResultEngine<Vec<User>> {
        let eligible = self.db.get_all_by(&Self::sweep_query()).await?;
        let mut converted = Vec::with_capacity(eligible.len());
        for user in eligible {
            match self.db.update_solids(user.id, user.stock_balance).await {
                Ok(updated) => {
                    debug!(user_id = user.id, stocks = user.stock_balance, "stocks converted");
                    converted.push(updated);
                }
                Err(err) => {
                    return Err(EngineError::ConversionInterrupted {
                        converted,
                        source: Box::new(err.into()),
                    });
                }
            }
        }
        info!(users = converted.len(), "stock conversion done");
        Ok(converted)
    }

    pub async fn update_name(&self, id: u64, name: &str) -> ResultEngine<User> {
        user::validate_name(name)?;
        let user = self.db.update_name(id, name).await?;
        info!(user_id = id, user_name = name, "name changed");
        Ok(user)
    }

    pub async fn update_password(&self, id: u64, password: &str) -> ResultEngine<User> {
        user::validate_password(password)?;
        let user = self
            .db
            .update_password(id, &self.hasher.hash(password))
            .await?;
        info!(user_id = id, "password changed");
        Ok(user)
    }

    pub async fn block(&self, id: u64) -> ResultEngine<User> {
        let user = self.db.get_one(id).await?;
        if user.is_blocked {
            return Err(EngineError::AlreadyBlocked(Box::new(user)));
        }
        let user = self.db.update_block(id, true).await?;
        info!(user_id = id, "user blocked");
        Ok(user)
    }

    pub async fn unblock(&self, id: u64) -> ResultEngine<User> {
        let user = self.db.get_one(id).await?;
        if !user.is_blocked {
            return Err(EngineError::NotBlocked(Box::new(user)));
        }
        let user = self.db.update_block(id, false).await?;
        info!(user_id = id, "user unblocked");
        Ok(user)
    }
}
