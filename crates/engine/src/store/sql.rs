use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    Condition, Database, DatabaseBackend, DatabaseConnection, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait, Value,
    prelude::*,
    sea_query::{Expr, SimpleExpr},
};

use crate::{
    Field, FieldClass, Operand, Operator, Predicate, Query, Separator, StoreError, User,
    user::{self, now, row_id},
};

use super::{BalanceChange, DataBase, StoreResult};

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

/// Users stored as rows of the `users` table.
///
/// Every operation is one statement, or one transaction when it needs to
/// read what it writes.
#[derive(Debug, Clone)]
pub struct SqlStore {
    database: DatabaseConnection,
    key: String,
}

impl SqlStore {
    pub fn new(database: DatabaseConnection, key: impl Into<String>) -> Self {
        Self {
            database,
            key: key.into(),
        }
    }

    pub async fn connect(url: &str, key: impl Into<String>) -> StoreResult<Self> {
        let database = Database::connect(url).await?;
        Ok(Self::new(database, key))
    }

    /// Update one row with `expr` on `column`, then read it back.
    async fn update_column(
        &self,
        id: u64,
        column: user::Column,
        expr: SimpleExpr,
    ) -> StoreResult<User> {
        let row = row_id(id)?;
        with_tx!(self, |db_tx| {
            let result = user::Entity::update_many()
                .col_expr(column, expr)
                .filter(user::Column::Id.eq(row))
                .exec(&db_tx)
                .await?;
            if result.rows_affected == 0 {
                return Err(StoreError::NotFound(id));
            }
            fetch(&db_tx, id, row).await
        })
    }
}

async fn fetch<C: ConnectionTrait>(conn: &C, id: u64, row: i64) -> StoreResult<User> {
    user::Entity::find_by_id(row)
        .one(conn)
        .await?
        .ok_or(StoreError::NotFound(id))?
        .try_into()
}

fn column(field: Field) -> user::Column {
    match field {
        Field::Id => user::Column::Id,
        Field::Name => user::Column::Name,
        Field::Password => user::Column::Password,
        Field::SolidBalance => user::Column::SolidBalance,
        Field::StockBalance => user::Column::StockBalance,
        Field::IsBlocked => user::Column::IsBlocked,
        Field::LastFarming => user::Column::LastFarming,
        Field::CreatedAt => user::Column::CreatedAt,
    }
}

fn constant(value: bool) -> SimpleExpr {
    Expr::val(1).eq(if value { 1 } else { 0 })
}

/// Translate one predicate into a SQL comparison with a bound operand.
///
/// Mismatched operands compile to a constant `false` regardless of negation,
/// numbers above the signed column range to the constant the comparison
/// would produce. Text is compared byte by byte: sqlite does so by default,
/// postgres needs the "C" collation.
fn compile_predicate(predicate: &Predicate, backend: DatabaseBackend) -> SimpleExpr {
    if predicate.check_operand().is_err() {
        return constant(false);
    }

    let value: Value = match &predicate.operand {
        Operand::Number(n) => match i64::try_from(*n) {
            Ok(n) => n.into(),
            Err(_) => {
                let below = predicate.operator == Operator::Less;
                return constant(below != predicate.negate);
            }
        },
        Operand::Text(s) => s.clone().into(),
        Operand::Flag(b) => (*b).into(),
        Operand::Time(t) => (*t).into(),
    };

    let col = Expr::col((user::Entity, column(predicate.field)));
    let col = match (backend, predicate.field.class()) {
        (DatabaseBackend::Postgres, FieldClass::Text) => {
            Expr::expr(Expr::cust_with_exprs(r#"$1 COLLATE "C""#, [col.into()]))
        }
        _ => col,
    };
    match (predicate.operator, predicate.negate) {
        (Operator::Equal, false) => col.eq(value),
        (Operator::Equal, true) => col.ne(value),
        (Operator::Greater, false) => col.gt(value),
        (Operator::Greater, true) => col.lte(value),
        (Operator::Less, false) => col.lt(value),
        (Operator::Less, true) => col.gte(value),
    }
}

/// Compile a whole query. Nested conditions keep the left to right fold
/// explicit with parentheses: `a OR b AND c` becomes `(a OR b) AND c`.
pub(crate) fn compile(
    query: &Query,
    backend: DatabaseBackend,
) -> Result<Condition, crate::QueryError> {
    query.fold(
        |predicate| Condition::all().add(compile_predicate(predicate, backend)),
        |separator, left, right| match separator {
            Separator::And => Condition::all().add(left).add(right),
            Separator::Or => Condition::any().add(left).add(right),
        },
    )
}

#[async_trait]
impl DataBase for SqlStore {
    async fn init(&self) -> StoreResult<()> {
        Migrator::up(&self.database, None).await?;
        Ok(())
    }

    async fn create(&self, user: &User) -> StoreResult<()> {
        let model = user::ActiveModel::try_from(user)?;
        with_tx!(self, |db_tx| {
            let next = next_id(&db_tx).await?;
            if user.id != next {
                return Err(StoreError::InvalidId(user.id));
            }
            model.insert(&db_tx).await?;
            Ok(())
        })
    }

    async fn get_all(&self) -> StoreResult<Vec<User>> {
        user::Entity::find()
            .order_by_asc(user::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(User::try_from)
            .collect()
    }

    async fn get_one(&self, id: u64) -> StoreResult<User> {
        fetch(&self.database, id, row_id(id)?).await
    }

    async fn get_num_by(&self, query: &Query, limit: i64) -> StoreResult<Vec<User>> {
        let condition = compile(query, self.database.get_database_backend())?;
        let mut select = user::Entity::find()
            .filter(condition)
            .order_by_asc(user::Column::Id);
        if let Ok(limit) = u64::try_from(limit) {
            select = select.limit(limit);
        }
        select
            .all(&self.database)
            .await?
            .into_iter()
            .map(User::try_from)
            .collect()
    }

    async fn update_solids(&self, id: u64, delta: i64) -> StoreResult<User> {
        let expr = Expr::col(user::Column::SolidBalance).add(delta);
        self.update_column(id, user::Column::SolidBalance, expr)
            .await
    }

    async fn update_stocks(&self, id: u64, delta: i64) -> StoreResult<User> {
        let expr = Expr::col(user::Column::StockBalance).add(delta);
        self.update_column(id, user::Column::StockBalance, expr)
            .await
    }

    async fn update_name(&self, id: u64, name: &str) -> StoreResult<User> {
        self.update_column(id, user::Column::Name, Expr::value(name))
            .await
    }

    async fn update_password(&self, id: u64, password: &str) -> StoreResult<User> {
        self.update_column(id, user::Column::Password, Expr::value(password))
            .await
    }

    async fn update_block(&self, id: u64, blocked: bool) -> StoreResult<User> {
        self.update_column(id, user::Column::IsBlocked, Expr::value(blocked))
            .await
    }

    async fn update_last_farm(&self, id: u64) -> StoreResult<User> {
        self.update_column(id, user::Column::LastFarming, Expr::value(now()))
            .await
    }

    /// Read, check and write back inside one transaction. The write only
    /// matches the row if it still holds the values that were checked.
    async fn settle(&self, id: u64, change: BalanceChange) -> StoreResult<User> {
        let row = row_id(id)?;
        with_tx!(self, |db_tx| {
            let before = fetch(&db_tx, id, row).await?;
            let mut after = before.clone();
            change.apply(&mut after)?;

            let result = user::Entity::update_many()
                .col_expr(user::Column::SolidBalance, Expr::value(after.solid_balance))
                .col_expr(user::Column::StockBalance, Expr::value(after.stock_balance))
                .col_expr(user::Column::LastFarming, Expr::value(after.last_farming))
                .filter(user::Column::Id.eq(row))
                .filter(user::Column::SolidBalance.eq(before.solid_balance))
                .filter(user::Column::StockBalance.eq(before.stock_balance))
                .filter(user::Column::LastFarming.eq(before.last_farming))
                .exec(&db_tx)
                .await?;
            if result.rows_affected == 0 {
                return Err(StoreError::PreconditionFailed(format!(
                    "user {id} changed concurrently"
                )));
            }
            Ok(after)
        })
    }

    async fn len(&self) -> StoreResult<u64> {
        next_id(&self.database).await
    }

    fn check_key(&self, key: &str) -> bool {
        self.key == key
    }

    async fn close(&self) -> StoreResult<()> {
        self.database.clone().close().await?;
        Ok(())
    }
}

/// `max(id) + 1`, or 0 on an empty table.
async fn next_id<C: ConnectionTrait>(conn: &C) -> StoreResult<u64> {
    let last = user::Entity::find()
        .order_by_desc(user::Column::Id)
        .one(conn)
        .await?;
    match last {
        None => Ok(0),
        Some(model) => u64::try_from(model.id)
            .map(|id| id + 1)
            .map_err(|_| StoreError::Corrupted(format!("negative user id {}", model.id))),
    }
}
