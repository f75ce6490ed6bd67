use std::{path::PathBuf, sync::Arc};

use chrono::{TimeZone, Utc};
use engine::{
    BalanceChange, DataBase, Field, FileStore, Guard, Operator, Predicate, Query, SqlStore,
    StoreError, User, UserService,
};
use uuid::Uuid;

fn test_dbs() -> PathBuf {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target/test_dbs");
    std::fs::create_dir_all(&root).unwrap();
    root
}

async fn file_store() -> (FileStore, PathBuf) {
    let path = test_dbs().join(format!("storage_{}.json", Uuid::new_v4()));
    let store = FileStore::open(&path, "admin");
    store.init().await.unwrap();
    (store, path)
}

async fn memory_store() -> SqlStore {
    let store = SqlStore::connect("sqlite::memory:", "admin").await.unwrap();
    store.init().await.unwrap();
    store
}

/// Users with distinct balances, some blocked, created through `db`.
async fn populate(db: &dyn DataBase) -> Vec<User> {
    let rows = [
        ("alice", 10, 0, false),
        ("bob", 50, 3, false),
        ("carol", 0, 7, true),
        ("dave", 90, 1, false),
        ("erin", 5, 0, true),
        ("frank", 40, 2, false),
    ];
    let mut users = Vec::new();
    for (name, solids, stocks, blocked) in rows {
        let id = db.len().await.unwrap();
        let user = User {
            id,
            name: name.to_string(),
            password: format!("hash-{name}"),
            solid_balance: solids,
            stock_balance: stocks,
            is_blocked: blocked,
            last_farming: engine::NEVER_FARMED,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::TimeDelta::microseconds(i64::try_from(id).unwrap() * 1_500_001),
        };
        db.create(&user).await.unwrap();
        users.push(user);
    }
    users
}

fn queries() -> Vec<Query> {
    let jan_first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 3).unwrap();
    vec![
        UserService::sweep_query(),
        Query::new().filter(Predicate::new(Field::IsBlocked, Operator::Equal, true)),
        Query::new()
            .filter(Predicate::new(Field::IsBlocked, Operator::Equal, true))
            .or(Predicate::new(Field::SolidBalance, Operator::Greater, 40u64))
            .and(Predicate::new(Field::StockBalance, Operator::Greater, 2u64)),
        Query::new()
            .filter(Predicate::new(Field::Name, Operator::Less, "dave"))
            .and(Predicate::new(Field::SolidBalance, Operator::Less, 10u64).not()),
        Query::new()
            .filter(Predicate::new(Field::CreatedAt, Operator::Greater, jan_first))
            .or(Predicate::new(Field::Id, Operator::Equal, 0u64)),
        Query::new().filter(Predicate::new(Field::IsBlocked, Operator::Greater, false).not()),
        Query::new()
            .filter(Predicate::new(Field::Id, Operator::Less, u64::MAX))
            .and(Predicate::new(Field::Name, Operator::Equal, 1u64).not()),
    ]
}

#[tokio::test]
async fn file_store_survives_reopening() {
    let (store, path) = file_store().await;
    let users = populate(&store).await;
    store.update_block(2, false).await.unwrap();
    store.close().await.unwrap();

    let reopened = FileStore::open(&path, "admin");
    reopened.init().await.unwrap();
    let mut expected = users;
    expected[2].is_blocked = false;
    assert_eq!(reopened.get_all().await.unwrap(), expected);
    assert_eq!(reopened.len().await.unwrap(), 6);
}

#[tokio::test]
async fn sqlite_file_survives_reopening() {
    let path = test_dbs().join(format!("storage_{}.db", Uuid::new_v4()));
    let url = format!("sqlite:{}?mode=rwc", path.display());

    let store = SqlStore::connect(&url, "admin").await.unwrap();
    store.init().await.unwrap();
    let users = populate(&store).await;
    store.close().await.unwrap();

    let reopened = SqlStore::connect(&url, "admin").await.unwrap();
    reopened.init().await.unwrap();
    assert_eq!(reopened.get_all().await.unwrap(), users);
    assert_eq!(reopened.len().await.unwrap(), 6);
}

#[tokio::test]
async fn len_is_the_next_id() {
    let sql = memory_store().await;
    let (file, _) = file_store().await;
    for db in [&sql as &dyn DataBase, &file] {
        assert_eq!(db.len().await.unwrap(), 0);
        assert!(db.is_empty().await.unwrap());
        populate(db).await;
        assert_eq!(db.len().await.unwrap(), 6);

        let stale = User {
            id: 3,
            ..db.get_one(3).await.unwrap()
        };
        assert!(matches!(db.create(&stale).await, Err(StoreError::InvalidId(3))));
    }
}

#[tokio::test]
async fn both_engines_select_the_same_users() {
    let sql = memory_store().await;
    let (file, _) = file_store().await;
    let users = populate(&sql).await;
    populate(&file).await;

    for query in queries() {
        let expected = query.apply(&users, -1).unwrap();
        assert_eq!(sql.get_all_by(&query).await.unwrap(), expected, "sql: {query}");
        assert_eq!(file.get_all_by(&query).await.unwrap(), expected, "file: {query}");

        for limit in [0, 1, 2] {
            let expected = query.apply(&users, limit).unwrap();
            assert_eq!(sql.get_num_by(&query, limit).await.unwrap(), expected, "{query}");
            assert_eq!(file.get_num_by(&query, limit).await.unwrap(), expected, "{query}");
        }
        assert_eq!(
            sql.get_one_by(&query).await.unwrap(),
            expected_first(&query, &users)
        );
    }
}

fn expected_first(query: &Query, users: &[User]) -> Option<User> {
    query.apply(users, 1).unwrap().into_iter().next()
}

#[tokio::test]
async fn field_updates_return_the_new_record() {
    let sql = memory_store().await;
    let (file, _) = file_store().await;
    for db in [&sql as &dyn DataBase, &file] {
        populate(db).await;

        let bob = db.update_solids(1, -20).await.unwrap();
        assert_eq!(bob.solid_balance, 30);
        let bob = db.update_stocks(1, 4).await.unwrap();
        assert_eq!(bob.stock_balance, 7);
        let bob = db.update_name(1, "robert").await.unwrap();
        assert_eq!(bob.name, "robert");
        let bob = db.update_password(1, "new-hash").await.unwrap();
        assert_eq!(bob.password, "new-hash");
        let bob = db.update_block(1, true).await.unwrap();
        assert!(bob.is_blocked);
        let bob = db.update_last_farm(1).await.unwrap();
        assert!(bob.last_farming > engine::NEVER_FARMED);
        assert_eq!(db.get_one(1).await.unwrap(), bob);

        assert!(matches!(
            db.update_name(42, "ghost").await,
            Err(StoreError::NotFound(42))
        ));
    }
}

#[tokio::test]
async fn settle_checks_the_guard_atomically() {
    let sql = memory_store().await;
    let (file, _) = file_store().await;
    for db in [&sql as &dyn DataBase, &file] {
        populate(db).await;

        let buy = BalanceChange {
            solids: -60,
            stocks: 2,
            farmed_at: None,
            guard: Guard::SolidsAtLeast(60),
        };
        assert!(matches!(
            db.settle(1, buy.clone()).await,
            Err(StoreError::PreconditionFailed(_))
        ));
        assert_eq!(db.get_one(1).await.unwrap().solid_balance, 50);

        let dave = db.settle(3, buy).await.unwrap();
        assert_eq!((dave.solid_balance, dave.stock_balance), (30, 3));
        assert_eq!(db.get_one(3).await.unwrap(), dave);
    }
}

#[tokio::test]
async fn malformed_queries_are_rejected_by_both_engines() {
    let sql = memory_store().await;
    let (file, _) = file_store().await;
    for db in [&sql as &dyn DataBase, &file] {
        populate(db).await;
        let mut query = UserService::sweep_query();
        query.push(engine::Term::Combinator(engine::Separator::Or));
        assert!(matches!(
            db.get_all_by(&query).await,
            Err(StoreError::Query(engine::QueryError::DanglingCombinator))
        ));
    }
}

#[tokio::test]
async fn concurrent_writers_do_not_lose_updates() {
    let (file, _) = file_store().await;
    let file: Arc<dyn DataBase> = Arc::new(file);
    populate(file.as_ref()).await;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..20 {
        let db = file.clone();
        tasks.spawn(async move { db.update_solids(0, 1).await });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }
    assert_eq!(file.get_one(0).await.unwrap().solid_balance, 30);
}
