pub use sea_orm_migration::prelude::*;

mod m20261019_000001_users;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20261019_000001_users::Migration)]
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::Database;

    use super::*;

    #[tokio::test]
    async fn up_is_idempotent_and_creates_users() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let manager = SchemaManager::new(&db);
        assert!(manager.has_table("users").await.unwrap());
        assert!(manager.has_column("users", "stock_balance").await.unwrap());

        Migrator::down(&db, None).await.unwrap();
        assert!(!manager.has_table("users").await.unwrap());
    }
}
