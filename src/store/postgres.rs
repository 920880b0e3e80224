//! Postgres store backed by an sqlx connection pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::models::{
    ItemChange, ItemRecord, NewItem, NewUser, Page, UserChanges, UserKind, UserRecord,
};
use super::{Store, StoreError};
use crate::config::DatabaseConfig;

const INSERT_USER: &str = "
INSERT INTO users (age, name, user_type)
VALUES ($1, $2, $3)
RETURNING id, name, age, user_type, created_at, updated_at";

const UPDATE_USER: &str = "
UPDATE users SET
  age = $1,
  name = $2,
  user_type = $3,
  updated_at = CURRENT_TIMESTAMP
WHERE id = $4
RETURNING id, name, age, user_type, created_at, updated_at";

const DELETE_USER: &str = "DELETE FROM users WHERE id = $1";

const DELETE_USER_ITEMS: &str = "DELETE FROM items WHERE user_id = $1";

const SELECT_USER: &str = "
SELECT id, name, age, user_type, created_at, updated_at FROM users
WHERE id = $1";

const LIST_USERS: &str = "
SELECT id, name, age, user_type, created_at, updated_at FROM users
ORDER BY id LIMIT $1 OFFSET $2";

const INSERT_ITEM: &str = "
INSERT INTO items (name, user_id)
VALUES ($1, $2)
RETURNING id, name, user_id, created_at, updated_at";

const UPDATE_ITEM: &str = "
UPDATE items SET
  name = $1,
  updated_at = CURRENT_TIMESTAMP
WHERE id = $2
RETURNING id, name, user_id, created_at, updated_at";

const UPDATE_OWNED_ITEM: &str = "
UPDATE items SET
  name = $1,
  updated_at = CURRENT_TIMESTAMP
WHERE id = $2 AND user_id = $3
RETURNING id, name, user_id, created_at, updated_at";

const SELECT_ITEM: &str = "
SELECT id, name, user_id, created_at, updated_at FROM items
WHERE id = $1";

const DELETE_ITEM: &str = "DELETE FROM items WHERE id = $1";

const LIST_ITEMS: &str = "
SELECT id, name, user_id, created_at, updated_at FROM items
WHERE user_id = $1
ORDER BY created_at, id";

const LIST_ITEMS_FOR_USERS: &str = "
SELECT id, name, user_id, created_at, updated_at FROM items
WHERE user_id = ANY($1)
ORDER BY created_at, id";

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    age: i32,
    user_type: String,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl UserRow {
    fn into_record(self, items: Vec<ItemRecord>) -> UserRecord {
        UserRecord {
            id: self.id,
            name: self.name,
            age: self.age,
            kind: UserKind::from_db_str(&self.user_type),
            created_at: self.created_at,
            updated_at: self.updated_at,
            items,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    id: Uuid,
    name: String,
    user_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<ItemRow> for ItemRecord {
    fn from(row: ItemRow) -> Self {
        ItemRecord {
            id: row.id,
            name: row.name,
            user_id: row.user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Map a foreign-key violation on `items.user_id` to a missing user.
fn missing_user(e: sqlx::Error, user_id: Uuid) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::user_not_found(user_id)
        }
        _ => StoreError::Database(e),
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open the pool, verify connectivity and apply migrations if configured.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        let store = Self::from_pool(pool);
        store.ping().await?;

        if config.run_migrations {
            sqlx::migrate!("./migrations").run(&store.pool).await?;
            tracing::info!("Database migrations applied");
        }

        tracing::info!(max_connections = config.max_connections, "Postgres store ready");
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn items_of(conn: &mut PgConnection, user_id: Uuid) -> Result<Vec<ItemRecord>, StoreError> {
        let rows: Vec<ItemRow> = sqlx::query_as(LIST_ITEMS)
            .bind(user_id)
            .fetch_all(conn)
            .await?;
        Ok(rows.into_iter().map(ItemRecord::from).collect())
    }

    async fn user_in(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<UserRecord, StoreError> {
        let row: UserRow = sqlx::query_as(SELECT_USER)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| StoreError::user_not_found(id))?;
        let items = Self::items_of(tx, id).await?;
        Ok(row.into_record(items))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, user: NewUser, items: Vec<String>) -> Result<UserRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: UserRow = sqlx::query_as(INSERT_USER)
            .bind(user.age)
            .bind(&user.name)
            .bind(user.kind.as_db_str())
            .fetch_one(&mut *tx)
            .await?;

        let mut created = Vec::with_capacity(items.len());
        for name in items {
            let item: ItemRow = sqlx::query_as(INSERT_ITEM)
                .bind(&name)
                .bind(row.id)
                .fetch_one(&mut *tx)
                .await?;
            created.push(ItemRecord::from(item));
        }

        tx.commit().await?;
        Ok(row.into_record(created))
    }

    async fn get_user(&self, id: Uuid) -> Result<UserRecord, StoreError> {
        let mut tx = self.pool.begin().await?;
        let user = Self::user_in(&mut tx, id).await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn update_user(
        &self,
        id: Uuid,
        changes: UserChanges,
        items: Vec<ItemChange>,
    ) -> Result<UserRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        for change in items {
            sqlx::query_as::<_, ItemRow>(UPDATE_OWNED_ITEM)
                .bind(&change.name)
                .bind(change.id)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::item_not_found(change.id))?;
        }

        let row: UserRow = sqlx::query_as(UPDATE_USER)
            .bind(changes.age)
            .bind(&changes.name)
            .bind(changes.kind.as_db_str())
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::user_not_found(id))?;

        let items = Self::items_of(&mut tx, id).await?;
        tx.commit().await?;
        Ok(row.into_record(items))
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let items = sqlx::query(DELETE_USER_ITEMS)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let users = sqlx::query(DELETE_USER).bind(id).execute(&mut *tx).await?;
        if users.rows_affected() == 0 {
            // Dropping the transaction rolls back the item deletion.
            return Err(StoreError::user_not_found(id));
        }

        tx.commit().await?;
        tracing::debug!(user_id = %id, items = items.rows_affected(), "User deleted");
        Ok(())
    }

    async fn list_users(&self, page: Page) -> Result<Vec<UserRecord>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as(LIST_USERS)
            .bind(i64::from(page.limit))
            .bind(i64::try_from(page.offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let items: Vec<ItemRow> = sqlx::query_as(LIST_ITEMS_FOR_USERS)
            .bind(&ids[..])
            .fetch_all(&self.pool)
            .await?;

        let mut by_user: HashMap<Uuid, Vec<ItemRecord>> = HashMap::new();
        for item in items {
            by_user.entry(item.user_id).or_default().push(item.into());
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let items = by_user.remove(&row.id).unwrap_or_default();
                row.into_record(items)
            })
            .collect())
    }

    async fn create_item(&self, item: NewItem) -> Result<ItemRecord, StoreError> {
        let row: ItemRow = sqlx::query_as(INSERT_ITEM)
            .bind(&item.name)
            .bind(item.user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| missing_user(e, item.user_id))?;
        Ok(row.into())
    }

    async fn get_item(&self, id: Uuid) -> Result<ItemRecord, StoreError> {
        let row: ItemRow = sqlx::query_as(SELECT_ITEM)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::item_not_found(id))?;
        Ok(row.into())
    }

    async fn update_item(&self, change: ItemChange) -> Result<ItemRecord, StoreError> {
        let row: ItemRow = sqlx::query_as(UPDATE_ITEM)
            .bind(&change.name)
            .bind(change.id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::item_not_found(change.id))?;
        Ok(row.into())
    }

    async fn delete_item(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(DELETE_ITEM).bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::item_not_found(id));
        }
        Ok(())
    }

    async fn list_items(&self, user_id: Uuid) -> Result<Vec<ItemRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::items_of(&mut conn, user_id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
