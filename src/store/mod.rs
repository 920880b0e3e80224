//! Persistence subsystem.
//!
//! # Data Flow
//! ```text
//! rpc::service (one handler per RPC)
//!     → Store trait (Arc<dyn Store>, injected at construction)
//!         → postgres.rs (sqlx pool, one parameterized statement per step)
//!         → memory.rs (in-process tables for tests and local runs)
//! ```
//!
//! # Design Decisions
//! - No process-wide handle: every consumer receives its store explicitly
//! - Multi-statement operations run in one transaction
//! - Failures are typed errors; nothing panics on a bad row

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{DatabaseConfig, StoreBackend};

pub use memory::MemoryStore;
pub use models::{
    ItemChange, ItemRecord, NewItem, NewUser, Page, UserChanges, UserKind, UserRecord,
};
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn user_not_found(id: Uuid) -> Self {
        StoreError::NotFound { entity: "user", id }
    }

    pub fn item_not_found(id: Uuid) -> Self {
        StoreError::NotFound { entity: "item", id }
    }
}

/// Row-level CRUD over `users` and `items`.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Insert a user and its initial items atomically.
    async fn create_user(&self, user: NewUser, items: Vec<String>) -> Result<UserRecord, StoreError>;

    async fn get_user(&self, id: Uuid) -> Result<UserRecord, StoreError>;

    /// Rename the user's listed items, then replace the user's columns, atomically.
    async fn update_user(
        &self,
        id: Uuid,
        changes: UserChanges,
        items: Vec<ItemChange>,
    ) -> Result<UserRecord, StoreError>;

    /// Delete the user's items and then the user, atomically.
    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError>;

    async fn list_users(&self, page: Page) -> Result<Vec<UserRecord>, StoreError>;

    async fn create_item(&self, item: NewItem) -> Result<ItemRecord, StoreError>;

    async fn get_item(&self, id: Uuid) -> Result<ItemRecord, StoreError>;

    async fn update_item(&self, change: ItemChange) -> Result<ItemRecord, StoreError>;

    async fn delete_item(&self, id: Uuid) -> Result<(), StoreError>;

    async fn list_items(&self, user_id: Uuid) -> Result<Vec<ItemRecord>, StoreError>;

    /// Check connectivity.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Build the configured store.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config.backend {
        StoreBackend::Postgres => Ok(Arc::new(PgStore::connect(config).await?)),
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
