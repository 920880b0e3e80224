//! In-process store with the same semantics as the Postgres one.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::models::{ItemChange, ItemRecord, NewItem, NewUser, Page, UserChanges, UserRecord};
use super::{Store, StoreError};

#[derive(Default)]
struct Tables {
    /// Users without their items; items are joined on read.
    users: BTreeMap<Uuid, UserRecord>,
    items: BTreeMap<Uuid, ItemRecord>,
}

impl Tables {
    fn items_of(&self, user_id: Uuid) -> Vec<ItemRecord> {
        let mut items: Vec<ItemRecord> = self
            .items
            .values()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        items
    }

    fn joined(&self, user: &UserRecord) -> UserRecord {
        UserRecord {
            items: self.items_of(user.id),
            ..user.clone()
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: NewUser, items: Vec<String>) -> Result<UserRecord, StoreError> {
        let mut tables = self.tables();
        let now = Utc::now();
        let record = UserRecord {
            id: Uuid::new_v4(),
            name: user.name,
            age: user.age,
            kind: user.kind,
            created_at: now,
            updated_at: None,
            items: Vec::new(),
        };

        for name in items {
            let item = ItemRecord {
                id: Uuid::new_v4(),
                name,
                user_id: record.id,
                created_at: now,
                updated_at: None,
            };
            tables.items.insert(item.id, item);
        }

        let joined = tables.joined(&record);
        tables.users.insert(record.id, record);
        Ok(joined)
    }

    async fn get_user(&self, id: Uuid) -> Result<UserRecord, StoreError> {
        let tables = self.tables();
        let user = tables
            .users
            .get(&id)
            .ok_or_else(|| StoreError::user_not_found(id))?;
        Ok(tables.joined(user))
    }

    async fn update_user(
        &self,
        id: Uuid,
        changes: UserChanges,
        items: Vec<ItemChange>,
    ) -> Result<UserRecord, StoreError> {
        let mut tables = self.tables();
        if !tables.users.contains_key(&id) {
            return Err(StoreError::user_not_found(id));
        }
        // Validate every item before touching anything so a failure leaves no partial update.
        for change in &items {
            match tables.items.get(&change.id) {
                Some(item) if item.user_id == id => {}
                _ => return Err(StoreError::item_not_found(change.id)),
            }
        }

        let now = Utc::now();
        for change in items {
            if let Some(item) = tables.items.get_mut(&change.id) {
                item.name = change.name;
                item.updated_at = Some(now);
            }
        }

        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::user_not_found(id))?;
        user.name = changes.name;
        user.age = changes.age;
        user.kind = changes.kind;
        user.updated_at = Some(now);
        let user = user.clone();
        Ok(tables.joined(&user))
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if tables.users.remove(&id).is_none() {
            return Err(StoreError::user_not_found(id));
        }
        tables.items.retain(|_, item| item.user_id != id);
        Ok(())
    }

    async fn list_users(&self, page: Page) -> Result<Vec<UserRecord>, StoreError> {
        let tables = self.tables();
        let offset = usize::try_from(page.offset).unwrap_or(usize::MAX);
        Ok(tables
            .users
            .values()
            .skip(offset)
            .take(page.limit as usize)
            .map(|user| tables.joined(user))
            .collect())
    }

    async fn create_item(&self, item: NewItem) -> Result<ItemRecord, StoreError> {
        let mut tables = self.tables();
        if !tables.users.contains_key(&item.user_id) {
            return Err(StoreError::user_not_found(item.user_id));
        }
        let record = ItemRecord {
            id: Uuid::new_v4(),
            name: item.name,
            user_id: item.user_id,
            created_at: Utc::now(),
            updated_at: None,
        };
        tables.items.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_item(&self, id: Uuid) -> Result<ItemRecord, StoreError> {
        self.tables()
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::item_not_found(id))
    }

    async fn update_item(&self, change: ItemChange) -> Result<ItemRecord, StoreError> {
        let mut tables = self.tables();
        let item = tables
            .items
            .get_mut(&change.id)
            .ok_or_else(|| StoreError::item_not_found(change.id))?;
        item.name = change.name;
        item.updated_at = Some(Utc::now());
        Ok(item.clone())
    }

    async fn delete_item(&self, id: Uuid) -> Result<(), StoreError> {
        self.tables()
            .items
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::item_not_found(id))
    }

    async fn list_items(&self, user_id: Uuid) -> Result<Vec<ItemRecord>, StoreError> {
        Ok(self.tables().items_of(user_id))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
