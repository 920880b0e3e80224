//! Records exchanged between the RPC layer and the stores.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Kind of user, persisted as the legacy `UserType_*` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserKind {
    #[default]
    Invalid,
    Employee,
    Customer,
}

impl UserKind {
    pub fn as_db_str(self) -> &'static str {
        match self {
            UserKind::Invalid => "UserType_INVALID_USER_TYPE",
            UserKind::Employee => "UserType_EMPLOYEE_USER_TYPE",
            UserKind::Customer => "UserType_CUSTOMER_USER_TYPE",
        }
    }

    /// Unknown strings read back as `Invalid` rather than failing the row.
    pub fn from_db_str(value: &str) -> Self {
        match value {
            "UserType_EMPLOYEE_USER_TYPE" => UserKind::Employee,
            "UserType_CUSTOMER_USER_TYPE" => UserKind::Customer,
            _ => UserKind::Invalid,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub age: i32,
    pub kind: UserKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<ItemRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub id: Uuid,
    pub name: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub age: i32,
    pub kind: UserKind,
}

/// Full replacement of a user's mutable columns.
#[derive(Debug, Clone)]
pub struct UserChanges {
    pub name: String,
    pub age: i32,
    pub kind: UserKind,
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub name: String,
    pub user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct ItemChange {
    pub id: Uuid,
    pub name: String,
}

/// A window over users ordered by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u64,
}
