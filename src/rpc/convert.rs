//! Mapping between wire messages, store records and gRPC statuses.

use chrono::{DateTime, Utc};
use tonic::Status;
use uuid::Uuid;

use super::proto;
use crate::store::{ItemRecord, StoreError, UserKind, UserRecord};

pub fn parse_id(field: &str, value: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(value)
        .map_err(|_| Status::invalid_argument(format!("{field} must be a UUID, got `{value}`")))
}

pub fn timestamp(value: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: value.timestamp(),
        nanos: value.timestamp_subsec_nanos() as i32,
    }
}

impl From<UserKind> for proto::UserType {
    fn from(kind: UserKind) -> Self {
        match kind {
            UserKind::Invalid => proto::UserType::InvalidUserType,
            UserKind::Employee => proto::UserType::EmployeeUserType,
            UserKind::Customer => proto::UserType::CustomerUserType,
        }
    }
}

impl From<proto::UserType> for UserKind {
    fn from(kind: proto::UserType) -> Self {
        match kind {
            proto::UserType::InvalidUserType => UserKind::Invalid,
            proto::UserType::EmployeeUserType => UserKind::Employee,
            proto::UserType::CustomerUserType => UserKind::Customer,
        }
    }
}

/// Unknown enum numbers collapse to `Invalid`, matching how stored strings are read back.
pub fn user_kind(raw: i32) -> UserKind {
    proto::UserType::try_from(raw)
        .map(UserKind::from)
        .unwrap_or_default()
}

impl From<ItemRecord> for proto::Item {
    fn from(item: ItemRecord) -> Self {
        proto::Item {
            id: item.id.to_string(),
            name: item.name,
            user_id: item.user_id.to_string(),
            created_at: Some(timestamp(item.created_at)),
            updated_at: item.updated_at.map(timestamp),
        }
    }
}

impl From<UserRecord> for proto::User {
    fn from(user: UserRecord) -> Self {
        proto::User {
            id: user.id.to_string(),
            name: user.name,
            age: user.age,
            user_type: proto::UserType::from(user.kind) as i32,
            items: user.items.into_iter().map(proto::Item::from).collect(),
            created_at: Some(timestamp(user.created_at)),
            updated_at: user.updated_at.map(timestamp),
        }
    }
}

impl From<StoreError> for Status {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => Status::not_found(e.to_string()),
            other => {
                tracing::error!(error = %other, "Store operation failed");
                Status::internal("internal storage error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn malformed_id_is_invalid_argument() {
        let status = parse_id("id", "not-a-uuid").unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(status.message().contains("not-a-uuid"));

        let id = Uuid::new_v4();
        assert_eq!(parse_id("id", &id.to_string()).unwrap(), id);
    }

    #[test]
    fn store_errors_map_to_codes() {
        let missing: Status = StoreError::user_not_found(Uuid::nil()).into();
        assert_eq!(missing.code(), Code::NotFound);

        let broken: Status = StoreError::Database(sqlx::Error::PoolTimedOut).into();
        assert_eq!(broken.code(), Code::Internal);
        assert!(!broken.message().contains("pool"));
    }

    #[test]
    fn unknown_user_type_reads_as_invalid() {
        assert_eq!(user_kind(2), UserKind::Customer);
        assert_eq!(user_kind(42), UserKind::Invalid);
    }

    #[test]
    fn record_timestamps_carry_over() {
        let created = Utc::now();
        let item = ItemRecord {
            id: Uuid::new_v4(),
            name: "pen".to_string(),
            user_id: Uuid::new_v4(),
            created_at: created,
            updated_at: None,
        };

        let wire = proto::Item::from(item.clone());
        assert_eq!(wire.id, item.id.to_string());
        assert_eq!(wire.created_at.unwrap().seconds, created.timestamp());
        assert!(wire.updated_at.is_none());
    }
}
