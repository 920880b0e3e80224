//! Wire messages for `example.service` and the generated tonic stubs.
//!
//! The structs mirror `proto/example/service.proto` field-for-field. They also
//! carry serde derives so the console can speak JSON: field names are
//! camelCase, `userType` is the enum's proto name and timestamps are RFC 3339.

use serde::{Deserialize, Serialize};

include!(concat!(env!("OUT_DIR"), "/example.service.ServiceExampleService.rs"));

/// Encoded `FileDescriptorSet` for `proto/example/service.proto` and its imports.
pub const FILE_DESCRIPTOR_SET: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/example_service_descriptor.bin"));

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum UserType {
    InvalidUserType = 0,
    EmployeeUserType = 1,
    CustomerUserType = 2,
}

impl UserType {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            UserType::InvalidUserType => "INVALID_USER_TYPE",
            UserType::EmployeeUserType => "EMPLOYEE_USER_TYPE",
            UserType::CustomerUserType => "CUSTOMER_USER_TYPE",
        }
    }

    pub fn from_str_name(value: &str) -> Option<Self> {
        match value {
            "INVALID_USER_TYPE" => Some(UserType::InvalidUserType),
            "EMPLOYEE_USER_TYPE" => Some(UserType::EmployeeUserType),
            "CUSTOMER_USER_TYPE" => Some(UserType::CustomerUserType),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(int32, tag = "3")]
    pub age: i32,
    #[prost(enumeration = "UserType", tag = "4")]
    #[serde(with = "user_type_name")]
    pub user_type: i32,
    #[prost(message, repeated, tag = "5")]
    pub items: Vec<Item>,
    #[prost(message, optional, tag = "6")]
    #[serde(with = "rfc3339", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<prost_types::Timestamp>,
    #[prost(message, optional, tag = "7")]
    #[serde(with = "rfc3339", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<prost_types::Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Item {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub user_id: String,
    #[prost(message, optional, tag = "4")]
    #[serde(with = "rfc3339", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<prost_types::Timestamp>,
    #[prost(message, optional, tag = "5")]
    #[serde(with = "rfc3339", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<prost_types::Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateUserRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub age: i32,
    #[prost(enumeration = "UserType", tag = "3")]
    #[serde(with = "user_type_name")]
    pub user_type: i32,
    #[prost(message, repeated, tag = "4")]
    pub items: Vec<CreateItemRequest>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetUserRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateUserRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(int32, tag = "3")]
    pub age: i32,
    #[prost(enumeration = "UserType", tag = "4")]
    #[serde(with = "user_type_name")]
    pub user_type: i32,
    #[prost(message, repeated, tag = "5")]
    pub items: Vec<UpdateItemRequest>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteUserRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct DeleteUserResponse {}

#[derive(Clone, Copy, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageFilter {
    #[prost(uint32, tag = "1")]
    pub limit: u32,
    #[prost(uint32, tag = "2")]
    pub page: u32,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListUserRequest {
    #[prost(message, optional, tag = "1")]
    pub page_filter: Option<PageFilter>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListUserResponse {
    #[prost(message, repeated, tag = "1")]
    pub users: Vec<User>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateItemRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub user_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetItemRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateItemRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteItemRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct DeleteItemResponse {}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListItemsRequest {
    #[prost(string, tag = "1")]
    pub user_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListItemsResponse {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<Item>,
}

/// `userType` as its proto name; numbers are accepted on input.
mod user_type_name {
    use super::UserType;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Name(String),
        Number(i32),
    }

    pub fn serialize<S: Serializer>(value: &i32, serializer: S) -> Result<S::Ok, S::Error> {
        match UserType::try_from(*value) {
            Ok(kind) => serializer.serialize_str(kind.as_str_name()),
            Err(_) => serializer.serialize_i32(*value),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(value),
            Raw::Name(name) => UserType::from_str_name(&name)
                .map(i32::from)
                .ok_or_else(|| D::Error::custom(format!("unknown user type `{name}`"))),
        }
    }
}

/// `google.protobuf.Timestamp` as an RFC 3339 string.
mod rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use prost_types::Timestamp;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Timestamp>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let datetime = value.as_ref().and_then(|ts| {
            let nanos = u32::try_from(ts.nanos).ok()?;
            DateTime::<Utc>::from_timestamp(ts.seconds, nanos)
        });
        match datetime {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Timestamp>, D::Error> {
        let Some(text) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let dt = DateTime::parse_from_rfc3339(&text).map_err(D::Error::custom)?;
        Ok(Some(Timestamp {
            seconds: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos() as i32,
        }))
    }
}
