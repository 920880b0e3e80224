//! Method table: request templates and dynamic dispatch over the gRPC client.

use serde::Serialize;
use serde_json::Value;
use tonic::transport::Channel;

use super::reflection::ReflectedMethod;
use super::ConsoleError;
use crate::rpc::proto::{
    CreateItemRequest, CreateUserRequest, DeleteItemRequest, DeleteUserRequest, GetItemRequest,
    GetUserRequest, ListItemsRequest, ListUserRequest, UpdateItemRequest, UpdateUserRequest,
};
use crate::rpc::{ServiceExampleServiceClient, SERVICE_NAME};

pub type Client = ServiceExampleServiceClient<Channel>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodInfo {
    pub name: String,
    pub path: String,
    pub input_type: String,
    pub output_type: String,
    /// Request message with every field at its default value, or null when
    /// the console cannot invoke the method.
    pub request: Value,
}

impl From<ReflectedMethod> for MethodInfo {
    fn from(method: ReflectedMethod) -> Self {
        let request = if method.service == SERVICE_NAME {
            request_template(&method.name).unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        Self {
            path: method.path(),
            name: method.name,
            input_type: method.input_type,
            output_type: method.output_type,
            request,
        }
    }
}

macro_rules! method_table {
    ($($name:literal => $call:ident($request:ty)),+ $(,)?) => {
        /// Names of every invokable method, in declaration order.
        pub const METHOD_NAMES: &[&str] = &[$($name),+];

        /// Default-valued JSON request for an invokable method.
        pub fn request_template(method: &str) -> Option<Value> {
            match method {
                $($name => serde_json::to_value(<$request>::default()).ok(),)+
                _ => None,
            }
        }

        /// Decode `body` as the method's request, call it and encode the reply.
        pub async fn invoke(client: &mut Client, method: &str, body: Value) -> Result<Value, ConsoleError> {
            match method {
                $(
                    $name => {
                        let request: $request =
                            serde_json::from_value(body).map_err(ConsoleError::BadRequest)?;
                        let response = client.$call(request).await?;
                        serde_json::to_value(response.into_inner()).map_err(ConsoleError::Encode)
                    }
                )+
                other => Err(ConsoleError::UnknownMethod(other.to_string())),
            }
        }
    };
}

method_table! {
    "CreateUser" => create_user(CreateUserRequest),
    "GetUser" => get_user(GetUserRequest),
    "UpdateUser" => update_user(UpdateUserRequest),
    "DeleteUser" => delete_user(DeleteUserRequest),
    "ListUser" => list_user(ListUserRequest),
    "CreateItem" => create_item(CreateItemRequest),
    "GetItem" => get_item(GetItemRequest),
    "UpdateItem" => update_item(UpdateItemRequest),
    "DeleteItem" => delete_item(DeleteItemRequest),
    "ListItems" => list_items(ListItemsRequest),
}
