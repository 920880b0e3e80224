//! `ServiceExampleService` implementation over a [`Store`].

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};

use super::convert::{parse_id, user_kind};
use super::proto::service_example_service_server::{
    ServiceExampleService, ServiceExampleServiceServer,
};
use super::proto::{
    CreateItemRequest, CreateUserRequest, DeleteItemRequest, DeleteItemResponse,
    DeleteUserRequest, DeleteUserResponse, GetItemRequest, GetUserRequest, Item,
    ListItemsRequest, ListItemsResponse, ListUserRequest, ListUserResponse, PageFilter,
    UpdateItemRequest, UpdateUserRequest, User,
};
use crate::config::RpcConfig;
use crate::observability::metrics;
use crate::store::{ItemChange, NewItem, NewUser, Page, Store, UserChanges};

#[derive(Clone)]
pub struct CrudService {
    store: Arc<dyn Store>,
    config: RpcConfig,
}

impl CrudService {
    pub fn new(store: Arc<dyn Store>, config: RpcConfig) -> Self {
        Self { store, config }
    }

    pub fn into_server(self) -> ServiceExampleServiceServer<Self> {
        ServiceExampleServiceServer::new(self)
    }

    /// Resolve a page filter to a store window.
    ///
    /// `limit = 0` falls back to the default page size and every limit is
    /// clamped to the maximum.
    pub fn page(&self, filter: Option<PageFilter>) -> Page {
        let filter = filter.unwrap_or_default();
        let limit = match filter.limit {
            0 => self.config.default_page_size,
            n => n,
        }
        .min(self.config.max_page_size);
        Page {
            limit,
            offset: u64::from(filter.page) * u64::from(limit),
        }
    }
}

/// Run a handler, recording its latency and outcome.
async fn observed<T, F>(method: &'static str, handler: F) -> Result<Response<T>, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    let started = Instant::now();
    let result = handler.await;
    let code = match &result {
        Ok(_) => tonic::Code::Ok,
        Err(status) => status.code(),
    };
    metrics::record_rpc(method, code, started);
    match &result {
        Ok(_) => tracing::debug!(method, elapsed = ?started.elapsed(), "RPC completed"),
        Err(status) => tracing::debug!(method, code = ?code, error = status.message(), "RPC failed"),
    }
    result.map(Response::new)
}

#[tonic::async_trait]
impl ServiceExampleService for CrudService {
    async fn create_user(&self, request: Request<CreateUserRequest>) -> Result<Response<User>, Status> {
        let request = request.into_inner();
        observed("CreateUser", async {
            let user = NewUser {
                kind: user_kind(request.user_type),
                name: request.name,
                age: request.age,
            };
            // Nested items always belong to the user being created.
            let items = request.items.into_iter().map(|item| item.name).collect();
            let created = self.store.create_user(user, items).await?;
            tracing::info!(user_id = %created.id, items = created.items.len(), "User created");
            Ok(created.into())
        })
        .await
    }

    async fn get_user(&self, request: Request<GetUserRequest>) -> Result<Response<User>, Status> {
        let request = request.into_inner();
        observed("GetUser", async {
            let id = parse_id("id", &request.id)?;
            Ok(self.store.get_user(id).await?.into())
        })
        .await
    }

    async fn update_user(&self, request: Request<UpdateUserRequest>) -> Result<Response<User>, Status> {
        let request = request.into_inner();
        observed("UpdateUser", async {
            let id = parse_id("id", &request.id)?;
            let items = request
                .items
                .into_iter()
                .map(|item| {
                    Ok(ItemChange {
                        id: parse_id("items.id", &item.id)?,
                        name: item.name,
                    })
                })
                .collect::<Result<Vec<_>, Status>>()?;
            let changes = UserChanges {
                kind: user_kind(request.user_type),
                name: request.name,
                age: request.age,
            };
            let updated = self.store.update_user(id, changes, items).await?;
            tracing::info!(user_id = %id, "User updated");
            Ok(updated.into())
        })
        .await
    }

    async fn delete_user(
        &self,
        request: Request<DeleteUserRequest>,
    ) -> Result<Response<DeleteUserResponse>, Status> {
        let request = request.into_inner();
        observed("DeleteUser", async {
            let id = parse_id("id", &request.id)?;
            self.store.delete_user(id).await?;
            tracing::info!(user_id = %id, "User deleted");
            Ok(DeleteUserResponse {})
        })
        .await
    }

    async fn list_user(
        &self,
        request: Request<ListUserRequest>,
    ) -> Result<Response<ListUserResponse>, Status> {
        let request = request.into_inner();
        observed("ListUser", async {
            let page = self.page(request.page_filter);
            let users = self.store.list_users(page).await?;
            Ok(ListUserResponse {
                users: users.into_iter().map(User::from).collect(),
            })
        })
        .await
    }

    async fn create_item(&self, request: Request<CreateItemRequest>) -> Result<Response<Item>, Status> {
        let request = request.into_inner();
        observed("CreateItem", async {
            let item = NewItem {
                user_id: parse_id("userId", &request.user_id)?,
                name: request.name,
            };
            let created = self.store.create_item(item).await?;
            tracing::info!(item_id = %created.id, user_id = %created.user_id, "Item created");
            Ok(created.into())
        })
        .await
    }

    async fn get_item(&self, request: Request<GetItemRequest>) -> Result<Response<Item>, Status> {
        let request = request.into_inner();
        observed("GetItem", async {
            let id = parse_id("id", &request.id)?;
            Ok(self.store.get_item(id).await?.into())
        })
        .await
    }

    async fn update_item(&self, request: Request<UpdateItemRequest>) -> Result<Response<Item>, Status> {
        let request = request.into_inner();
        observed("UpdateItem", async {
            let change = ItemChange {
                id: parse_id("id", &request.id)?,
                name: request.name,
            };
            Ok(self.store.update_item(change).await?.into())
        })
        .await
    }

    async fn delete_item(
        &self,
        request: Request<DeleteItemRequest>,
    ) -> Result<Response<DeleteItemResponse>, Status> {
        let request = request.into_inner();
        observed("DeleteItem", async {
            let id = parse_id("id", &request.id)?;
            self.store.delete_item(id).await?;
            Ok(DeleteItemResponse {})
        })
        .await
    }

    async fn list_items(
        &self,
        request: Request<ListItemsRequest>,
    ) -> Result<Response<ListItemsResponse>, Status> {
        let request = request.into_inner();
        observed("ListItems", async {
            let user_id = parse_id("userId", &request.user_id)?;
            let items = self.store.list_items(user_id).await?;
            Ok(ListItemsResponse {
                items: items.into_iter().map(Item::from).collect(),
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::proto::UserType;
    use crate::store::MemoryStore;
    use tonic::Code;

    fn service() -> CrudService {
        let config = RpcConfig {
            default_page_size: 2,
            max_page_size: 3,
            ..RpcConfig::default()
        };
        CrudService::new(Arc::new(MemoryStore::new()), config)
    }

    async fn create(service: &CrudService, name: &str, items: &[&str]) -> User {
        let request = CreateUserRequest {
            name: name.to_string(),
            age: 40,
            user_type: UserType::EmployeeUserType as i32,
            items: items
                .iter()
                .map(|item| CreateItemRequest {
                    name: item.to_string(),
                    user_id: "ignored".to_string(),
                })
                .collect(),
        };
        service
            .create_user(Request::new(request))
            .await
            .unwrap()
            .into_inner()
    }

    #[test]
    fn page_defaults_and_clamps() {
        let service = service();
        assert_eq!(service.page(None), Page { limit: 2, offset: 0 });
        assert_eq!(
            service.page(Some(PageFilter { limit: 0, page: 3 })),
            Page { limit: 2, offset: 6 }
        );
        assert_eq!(
            service.page(Some(PageFilter { limit: 50, page: 1 })),
            Page { limit: 3, offset: 3 }
        );
    }

    #[tokio::test]
    async fn create_user_attaches_nested_items() {
        let service = service();
        let user = create(&service, "alice", &["pen", "ink"]).await;

        assert_eq!(user.items.len(), 2);
        assert!(user.items.iter().all(|item| item.user_id == user.id));
        assert_eq!(user.user_type(), UserType::EmployeeUserType);
        assert!(user.created_at.is_some());
        assert!(user.updated_at.is_none());
    }

    #[tokio::test]
    async fn update_user_renames_items() {
        let service = service();
        let user = create(&service, "alice", &["pen"]).await;

        let updated = service
            .update_user(Request::new(UpdateUserRequest {
                id: user.id.clone(),
                name: "alice b".to_string(),
                age: 41,
                user_type: UserType::CustomerUserType as i32,
                items: vec![UpdateItemRequest {
                    id: user.items[0].id.clone(),
                    name: "quill".to_string(),
                }],
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(updated.name, "alice b");
        assert_eq!(updated.items[0].name, "quill");
        assert!(updated.updated_at.is_some());
    }

    #[tokio::test]
    async fn malformed_ids_are_rejected() {
        let service = service();
        let status = service
            .get_user(Request::new(GetUserRequest {
                id: "42".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);

        let status = service
            .list_items(Request::new(ListItemsRequest {
                user_id: String::new(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let service = service();
        let missing = uuid::Uuid::new_v4().to_string();

        let status = service
            .delete_user(Request::new(DeleteUserRequest { id: missing.clone() }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);

        let status = service
            .create_item(Request::new(CreateItemRequest {
                name: "orphan".to_string(),
                user_id: missing,
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn list_user_returns_only_rows() {
        let service = service();
        for name in ["a", "b", "c"] {
            create(&service, name, &[]).await;
        }

        let second = service
            .list_user(Request::new(ListUserRequest {
                page_filter: Some(PageFilter { limit: 2, page: 1 }),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(second.users.len(), 1);
    }

    #[tokio::test]
    async fn item_lifecycle() {
        let service = service();
        let user = create(&service, "alice", &[]).await;

        let item = service
            .create_item(Request::new(CreateItemRequest {
                name: "pen".to_string(),
                user_id: user.id.clone(),
            }))
            .await
            .unwrap()
            .into_inner();

        let renamed = service
            .update_item(Request::new(UpdateItemRequest {
                id: item.id.clone(),
                name: "quill".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(renamed.name, "quill");

        let listed = service
            .list_items(Request::new(ListItemsRequest {
                user_id: user.id.clone(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(listed.items.len(), 1);

        service
            .delete_item(Request::new(DeleteItemRequest { id: item.id.clone() }))
            .await
            .unwrap();
        let status = service
            .get_item(Request::new(GetItemRequest { id: item.id }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }
}
