//! End-to-end: gRPC and the console sharing one port.

use reqwest::StatusCode;
use serde_json::{json, Value};
use tonic::Code;

use crud_gateway::console::reflection::Reflector;
use crud_gateway::rpc::proto::{
    CreateItemRequest, CreateUserRequest, DeleteUserRequest, GetItemRequest, GetUserRequest,
    ListItemsRequest, ListUserRequest, PageFilter, UpdateItemRequest, UpdateUserRequest, UserType,
};
use crud_gateway::rpc::{REFLECTION_SERVICE_NAME, SERVICE_NAME};

mod common;

#[tokio::test]
async fn grpc_crud_over_shared_port() {
    let gateway = common::start_gateway().await;
    let mut client = common::grpc_client(gateway.local_addr());

    let user = client
        .create_user(CreateUserRequest {
            name: "alice".into(),
            age: 34,
            user_type: UserType::EmployeeUserType as i32,
            items: vec![CreateItemRequest {
                name: "laptop".into(),
                user_id: String::new(),
            }],
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(user.items.len(), 1);
    assert_eq!(user.items[0].user_id, user.id);

    let item = client
        .create_item(CreateItemRequest {
            name: "monitor".into(),
            user_id: user.id.clone(),
        })
        .await
        .unwrap()
        .into_inner();

    let updated = client
        .update_user(UpdateUserRequest {
            id: user.id.clone(),
            name: "alice smith".into(),
            age: 35,
            user_type: UserType::CustomerUserType as i32,
            items: vec![UpdateItemRequest {
                id: item.id.clone(),
                name: "4k monitor".into(),
            }],
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(updated.user_type(), UserType::CustomerUserType);
    assert!(updated.updated_at.is_some());
    assert!(updated.items.iter().any(|i| i.name == "4k monitor"));

    let items = client
        .list_items(ListItemsRequest {
            user_id: user.id.clone(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(items.items.len(), 2);

    let users = client
        .list_user(ListUserRequest {
            page_filter: Some(PageFilter { limit: 10, page: 0 }),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(users.users.len(), 1);

    client
        .delete_user(DeleteUserRequest {
            id: user.id.clone(),
        })
        .await
        .unwrap();

    let status = client
        .get_user(GetUserRequest { id: user.id })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    let status = client
        .get_item(GetItemRequest { id: item.id })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn grpc_rejects_malformed_ids() {
    let gateway = common::start_gateway().await;
    let mut client = common::grpc_client(gateway.local_addr());

    let status = client
        .get_user(GetUserRequest {
            id: "not-a-uuid".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn console_serves_catalog_and_health() {
    let gateway = common::start_gateway().await;
    let base = format!("http://{}", gateway.local_addr());
    let http = reqwest::Client::new();

    let res = http.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let methods: Vec<Value> = http
        .get(format!("{base}/api/methods"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(methods.len(), 10);
    let list_items = methods
        .iter()
        .find(|m| m["path"] == "/example.service.ServiceExampleService/ListItems")
        .unwrap();
    assert_eq!(list_items["inputType"], "example.service.ListItemsRequest");
    assert_eq!(list_items["outputType"], "example.service.ListItemsResponse");
    assert_eq!(list_items["request"]["userId"], "");

    let index = http.get(&base).send().await.unwrap().text().await.unwrap();
    assert!(index.contains("/api/invoke/CreateUser"));

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn reflection_lists_services_over_shared_port() {
    let gateway = common::start_gateway().await;
    let mut reflector = Reflector::new(common::grpc_channel(gateway.local_addr()));

    let services = reflector.services().await.unwrap();
    assert!(services.iter().any(|s| s == SERVICE_NAME));
    assert!(services.iter().any(|s| s == REFLECTION_SERVICE_NAME));

    let methods = reflector.methods(SERVICE_NAME).await.unwrap();
    let names: Vec<_> = methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "CreateUser", "GetUser", "UpdateUser", "DeleteUser", "ListUser",
            "CreateItem", "GetItem", "UpdateItem", "DeleteItem", "ListItems",
        ]
    );

    let err = reflector.methods("example.service.Missing").await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn console_invokes_through_self_dial() {
    let gateway = common::start_gateway().await;
    let base = format!("http://{}", gateway.local_addr());
    let http = reqwest::Client::new();

    let res = http
        .post(format!("{base}/api/invoke/CreateUser"))
        .json(&json!({
            "name": "bob",
            "age": 28,
            "userType": "CUSTOMER_USER_TYPE",
            "items": [{ "name": "bike" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let created: Value = res.json().await.unwrap();
    assert_eq!(created["userType"], "CUSTOMER_USER_TYPE");
    assert_eq!(created["items"][0]["name"], "bike");
    let id = created["id"].as_str().unwrap().to_string();

    let fetched: Value = http
        .post(format!("{base}/api/invoke/GetUser"))
        .json(&json!({ "id": id }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["name"], "bob");
    assert!(fetched["createdAt"].is_string());

    // An empty body is an empty request.
    let res = http
        .post(format!("{base}/api/invoke/ListUser"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let listed: Value = res.json().await.unwrap();
    assert_eq!(listed["users"].as_array().unwrap().len(), 1);

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn console_maps_rpc_errors_to_http() {
    let gateway = common::start_gateway().await;
    let base = format!("http://{}", gateway.local_addr());
    let http = reqwest::Client::new();

    let res = http
        .post(format!("{base}/api/invoke/GetUser"))
        .json(&json!({ "id": "42" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "InvalidArgument");

    let res = http
        .post(format!("{base}/api/invoke/GetItem"))
        .json(&json!({ "id": uuid::Uuid::new_v4() }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = http
        .post(format!("{base}/api/invoke/DropTables"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = http
        .post(format!("{base}/api/invoke/GetUser"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    gateway.stop().await.unwrap();
}

#[tokio::test]
async fn stop_closes_the_port_to_new_requests() {
    let gateway = common::start_gateway().await;
    let addr = gateway.local_addr();
    let handle = gateway.mux().clone();

    gateway.stop().await.unwrap();
    assert!(handle.is_closed());
    assert_eq!(handle.pending(), 0);

    let result = reqwest::Client::new()
        .get(format!("http://{addr}/healthz"))
        .timeout(std::time::Duration::from_secs(2))
        .send()
        .await;
    assert!(result.is_err());
}
