//! Generates the tonic client and server for `example.service.ServiceExampleService`.
//!
//! Messages are hand-written prost structs in `src/rpc/proto.rs`, so the
//! service is described with tonic-build's manual builder and no `protoc`
//! is needed at build time. `proto/example/service.proto` describes the same
//! schema; protox compiles it into the descriptor set served over gRPC
//! reflection.

use std::path::PathBuf;
use tonic_build::manual::{Builder, Method, Service};

const PROTO_ROOT: &str = "proto";
const PROTO_FILE: &str = "example/service.proto";
const DESCRIPTOR_FILE: &str = "example_service_descriptor.bin";

const CODEC: &str = "tonic::codec::ProstCodec";

fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::rpc::proto::{input}"))
        .output_type(format!("crate::rpc::proto::{output}"))
        .codec_path(CODEC)
        .build()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let service = Service::builder()
        .name("ServiceExampleService")
        .package("example.service")
        .method(unary("create_user", "CreateUser", "CreateUserRequest", "User"))
        .method(unary("get_user", "GetUser", "GetUserRequest", "User"))
        .method(unary("update_user", "UpdateUser", "UpdateUserRequest", "User"))
        .method(unary("delete_user", "DeleteUser", "DeleteUserRequest", "DeleteUserResponse"))
        .method(unary("list_user", "ListUser", "ListUserRequest", "ListUserResponse"))
        .method(unary("create_item", "CreateItem", "CreateItemRequest", "Item"))
        .method(unary("get_item", "GetItem", "GetItemRequest", "Item"))
        .method(unary("update_item", "UpdateItem", "UpdateItemRequest", "Item"))
        .method(unary("delete_item", "DeleteItem", "DeleteItemRequest", "DeleteItemResponse"))
        .method(unary("list_items", "ListItems", "ListItemsRequest", "ListItemsResponse"))
        .build();

    Builder::new().compile(&[service]);

    let mut compiler = protox::Compiler::new([PROTO_ROOT])?;
    compiler.include_imports(true);
    compiler.open_file(PROTO_FILE)?;
    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    std::fs::write(out_dir.join(DESCRIPTOR_FILE), compiler.encode_file_descriptor_set())?;

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={PROTO_ROOT}");
    println!("cargo:rerun-if-changed=migrations");
    Ok(())
}
