//! gRPC service subsystem.
//!
//! # Data Flow
//! ```text
//! gRPC virtual listener (net::mux, `grpc()` rule)
//!     → tonic Server (TraceLayer, per-request timeout)
//!         → grpc.reflection.v1 (descriptor set compiled from proto/)
//!         → service.rs (CrudService: validate ids, page, call the store)
//!             → convert.rs (records ↔ wire messages, StoreError → Status)
//! ```

pub mod convert;
pub mod proto;
pub mod service;

pub use proto::service_example_service_client::ServiceExampleServiceClient;
pub use proto::service_example_service_server::ServiceExampleServiceServer;
pub use service::CrudService;

/// Fully-qualified service name, as it appears in request paths.
pub const SERVICE_NAME: &str = "example.service.ServiceExampleService";

/// Name of the reflection service registered next to [`SERVICE_NAME`].
pub const REFLECTION_SERVICE_NAME: &str = "grpc.reflection.v1.ServerReflection";
