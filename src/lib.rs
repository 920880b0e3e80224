//! CRUD gRPC gateway with an HTTP debug console on the same port.

pub mod config;
pub mod console;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod rpc;
pub mod store;

pub use config::schema::GatewayConfig;
pub use lifecycle::{RunningGateway, Shutdown};
pub use net::{Mux, MuxHandle, VirtualListener};
