//! HTTP debugging console.
//!
//! # Data Flow
//! ```text
//! catch-all virtual listener (net::mux)
//!     → server.rs (axum: index, healthz, method catalog, invoke)
//!         → reflection.rs (method catalog from grpc.reflection.v1)
//!         → methods.rs (JSON ↔ request/response messages)
//!             → gRPC client dialed at the gateway's own port
//!                 → net::mux → rpc (like any external client)
//! ```
//!
//! # Design Decisions
//! - The console never touches the store; every call goes over gRPC
//! - gRPC status codes surface as HTTP statuses (see [`ConsoleError`])

mod error;
pub mod methods;
pub mod reflection;
pub mod server;

pub use error::ConsoleError;
pub use server::{dial, Console, ConsoleListener};
