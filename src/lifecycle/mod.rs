//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Bind → Router serving → gRPC server → Console self-dial → Console serving
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Close router → Drain servers → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: traffic reaches a server only after it is serving
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: servers that do not drain are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::{start, RunningGateway, StartupError};
