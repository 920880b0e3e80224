//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind the single gateway port)
//!     → mux.rs (accept loop, per-connection classification)
//!         → matcher.rs (rules over the leading bytes)
//!         → connection.rs (ids, pending-classification tracking)
//!     → stream.rs (prefix replay)
//!     → VirtualListener → gRPC server | HTTP console
//! ```
//!
//! # Design Decisions
//! - Bounded pending-classification count prevents resource exhaustion
//! - Classified bytes are replayed, never re-requested from the client
//! - Each virtual listener is a bounded channel, not a lock

pub mod connection;
pub mod listener;
pub mod matcher;
pub mod mux;
pub mod stream;

pub use connection::{ConnectionId, ConnectionTracker};
pub use matcher::{Decision, Matcher};
pub use mux::{Mux, MuxError, MuxHandle, VirtualListener};
pub use stream::{MuxConnectInfo, MuxedStream};
