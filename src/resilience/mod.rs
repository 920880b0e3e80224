//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Startup self-dial (console → own port):
//!     → backoff.rs (retry with exponential delay until the dial deadline)
//!
//! Router accept loop:
//!     → transient accept error → backoff.rs delay → accept again
//! ```
//!
//! # Design Decisions
//! - Every retry loop has a deadline or a cap; nothing retries forever
//! - Jitter keeps concurrent retries from synchronizing

pub mod backoff;
