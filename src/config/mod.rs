//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, defaults for missing fields)
//!     → loader.rs (environment overrides: PORT, POSTGRES_URL, LOG_LEVEL)
//!     → command-line overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env, finalize, load_config, read_config, ConfigError};
pub use schema::{
    ConsoleConfig, DatabaseConfig, GatewayConfig, ListenerConfig, LogFormat, MuxConfig,
    ObservabilityConfig, RpcConfig, StoreBackend,
};
pub use validation::ValidationError;
