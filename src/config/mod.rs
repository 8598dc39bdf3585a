//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! --config files (TOML, repeatable)
//!     → loader.rs (parse, deep-merge layers, deserialize)
//!     → validation.rs (semantic checks)
//!     → CLI overrides (main.rs)
//!     → ServerConfig (validated, immutable)
//!     → shared via Arc to master, pipeline, loader
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_layered, ConfigError};
pub use schema::{
    AppConfig, CorsPolicy, Environment, LoggingConfig, RateLimitConfig, ServerConfig,
    ServerSection, SessionConfig, StaticEntry, StaticRoute, TlsConfig, UserConfig,
};
pub use validation::{validate_config, ValidationError};
