//! Clustered application bootstrap on axum.
//!
//! A master process spawns and supervises workers; each worker assembles a
//! fixed middleware pipeline, binds its listeners, loads the configured
//! modules and only then opens its readiness gate.

pub mod cluster;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod modules;
pub mod net;
pub mod observability;
pub mod pipeline;

pub use config::ServerConfig;
pub use context::{AppContext, WorkerApp};
pub use error::{BootstrapError, BoxError};
pub use http::HttpError;
pub use lifecycle::{Bootstrap, RunningWorker, Shutdown, WorkerOptions};
pub use modules::{Module, ModuleCatalog, ModuleError};
pub use pipeline::{AppBuilder, ExtensionPoint, Hooks, StageOutcome};
