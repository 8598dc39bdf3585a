//! Startup-fatal error taxonomy.

use thiserror::Error;

use crate::cluster::ipc::IpcError;
use crate::config::ConfigError;
use crate::lifecycle::privilege::PrivilegeError;
use crate::modules::ModuleError;
use crate::pipeline::PipelineError;

/// Boxed error for failures raised by user-supplied hooks, modules and initializers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that abort a master or worker startup.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Logging init failed: {0}")]
    Logging(String),

    #[error("Initializer '{name}' failed: {source}")]
    Initializer {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS setup failed: {0}")]
    Tls(#[source] std::io::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error("Startup aborted by '{point}' hook: {source}")]
    Start {
        point: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("Failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}
