//! OS signal handling.
//!
//! # Responsibilities
//! - Register termination handlers (SIGTERM, SIGINT)
//! - Resolve once a termination signal arrives so the caller can exit cleanly
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Handlers are registered eagerly so a signal arriving during startup is not lost

use std::future::Future;

use crate::error::BootstrapError;

/// Register termination handlers and return a future resolving on the first signal.
#[cfg(unix)]
pub fn termination() -> Result<impl Future<Output = &'static str> + Send, BootstrapError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).map_err(BootstrapError::Signal)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(BootstrapError::Signal)?;

    Ok(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::info!(signal = name, "Termination signal received");
        name
    })
}

/// Register termination handlers and return a future resolving on the first signal.
#[cfg(not(unix))]
pub fn termination() -> Result<impl Future<Output = &'static str> + Send, BootstrapError> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        tracing::info!(signal = "ctrl-c", "Termination signal received");
        "ctrl-c"
    })
}
