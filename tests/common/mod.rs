//! Shared utilities for worker integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use app_bootstrap::{BootstrapError, BoxError, Module, WorkerApp};
use app_bootstrap::config::ServerConfig;
use app_bootstrap::lifecycle::ExecutionMode;
use app_bootstrap::WorkerOptions;
use async_trait::async_trait;
use tokio::sync::Notify;

/// Development config serving plain HTTP on `127.0.0.1:<port>`.
pub fn config_on(port: u16) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.bind_addr = vec!["127.0.0.1".to_string()];
    config.server.port = port;
    config.logging.silent = true;
    config
}

/// Test-mode options: no fatal panic hook, no privilege switch.
pub fn worker_options() -> WorkerOptions {
    WorkerOptions {
        id: 1,
        test_runner: true,
        mode: ExecutionMode::Test,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Poll `url` until it answers with `status`.
pub async fn wait_for_status(url: &str, status: u16) -> reqwest::Response {
    let client = client();
    for _ in 0..100 {
        if let Ok(res) = client.get(url).send().await {
            if res.status().as_u16() == status {
                return res;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{url} never answered {status}");
}

/// Module whose init blocks until released.
pub struct Gated {
    pub name: &'static str,
    pub release: Arc<Notify>,
}

#[async_trait]
impl Module for Gated {
    fn name(&self) -> &str {
        self.name
    }

    async fn init(&self, _app: &WorkerApp) -> Result<(), BoxError> {
        self.release.notified().await;
        Ok(())
    }
}

/// Module whose init fails.
pub struct Failing {
    pub name: &'static str,
}

#[derive(Debug, thiserror::Error)]
#[error("database unreachable")]
pub struct Unreachable;

#[async_trait]
impl Module for Failing {
    fn name(&self) -> &str {
        self.name
    }

    async fn init(&self, _app: &WorkerApp) -> Result<(), BoxError> {
        Err(Box::new(Unreachable))
    }
}

pub fn unwrap_startup<T>(result: Result<T, BootstrapError>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("startup failed: {e}"),
    }
}
