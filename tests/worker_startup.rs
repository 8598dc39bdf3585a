//! Worker startup against real listeners.

use std::sync::Arc;
use std::time::Duration;

use app_bootstrap::cluster::IpcMessage;
use app_bootstrap::config::{StaticEntry, StaticRoute};
use app_bootstrap::{Bootstrap, BoxError, ExtensionPoint, Module, StageOutcome, WorkerApp};
use async_trait::async_trait;
use axum::routing::get;
use tokio::sync::{mpsc, Notify};

mod common;

/// Adds `/hello` during init, then waits to be released.
struct Greeter {
    release: Arc<Notify>,
}

#[async_trait]
impl Module for Greeter {
    fn name(&self) -> &str {
        "greeter"
    }

    async fn init(&self, app: &WorkerApp) -> Result<(), BoxError> {
        app.route("/hello", get(|| async { "hello" }))?;
        self.release.notified().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_gate_holds_requests_until_modules_load() {
    let port = 28301;
    let assets = tempfile::tempdir().unwrap();
    std::fs::write(assets.path().join("app.js"), "console.log(1)").unwrap();

    let mut config = common::config_on(port);
    config.modules = vec!["greeter".to_string()];
    config.server.static_routes = vec![StaticEntry::Route(StaticRoute {
        route: "/assets".to_string(),
        path: assets.path().to_path_buf(),
        file: false,
        cors: None,
    })];

    let release = Arc::new(Notify::new());
    let module_release = release.clone();
    let bootstrap = Bootstrap::new(config).module("greeter", move || Greeter {
        release: module_release.clone(),
    });

    let (parent_tx, mut parent_rx) = mpsc::unbounded_channel();
    let startup = tokio::spawn(bootstrap.start_worker(common::worker_options(), parent_tx));

    // listeners are up, the gate is closed
    let url = format!("http://127.0.0.1:{port}");
    common::wait_for_status(&format!("{url}/hello"), 503).await;
    assert_eq!(parent_rx.recv().await, Some(IpcMessage::Ready));

    release.notify_one();
    let worker = common::unwrap_startup(startup.await.unwrap());
    assert!(worker.app().context().is_started());
    assert!(worker.app().context().is_loaded("greeter"));

    let client = common::client();
    let res = client.get(format!("{url}/hello")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["cache-control"], "no-cache, no-store, must-revalidate");
    assert_eq!(res.headers()["pragma"], "no-cache");
    assert_eq!(res.headers()["expires"], "0");
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "hello");

    let res = client.get(format!("{url}/assets/app.js")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(!res.headers().contains_key("cache-control"));
    assert_eq!(res.text().await.unwrap(), "console.log(1)");

    let res = client.get(format!("{url}/missing")).send().await.unwrap();
    assert_eq!(res.status(), 404);

    worker.close();
    tokio::time::timeout(Duration::from_secs(5), worker.wait())
        .await
        .expect("listeners close")
        .unwrap();
}

#[tokio::test]
async fn test_veto_and_start_hook() {
    let port = 28302;
    let config = common::config_on(port);

    let bootstrap = Bootstrap::new(config)
        .hook(ExtensionPoint::ConfigureCache, |_app| {
            Box::pin(async { Ok(StageOutcome::Skip) })
        })
        .hook(ExtensionPoint::ConfigureRoutes, |app| {
            let added = app.route("/ping", get(|| async { "pong" })).map(|_| ());
            Box::pin(async move {
                added?;
                Ok(StageOutcome::Continue)
            })
        })
        .hook(ExtensionPoint::Start, |app| {
            let context = app.context().clone();
            Box::pin(async move {
                assert!(!context.is_started());
                context.routes().route("/late", get(|| async { "late" }))?;
                Ok(StageOutcome::Continue)
            })
        });

    let (parent_tx, _parent_rx) = mpsc::unbounded_channel();
    let worker = common::unwrap_startup(
        bootstrap
            .start_worker(common::worker_options(), parent_tx)
            .await,
    );

    let client = common::client();
    let url = format!("http://127.0.0.1:{port}");
    let res = client.get(format!("{url}/ping")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(!res.headers().contains_key("cache-control"));

    let res = client.get(format!("{url}/late")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "late");

    worker.close();
    worker.wait().await.unwrap();
}

/// Asks the cluster to exit from its init.
struct Quitter;

#[async_trait]
impl Module for Quitter {
    fn name(&self) -> &str {
        "quitter"
    }

    async fn init(&self, app: &WorkerApp) -> Result<(), BoxError> {
        app.request_cluster_exit(3);
        Ok(())
    }
}

#[tokio::test]
async fn test_module_exit_request_reaches_master() {
    let mut config = common::config_on(28303);
    config.modules = vec!["quitter".to_string()];

    let bootstrap = Bootstrap::new(config).module("quitter", || Quitter);
    let (parent_tx, mut parent_rx) = mpsc::unbounded_channel();
    let worker = common::unwrap_startup(
        bootstrap
            .start_worker(common::worker_options(), parent_tx)
            .await,
    );

    assert_eq!(parent_rx.recv().await, Some(IpcMessage::Ready));
    assert_eq!(
        parent_rx.recv().await,
        Some(IpcMessage::Exit { status: Some(3) })
    );

    worker.close();
    worker.wait().await.unwrap();
}
