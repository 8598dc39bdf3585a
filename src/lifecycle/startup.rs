//! Startup orchestration.
//!
//! # Responsibilities
//! - Master: run pre-fork initializers, spawn and supervise workers
//! - Worker: assemble the middleware pipeline, bind listeners, report ready,
//!   load modules, emit `start`, then open the readiness gate
//! - Map any startup failure to exit status 1 at the binary entry point
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and returned to the caller
//! - Listeners bind before modules load; the gate answers 503 meanwhile
//! - Worker stdout carries IPC only; logs go to stderr

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::cluster::ipc::{IpcMessage, IpcReader, IpcWriter};
use crate::cluster::spawner::ProcessSpawner;
use crate::cluster::supervisor::{Supervisor, SupervisorConfig};
use crate::config::{Environment, ServerConfig};
use crate::context::{AppContext, WorkerApp};
use crate::error::{BootstrapError, BoxError};
use crate::http::server::{BoundServer, RunningServer};
use crate::lifecycle::fault::install_fault_handler;
use crate::lifecycle::privilege::{drop_privileges, OsPrivileges, PrivilegeDropper};
use crate::lifecycle::role::{is_test_runner, ExecutionMode, ProcessRole};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::termination;
use crate::lifecycle::title::{current_title, set_process_title};
use crate::modules::{load_modules, Module, ModuleCatalog};
use crate::pipeline::{standard_pipeline, AppBuilder, ExtensionPoint, HookFuture, Hooks};

type Initializer = Box<dyn FnOnce(Arc<ServerConfig>) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// How a worker was started.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerOptions {
    pub id: usize,
    pub test_runner: bool,
    pub mode: ExecutionMode,
}

impl WorkerOptions {
    /// Options for the current process, read from the environment.
    pub fn detect(id: usize) -> Self {
        Self {
            id,
            test_runner: is_test_runner(),
            mode: ExecutionMode::detect(),
        }
    }
}

/// Application bootstrap: configuration, hooks, modules and initializers.
///
/// ```ignore
/// let code = Bootstrap::new(config)
///     .module("auth", || AuthModule::default())
///     .hook(ExtensionPoint::ConfigureCache, |_app| Box::pin(async { Ok(StageOutcome::Skip) }))
///     .run()
///     .await;
/// std::process::exit(code);
/// ```
pub struct Bootstrap {
    config: Arc<ServerConfig>,
    hooks: Hooks,
    catalog: ModuleCatalog,
    initializers: Vec<(String, Initializer)>,
    privileges: Arc<dyn PrivilegeDropper>,
}

impl Bootstrap {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            hooks: Hooks::new(),
            catalog: ModuleCatalog::new(),
            initializers: Vec::new(),
            privileges: Arc::new(OsPrivileges),
        }
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    /// Attach a hook to an extension point.
    pub fn hook<F>(mut self, point: ExtensionPoint, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut AppBuilder) -> HookFuture<'a> + Send + Sync + 'static,
    {
        self.hooks.on(point, hook);
        self
    }

    /// Make a module available under `name`.
    pub fn module<F, M>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: Module + 'static,
    {
        self.catalog.register(name, factory);
        self
    }

    /// Run `init` in the master before any worker is spawned.
    ///
    /// Skipped in the `down` environment.
    pub fn before_fork<F, Fut>(mut self, name: &str, init: F) -> Self
    where
        F: FnOnce(Arc<ServerConfig>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.initializers
            .push((name.to_string(), Box::new(move |config| init(config).boxed())));
        self
    }

    /// Replace how process credentials are switched.
    pub fn privileges(mut self, privileges: Arc<dyn PrivilegeDropper>) -> Self {
        self.privileges = privileges;
        self
    }

    /// Run as master or worker, depending on the environment, and return the
    /// process exit status.
    pub async fn run(self) -> i32 {
        let role = ProcessRole::detect();
        let result = match role {
            ProcessRole::Master => self.run_master(ExecutionMode::detect()).await,
            ProcessRole::Worker { id } => self.run_worker(WorkerOptions::detect(id)).await,
        };
        match result {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(severity = "critical", %role, error = %e, "Startup failed");
                1
            }
        }
    }

    /// Master flow. Returns once the supervisor stops.
    pub async fn run_master(self, mode: ExecutionMode) -> Result<i32, BootstrapError> {
        set_process_title(&current_title(&self.config.app.master_title));
        install_fault_handler(ProcessRole::Master, mode);

        let signals = termination()?;
        run_initializers(&self.config, self.initializers).await?;

        let spawner = ProcessSpawner::current_exe().map_err(BootstrapError::Spawn)?;
        let mut supervisor = Supervisor::new(
            spawner,
            self.privileges,
            SupervisorConfig::from_config(&self.config, mode),
        );
        supervisor.start_all()?;
        tracing::info!(
            workers = supervisor.live_workers(),
            environment = %self.config.environment,
            "Master started"
        );

        let status = supervisor
            .run(async move {
                signals.await;
            })
            .await;
        tracing::info!(status, "Master exiting");
        Ok(status)
    }

    /// Worker flow, wired to the master over stdin/stdout.
    pub async fn run_worker(self, options: WorkerOptions) -> Result<i32, BootstrapError> {
        let signals = termination()?;
        let (parent_tx, parent_rx) = mpsc::unbounded_channel();
        tokio::spawn(report_to_master(parent_rx));

        let worker = self.start_worker(options, parent_tx).await?;

        let shutdown = worker.shutdown_handle();
        tokio::spawn(watch_master(shutdown.clone()));
        tokio::spawn(async move {
            signals.await;
            shutdown.trigger();
        });

        match worker.wait().await {
            Ok(()) => Ok(0),
            Err(e) => {
                tracing::error!(worker = options.id, error = %e, "Server failed");
                Ok(1)
            }
        }
    }

    /// Assemble, bind and start a worker.
    ///
    /// `Ready` and exit requests are sent on `parent`. On error every
    /// listener already bound is closed.
    pub async fn start_worker(
        self,
        options: WorkerOptions,
        parent: mpsc::UnboundedSender<IpcMessage>,
    ) -> Result<RunningWorker, BootstrapError> {
        let started_at = Instant::now();
        let role = ProcessRole::Worker { id: options.id };
        set_process_title(&current_title(&self.config.app.worker_title));
        install_fault_handler(role, options.mode);

        let context = AppContext::new(self.config.clone());
        let hooks = Arc::new(self.hooks);
        let mut builder = AppBuilder::new(context.clone());
        let report = standard_pipeline(hooks.clone()).run(&mut builder).await?;
        tracing::debug!(skipped = ?report.skipped, "Middleware pipeline assembled");
        let router = builder.build();

        let bound = BoundServer::bind(&self.config.server).await?;
        let tls = bound.is_tls();
        let shutdown = Shutdown::new();
        let server = bound.serve(router, &shutdown)?;

        let app = WorkerApp::new(context.clone())
            .with_worker_id(options.id)
            .with_test_runner(options.test_runner)
            .with_parent(parent.clone());

        let startup = async {
            if self.config.drops_privileges() && !options.mode.is_test() {
                if let Some(user) = &self.config.app.user {
                    drop_privileges(self.privileges.as_ref(), user)?;
                }
            }
            if parent.send(IpcMessage::Ready).is_err() {
                tracing::debug!(worker = options.id, "No master to report ready to");
            }

            load_modules(self.config.active_modules(), &self.catalog, &app).await?;

            hooks
                .emit(ExtensionPoint::Start, &mut builder)
                .await
                .map_err(|source| BootstrapError::Start {
                    point: ExtensionPoint::Start.as_str(),
                    source,
                })?;
            Ok::<(), BootstrapError>(())
        };

        if let Err(e) = startup.await {
            server.close();
            return Err(e);
        }

        context.mark_started();
        tracing::info!(
            worker = options.id,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Startup complete"
        );
        tracing::info!(url = %server_url(&self.config, tls, server.app_addrs()), "Server listening");

        Ok(RunningWorker {
            app,
            server,
            shutdown,
        })
    }
}

impl std::fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrap")
            .field("environment", &self.config.environment)
            .field("hooks", &self.hooks)
            .field("catalog", &self.catalog)
            .field("initializers", &self.initializers.len())
            .finish()
    }
}

async fn run_initializers(
    config: &Arc<ServerConfig>,
    initializers: Vec<(String, Initializer)>,
) -> Result<(), BootstrapError> {
    if config.environment == Environment::Down {
        tracing::info!(skipped = initializers.len(), "Environment down: pre-fork initializers skipped");
        return Ok(());
    }
    for (name, init) in initializers {
        tracing::info!(initializer = %name, "Running pre-fork initializer");
        init(config.clone())
            .await
            .map_err(|source| BootstrapError::Initializer { name, source })?;
    }
    Ok(())
}

fn server_url(config: &ServerConfig, tls: bool, addrs: &[SocketAddr]) -> String {
    if tls {
        return format!("https://{}", config.server.host);
    }
    match addrs.first() {
        Some(addr) => format!("http://{addr}"),
        None => format!("http://{}", config.server.host),
    }
}

/// Forward queued messages to the master on stdout.
async fn report_to_master(mut outbox: mpsc::UnboundedReceiver<IpcMessage>) {
    let mut writer = IpcWriter::new(tokio::io::stdout());
    while let Some(message) = outbox.recv().await {
        if let Err(e) = writer.send(message).await {
            tracing::warn!(error = %e, "Failed to write to master");
            break;
        }
    }
}

/// Close the listeners when the master asks to exit or goes away.
async fn watch_master(shutdown: Shutdown) {
    let mut reader = IpcReader::new(tokio::io::stdin());
    loop {
        match reader.next_message().await {
            Ok(Some(IpcMessage::Exit { status })) => {
                tracing::info!(status = ?status, "Exit requested by master");
                break;
            }
            Ok(Some(message)) => tracing::debug!(?message, "Ignoring message from master"),
            Ok(None) => {
                tracing::info!("Master channel closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Master channel failed");
                break;
            }
        }
    }
    shutdown.trigger();
}

/// A started worker.
pub struct RunningWorker {
    app: WorkerApp,
    server: RunningServer,
    shutdown: Shutdown,
}

impl RunningWorker {
    pub fn app(&self) -> &WorkerApp {
        &self.app
    }

    pub fn addrs(&self) -> &[SocketAddr] {
        self.server.app_addrs()
    }

    /// Handle that closes the listeners when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn close(&self) {
        self.server.close();
    }

    /// Wait until every listener has closed.
    pub async fn wait(self) -> io::Result<()> {
        self.server.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_initializers_run_in_order() {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (a, b) = (calls.clone(), calls.clone());
        let bootstrap = Bootstrap::new(ServerConfig::default())
            .before_fork("db", move |_| async move {
                a.lock().unwrap().push("db");
                Ok::<(), BoxError>(())
            })
            .before_fork("cache", move |_| async move {
                b.lock().unwrap().push("cache");
                Ok::<(), BoxError>(())
            });

        run_initializers(&bootstrap.config, bootstrap.initializers).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["db", "cache"]);
    }

    #[tokio::test]
    async fn test_initializer_failure_names_it() {
        let bootstrap = Bootstrap::new(ServerConfig::default())
            .before_fork("db", |_| async { Err::<(), BoxError>("unreachable".into()) });
        let err = run_initializers(&bootstrap.config, bootstrap.initializers)
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::Initializer { ref name, .. } if name == "db"));
    }

    #[tokio::test]
    async fn test_down_environment_skips_initializers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut config = ServerConfig::default();
        config.environment = Environment::Down;
        let bootstrap = Bootstrap::new(config).before_fork("db", move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        });

        run_initializers(&bootstrap.config, bootstrap.initializers).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_server_url() {
        let config = ServerConfig::default();
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(server_url(&config, false, &[addr]), "http://127.0.0.1:8080");
        assert_eq!(server_url(&config, true, &[addr]), "https://localhost:8443");
    }
}
