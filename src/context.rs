//! Per-worker application context.
//!
//! `AppContext` is the explicit state the request path and the module loader
//! share: the readiness flag, the module registry, dynamic routes, early
//! request handlers and error handlers. `WorkerApp` is what modules see
//! during init.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::extract::Request;
use axum::response::Response;
use axum::routing::MethodRouter;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::cluster::ipc::IpcMessage;
use crate::config::ServerConfig;
use crate::http::early::{self, EarlyHandler, EarlyOutcome};
use crate::http::errors::{ErrorHandler, HttpError, RequestInfo};
use crate::http::routes::{DynamicRoutes, RouteError};
use crate::modules::Module;

struct ModuleEntry {
    module: Arc<dyn Module>,
    loaded: bool,
}

struct Inner {
    config: Arc<ServerConfig>,
    started: AtomicBool,
    modules: DashMap<String, ModuleEntry>,
    routes: DynamicRoutes,
    early_handlers: ArcSwap<Vec<EarlyHandler>>,
    error_handlers: ArcSwap<Vec<ErrorHandler>>,
}

/// Shared worker state. Cheap to clone.
#[derive(Clone)]
pub struct AppContext {
    inner: Arc<Inner>,
}

impl AppContext {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                started: AtomicBool::new(false),
                modules: DashMap::new(),
                routes: DynamicRoutes::new(),
                early_handlers: ArcSwap::from_pointee(Vec::new()),
                error_handlers: ArcSwap::from_pointee(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.inner.config
    }

    /// Open the readiness gate. Returns false if it was already open.
    pub fn mark_started(&self) -> bool {
        !self.inner.started.swap(true, Ordering::AcqRel)
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Record a module under its own name, replacing any previous entry.
    pub fn register_module(&self, module: Arc<dyn Module>) -> Option<Arc<dyn Module>> {
        let name = module.name().to_string();
        self.inner
            .modules
            .insert(name, ModuleEntry { module, loaded: false })
            .map(|previous| previous.module)
    }

    pub(crate) fn mark_loaded(&self, name: &str) {
        if let Some(mut entry) = self.inner.modules.get_mut(name) {
            entry.loaded = true;
        }
    }

    /// A registered module by name.
    pub fn module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.inner.modules.get(name).map(|entry| entry.module.clone())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.inner.modules.get(name).map_or(false, |entry| entry.loaded)
    }

    /// Registered module names with their loaded flags, sorted by name.
    pub fn modules(&self) -> BTreeMap<String, bool> {
        self.inner
            .modules
            .iter()
            .map(|entry| (entry.key().clone(), entry.loaded))
            .collect()
    }

    pub fn routes(&self) -> &DynamicRoutes {
        &self.inner.routes
    }

    /// Add a request handler run ahead of static content and routes.
    pub fn add_early_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EarlyOutcome> + Send + 'static,
    {
        let handler = early::boxed(handler);
        self.inner.early_handlers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(handler.clone());
            next
        });
    }

    pub fn early_handlers(&self) -> Arc<Vec<EarlyHandler>> {
        self.inner.early_handlers.load_full()
    }

    /// Add an error handler; handlers run in registration order.
    pub fn add_error_handler<F>(&self, handler: F)
    where
        F: Fn(&HttpError, &RequestInfo) -> Option<Response> + Send + Sync + 'static,
    {
        let handler: ErrorHandler = Arc::new(handler);
        self.inner.error_handlers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(handler.clone());
            next
        });
    }

    pub fn error_handlers(&self) -> Arc<Vec<ErrorHandler>> {
        self.inner.error_handlers.load_full()
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("started", &self.is_started())
            .field("modules", &self.modules())
            .field("early_handlers", &self.inner.early_handlers.load().len())
            .field("error_handlers", &self.inner.error_handlers.load().len())
            .finish()
    }
}

/// The running worker, as handed to module init.
#[derive(Debug, Clone)]
pub struct WorkerApp {
    context: AppContext,
    worker_id: usize,
    test_runner: bool,
    parent: Option<mpsc::UnboundedSender<IpcMessage>>,
}

impl WorkerApp {
    pub fn new(context: AppContext) -> Self {
        Self {
            context,
            worker_id: 0,
            test_runner: false,
            parent: None,
        }
    }

    pub fn with_worker_id(mut self, id: usize) -> Self {
        self.worker_id = id;
        self
    }

    pub fn with_test_runner(mut self, test_runner: bool) -> Self {
        self.test_runner = test_runner;
        self
    }

    /// Channel to the master process.
    pub fn with_parent(mut self, parent: mpsc::UnboundedSender<IpcMessage>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        self.context.config()
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn is_test_runner(&self) -> bool {
        self.test_runner
    }

    /// Add a route, live on every listener immediately.
    pub fn route(&self, path: &str, method_router: MethodRouter) -> Result<(), RouteError> {
        self.context.routes().route(path, method_router)
    }

    /// Ask the master to stop the whole cluster with `status`.
    ///
    /// Returns false when there is no master to tell.
    pub fn request_cluster_exit(&self, status: i32) -> bool {
        let sent = self
            .parent
            .as_ref()
            .map_or(false, |parent| parent.send(IpcMessage::Exit { status: Some(status) }).is_ok());
        if sent {
            tracing::info!(worker = self.worker_id, status, "Requested cluster exit");
        } else {
            tracing::warn!(worker = self.worker_id, status, "No master to request exit from");
        }
        sent
    }
}
