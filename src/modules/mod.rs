//! Pluggable worker modules.
//!
//! # Data Flow
//! ```text
//! config.active_modules() (names)
//!     → resolve_path (rooted names kept, others under the default directory)
//!     → ModuleCatalog lookup (path → factory)
//!     → AppContext::register_module (keyed by Module::name, last wins)
//!     → Module::init, one at a time, in configured order
//!     → AppContext::mark_loaded
//! ```
//!
//! # Design Decisions
//! - Modules are compiled in and registered in an explicit catalog
//! - Every name resolves and registers before the first init runs
//! - A failed init stops the sequence; registered modules stay registered

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::context::WorkerApp;
use crate::error::BoxError;
use crate::observability::metrics;

/// Directory prefix for module names that are not rooted.
pub const DEFAULT_MODULE_DIR: &str = "/modules";

/// A unit of application functionality loaded by name.
#[async_trait]
pub trait Module: Send + Sync {
    /// Registry key.
    fn name(&self) -> &str;

    /// Called once per worker, after the listeners are bound.
    async fn init(&self, app: &WorkerApp) -> Result<(), BoxError>;
}

/// Module loading failures.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Unknown module '{name}' (resolved to '{path}')")]
    NotFound { name: String, path: String },

    #[error("Error initializing module '{module}': {source}")]
    Init {
        module: String,
        #[source]
        source: BoxError,
    },
}

impl ModuleError {
    /// Name of the module that failed to initialize.
    pub fn module(&self) -> Option<&str> {
        match self {
            ModuleError::Init { module, .. } => Some(module),
            ModuleError::NotFound { .. } => None,
        }
    }
}

type Factory = Arc<dyn Fn() -> Arc<dyn Module> + Send + Sync>;

/// Resolved module path → constructor.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: HashMap<String, Factory>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `name` (resolved like configured names).
    pub fn register<F, M>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: Module + 'static,
    {
        let factory: Factory = Arc::new(move || Arc::new(factory()) as Arc<dyn Module>);
        self.factories.insert(resolve_path(name), factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&resolve_path(name))
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    fn instantiate(&self, name: &str) -> Result<Arc<dyn Module>, ModuleError> {
        let path = resolve_path(name);
        match self.factories.get(&path) {
            Some(factory) => Ok(factory()),
            None => Err(ModuleError::NotFound {
                name: name.to_string(),
                path,
            }),
        }
    }
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<&String> = self.factories.keys().collect();
        paths.sort();
        f.debug_struct("ModuleCatalog").field("modules", &paths).finish()
    }
}

/// Module path for a configured name.
pub fn resolve_path(name: &str) -> String {
    if name.starts_with('/') {
        normalize(name)
    } else {
        normalize(&format!("{DEFAULT_MODULE_DIR}/{name}"))
    }
}

fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Resolve, register and initialize `names` in order.
pub async fn load_modules(
    names: &[String],
    catalog: &ModuleCatalog,
    app: &WorkerApp,
) -> Result<(), ModuleError> {
    let context = app.context();

    let mut resolved = Vec::with_capacity(names.len());
    for name in names {
        tracing::info!(module = %name, path = %resolve_path(name), "Loading module");
        let module = catalog.instantiate(name)?;
        tracing::debug!(module = %name, registered_as = %module.name(), "Module loaded");
        if context.register_module(module.clone()).is_some() {
            tracing::debug!(module = %module.name(), "Module replaced an earlier registration");
        }
        resolved.push(module);
    }

    for module in resolved {
        let name = module.name().to_string();
        tracing::info!(module = %name, "Initializing module");
        module.init(app).await.map_err(|source| ModuleError::Init {
            module: name.clone(),
            source,
        })?;
        context.mark_loaded(&name);
        metrics::record_module_initialized(&name);
        tracing::debug!(module = %name, "Module initialized");
    }
    Ok(())
}
