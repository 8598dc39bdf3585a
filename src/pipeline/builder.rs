//! Application router assembly.
//!
//! Stages and hooks register named layers on an `AppBuilder`; `build` turns
//! them into one `axum::Router`.
//!
//! Layer order: registration order is request order. The first registered
//! layer sees the request first. Error layers wrap the whole regular stack;
//! among them the first registered is innermost.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::IntoResponse;
use axum::routing::{MethodRouter, Route};
use axum::Router;
use tower::{Layer, Service};

use crate::config::ServerConfig;
use crate::context::AppContext;
use crate::http::routes::RouteError;

type ApplyLayer = Box<dyn FnOnce(Router) -> Router + Send>;

struct NamedLayer {
    name: String,
    apply: ApplyLayer,
}

impl NamedLayer {
    fn new<L>(name: String, layer: L) -> Self
    where
        L: Layer<Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request>>::Response: IntoResponse + 'static,
        <L::Service as Service<Request>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        Self {
            name,
            apply: Box::new(move |router: Router| router.layer(layer)),
        }
    }
}

/// Mutable application under construction.
pub struct AppBuilder {
    context: AppContext,
    layers: Vec<NamedLayer>,
    error_layers: Vec<NamedLayer>,
    router: Option<Router>,
    built: bool,
}

impl AppBuilder {
    pub fn new(context: AppContext) -> Self {
        Self {
            context,
            layers: Vec::new(),
            error_layers: Vec::new(),
            router: None,
            built: false,
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        self.context.config()
    }

    /// Add a middleware layer after every layer registered so far.
    pub fn layer<L>(&mut self, name: impl Into<String>, layer: L) -> &mut Self
    where
        L: Layer<Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request>>::Response: IntoResponse + 'static,
        <L::Service as Service<Request>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        let name = name.into();
        if self.built {
            tracing::warn!(layer = %name, "Layer added after the app was built, ignored");
            return self;
        }
        tracing::trace!(layer = %name, "Layer registered");
        self.layers.push(NamedLayer::new(name, layer));
        self
    }

    /// Add an error-handling layer outside the regular stack.
    pub fn error_layer<L>(&mut self, name: impl Into<String>, layer: L) -> &mut Self
    where
        L: Layer<Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request>>::Response: IntoResponse + 'static,
        <L::Service as Service<Request>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        let name = name.into();
        if self.built {
            tracing::warn!(layer = %name, "Error layer added after the app was built, ignored");
            return self;
        }
        self.error_layers.push(NamedLayer::new(name, layer));
        self
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name.as_str()).collect()
    }

    pub fn error_layer_names(&self) -> Vec<&str> {
        self.error_layers.iter().map(|l| l.name.as_str()).collect()
    }

    /// Attach the context's dynamic route table as the app router.
    pub fn attach_router(&mut self) -> &mut Self {
        self.router = Some(self.context.routes().dispatcher());
        self
    }

    /// Use `router` in place of the dynamic route table.
    pub fn set_router(&mut self, router: Router) -> &mut Self {
        self.router = Some(router);
        self
    }

    pub fn has_router(&self) -> bool {
        self.router.is_some()
    }

    /// Register a route in the context's dynamic table.
    pub fn route(&mut self, path: &str, method_router: MethodRouter) -> Result<&mut Self, RouteError> {
        self.context.routes().route(path, method_router)?;
        Ok(self)
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Assemble the router. Later calls return an app without layers.
    pub fn build(&mut self) -> Router {
        if self.built {
            tracing::warn!("App built twice");
        }
        self.built = true;

        let mut app = self.router.take().unwrap_or_default();
        for layer in std::mem::take(&mut self.layers).into_iter().rev() {
            app = (layer.apply)(app);
        }
        for layer in std::mem::take(&mut self.error_layers) {
            app = (layer.apply)(app);
        }
        app
    }
}

impl std::fmt::Debug for AppBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppBuilder")
            .field("layers", &self.layer_names())
            .field("error_layers", &self.error_layer_names())
            .field("router", &self.router.is_some())
            .field("built", &self.built)
            .finish()
    }
}
