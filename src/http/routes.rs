//! Routes that can be added while the listeners are already serving.
//!
//! The application router ends in a fallback that dispatches into the
//! current `DynamicRoutes` snapshot. Adding a route swaps in a new snapshot;
//! in-flight requests keep the one they started with.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::MethodRouter;
use axum::Router;
use thiserror::Error;
use tower::ServiceExt;

use crate::lifecycle::fault::{panic_message, recoverable};

/// A route the table refused.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Route path '{0}' must start with '/'")]
    InvalidPath(String),

    #[error("Route '{path}' rejected: {reason}")]
    Rejected { path: String, reason: String },

    #[error("Router merge rejected: {0}")]
    Merge(String),
}

/// Swappable route table.
#[derive(Clone)]
pub struct DynamicRoutes {
    router: Arc<ArcSwap<Router>>,
}

impl DynamicRoutes {
    pub fn new() -> Self {
        Self {
            router: Arc::new(ArcSwap::from_pointee(Router::new())),
        }
    }

    /// Add a route. A conflicting or malformed path leaves the table as it was.
    pub fn route(&self, path: &str, method_router: MethodRouter) -> Result<(), RouteError> {
        if !path.starts_with('/') {
            return Err(RouteError::InvalidPath(path.to_string()));
        }
        self.update(|router| router.route(path, method_router.clone()))
            .map_err(|reason| RouteError::Rejected {
                path: path.to_string(),
                reason,
            })?;
        tracing::debug!(path = %path, "Route added");
        Ok(())
    }

    /// Merge a whole router into the table.
    pub fn merge(&self, router: Router) -> Result<(), RouteError> {
        self.update(|current| current.merge(router.clone()))
            .map_err(RouteError::Merge)
    }

    /// The current route table.
    pub fn current(&self) -> Router {
        Router::clone(&self.router.load())
    }

    /// A router that forwards every request to the current table.
    pub fn dispatcher(&self) -> Router {
        Router::new().fallback(dispatch).with_state(self.clone())
    }

    // axum reports route conflicts by panicking; the panic text is the error
    fn update<F>(&self, apply: F) -> Result<(), String>
    where
        F: Fn(Router) -> Router,
    {
        let mut current = self.router.load_full();
        loop {
            let next = recoverable(|| {
                panic::catch_unwind(AssertUnwindSafe(|| apply(Router::clone(&current))))
            })
            .map_err(|payload| panic_message(payload.as_ref()))?;

            let previous = self.router.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&previous, &current) {
                return Ok(());
            }
            current = Guard::into_inner(previous);
        }
    }
}

impl Default for DynamicRoutes {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch(State(routes): State<DynamicRoutes>, request: Request) -> Response {
    match routes.current().oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;

    fn get_request(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_routes_added_after_dispatcher_is_built_are_served() {
        let routes = DynamicRoutes::new();
        let app = routes.dispatcher();

        let missing = app.clone().oneshot(get_request("/late")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        routes.route("/late", get(|| async { "here" })).unwrap();
        let found = app.oneshot(get_request("/late")).await.unwrap();
        assert_eq!(found.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_merge_adds_every_route() {
        let routes = DynamicRoutes::new();
        routes.merge(
            Router::new()
                .route("/a", get(|| async { "a" }))
                .route("/b", get(|| async { "b" })),
        )
        .unwrap();
        for path in ["/a", "/b"] {
            let response = routes.dispatcher().oneshot(get_request(path)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_conflicting_route_is_an_error_and_table_is_kept() {
        let routes = DynamicRoutes::new();
        routes.route("/x", get(|| async { "first" })).unwrap();

        let err = routes.route("/x", get(|| async { "second" })).unwrap_err();
        assert!(matches!(err, RouteError::Rejected { ref path, .. } if path == "/x"));

        let response = routes.dispatcher().oneshot(get_request("/x")).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"first");
    }

    #[test]
    fn test_path_without_leading_slash_is_rejected() {
        let routes = DynamicRoutes::new();
        let err = routes.route("health", get(|| async { "ok" })).unwrap_err();
        assert!(matches!(err, RouteError::InvalidPath(ref path) if path == "health"));
    }
}
