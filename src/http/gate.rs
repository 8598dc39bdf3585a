//! Readiness gate: 503 until the worker has finished starting.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::context::AppContext;
use crate::observability::metrics;

pub async fn readiness_gate(State(context): State<AppContext>, request: Request, next: Next) -> Response {
    if context.is_started() {
        return next.run(request).await;
    }
    metrics::record_gate_rejection();
    tracing::debug!(method = %request.method(), uri = %request.uri(), "Rejected before startup");
    StatusCode::SERVICE_UNAVAILABLE.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::body::Body;
    use axum::http::Method;
    use axum::routing::any;
    use axum::{middleware, Router};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_gate_blocks_every_request_until_started() {
        let context = AppContext::new(Arc::new(ServerConfig::default()));
        let app = Router::new()
            .route("/{*path}", any(|| async { "through" }))
            .layer(middleware::from_fn_with_state(context.clone(), readiness_gate));

        let cases = [(Method::GET, "/a"), (Method::POST, "/b/c"), (Method::DELETE, "/missing")];
        for (method, path) in cases.iter().cloned() {
            let request = Request::builder().method(method).uri(path).body(Body::empty()).unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        }

        context.mark_started();
        for (method, path) in cases {
            let request = Request::builder().method(method).uri(path).body(Body::empty()).unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
