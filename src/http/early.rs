//! Request handlers modules add at runtime, run before static content and
//! routes.
//!
//! Handlers run in registration order. Each either passes the request on,
//! possibly changed, or answers it.

use std::future::Future;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::context::AppContext;

/// What an early handler did with the request.
#[derive(Debug)]
pub enum EarlyOutcome {
    /// Hand the request to the next handler.
    Continue(Request),
    /// Answer now; later handlers and the rest of the stack are skipped.
    Respond(Response),
}

pub type EarlyHandler = Arc<dyn Fn(Request) -> BoxFuture<'static, EarlyOutcome> + Send + Sync>;

pub(crate) fn boxed<F, Fut>(handler: F) -> EarlyHandler
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EarlyOutcome> + Send + 'static,
{
    Arc::new(move |request| handler(request).boxed())
}

/// Run the context's early handlers, then the rest of the stack.
pub async fn early_handlers(State(context): State<AppContext>, request: Request, next: Next) -> Response {
    let mut request = request;
    for handler in context.early_handlers().iter() {
        match handler(request).await {
            EarlyOutcome::Continue(passed) => request = passed,
            EarlyOutcome::Respond(response) => return response,
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::body::Body;
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{middleware, Router};
    use tower::ServiceExt;

    fn app(context: &AppContext) -> Router {
        Router::new()
            .route(
                "/",
                get(|request: Request| async move {
                    request
                        .headers()
                        .get("x-tenant")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("none")
                        .to_string()
                }),
            )
            .layer(middleware::from_fn_with_state(context.clone(), early_handlers))
    }

    async fn call(app: Router, path: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_handlers_run_in_order_and_may_answer() {
        let context = AppContext::new(Arc::new(ServerConfig::default()));
        let app = app(&context);
        assert_eq!(call(app.clone(), "/").await.1, "none");

        // handlers added after the app is built still run
        context.add_early_handler(|mut request: Request| async move {
            request.headers_mut().insert("x-tenant", HeaderValue::from_static("acme"));
            EarlyOutcome::Continue(request)
        });
        context.add_early_handler(|request: Request| async move {
            if request.uri().path() == "/" {
                EarlyOutcome::Continue(request)
            } else {
                EarlyOutcome::Respond((StatusCode::FORBIDDEN, "blocked").into_response())
            }
        });

        assert_eq!(call(app.clone(), "/").await, (StatusCode::OK, "acme".to_string()));
        assert_eq!(call(app, "/admin").await, (StatusCode::FORBIDDEN, "blocked".to_string()));
    }
}
