//! Per-request error handling.
//!
//! # Data Flow
//! ```text
//! handler returns HttpError (or panics → CatchPanicLayer → HttpError 500)
//!     → HttpError::into_response (status + HttpError in extensions)
//!     → error_chain: registered ErrorHandlers in order, first Some wins
//!     → unhandled_errors: verbose or minimal plain text
//!         headers_sent → abort the connection instead
//! ```
//!
//! A replacement response keeps the cache headers and request id the
//! regular stack put on the failed one.

use std::fmt;
use std::io;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::context::AppContext;

/// An error raised while handling a request.
#[derive(Debug, Clone)]
pub struct HttpError {
    status: StatusCode,
    message: String,
    detail: Option<String>,
    headers_sent: bool,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
            headers_sent: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Wrap any error as a 500, keeping its cause chain as detail.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut cause = error.source();
        while let Some(e) = cause {
            chain.push(e.to_string());
            cause = e.source();
        }
        let mut err = Self::internal(error.to_string());
        if !chain.is_empty() {
            err.detail = Some(format!("caused by: {}", chain.join("\ncaused by: ")));
        }
        err
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Mark the error as raised after the response head went out.
    pub fn after_headers_sent(mut self) -> Self {
        self.headers_sent = true;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for HttpError {}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.message.clone()).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

const CARRIED_HEADERS: [HeaderName; 4] = [
    header::CACHE_CONTROL,
    header::PRAGMA,
    header::EXPIRES,
    HeaderName::from_static("x-request-id"),
];

/// Copy the carried headers from `failed` onto `replacement`, unless the
/// replacement sets them itself.
fn carry_headers(failed: &Response, mut replacement: Response) -> Response {
    for name in &CARRIED_HEADERS {
        if replacement.headers().contains_key(name) {
            continue;
        }
        for value in failed.headers().get_all(name) {
            replacement.headers_mut().append(name.clone(), value.clone());
        }
    }
    replacement
}

/// Request line of the request that failed.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
}

/// Early error handler. Returning `Some` answers the request.
pub type ErrorHandler = Arc<dyn Fn(&HttpError, &RequestInfo) -> Option<Response> + Send + Sync>;

/// Run the context's error handlers over a failed response.
pub async fn error_chain(State(context): State<AppContext>, request: Request, next: Next) -> Response {
    let info = RequestInfo {
        method: request.method().clone(),
        uri: request.uri().clone(),
    };
    let response = next.run(request).await;
    let Some(error) = response.extensions().get::<HttpError>() else {
        return response;
    };

    for handler in context.error_handlers().iter() {
        if let Some(handled) = handler(error, &info) {
            return carry_headers(&response, handled);
        }
    }
    response
}

/// Render any error no handler took.
pub async fn unhandled_errors(State(verbose): State<bool>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let response = next.run(request).await;
    let Some(error) = response.extensions().get::<HttpError>() else {
        return response;
    };

    if error.headers_sent() {
        tracing::warn!(method = %method, uri = %uri, error = %error, "Error after headers sent, closing connection");
        return abort_connection();
    }
    if error.status().is_server_error() {
        tracing::error!(method = %method, uri = %uri, error = %error, "Unhandled request error");
    } else {
        tracing::debug!(method = %method, uri = %uri, error = %error, "Request error");
    }
    carry_headers(&response, render(error, verbose))
}

/// Plain-text error body, with message and detail when verbose.
pub fn render(error: &HttpError, verbose: bool) -> Response {
    let status = error.status();
    let reason = status.canonical_reason().unwrap_or("Error");
    let body = if verbose {
        let mut body = format!("{} {}\n\n{}\n", status.as_u16(), reason, error.message());
        if let Some(detail) = error.detail() {
            body.push('\n');
            body.push_str(detail);
            body.push('\n');
        }
        body
    } else {
        reason.to_string()
    };

    let mut response = (status, body).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// A response whose body fails at once, so the connection is dropped
/// without a complete second response.
fn abort_connection() -> Response {
    let stream = futures_util::stream::once(async {
        Err::<Bytes, io::Error>(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "response aborted after headers were sent",
        ))
    });
    Response::new(Body::from_stream(stream))
}

/// `CatchPanicLayer` handler: a panic becomes a 500 `HttpError`.
pub fn panic_response(payload: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let message = crate::lifecycle::fault::panic_message(payload.as_ref());
    tracing::error!(severity = "critical", panic = %message, "Request handler panicked");
    HttpError::internal("Request handler panicked")
        .with_detail(message)
        .into_response()
}
