//! Static file mounts.
//!
//! Each configured route becomes one middleware. A GET or HEAD under the
//! route prefix is offered to `ServeDir` (or `ServeFile`); anything that
//! produces a 404 falls through to the rest of the stack. Mounts built with
//! compression gzip what they serve when the client accepts it.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes, HttpBody};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::Response;
use axum::BoxError;
use tower::{Layer, Service, ServiceExt};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};

use crate::config::{CorsPolicy, StaticRoute};

/// One static route, ready to serve.
#[derive(Debug, Clone)]
pub struct StaticMount {
    route: String,
    path: PathBuf,
    file: bool,
    cors: Option<CorsLayer>,
    compress: bool,
}

impl StaticMount {
    pub fn new(route: &StaticRoute) -> Self {
        let path = if route.path.is_absolute() {
            route.path.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&route.path))
                .unwrap_or_else(|_| route.path.clone())
        };
        Self {
            route: normalize_prefix(&route.route),
            path,
            file: route.file,
            cors: route.cors.as_ref().map(cors_layer),
            compress: false,
        }
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_file(&self) -> bool {
        self.file
    }

    /// Path below the route prefix, or `None` when the request is elsewhere.
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.route == "/" {
            return Some(path);
        }
        let rest = path.strip_prefix(self.route.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    async fn try_serve(&self, request: Request) -> Response {
        if self.file {
            self.respond(ServeFile::new(&self.path), request).await
        } else {
            let dir = ServeDir::new(&self.path).append_index_html_on_directories(false);
            self.respond(dir, request).await
        }
    }

    async fn respond<S, B>(&self, service: S, request: Request) -> Response
    where
        S: Service<Request, Response = axum::http::Response<B>, Error = Infallible>,
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError> + Send,
    {
        if self.compress {
            self.finish(CompressionLayer::new().layer(service), request).await
        } else {
            self.finish(service, request).await
        }
    }

    async fn finish<S, B>(&self, service: S, request: Request) -> Response
    where
        S: Service<Request, Response = axum::http::Response<B>, Error = Infallible>,
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let service = service.map_response(|response| response.map(Body::new));
        let result = match &self.cors {
            Some(cors) => cors.layer(service).oneshot(request).await,
            None => service.oneshot(request).await,
        };
        match result {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

fn normalize_prefix(route: &str) -> String {
    let trimmed = route.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn cors_layer(policy: &CorsPolicy) -> CorsLayer {
    let origins: Vec<HeaderValue> = policy
        .origins
        .iter()
        .filter(|o| o.as_str() != "*")
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    let allow_origin = if policy.origins.is_empty() || policy.origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    let methods: Vec<Method> = policy
        .methods
        .iter()
        .filter_map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
        .collect();
    let allow_methods = if methods.is_empty() {
        AllowMethods::list([Method::GET, Method::HEAD])
    } else {
        AllowMethods::list(methods)
    };

    let headers = policy
        .headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect::<Vec<axum::http::HeaderName>>();

    let mut layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(allow_methods)
        .allow_headers(AllowHeaders::list(headers));
    if let Some(secs) = policy.max_age_secs {
        layer = layer.max_age(Duration::from_secs(secs));
    }
    layer
}

/// Middleware serving one mount.
pub async fn serve_static(State(mount): State<Arc<StaticMount>>, request: Request, next: Next) -> Response {
    if !matches!(*request.method(), Method::GET | Method::HEAD) {
        return next.run(request).await;
    }
    let Some(rest) = mount.strip(request.uri().path()) else {
        return next.run(request).await;
    };
    let target = match request.uri().query() {
        Some(query) => format!("{rest}?{query}"),
        None => rest.to_string(),
    };
    let Ok(uri) = target.parse::<Uri>() else {
        return next.run(request).await;
    };

    let mut forwarded = Request::new(Body::empty());
    *forwarded.method_mut() = request.method().clone();
    *forwarded.uri_mut() = uri;
    *forwarded.headers_mut() = request.headers().clone();

    let response = mount.try_serve(forwarded).await;
    if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED) {
        return next.run(request).await;
    }
    tracing::trace!(route = %mount.route, path = %rest, status = %response.status(), "Static response");
    response
}
