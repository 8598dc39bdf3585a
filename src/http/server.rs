//! HTTP server setup.
//!
//! # Responsibilities
//! - Bind the application and redirect listeners together
//! - Serve the application over TLS when configured, plain HTTP otherwise
//! - Redirect plain HTTP to HTTPS when TLS is on
//! - Close every listener on shutdown

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::ServerSection;
use crate::error::BootstrapError;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::listener::{bind_all, local_addrs};
use crate::net::tls::load_tls_config;

const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Listeners bound and ready to serve.
pub struct BoundServer {
    app: Vec<TcpListener>,
    redirect: Vec<TcpListener>,
    tls: Option<RustlsConfig>,
    host: Arc<str>,
}

impl BoundServer {
    /// Bind application and redirect listeners, and load TLS material.
    pub async fn bind(config: &ServerSection) -> Result<Self, BootstrapError> {
        let host: Arc<str> = Arc::from(config.host.as_str());
        match &config.tls {
            Some(tls) => {
                let (app, redirect, rustls) = tokio::try_join!(
                    bind_all(&config.bind_addr, config.port),
                    bind_all(&config.bind_addr, config.http_port),
                    load_tls_config(tls),
                )?;
                Ok(Self {
                    app,
                    redirect,
                    tls: Some(rustls),
                    host,
                })
            }
            None => Ok(Self {
                app: bind_all(&config.bind_addr, config.port).await?,
                redirect: Vec::new(),
                tls: None,
                host,
            }),
        }
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn app_addrs(&self) -> Vec<SocketAddr> {
        local_addrs(&self.app)
    }

    pub fn redirect_addrs(&self) -> Vec<SocketAddr> {
        local_addrs(&self.redirect)
    }

    /// Start serving `app` on every listener until `shutdown` triggers.
    pub fn serve(self, app: Router, shutdown: &Shutdown) -> Result<RunningServer, BootstrapError> {
        let app_addrs = self.app_addrs();
        let mut tasks = Vec::with_capacity(self.app.len() + self.redirect.len());

        match self.tls {
            Some(tls) => {
                let handle = axum_server::Handle::new();
                let signal = shutdown.wait();
                let signal_handle = handle.clone();
                tokio::spawn(async move {
                    signal.await;
                    signal_handle.graceful_shutdown(Some(GRACE_PERIOD));
                });

                for listener in self.app {
                    let std_listener = listener.into_std().map_err(BootstrapError::Tls)?;
                    let server = axum_server::from_tcp_rustls(std_listener, tls.clone())
                        .handle(handle.clone())
                        .serve(app.clone().into_make_service_with_connect_info::<SocketAddr>());
                    tasks.push(tokio::spawn(server));
                }

                let redirect = redirect_app(self.host.clone());
                for listener in self.redirect {
                    tasks.push(serve_plain(listener, redirect.clone(), shutdown));
                }
            }
            None => {
                for listener in self.app {
                    tasks.push(serve_plain(listener, app.clone(), shutdown));
                }
            }
        }

        Ok(RunningServer {
            shutdown: shutdown.clone(),
            tasks,
            app_addrs,
        })
    }
}

fn serve_plain(listener: TcpListener, app: Router, shutdown: &Shutdown) -> JoinHandle<io::Result<()>> {
    let signal = shutdown.wait();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(signal)
            .await
    })
}

/// Serving listeners.
pub struct RunningServer {
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<io::Result<()>>>,
    app_addrs: Vec<SocketAddr>,
}

impl RunningServer {
    pub fn app_addrs(&self) -> &[SocketAddr] {
        &self.app_addrs
    }

    /// Stop accepting connections.
    pub fn close(&self) {
        self.shutdown.trigger();
    }

    /// Wait for every listener to stop.
    pub async fn wait(self) -> io::Result<()> {
        for task in self.tasks {
            match task.await {
                Ok(result) => result?,
                Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e)),
            }
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Plain HTTP app redirecting every GET to `https://<host><uri>`.
pub fn redirect_app(host: Arc<str>) -> Router {
    Router::new()
        .fallback(redirect)
        .with_state(host)
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!("http-redirect", method = %request.method(), uri = %request.uri())
        }))
}

async fn redirect(State(host): State<Arc<str>>, request: Request) -> Response {
    if !matches!(*request.method(), Method::GET | Method::HEAD) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let target = request
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    let location = format!("https://{host}{target}");
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_redirect_keeps_path_and_query() {
        let app = redirect_app(Arc::from("example.com:8443"));
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/a/b?c=1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "https://example.com:8443/a/b?c=1");

        let post = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/a")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(post.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_plain_server_serves_and_closes() {
        let mut section = ServerSection::default();
        section.port = 0;
        let bound = BoundServer::bind(&section).await.unwrap();
        assert!(!bound.is_tls());
        assert!(bound.redirect_addrs().is_empty());

        let shutdown = Shutdown::new();
        let app = Router::new().route("/", axum::routing::get(|| async { "up" }));
        let running = bound.serve(app, &shutdown).unwrap();
        let addr = running.app_addrs()[0];

        let body = reqwest::get(format!("http://{addr}/")).await.unwrap().text().await.unwrap();
        assert_eq!(body, "up");

        running.close();
        tokio::time::timeout(Duration::from_secs(5), running.wait())
            .await
            .expect("listeners close")
            .unwrap();
    }
}
