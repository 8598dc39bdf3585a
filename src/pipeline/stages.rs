//! The standard worker pipeline.
//!
//! Each `configure-*` stage emits its extension point; the stage after it
//! installs the default middleware unless a hook vetoed.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::Environment;
use crate::error::BoxError;
use crate::http::cache::no_cache_layer;
use crate::http::early::early_handlers;
use crate::http::errors::{error_chain, panic_response, unhandled_errors};
use crate::http::gate::readiness_gate;
use crate::http::rate_limit::{ip_rate_limit, IpRateLimiter};
use crate::http::recover::RecoverLayer;
use crate::http::session::{cookie_parser, session_middleware, SessionState};
use crate::http::static_files::{serve_static, StaticMount};
use crate::pipeline::builder::AppBuilder;
use crate::pipeline::hooks::{ExtensionPoint, Hooks, StageOutcome};
use crate::pipeline::stage::{Pipeline, Stage};

fn extension(hooks: &Arc<Hooks>, point: ExtensionPoint) -> Stage {
    let hooks = hooks.clone();
    Stage::new(point.as_str(), move |app| {
        let hooks = hooks.clone();
        Box::pin(async move { hooks.emit(point, app).await })
    })
}

fn action(name: &'static str, install: fn(&mut AppBuilder) -> Result<(), BoxError>) -> Stage {
    Stage::new(name, move |app| {
        Box::pin(async move {
            install(app)?;
            Ok(StageOutcome::Continue)
        })
    })
    .skippable()
}

/// Build the fixed stage chain.
pub fn standard_pipeline(hooks: Arc<Hooks>) -> Pipeline {
    Pipeline::new()
        .then(extension(&hooks, ExtensionPoint::Init))
        .then(extension(&hooks, ExtensionPoint::ConfigureLogger))
        .then(action("logger", install_logger))
        .then(action("rate-limit", install_rate_limit))
        .then(extension(&hooks, ExtensionPoint::ConfigureBodyParser))
        .then(action("body-parser", install_body_parser))
        .then(extension(&hooks, ExtensionPoint::ConfigureCookieParser))
        .then(action("cookie-parser", install_cookie_parser))
        .then(action("readiness-gate", install_gate))
        .then(extension(&hooks, ExtensionPoint::ConfigureSession))
        .then(action("session", install_session))
        .then(action("early-handlers", install_early_handlers))
        .then(extension(&hooks, ExtensionPoint::ConfigureStatic))
        .then(action("static", install_static))
        .then(extension(&hooks, ExtensionPoint::ConfigureCache))
        .then(action("cache", install_cache))
        .then(extension(&hooks, ExtensionPoint::ConfigureRouter))
        .then(action("router", attach_router))
        .then(extension(&hooks, ExtensionPoint::ConfigureRoutes))
        .then(extension(&hooks, ExtensionPoint::ConfigureErrorHandlers))
        .then(action("error-handlers", install_error_handlers))
        .then(extension(&hooks, ExtensionPoint::ConfigureUnhandledErrorHandler))
        .then(action("unhandled-error-handler", install_unhandled_error_handler))
        .then(extension(&hooks, ExtensionPoint::Ready))
}

fn install_logger(app: &mut AppBuilder) -> Result<(), BoxError> {
    app.layer("request-id", SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer("access-log", TraceLayer::new_for_http())
        .layer("propagate-request-id", PropagateRequestIdLayer::x_request_id());
    Ok(())
}

fn install_rate_limit(app: &mut AppBuilder) -> Result<(), BoxError> {
    let config = &app.config().server.rate_limit;
    if !config.enabled {
        return Ok(());
    }
    let limiter = Arc::new(IpRateLimiter::new(config));
    app.layer("rate-limit", middleware::from_fn_with_state(limiter, ip_rate_limit));
    Ok(())
}

fn install_body_parser(app: &mut AppBuilder) -> Result<(), BoxError> {
    let limit = app.config().server.body_limit;
    app.layer("body-limit", DefaultBodyLimit::max(limit))
        .layer("request-body-limit", RequestBodyLimitLayer::new(limit));
    Ok(())
}

fn install_cookie_parser(app: &mut AppBuilder) -> Result<(), BoxError> {
    let secret = &app.config().server.session.secret;
    let secret: Option<Arc<str>> = (!secret.is_empty()).then(|| Arc::from(secret.as_str()));
    app.layer("cookie-parser", middleware::from_fn_with_state(secret, cookie_parser));
    Ok(())
}

fn install_gate(app: &mut AppBuilder) -> Result<(), BoxError> {
    let context = app.context().clone();
    app.layer("readiness-gate", middleware::from_fn_with_state(context, readiness_gate));
    Ok(())
}

fn install_session(app: &mut AppBuilder) -> Result<(), BoxError> {
    let config = app.config().clone();
    if !config.server.session.enabled || config.environment == Environment::Down {
        tracing::debug!(environment = %config.environment, "Sessions disabled");
        return Ok(());
    }
    let state = Arc::new(SessionState::new(&config.server.session));
    app.layer("session", middleware::from_fn_with_state(state, session_middleware));
    Ok(())
}

fn install_early_handlers(app: &mut AppBuilder) -> Result<(), BoxError> {
    let context = app.context().clone();
    app.layer("early-handlers", middleware::from_fn_with_state(context, early_handlers));
    Ok(())
}

fn install_static(app: &mut AppBuilder) -> Result<(), BoxError> {
    let routes = app.config().server.static_routes();
    let compress = app.config().server.compress_static;
    // later routes first
    for route in routes.iter().rev() {
        let mount = StaticMount::new(route).with_compression(compress);
        tracing::debug!(
            route = %mount.route(),
            path = %mount.path().display(),
            file = mount.is_file(),
            "Serving static route"
        );
        let name = format!("static:{}", mount.route());
        app.layer(name, middleware::from_fn_with_state(Arc::new(mount), serve_static));
    }
    Ok(())
}

fn install_cache(app: &mut AppBuilder) -> Result<(), BoxError> {
    app.layer("no-cache", no_cache_layer());
    Ok(())
}

fn attach_router(app: &mut AppBuilder) -> Result<(), BoxError> {
    app.attach_router();
    Ok(())
}

fn install_error_handlers(app: &mut AppBuilder) -> Result<(), BoxError> {
    let context = app.context().clone();
    let catch_panic = ServiceBuilder::new()
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(RecoverLayer);
    app.error_layer("catch-panic", catch_panic)
        .error_layer("error-handlers", middleware::from_fn_with_state(context, error_chain));
    Ok(())
}

fn install_unhandled_error_handler(app: &mut AppBuilder) -> Result<(), BoxError> {
    let verbose = app.config().dumps_exceptions();
    let layer = ServiceBuilder::new()
        .layer(middleware::from_fn_with_state(verbose, unhandled_errors))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(RecoverLayer);
    app.error_layer("unhandled-error-handler", layer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, StaticEntry, StaticRoute};
    use crate::context::AppContext;
    use crate::http::errors::HttpError;
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use std::path::PathBuf;
    use tower::ServiceExt;

    fn builder(config: ServerConfig) -> AppBuilder {
        AppBuilder::new(AppContext::new(Arc::new(config)))
    }

    fn hook_outcome(hooks: &mut Hooks, point: ExtensionPoint, outcome: StageOutcome) {
        hooks.on(point, move |_app| Box::pin(async move { Ok(outcome) }));
    }

    #[tokio::test]
    async fn test_full_chain_reaches_ready() {
        let mut app = builder(ServerConfig::default());
        let report = standard_pipeline(Arc::new(Hooks::new())).run(&mut app).await.unwrap();
        assert_eq!(report.executed.first().map(String::as_str), Some("init"));
        assert_eq!(report.executed.last().map(String::as_str), Some("ready"));
        assert!(report.skipped.is_empty());
        assert_eq!(
            app.layer_names(),
            vec![
                "request-id",
                "access-log",
                "propagate-request-id",
                "rate-limit",
                "body-limit",
                "request-body-limit",
                "cookie-parser",
                "readiness-gate",
                "early-handlers",
                "no-cache",
            ]
        );
        assert_eq!(
            app.error_layer_names(),
            vec!["catch-panic", "error-handlers", "unhandled-error-handler"]
        );
    }

    #[tokio::test]
    async fn test_veto_skips_default_action_once() {
        let mut hooks = Hooks::new();
        hook_outcome(&mut hooks, ExtensionPoint::ConfigureCache, StageOutcome::Skip);
        let mut app = builder(ServerConfig::default());

        let report = standard_pipeline(Arc::new(hooks)).run(&mut app).await.unwrap();
        assert_eq!(report.skipped, vec!["cache"]);
        assert!(report.executed.iter().any(|s| s == "router"));
        assert!(report.completed("ready"));
        assert!(!app.layer_names().contains(&"no-cache"));
    }

    #[tokio::test]
    async fn test_static_routes_attach_last_to_first() {
        let mut config = ServerConfig::default();
        config.server.static_routes = (0..4)
            .map(|i| {
                StaticEntry::Route(StaticRoute {
                    route: format!("/r{i}"),
                    path: PathBuf::from(format!("dir{i}")),
                    file: false,
                    cors: None,
                })
            })
            .collect();
        let mut app = builder(config);
        standard_pipeline(Arc::new(Hooks::new())).run(&mut app).await.unwrap();

        let statics: Vec<&str> = app
            .layer_names()
            .into_iter()
            .filter(|name| name.starts_with("static:"))
            .collect();
        assert_eq!(statics, vec!["static:/r3", "static:/r2", "static:/r1", "static:/r0"]);
    }

    #[tokio::test]
    async fn test_session_only_when_enabled_and_not_down() {
        let mut config = ServerConfig::default();
        config.server.session.enabled = true;
        config.server.session.secret = "secret".into();

        let mut app = builder(config.clone());
        standard_pipeline(Arc::new(Hooks::new())).run(&mut app).await.unwrap();
        assert!(app.layer_names().contains(&"session"));

        config.environment = Environment::Down;
        let mut app = builder(config);
        standard_pipeline(Arc::new(Hooks::new())).run(&mut app).await.unwrap();
        assert!(!app.layer_names().contains(&"session"));
    }

    #[tokio::test]
    async fn test_hook_error_is_returned_unchanged() {
        let mut hooks = Hooks::new();
        hooks.on(ExtensionPoint::ConfigureStatic, |_app| {
            Box::pin(async { Err::<StageOutcome, BoxError>("static dir missing".into()) })
        });
        let mut app = builder(ServerConfig::default());
        let err = standard_pipeline(Arc::new(hooks)).run(&mut app).await.unwrap_err();
        assert_eq!(err.into_stage_source().unwrap().to_string(), "static dir missing");
        assert!(!app.layer_names().contains(&"no-cache"));
    }

    #[tokio::test]
    async fn test_built_app_gates_then_serves_with_no_cache_headers() {
        let mut hooks = Hooks::new();
        hooks.on(ExtensionPoint::ConfigureRoutes, |app| {
            let added = app
                .route("/hello", get(|| async { "hello" }))
                .and_then(|app| app.route("/fail", get(|| async { HttpError::internal("nope") })))
                .and_then(|app| app.route("/panic", get(|| async { panic!("handler exploded") as () })))
                .map(|_| ());
            Box::pin(async move {
                added?;
                Ok(StageOutcome::Continue)
            })
        });
        let mut config = ServerConfig::default();
        config.environment = Environment::Production;
        let mut app = builder(config);
        standard_pipeline(Arc::new(hooks)).run(&mut app).await.unwrap();
        let context = app.context().clone();
        let router = app.build();

        let get_req = |path: &str| Request::builder().uri(path).body(Body::empty()).unwrap();

        let blocked = router.clone().oneshot(get_req("/hello")).await.unwrap();
        assert_eq!(blocked.status(), StatusCode::SERVICE_UNAVAILABLE);

        context.mark_started();
        let ok = router.clone().oneshot(get_req("/hello")).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()[header::CACHE_CONTROL], "no-cache, no-store, must-revalidate");
        assert!(ok.headers().contains_key("x-request-id"));

        let failed = router.clone().oneshot(get_req("/fail")).await.unwrap();
        assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failed.headers()[header::CACHE_CONTROL], "no-cache, no-store, must-revalidate");
        assert_eq!(failed.headers()[header::PRAGMA], "no-cache");
        assert_eq!(failed.headers()[header::EXPIRES], "0");
        assert!(failed.headers().contains_key("x-request-id"));
        let body = axum::body::to_bytes(failed.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Internal Server Error");

        let panicked = router.oneshot(get_req("/panic")).await.unwrap();
        assert_eq!(panicked.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_early_handlers_answer_before_routes_and_limiter_refuses_over_burst() {
        let mut hooks = Hooks::new();
        hooks.on(ExtensionPoint::ConfigureRoutes, |app| {
            let added = app.route("/maintenance", get(|| async { "route" })).map(|_| ());
            Box::pin(async move {
                added?;
                Ok(StageOutcome::Continue)
            })
        });
        let mut config = ServerConfig::default();
        config.server.rate_limit.requests_per_second = 1;
        config.server.rate_limit.burst = 2;
        let mut app = builder(config);
        standard_pipeline(Arc::new(hooks)).run(&mut app).await.unwrap();
        let context = app.context().clone();
        let router = app.build();
        context.mark_started();

        context.add_early_handler(|request: Request| async move {
            if request.uri().path() == "/maintenance" {
                crate::http::early::EarlyOutcome::Respond(
                    (StatusCode::SERVICE_UNAVAILABLE, "early").into_response(),
                )
            } else {
                crate::http::early::EarlyOutcome::Continue(request)
            }
        });

        let get_req = |path: &str| Request::builder().uri(path).body(Body::empty()).unwrap();
        let early = router.clone().oneshot(get_req("/maintenance")).await.unwrap();
        assert_eq!(early.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(early.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"early");

        let second = router.clone().oneshot(get_req("/maintenance")).await.unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);

        let limited = router.oneshot(get_req("/maintenance")).await.unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
