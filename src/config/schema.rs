//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bootstrap.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration consumed by master and workers alike.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Deployment environment.
    pub environment: Environment,

    /// Process-level settings (titles, restart policy, privilege target).
    pub app: AppConfig,

    /// Listener, TLS, static and session settings.
    pub server: ServerSection,

    /// Module names loaded by every worker.
    pub modules: Vec<String>,

    /// Per-environment module lists; an entry replaces `modules`.
    pub env_modules: HashMap<String, Vec<String>>,

    /// Console logging settings.
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Module names to load for the configured environment.
    pub fn active_modules(&self) -> &[String] {
        self.env_modules
            .get(self.environment.as_str())
            .unwrap_or(&self.modules)
    }

    /// Whether worker and master should drop privileges after startup.
    pub fn drops_privileges(&self) -> bool {
        self.environment != Environment::Development && self.app.user.is_some()
    }

    /// Whether request errors are rendered with their full cause chain.
    pub fn dumps_exceptions(&self) -> bool {
        self.environment == Environment::Development || self.app.dump_exceptions
    }
}

/// Deployment environment name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
    /// Maintenance mode: no sessions, no pre-fork initializers.
    Down,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
            Environment::Down => "down",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Process title label for the master.
    pub master_title: String,

    /// Process title label for workers.
    pub worker_title: String,

    /// Replace crashed workers instead of exiting the master.
    pub restart_workers: bool,

    /// Render request errors verbosely outside development too.
    pub dump_exceptions: bool,

    /// Account to switch to once listeners are bound.
    pub user: Option<UserConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            master_title: "app-bootstrap master".to_string(),
            worker_title: "app-bootstrap worker".to_string(),
            restart_workers: false,
            dump_exceptions: false,
            user: None,
        }
    }
}

/// Privilege drop target. Each field is a name or a numeric id.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserConfig {
    pub group: String,
    pub user: String,
}

/// Listener and request-handling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSection {
    /// Worker count; 0 means one per available CPU.
    pub workers: usize,

    /// Addresses every listener binds to.
    pub bind_addr: Vec<String>,

    /// Application port (HTTPS when `tls` is set, HTTP otherwise).
    pub port: u16,

    /// Redirect port, only bound when `tls` is set.
    pub http_port: u16,

    /// Public host name used for HTTPS redirects.
    pub host: String,

    /// Optional TLS material.
    pub tls: Option<TlsConfig>,

    /// Static routes, in declaration order.
    #[serde(rename = "static")]
    pub static_routes: Vec<StaticEntry>,

    /// Maximum request body size in bytes.
    pub body_limit: usize,

    /// Gzip static responses for clients that accept it.
    pub compress_static: bool,

    /// Per-client-IP request limits.
    pub rate_limit: RateLimitConfig,

    /// Session middleware settings.
    pub session: SessionConfig,
}

impl ServerSection {
    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Static routes with string shorthands expanded.
    pub fn static_routes(&self) -> Vec<StaticRoute> {
        self.static_routes
            .iter()
            .cloned()
            .map(StaticEntry::into_route)
            .collect()
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            workers: 1,
            bind_addr: vec!["127.0.0.1".to_string()],
            port: 8443,
            http_port: 8080,
            host: "localhost:8443".to_string(),
            tls: None,
            static_routes: Vec::new(),
            body_limit: 2 * 1024 * 1024, // 2MB
            compress_static: true,
            rate_limit: RateLimitConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// TLS configuration for the application listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,

    /// CA bundle files appended to the served chain.
    #[serde(default)]
    pub ca: Vec<PathBuf>,
}

/// A static route as written in config: either a bare directory or a table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StaticEntry {
    Dir(PathBuf),
    Route(StaticRoute),
}

impl StaticEntry {
    pub fn into_route(self) -> StaticRoute {
        match self {
            StaticEntry::Dir(path) => StaticRoute {
                route: "/".to_string(),
                path,
                file: false,
                cors: None,
            },
            StaticEntry::Route(route) => route,
        }
    }
}

/// Static content mounted under a route prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticRoute {
    /// Route prefix (e.g. "/assets").
    #[serde(default = "default_static_route")]
    pub route: String,

    /// Directory, or single file when `file` is set.
    pub path: PathBuf,

    /// Serve `path` as a single file for every request under `route`.
    #[serde(default)]
    pub file: bool,

    /// Optional CORS policy for this route.
    #[serde(default)]
    pub cors: Option<CorsPolicy>,
}

fn default_static_route() -> String {
    "/".to_string()
}

/// CORS policy applied to static responses.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CorsPolicy {
    /// Allowed origins; "*" allows any.
    pub origins: Vec<String>,
    pub methods: Vec<String>,
    pub headers: Vec<String>,
    pub max_age_secs: Option<u64>,
}

/// Token bucket per client IP.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,

    /// Sustained requests per second.
    pub requests_per_second: u32,

    /// Bucket capacity.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 100,
            burst: 200,
        }
    }
}

/// Session middleware configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub enabled: bool,

    /// Secret used to sign session cookies.
    pub secret: String,

    pub cookie_name: String,

    pub max_age_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: String::new(),
            cookie_name: "sid".to_string(),
            max_age_secs: 24 * 60 * 60,
        }
    }
}

/// Console logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    pub timestamps: bool,
    pub colorize: bool,
    /// Disable console output entirely.
    pub silent: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            timestamps: true,
            colorize: false,
            silent: false,
        }
    }
}
