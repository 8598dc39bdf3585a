//! HTTP serving subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (axum / axum-server, HTTP→HTTPS redirect listener)
//!     → error layers (recover.rs, errors.rs: panics and HttpError → response)
//!     → request id, access log
//!     → rate_limit.rs (429 over the per-IP budget)
//!     → body limits, cookie parsing
//!     → gate.rs (503 until started)
//!     → session.rs (signed cookies, in-memory sessions)
//!     → early.rs (request handlers added by modules)
//!     → static_files.rs (mounted directories and files, gzip)
//!     → cache.rs (no-cache headers)
//!     → routes.rs (routes added at runtime by modules)
//! ```

pub mod cache;
pub mod early;
pub mod errors;
pub mod gate;
pub mod rate_limit;
pub mod recover;
pub mod routes;
pub mod server;
pub mod session;
pub mod static_files;

pub use early::{EarlyHandler, EarlyOutcome};
pub use errors::{ErrorHandler, HttpError, RequestInfo};
pub use routes::{DynamicRoutes, RouteError};
pub use server::{redirect_app, BoundServer, RunningServer};
pub use session::{Cookies, Session};
