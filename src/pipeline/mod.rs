//! Middleware pipeline subsystem.
//!
//! # Data Flow
//! ```text
//! Hooks (user callbacks per ExtensionPoint)
//!     → stages.rs (standard chain: configure-X ⇒ X)
//!     → stage.rs (DAG order, veto → successor becomes a no-op)
//!     → builder.rs (named layers on AppBuilder)
//!     → AppBuilder::build → axum::Router
//!
//! Request path through the built router:
//!     unhandled-error-handler → error-handlers → catch-panic
//!     → request-id → access-log → body limits → cookies
//!     → readiness gate → session → static mounts → no-cache
//!     → dynamic routes
//! ```
//!
//! # Design Decisions
//! - Vetoed stages still complete so the chain always reaches `ready`
//! - A stage error ends the run; the hook's error is kept as the source
//! - Hooks get `&mut AppBuilder` and can add layers, routes and error handlers

pub mod builder;
pub mod hooks;
pub mod stage;
pub mod stages;

pub use builder::AppBuilder;
pub use hooks::{ExtensionPoint, HookFuture, Hooks, StageOutcome};
pub use stage::{Pipeline, PipelineError, PipelineReport, Stage, StageFuture};
pub use stages::standard_pipeline;
