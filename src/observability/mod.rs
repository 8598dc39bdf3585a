//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, stderr)
//!     → metrics.rs (counters, gauges)
//!
//! Request access logs:
//!     → TraceLayer installed by the pipeline's logger stage
//! ```

pub mod logging;
pub mod metrics;
