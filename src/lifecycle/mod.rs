//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Role detection (role.rs):
//!     APP_BOOTSTRAP_WORKER unset → master, set → worker <id>
//!
//! Master (startup.rs):
//!     title → fault hook → pre-fork initializers → spawn workers → supervise
//!
//! Worker (startup.rs):
//!     title → fault hook → pipeline → bind → drop privileges → ready
//!     → modules → start hooks → gate opens
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT or exit from master → close listeners → exit 0
//! ```
//!
//! # Design Decisions
//! - Ordered startup: pipeline first, then listeners, then modules
//! - Panics are fatal outside request handling (fault.rs)
//! - Privileges are switched at most once per process (privilege.rs)

pub mod fault;
pub mod privilege;
pub mod role;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod title;

pub use role::{ExecutionMode, ProcessRole};
pub use shutdown::Shutdown;
pub use startup::{Bootstrap, RunningWorker, WorkerOptions};
