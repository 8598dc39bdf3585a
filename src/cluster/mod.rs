//! Master/worker process topology.
//!
//! # Data Flow
//! ```text
//! Master:
//!     Supervisor::start_all
//!         → spawner.rs (re-exec binary with APP_BOOTSTRAP_WORKER=<id>)
//!         → ipc.rs (JSON lines over worker stdin/stdout)
//!         → supervisor.rs event loop
//!             Ready (first) → drop privileges once
//!             Exit{status}  → master exits with status
//!             worker exited → restart or exit(1)
//!
//! Worker:
//!     stdout ← Ready / Exit{status}
//!     stdin  → Exit (or EOF) → close listeners, exit
//! ```
//!
//! # Design Decisions
//! - Coordination is message passing only, no shared memory
//! - stderr stays attached to the terminal for logs
//! - Spawning sits behind `WorkerSpawner` so supervision is testable in-process

pub mod ipc;
pub mod spawner;
pub mod supervisor;

pub use ipc::{IpcError, IpcMessage, IpcReader, IpcWriter};
pub use spawner::{ProcessSpawner, SpawnRequest, WorkerEvent, WorkerHandle, WorkerSpawner};
pub use supervisor::{MasterState, Supervisor, SupervisorConfig};
