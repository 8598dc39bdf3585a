//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! server.bind_addr × port       → listener.rs (bind every address)
//! server.tls (cert, key, ca[])  → tls.rs (chain = cert + CA bundles)
//!     → http/server.rs (serve app over TLS or plain HTTP, redirect listener)
//! ```
//!
//! # Design Decisions
//! - All binds finish before the worker reports ready
//! - Any bind failure is startup-fatal

pub mod listener;
pub mod tls;
