//! Fatal fault handling.
//!
//! A panic anywhere in the process is logged at critical severity and the
//! process exits with status 1. Test mode leaves the default hook in place so
//! harnesses observe the real panic.
//!
//! Code run through [`recoverable`] is exempt: its panics are caught further
//! up (request handling) and only logged here.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::lifecycle::role::{ExecutionMode, ProcessRole};

static FAULTED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static RECOVERABLE: Cell<usize> = const { Cell::new(0) };
}

struct RecoverableScope;

impl RecoverableScope {
    fn enter() -> Self {
        RECOVERABLE.with(|depth| depth.set(depth.get() + 1));
        RecoverableScope
    }
}

impl Drop for RecoverableScope {
    fn drop(&mut self) {
        RECOVERABLE.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Run `f` with panics treated as recoverable by the fault handler.
pub fn recoverable<R>(f: impl FnOnce() -> R) -> R {
    let _scope = RecoverableScope::enter();
    f()
}

/// Whether the current thread is inside [`recoverable`].
pub fn in_recoverable_scope() -> bool {
    RECOVERABLE.with(Cell::get) > 0
}

/// Install the fatal panic hook. Returns false when skipped in test mode.
pub fn install_fault_handler(role: ProcessRole, mode: ExecutionMode) -> bool {
    if mode.is_test() {
        tracing::debug!(%role, "Test mode: fatal panic hook not installed");
        return false;
    }

    std::panic::set_hook(Box::new(move |info| {
        if in_recoverable_scope() {
            tracing::error!(%role, "recovered panic: {}", panic_message(info.payload()));
            return;
        }
        // a panic while reporting must not re-enter
        if FAULTED.swap(true, Ordering::SeqCst) {
            return;
        }
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        tracing::error!(
            severity = "critical",
            %role,
            location = %location,
            "uncaught error: {}",
            panic_message(info.payload())
        );
        std::process::exit(1);
    }));
    true
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_mode_skips_hook() {
        assert!(!install_fault_handler(ProcessRole::Master, ExecutionMode::Test));
    }

    #[test]
    fn test_panic_message_variants() {
        let s: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(owned.as_ref()), "bang");
        let other: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_recoverable_scope_unwinds() {
        assert!(!in_recoverable_scope());
        let nested = recoverable(|| recoverable(in_recoverable_scope));
        assert!(nested);

        let caught = std::panic::catch_unwind(|| recoverable(|| panic!("inside")));
        assert!(caught.is_err());
        assert!(!in_recoverable_scope());
    }
}
