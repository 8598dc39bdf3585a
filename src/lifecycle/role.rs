//! Process role and execution mode detection.
//!
//! Both are read from the environment once at process start.

use std::fmt;

/// Set by the master on every spawned worker; holds the worker id.
pub const WORKER_ENV: &str = "APP_BOOTSTRAP_WORKER";

/// Set to "1" on the first worker the master spawns.
pub const TEST_RUNNER_ENV: &str = "APP_BOOTSTRAP_TEST_RUNNER";

/// Set to "test" to run in test execution mode.
pub const MODE_ENV: &str = "APP_BOOTSTRAP_MODE";

/// Role of the current process in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Master,
    Worker { id: usize },
}

impl ProcessRole {
    /// Detect the role from the environment.
    pub fn detect() -> Self {
        Self::from_worker_var(std::env::var(WORKER_ENV).ok().as_deref())
    }

    fn from_worker_var(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(raw) if !raw.is_empty() => ProcessRole::Worker {
                id: raw.parse().unwrap_or(0),
            },
            _ => ProcessRole::Master,
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, ProcessRole::Master)
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Master => write!(f, "master"),
            ProcessRole::Worker { id } => write!(f, "worker-{}", id),
        }
    }
}

/// Execution mode.
///
/// Test mode disables the fatal panic hook and privilege drops, and makes the
/// master exit together with its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Normal,
    Test,
}

impl ExecutionMode {
    pub fn detect() -> Self {
        Self::from_mode_var(std::env::var(MODE_ENV).ok().as_deref())
    }

    fn from_mode_var(value: Option<&str>) -> Self {
        match value {
            Some(mode) if mode.eq_ignore_ascii_case("test") => ExecutionMode::Test,
            _ => ExecutionMode::Normal,
        }
    }

    pub fn is_test(&self) -> bool {
        matches!(self, ExecutionMode::Test)
    }
}

/// Whether this worker was tagged as the test runner.
pub fn is_test_runner() -> bool {
    std::env::var(TEST_RUNNER_ENV).map(|v| v == "1").unwrap_or(false)
}
