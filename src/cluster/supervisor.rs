//! Master-side worker supervision.
//!
//! # Responsibilities
//! - Spawn the configured number of workers (the first tagged as test runner)
//! - Drop privileges once, on the first worker `Ready`
//! - Restart or abort on worker exit
//! - Tell every remaining worker to exit before the master stops
//!
//! # Design Decisions
//! - A single event loop owns `MasterState`; ready messages racing from
//!   several workers are serialized through one channel
//! - A worker only waits for `Ready` if it was spawned before the switch

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::cluster::ipc::IpcMessage;
use crate::cluster::spawner::{SpawnRequest, WorkerEvent, WorkerHandle, WorkerSpawner};
use crate::config::{ServerConfig, UserConfig};
use crate::error::BootstrapError;
use crate::lifecycle::privilege::{drop_privileges, PrivilegeDropper};
use crate::lifecycle::role::ExecutionMode;
use crate::observability::metrics;

/// Supervision policy.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub workers: usize,
    pub restart_workers: bool,
    /// Exit together with the first worker that exits.
    pub test_mode: bool,
    /// Account to switch to on first ready; `None` disables the switch.
    pub privilege_target: Option<UserConfig>,
    /// How long to wait for workers after broadcasting exit.
    pub drain_timeout: Duration,
}

impl SupervisorConfig {
    pub fn from_config(config: &ServerConfig, mode: ExecutionMode) -> Self {
        let privilege_target = if config.drops_privileges() && !mode.is_test() {
            config.app.user.clone()
        } else {
            None
        };
        Self {
            workers: config.server.worker_count(),
            restart_workers: config.app.restart_workers,
            test_mode: mode.is_test(),
            privilege_target,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// State shared by every worker-ready callback.
#[derive(Debug, Default)]
pub struct MasterState {
    switched_user: bool,
}

/// Supervises worker processes for the master.
pub struct Supervisor<S> {
    spawner: S,
    privileges: Arc<dyn PrivilegeDropper>,
    config: SupervisorConfig,
    state: MasterState,
    workers: BTreeMap<usize, WorkerHandle>,
    awaiting_ready: HashSet<usize>,
    next_id: usize,
    spawned: usize,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl<S: WorkerSpawner> Supervisor<S> {
    pub fn new(spawner: S, privileges: Arc<dyn PrivilegeDropper>, config: SupervisorConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            spawner,
            privileges,
            config,
            state: MasterState::default(),
            workers: BTreeMap::new(),
            awaiting_ready: HashSet::new(),
            next_id: 1,
            spawned: 0,
            events_tx,
            events_rx,
        }
    }

    /// Start one worker.
    pub fn start_worker(&mut self, test_runner: bool) -> Result<usize, BootstrapError> {
        let id = self.next_id;
        self.next_id += 1;

        let handle = self
            .spawner
            .spawn(SpawnRequest { id, test_runner }, self.events_tx.clone())
            .map_err(BootstrapError::Spawn)?;

        tracing::info!(worker = id, pid = ?handle.pid(), test_runner, "Worker started");
        if !self.state.switched_user {
            self.awaiting_ready.insert(id);
        }
        self.workers.insert(id, handle);
        self.spawned += 1;
        metrics::record_worker_spawned(test_runner);
        metrics::record_live_workers(self.workers.len());
        Ok(id)
    }

    /// Start the configured number of workers.
    pub fn start_all(&mut self) -> Result<(), BootstrapError> {
        for i in 0..self.config.workers {
            self.start_worker(i == 0)?;
        }
        Ok(())
    }

    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }

    /// Worker pids, in spawn order.
    pub fn worker_pids(&self) -> Vec<u32> {
        self.workers.values().filter_map(WorkerHandle::pid).collect()
    }

    pub fn spawned_total(&self) -> usize {
        self.spawned
    }

    pub fn has_switched_user(&self) -> bool {
        self.state.switched_user
    }

    /// Sender for injecting events (spawners receive a clone on every spawn).
    pub fn event_sender(&self) -> mpsc::UnboundedSender<WorkerEvent> {
        self.events_tx.clone()
    }

    /// Wait for the next worker event.
    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.events_rx.recv().await
    }

    /// Apply one event. Returns the master's exit status when it must stop.
    pub fn handle_event(&mut self, event: WorkerEvent) -> Option<i32> {
        match event {
            WorkerEvent::Message { id, message: IpcMessage::Exit { status } } => {
                let status = status.unwrap_or(0);
                tracing::info!(worker = id, status, "Worker requested exit");
                Some(status)
            }
            WorkerEvent::Message { id, message: IpcMessage::Ready } => self.on_ready(id),
            WorkerEvent::Exited { id, pid, status } => self.on_exit(id, pid, status),
        }
    }

    fn on_ready(&mut self, id: usize) -> Option<i32> {
        if !self.awaiting_ready.remove(&id) {
            return None;
        }
        tracing::debug!(worker = id, "Worker ready");
        if self.state.switched_user {
            return None;
        }
        self.state.switched_user = true;
        self.awaiting_ready.clear();

        let Some(target) = &self.config.privilege_target else {
            tracing::debug!("Privilege drop disabled");
            return None;
        };
        match drop_privileges(self.privileges.as_ref(), target) {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(severity = "critical", error = %e, "Failed to drop master privileges");
                Some(1)
            }
        }
    }

    fn on_exit(&mut self, id: usize, pid: Option<u32>, status: Option<i32>) -> Option<i32> {
        if self.workers.remove(&id).is_none() {
            return None;
        }
        self.awaiting_ready.remove(&id);
        metrics::record_worker_exit(status);
        metrics::record_live_workers(self.workers.len());
        tracing::error!(severity = "critical", worker = id, pid = ?pid, status = ?status, "Worker exited");

        if self.config.test_mode {
            tracing::error!(worker = id, status = ?status, "Test worker died. Exiting.");
            return Some(status.unwrap_or(1));
        }
        if !self.config.restart_workers {
            return Some(1);
        }
        match self.start_worker(false) {
            Ok(_) => {
                metrics::record_worker_restart();
                None
            }
            Err(e) => {
                tracing::error!(severity = "critical", error = %e, "Failed to restart worker");
                Some(1)
            }
        }
    }

    /// Ask every live worker to exit.
    pub fn broadcast_exit(&self) {
        for handle in self.workers.values() {
            if !handle.send(IpcMessage::Exit { status: None }) {
                tracing::debug!(worker = handle.id(), "Worker IPC channel already closed");
            }
        }
    }

    /// Supervise until a worker forces an exit or `shutdown` resolves.
    ///
    /// Workers are told to exit and drained before the status is returned.
    pub async fn run<F>(mut self, shutdown: F) -> i32
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let status = loop {
            tokio::select! {
                _ = &mut shutdown => break 0,
                event = self.events_rx.recv() => match event {
                    Some(event) => {
                        if let Some(status) = self.handle_event(event) {
                            break status;
                        }
                    }
                    None => break 1,
                },
            }
        };
        self.drain().await;
        status
    }

    async fn drain(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        tracing::info!(workers = self.workers.len(), "Stopping workers");
        self.broadcast_exit();

        let deadline = self.config.drain_timeout;
        let drained = tokio::time::timeout(deadline, async {
            while !self.workers.is_empty() {
                match self.events_rx.recv().await {
                    Some(WorkerEvent::Exited { id, .. }) => {
                        self.workers.remove(&id);
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = self.workers.len(), "Workers did not exit in time");
        }
        metrics::record_live_workers(self.workers.len());
    }
}
