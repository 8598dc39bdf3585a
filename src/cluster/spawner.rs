//! Worker process creation.
//!
//! # Responsibilities
//! - Start a worker process with the role and test-runner environment set
//! - Pump IPC messages between the worker's stdio and the supervisor
//! - Report process exit after the worker's last message has been delivered

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::mpsc;

use crate::cluster::ipc::{IpcMessage, IpcReader, IpcWriter};
use crate::lifecycle::role::{TEST_RUNNER_ENV, WORKER_ENV};

/// Something that happened to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Message { id: usize, message: IpcMessage },
    Exited { id: usize, pid: Option<u32>, status: Option<i32> },
}

/// Parameters for one spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnRequest {
    pub id: usize,
    pub test_runner: bool,
}

/// Master-side handle to a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    pid: Option<u32>,
    ipc: mpsc::UnboundedSender<IpcMessage>,
}

impl WorkerHandle {
    pub fn new(id: usize, pid: Option<u32>, ipc: mpsc::UnboundedSender<IpcMessage>) -> Self {
        Self { id, pid, ipc }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queue a message for the worker. Returns false once its channel is gone.
    pub fn send(&self, message: IpcMessage) -> bool {
        self.ipc.send(message).is_ok()
    }
}

/// Creates worker processes.
pub trait WorkerSpawner: Send {
    /// Start a worker. Its messages and exit are reported on `events`.
    fn spawn(
        &mut self,
        request: SpawnRequest,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> std::io::Result<WorkerHandle>;
}

/// Spawns workers as child processes of a program (by default the current executable).
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-run the current executable with the same arguments.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(
            std::env::current_exe()?,
            std::env::args().skip(1).collect(),
        ))
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(
        &mut self,
        request: SpawnRequest,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> std::io::Result<WorkerHandle> {
        let id = request.id;
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(WORKER_ENV, id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if request.test_runner {
            command.env(TEST_RUNNER_ENV, "1");
        } else {
            command.env_remove(TEST_RUNNER_ENV);
        }

        let mut child = command.spawn()?;
        let pid = child.id();
        tracing::debug!(worker = id, pid = ?pid, program = ?self.program, "Worker spawned");

        let (ipc_tx, mut ipc_rx) = mpsc::unbounded_channel::<IpcMessage>();

        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(async move {
                let mut writer = IpcWriter::new(stdin);
                while let Some(message) = ipc_rx.recv().await {
                    if let Err(e) = writer.send(message).await {
                        tracing::debug!(worker = id, error = %e, "Worker IPC write failed");
                        break;
                    }
                }
            });
        }

        let reader = child.stdout.take().map(|stdout| {
            let events = events.clone();
            tokio::spawn(async move {
                let mut reader = IpcReader::new(stdout);
                loop {
                    match reader.next_message().await {
                        Ok(Some(message)) => {
                            let _ = events.send(WorkerEvent::Message { id, message });
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::debug!(worker = id, error = %e, "Worker IPC read failed");
                            break;
                        }
                    }
                }
            })
        });

        tokio::spawn(async move {
            let status = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(worker = id, error = %e, "Failed to wait for worker");
                    None
                }
            };
            // deliver any final message before the exit
            if let Some(reader) = reader {
                let _ = reader.await;
            }
            let _ = events.send(WorkerEvent::Exited { id, pid, status });
        });

        Ok(WorkerHandle::new(id, pid, ipc_tx))
    }
}
