//! Worker process management
//!
//! Every successfully spawned worker is tracked here until shutdown, which
//! closes its input, signals it, waits up to the drain deadline and kills
//! whatever is left. Each child is terminated exactly once no matter which
//! path triggers shutdown; dropping the manager kills any survivors. Handles
//! outlive shutdown so liveness is always read from the process itself.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, instrument, warn};

use crate::connection::Connection;
use crate::error::LaunchError;
use crate::protocol::ServerDescriptor;

/// A live worker process and its connection
pub struct WorkerHandle {
    pub name: String,
    pub pid: Option<u32>,
    connection: Arc<Connection>,
    child: Child,
    stopped: bool,
}

impl WorkerHandle {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Whether the process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Outcome of launching a set of servers
#[derive(Default)]
pub struct ConnectReport {
    /// Connected servers, in descriptor order
    pub connected: Vec<(String, Arc<Connection>)>,
    pub failures: Vec<(String, LaunchError)>,
}

/// What shutdown had to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that exited within the drain deadline
    pub graceful: usize,
    /// Workers that had to be killed
    pub killed: usize,
}

/// Owns every spawned worker process
pub struct ProcessManager {
    workers: Vec<WorkerHandle>,
    drain_timeout: Duration,
}

impl ProcessManager {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            workers: Vec::new(),
            drain_timeout,
        }
    }

    /// Spawn one worker and bind its stdio channel
    #[instrument(skip(self, server), fields(server = %server.name))]
    pub fn connect(&mut self, server: &ServerDescriptor) -> Result<Arc<Connection>, LaunchError> {
        debug!(transport = %server.transport, "Launching worker");
        let mut child = Command::new(&server.command)
            .args(&server.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                command: server.command_line(),
                source,
            })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (stdin, stdout) = match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            (stdin, _) => {
                let missing = if stdin.is_none() { "stdin" } else { "stdout" };
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "Failed to kill half-connected worker");
                }
                return Err(LaunchError::MissingPipe(missing));
            }
        };

        let connection = Connection::open(server.name.clone(), stdout, stdin);
        info!(pid = ?pid, command = %server.command_line(), "Worker started");

        self.workers.push(WorkerHandle {
            name: server.name.clone(),
            pid,
            connection: Arc::clone(&connection),
            child,
            stopped: false,
        });
        Ok(connection)
    }

    /// Launch every server; individual failures are reported, not fatal
    pub fn connect_all(&mut self, servers: &[ServerDescriptor]) -> ConnectReport {
        let mut report = ConnectReport::default();
        for server in servers {
            match self.connect(server) {
                Ok(connection) => report.connected.push((server.name.clone(), connection)),
                Err(e) => {
                    error!(server = %server.name, error = %e, "Failed to launch worker");
                    report.failures.push((server.name.clone(), e));
                }
            }
        }
        report
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Number of worker processes still running
    pub fn live_count(&mut self) -> usize {
        self.workers.iter_mut().map(WorkerHandle::is_alive).filter(|alive| *alive).count()
    }

    /// Terminate every worker; safe to call more than once
    #[instrument(skip(self))]
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let drain = self.drain_timeout;
        let stopping: Vec<_> = self
            .workers
            .iter_mut()
            .filter(|worker| !worker.stopped)
            .map(|worker| {
                worker.stopped = true;
                worker
            })
            .collect();

        if stopping.is_empty() {
            return ShutdownReport::default();
        }
        info!(workers = stopping.len(), "Shutting down workers");

        let results = join_all(stopping.into_iter().map(|worker| stop_worker(worker, drain))).await;

        let mut report = ShutdownReport::default();
        for graceful in results {
            if graceful {
                report.graceful += 1;
            } else {
                report.killed += 1;
            }
        }
        info!(graceful = report.graceful, killed = report.killed, "Workers stopped");
        report
    }
}

/// Stop one worker, returning whether it exited without being killed
async fn stop_worker(worker: &mut WorkerHandle, drain: Duration) -> bool {
    let WorkerHandle {
        name,
        connection,
        child,
        ..
    } = worker;
    connection.close_writer().await;
    send_terminate(name, child);

    let waited = tokio::time::timeout(drain, child.wait()).await;
    match waited {
        Ok(Ok(status)) => {
            debug!(server = %name, status = %status, "Worker exited");
            true
        }
        Ok(Err(e)) => {
            warn!(server = %name, error = %e, "Failed to wait for worker, killing");
            kill(name, child).await;
            false
        }
        Err(_) => {
            warn!(server = %name, drain = ?drain, "Worker did not exit in time, killing");
            kill(name, child).await;
            false
        }
    }
}

async fn kill(name: &str, child: &mut Child) {
    if let Err(e) = child.kill().await {
        error!(server = %name, error = %e, "Failed to kill worker");
    }
}

#[cfg(unix)]
fn send_terminate(name: &str, child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(server = %name, error = %e, "SIGTERM not delivered");
    }
}

#[cfg(not(unix))]
fn send_terminate(_name: &str, _child: &Child) {}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            if worker.is_alive() {
                warn!(server = %worker.name, "Worker still running at drop, killing");
                if let Err(e) = worker.child.start_kill() {
                    debug!(server = %worker.name, error = %e, "Kill at drop failed");
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    fn sh(name: &str, script: &str) -> ServerDescriptor {
        ServerDescriptor::stdio(name, "sh", vec!["-c".into(), script.into()])
    }

    fn pids(manager: &ProcessManager) -> Vec<u32> {
        manager.workers().iter().filter_map(|w| w.pid).collect()
    }

    /// Whether a process with this pid still exists (zombies included)
    fn process_exists(pid: u32) -> bool {
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[tokio::test]
    async fn test_connect_and_shutdown() {
        let mut manager = ProcessManager::new(Duration::from_secs(2));
        let report = manager.connect_all(&[sh("cat", "cat"), sh("sleepy", "sleep 30")]);

        assert_eq!(report.connected.len(), 2);
        assert!(report.failures.is_empty());
        assert_eq!(manager.live_count(), 2);

        let pids = pids(&manager);
        let shutdown = manager.shutdown().await;
        assert_eq!(shutdown.graceful + shutdown.killed, 2);
        assert_eq!(manager.live_count(), 0);
        assert!(pids.iter().all(|&pid| !process_exists(pid)));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let mut manager = ProcessManager::new(Duration::from_secs(1));
        let missing = ServerDescriptor::stdio("ghost", "/nonexistent/conclave-worker", vec![]);

        let report = manager.connect_all(&[missing, sh("cat", "cat")]);

        assert_eq!(report.connected.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "ghost");
        assert!(matches!(report.failures[0].1, LaunchError::Spawn { .. }));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut manager = ProcessManager::new(Duration::from_secs(1));
        manager.connect_all(&[sh("cat", "cat")]);

        let first = manager.shutdown().await;
        let second = manager.shutdown().await;

        assert_eq!(first.graceful + first.killed, 1);
        assert_eq!(second, ShutdownReport::default());
        assert_eq!(manager.live_count(), 0);
    }

    #[tokio::test]
    async fn test_stubborn_worker_is_killed() {
        let mut manager = ProcessManager::new(Duration::from_millis(200));
        // Ignores SIGTERM and end of input
        manager.connect_all(&[sh("stubborn", "trap '' TERM; while true; do sleep 1; done")]);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let pids = pids(&manager);
        assert_eq!(manager.live_count(), 1);
        let report = manager.shutdown().await;
        assert_eq!(report.killed, 1);
        assert_eq!(manager.live_count(), 0);
        assert!(pids.iter().all(|&pid| !process_exists(pid)));
    }

    #[tokio::test]
    async fn test_crashed_worker_is_reaped() {
        let mut manager = ProcessManager::new(Duration::from_secs(1));
        let report = manager.connect_all(&[sh("crash", "exit 3")]);
        let connection = report.connected[0].1.clone();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !connection.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let pids = pids(&manager);
        let report = manager.shutdown().await;
        assert_eq!(report.graceful, 1);
        assert!(pids.iter().all(|&pid| !process_exists(pid)));
    }
}
