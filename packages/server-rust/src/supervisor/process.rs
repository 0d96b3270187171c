//! Attached subprocesses and background workers.
//!
//! The supervisor owns these handles for registration only: once the service
//! starts, each handle gets a monitor task that reports exits and forwards
//! the shutdown signal. Restart policy belongs to whoever produced the
//! handle, not to the supervision core.

use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A subprocess or background worker handed to the service runtime for
/// lifecycle management.
#[derive(Debug)]
pub enum ProcessHandle {
    /// An OS child process, e.g. a plugin worker.
    Child { name: String, child: Child },
    /// An in-runtime background task, e.g. the metric aggregation worker.
    Task { name: String, handle: JoinHandle<()> },
}

impl ProcessHandle {
    /// Name used in supervision logs.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Child { name, .. } | Self::Task { name, .. } => name,
        }
    }
}

/// Spawns the monitor task for one attached process.
///
/// The monitor logs the exit of its charge and, on shutdown, kills child
/// processes / aborts background tasks that have not stopped on their own.
pub(crate) fn spawn_monitor(
    handle: ProcessHandle,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match handle {
            ProcessHandle::Child { name, mut child } => {
                tokio::select! {
                    status = child.wait() => match status {
                        Ok(status) if status.success() => {
                            info!(process = %name, "attached process exited cleanly");
                        }
                        Ok(status) => {
                            warn!(process = %name, %status, "attached process exited abnormally");
                        }
                        Err(err) => {
                            warn!(process = %name, error = %err, "failed to await attached process");
                        }
                    },
                    // `wait_for`'s guard is dropped inside the block so the
                    // spawned future stays `Send`.
                    () = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                        if let Err(err) = child.start_kill() {
                            warn!(process = %name, error = %err, "failed to signal attached process");
                        }
                        let _ = child.wait().await;
                        info!(process = %name, "attached process stopped on shutdown");
                    }
                }
            }
            ProcessHandle::Task { name, mut handle } => {
                tokio::select! {
                    result = &mut handle => match result {
                        Ok(()) => debug!(worker = %name, "background worker finished"),
                        Err(err) if err.is_cancelled() => {
                            debug!(worker = %name, "background worker cancelled");
                        }
                        Err(err) => warn!(worker = %name, error = %err, "background worker panicked"),
                    },
                    () = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                        handle.abort();
                        let _ = handle.await;
                        debug!(worker = %name, "background worker stopped on shutdown");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn task_monitor_observes_completion() {
        let (_stop_tx, stop_rx) = watch::channel(false);
        let worker = tokio::spawn(async {});
        let monitor = spawn_monitor(
            ProcessHandle::Task {
                name: "noop".into(),
                handle: worker,
            },
            stop_rx,
        );
        monitor.await.unwrap();
    }

    #[tokio::test]
    async fn task_monitor_aborts_on_shutdown() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = tokio::spawn(std::future::pending::<()>());
        let monitor = spawn_monitor(
            ProcessHandle::Task {
                name: "pending".into(),
                handle: worker,
            },
            stop_rx,
        );

        stop_tx.send(true).unwrap();
        monitor.await.unwrap();
    }

    // The monitor future must be schedulable across threads.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn monitor_runs_on_a_multi_thread_runtime() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = tokio::spawn(std::future::pending::<()>());
        let monitor = spawn_monitor(
            ProcessHandle::Task {
                name: "pending".into(),
                handle: worker,
            },
            stop_rx,
        );

        stop_tx.send(true).unwrap();
        monitor.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_monitor_kills_on_shutdown() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let child = tokio::process::Command::new("sleep")
            .arg("600")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let monitor = spawn_monitor(
            ProcessHandle::Child {
                name: "sleep".into(),
                child,
            },
            stop_rx,
        );

        stop_tx.send(true).unwrap();
        monitor.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_monitor_observes_exit() {
        let (_stop_tx, stop_rx) = watch::channel(false);
        let child = tokio::process::Command::new("true").spawn().unwrap();
        let monitor = spawn_monitor(
            ProcessHandle::Child {
                name: "true".into(),
                child,
            },
            stop_rx,
        );
        monitor.await.unwrap();
    }
}
