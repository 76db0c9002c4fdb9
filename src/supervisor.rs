//! Keeps both watcher workers alive, or takes the process down with them.
//!
//! The supervisor polls its workers at a fixed interval. If any worker has
//! finished while the daemon is meant to be running, the rest are told to
//! stop and the supervisor reports [`SupervisorExit::WorkerDied`]; the binary
//! turns that into a non-zero exit so an external process manager can
//! restart the whole daemon.

use crate::error::WatchError;
use crate::watcher::{DirectoryWatcher, EventHandler};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info};

/// Why [`Supervisor::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The stop signal fired; workers were shut down.
    Shutdown,
    /// A worker ended on its own.
    WorkerDied { worker: String, reason: String },
}

impl SupervisorExit {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Shutdown => 0,
            Self::WorkerDied { .. } => 1,
        }
    }
}

struct Worker {
    name: String,
    handle: JoinHandle<Result<(), WatchError>>,
}

pub struct Supervisor {
    poll: Duration,
    shutdown: watch::Sender<bool>,
    workers: Vec<Worker>,
}

impl Supervisor {
    pub fn new(poll: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            poll,
            shutdown,
            workers: Vec::new(),
        }
    }

    /// Receiver that turns true when workers should stop.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Run `worker` as a supervised task.
    pub fn spawn<F>(&mut self, name: impl Into<String>, worker: F) -> AbortHandle
    where
        F: Future<Output = Result<(), WatchError>> + Send + 'static,
    {
        let name = name.into();
        info!("Starting {} worker", name);
        let handle = tokio::spawn(worker);
        let abort = handle.abort_handle();
        self.workers.push(Worker { name, handle });
        abort
    }

    /// Run `watcher` with `handler` as a supervised task.
    pub fn spawn_watcher(
        &mut self,
        watcher: DirectoryWatcher,
        handler: Arc<dyn EventHandler>,
    ) -> AbortHandle {
        let name = watcher.name().to_string();
        let shutdown = self.shutdown_signal();
        self.spawn(name, watcher.run(handler, shutdown))
    }

    /// Poll workers until one dies or `stop` completes.
    pub async fn run<S>(mut self, stop: S) -> SupervisorExit
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(stop);
        let mut ticker = tokio::time::interval(self.poll);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!("Shutting down");
                    self.stop_all().await;
                    return SupervisorExit::Shutdown;
                }
                _ = ticker.tick() => {
                    let Some(idx) = self.workers.iter().position(|w| w.handle.is_finished()) else {
                        continue;
                    };
                    let worker = self.workers.swap_remove(idx);
                    let reason = match worker.handle.await {
                        Ok(Ok(())) => "exited".to_string(),
                        Ok(Err(e)) => e.to_string(),
                        Err(e) if e.is_cancelled() => "cancelled".to_string(),
                        Err(e) => format!("panicked: {e}"),
                    };
                    error!("{} worker is not alive ({}), exiting", worker.name, reason);
                    self.stop_all().await;
                    return SupervisorExit::WorkerDied {
                        worker: worker.name,
                        reason,
                    };
                }
            }
        }
    }

    async fn stop_all(&mut self) {
        self.shutdown.send_replace(true);
        for worker in self.workers.drain(..) {
            worker.handle.abort();
            let _ = worker.handle.await;
        }
    }
}
