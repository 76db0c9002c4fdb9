//! Directory watchers that survive transient subscription failures.
//!
//! A [`DirectoryWatcher`] owns one non-recursive filesystem subscription and
//! forwards its events, one at a time, to an [`EventHandler`]. When the
//! subscription breaks (or cannot be created) the watcher waits for the
//! configured backoff and subscribes again:
//!
//! ```text
//!   Starting ──subscribe ok──▶ Watching ──stream error──▶ Interrupted
//!      ▲                                                     │
//!      └──────────────── backoff, retry allowed ─────────────┘
//! ```
//!
//! The watcher only returns on shutdown or when a bounded [`RetryPolicy`] is
//! exhausted. Handlers run on tokio's blocking pool and are never executed
//! concurrently for the same watcher.

use crate::config::RetryPolicy;
use crate::error::WatchError;
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Which filesystem notification fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A file appeared in the directory.
    Created,
    /// A file opened for writing was closed, or was renamed into place.
    ClosedWrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

/// What a subscription delivers to its watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchMessage {
    Event(WatchEvent),
    /// The subscription broke. The watcher drops it and resubscribes.
    Interrupted(String),
}

/// Reacts to filesystem events. Both callbacks default to doing nothing.
///
/// Callbacks run on a blocking thread and may take as long as they need;
/// further events for the same directory queue up meanwhile.
pub trait EventHandler: Send + Sync {
    fn on_created(&self, path: &Path) {
        let _ = path;
    }

    fn on_closed(&self, path: &Path) {
        let _ = path;
    }
}

/// Keeps an OS-level watch alive until dropped.
pub trait Subscription: Send {}

impl Subscription for RecommendedWatcher {}

/// Creates filesystem subscriptions.
pub trait Subscriber: Send + Sync {
    /// Watch `dir` non-recursively, sending every event into `events`.
    fn subscribe(
        &self,
        dir: &Path,
        events: mpsc::UnboundedSender<WatchMessage>,
    ) -> Result<Box<dyn Subscription>, WatchError>;
}

/// [`Subscriber`] backed by notify's platform watcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifySubscriber;

impl Subscriber for NotifySubscriber {
    fn subscribe(
        &self,
        dir: &Path,
        events: mpsc::UnboundedSender<WatchMessage>,
    ) -> Result<Box<dyn Subscription>, WatchError> {
        let subscribe_error = |e: notify::Error| WatchError::Subscribe {
            path: dir.to_path_buf(),
            detail: e.to_string(),
        };

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    for event in classify(&event) {
                        let _ = events.send(WatchMessage::Event(event));
                    }
                }
                Err(e) => {
                    let _ = events.send(WatchMessage::Interrupted(e.to_string()));
                }
            }
        })
        .map_err(subscribe_error)?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(subscribe_error)?;
        Ok(Box::new(watcher))
    }
}

/// Map a raw notify event onto the events handlers care about.
pub fn classify(event: &notify::Event) -> Vec<WatchEvent> {
    let kind = match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => WatchEventKind::Created,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => WatchEventKind::ClosedWrite,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => WatchEventKind::ClosedWrite,
        _ => return Vec::new(),
    };
    event
        .paths
        .iter()
        .map(|path| WatchEvent {
            kind,
            path: path.clone(),
        })
        .collect()
}

/// Lifecycle of a [`DirectoryWatcher`], observable through
/// [`DirectoryWatcher::state_receiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Starting,
    Watching,
    Interrupted,
}

enum Stop {
    Shutdown,
    Interrupted(String),
}

/// Watches one directory and dispatches its events to a handler.
pub struct DirectoryWatcher {
    name: String,
    dir: PathBuf,
    subscriber: Arc<dyn Subscriber>,
    retry: RetryPolicy,
    state: watch::Sender<WatcherState>,
}

impl DirectoryWatcher {
    pub fn new(
        name: impl Into<String>,
        dir: impl Into<PathBuf>,
        subscriber: Arc<dyn Subscriber>,
        retry: RetryPolicy,
    ) -> Self {
        let (state, _) = watch::channel(WatcherState::Starting);
        Self {
            name: name.into(),
            dir: dir.into(),
            subscriber,
            retry,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_receiver(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WatcherState) {
        debug!("{} watcher: {:?}", self.name, state);
        self.state.send_replace(state);
    }

    /// Watch until `shutdown` turns true (or its sender goes away).
    ///
    /// Returns an error only when the retry policy is exhausted. The restart
    /// count resets whenever a subscription is established.
    pub async fn run(
        self,
        handler: Arc<dyn EventHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), WatchError> {
        let mut restarts: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            self.set_state(WatcherState::Starting);
            let (tx, mut rx) = mpsc::unbounded_channel();
            let reason = match self.subscriber.subscribe(&self.dir, tx) {
                Ok(subscription) => {
                    restarts = 0;
                    self.set_state(WatcherState::Watching);
                    info!("Started {} watcher on {}", self.name, self.dir.display());
                    let stop = self.pump(&mut rx, &handler, &mut shutdown).await;
                    drop(subscription);
                    match stop {
                        Stop::Shutdown => {
                            info!("Stopped {} watcher", self.name);
                            return Ok(());
                        }
                        Stop::Interrupted(reason) => reason,
                    }
                }
                Err(e) => e.to_string(),
            };

            self.set_state(WatcherState::Interrupted);
            if !self.retry.allows(restarts) {
                error!("{} watcher giving up: {}", self.name, reason);
                return Err(WatchError::RetriesExhausted {
                    path: self.dir.clone(),
                    attempts: restarts,
                    last_error: reason,
                });
            }
            restarts += 1;
            warn!(
                "{} watcher interrupted ({}), restarting in {:?}",
                self.name,
                reason,
                self.retry.backoff()
            );

            tokio::select! {
                _ = tokio::time::sleep(self.retry.backoff()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn pump(
        &self,
        rx: &mut mpsc::UnboundedReceiver<WatchMessage>,
        handler: &Arc<dyn EventHandler>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Stop {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Stop::Shutdown;
                    }
                }
                message = rx.recv() => match message {
                    Some(WatchMessage::Event(event)) => self.dispatch(handler, event).await,
                    Some(WatchMessage::Interrupted(reason)) => return Stop::Interrupted(reason),
                    None => return Stop::Interrupted("event stream closed".into()),
                },
            }
        }
    }

    async fn dispatch(&self, handler: &Arc<dyn EventHandler>, event: WatchEvent) {
        debug!("{} watcher: {:?} {}", self.name, event.kind, event.path.display());
        let handler = Arc::clone(handler);
        let path = event.path.clone();
        let result = tokio::task::spawn_blocking(move || match event.kind {
            WatchEventKind::Created => handler.on_created(&event.path),
            WatchEventKind::ClosedWrite => handler.on_closed(&event.path),
        })
        .await;

        if let Err(e) = result {
            error!("{} handler failed on {}: {}", self.name, path.display(), e);
        }
    }
}
