//! Manage service shutdown
//!
//! A shutdown of the persistence service must never drop buffered writes: when a stop is
//! requested (`ctrl+c`, `SIGTERM`, or an internal unrecoverable state) the consumption loop has
//! to stop pulling from upstream, run one final commit sweep, acknowledge the upstream offset and
//! release the store before the process may exit.
//!
//! # Coordinate shutdown with the [`ShutdownManager`] type
//!
//! Components [`register`][ShutdownManager::register] to receive a [`ShutdownToken`]. They
//! [`wait_for_shutdown`][ShutdownToken::wait_for_shutdown] to start their drain logic and
//! signal back via [`complete`][ShutdownToken::complete] once it is safe to exit.
//! [`join`][ShutdownManager::join] resolves only after every registered component completed,
//! and then cancels the process-exit token handed to [`ShutdownManager::new`].
use std::sync::Arc;

use observability_deps::tracing::info;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Wait for a `SIGTERM` or `SIGINT` to stop the process on UNIX systems
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate()).expect("failed to register signal handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to register signal handler");

    tokio::select! {
        _ = term.recv() => info!("Received SIGTERM"),
        _ = int.recv() => info!("Received SIGINT"),
    }
}

/// Wait for a `ctrl+c` to stop the process on Windows systems
#[cfg(windows)]
pub async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received SIGINT");
}

/// Manage service shutdown
#[derive(Debug)]
pub struct ShutdownManager {
    process_exit: CancellationToken,
    drain: CancellationToken,
    tasks: TaskTracker,
}

impl ShutdownManager {
    /// Create a [`ShutdownManager`]
    ///
    /// `process_exit` is cancelled once every registered component has drained.
    pub fn new(process_exit: CancellationToken) -> Self {
        Self {
            process_exit,
            drain: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Create a [`ShutdownManager`] for tests that do not observe process exit.
    pub fn new_testing() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Register a component that needs to drain before the process may exit
    ///
    /// The caller must invoke [`complete`][ShutdownToken::complete] on the returned token, or
    /// [`join`][Self::join] never resolves.
    pub fn register(&self) -> ShutdownToken {
        let (tx, rx) = oneshot::channel();
        self.tasks.spawn(rx);
        ShutdownToken::new(self.drain.clone(), tx)
    }

    /// Waits for registered components to drain, then cancels the process-exit token
    pub async fn join(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.process_exit.cancel();
    }

    /// Ask every registered component to drain
    pub fn shutdown(&self) {
        self.drain.cancel();
    }

    /// Returns true once a shutdown was requested, by the manager or through a token.
    pub fn is_shutdown(&self) -> bool {
        self.drain.is_cancelled()
    }
}

/// A token that a component can obtain via [`register`][ShutdownManager::register]
///
/// Clones share the same completion signal, so any clone may call
/// [`complete`][Self::complete].
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    token: CancellationToken,
    complete_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ShutdownToken {
    fn new(token: CancellationToken, complete_tx: oneshot::Sender<()>) -> Self {
        Self {
            token,
            complete_tx: Arc::new(Mutex::new(Some(complete_tx))),
        }
    }

    /// Request a shutdown of the whole service from inside a component
    pub fn trigger_shutdown(&self) {
        self.token.cancel();
    }

    /// Future that completes when a shutdown was requested
    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Returns true once a shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal back to the [`ShutdownManager`] that this component finished draining
    ///
    /// Calling this more than once is a no-op.
    pub fn complete(&self) {
        if let Some(s) = self.complete_tx.lock().take() {
            let _ = s.send(());
        }
    }
}
