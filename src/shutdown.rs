//! Process lifecycle: shutdown triggers and teardown coordination.
//!
//! The engine stops on SIGINT, SIGTERM, the death of the supervising parent
//! process, or a programmatic [`ShutdownCoordinator::trigger`]. Every
//! component waiting on a [`ShutdownListener`] observes the first trigger;
//! later triggers are no-ops. Cleanup runs at most once whatever the number
//! of triggers.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// What started the shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    ParentExited,
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ShutdownReason::Interrupt => "SIGINT",
            ShutdownReason::Terminate => "SIGTERM",
            ShutdownReason::ParentExited => "parent process exited",
            ShutdownReason::Requested => "requested",
        };
        f.write_str(reason)
    }
}

struct Inner {
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
    cleaned_up: AtomicBool,
    reason: Mutex<Option<ShutdownReason>>,
}

/// Shared handle driving shutdown. Cheap to clone.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(Inner {
                tx,
                triggered: AtomicBool::new(false),
                cleaned_up: AtomicBool::new(false),
                reason: Mutex::new(None),
            }),
        }
    }

    /// A listener that resolves once shutdown is triggered, including when
    /// the trigger happened before the listener was created.
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.inner.tx.subscribe(),
            inner: self.inner.clone(),
        }
    }

    /// Start shutdown. Returns `false` if it was already started.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            debug!(%reason, "Shutdown already in progress");
            return false;
        }
        *self.inner.reason.lock() = Some(reason);
        info!(%reason, "Shutdown triggered");
        let _ = self.inner.tx.send(());
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.inner.reason.lock()
    }

    /// Run `cleanup` unless a previous call already did. Returns whether it ran.
    pub fn cleanup_once<F: FnOnce()>(&self, cleanup: F) -> bool {
        if self.inner.cleaned_up.swap(true, Ordering::SeqCst) {
            return false;
        }
        cleanup();
        true
    }

    /// Translate SIGINT and SIGTERM into triggers until shutdown starts.
    #[cfg(unix)]
    pub async fn watch_signals(self) {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to register SIGINT handler: {}", e);
                return;
            }
        };

        let mut listener = self.listener();
        tokio::select! {
            _ = sigterm.recv() => {
                self.trigger(ShutdownReason::Terminate);
            }
            _ = sigint.recv() => {
                self.trigger(ShutdownReason::Interrupt);
            }
            _ = listener.wait() => {}
        }
    }

    #[cfg(not(unix))]
    pub async fn watch_signals(self) {
        let mut listener = self.listener();
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    self.trigger(ShutdownReason::Interrupt);
                }
                Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
            },
            _ = listener.wait() => {}
        }
    }

    /// Trigger shutdown when the parent process goes away, detected as a
    /// change of the parent pid. Does nothing if the process already started
    /// orphaned (parent pid 1), since a change could never be observed.
    #[cfg(unix)]
    pub async fn watch_parent(self, poll: Duration) {
        use nix::unistd::{getppid, Pid};

        let parent = getppid();
        if parent == Pid::from_raw(1) {
            info!("Started without a supervising parent, parent watch disabled");
            return;
        }
        debug!(parent = parent.as_raw(), "Watching parent process");

        let mut listener = self.listener();
        let mut ticker = tokio::time::interval(poll);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if getppid() != parent {
                        self.trigger(ShutdownReason::ParentExited);
                        return;
                    }
                }
                _ = listener.wait() => return,
            }
        }
    }

    #[cfg(not(unix))]
    pub async fn watch_parent(self, _poll: Duration) {
        info!("Parent watch is only supported on unix");
    }
}

/// Resolves once shutdown has been triggered.
pub struct ShutdownListener {
    rx: broadcast::Receiver<()>,
    inner: Arc<Inner>,
}

impl ShutdownListener {
    pub async fn wait(&mut self) {
        if self.inner.triggered.load(Ordering::SeqCst) {
            return;
        }
        // A closed or lagged channel also means the trigger fired.
        let _ = self.rx.recv().await;
    }
}
