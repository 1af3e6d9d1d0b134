//! Graceful shutdown coordination.
//!
//! One coordinator owns the shutdown lifecycle: the signal handler (or a
//! test) triggers it, the axum server observes the trigger through
//! [`ShutdownCoordinator::signal`], and `drain` waits out in-flight
//! requests before aborting the registered background tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relay_telemetry::RequestTracker;

/// Lifecycle phase of the hub process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Serving normally
    Running,
    /// Shutdown triggered; waiting for in-flight requests
    Draining,
    /// Background tasks stopped; the process is about to exit
    Complete,
}

/// Coordinates the shutdown of the server and its background tasks.
pub struct ShutdownCoordinator {
    phase: watch::Sender<ShutdownPhase>,
    phase_rx: watch::Receiver<ShutdownPhase>,
    notify: Arc<Notify>,
    triggered: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator in the running phase.
    #[must_use]
    pub fn new() -> Self {
        let (phase, phase_rx) = watch::channel(ShutdownPhase::Running);
        Self {
            phase,
            phase_rx,
            notify: Arc::new(Notify::new()),
            triggered: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Whether shutdown has been triggered.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        *self.phase_rx.borrow()
    }

    /// Watch phase changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase_rx.clone()
    }

    /// Future that resolves once shutdown is triggered.
    ///
    /// Handed to `axum::serve(..).with_graceful_shutdown`.
    pub fn signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let notify = Arc::clone(&self.notify);
        let triggered = self.is_shutting_down();
        async move {
            if !triggered {
                notify.notified().await;
            }
        }
    }

    /// Register a background task to be stopped on drain.
    pub async fn register_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().await.push(handle);
    }

    /// Trigger shutdown. Idempotent.
    pub fn trigger(&self, reason: &str) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("shutdown already triggered");
            return;
        }
        info!(reason, "shutting down");
        let _ = self.phase.send(ShutdownPhase::Draining);
        self.notify.notify_waiters();
    }

    /// Wait for in-flight requests to finish, then stop background tasks.
    ///
    /// Requests still in flight when `grace` runs out are abandoned; the
    /// tasks are aborted either way.
    pub async fn drain(&self, tracker: &RequestTracker, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let active = tracker.stats().active_requests;
            if active == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(active, "shutdown grace expired with requests in flight");
                break;
            }
            debug!(active, "waiting for in-flight requests");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            handle.abort();
        }
        let _ = self.phase.send(ShutdownPhase::Complete);
        info!("shutdown complete");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Trigger the coordinator on SIGINT or SIGTERM.
pub fn spawn_signal_listener(coordinator: Arc<ShutdownCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(err) => {
                    warn!(error = %err, "failed to install sigterm handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => coordinator.trigger("SIGINT"),
            () = terminate => coordinator.trigger("SIGTERM"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_resolves_the_signal_future() {
        let coordinator = ShutdownCoordinator::new();
        let signal = coordinator.signal();
        assert_eq!(coordinator.phase(), ShutdownPhase::Running);

        coordinator.trigger("test");
        tokio::time::timeout(Duration::from_secs(1), signal)
            .await
            .expect("signal must resolve");
        assert!(coordinator.is_shutting_down());
        assert_eq!(coordinator.phase(), ShutdownPhase::Draining);
    }

    #[tokio::test]
    async fn trigger_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger("first");
        coordinator.trigger("second");
        assert_eq!(coordinator.phase(), ShutdownPhase::Draining);
    }

    #[tokio::test]
    async fn signal_resolves_even_if_already_triggered() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger("early");
        tokio::time::timeout(Duration::from_secs(1), coordinator.signal())
            .await
            .expect("signal must resolve immediately");
    }

    #[tokio::test]
    async fn drain_aborts_registered_tasks() {
        let coordinator = ShutdownCoordinator::new();
        let handle = tokio::spawn(async {
            std::future::pending::<()>().await;
        });
        coordinator.register_task(handle).await;

        let tracker = RequestTracker::new();
        coordinator.trigger("test");
        coordinator.drain(&tracker, Duration::from_millis(200)).await;
        assert_eq!(coordinator.phase(), ShutdownPhase::Complete);
    }

    #[tokio::test]
    async fn drain_waits_for_in_flight_requests() {
        use relay_telemetry::RequestInfo;

        let coordinator = ShutdownCoordinator::new();
        let tracker = Arc::new(RequestTracker::new());
        tracker.start(RequestInfo::new("req-1", "gpt-4o"));

        let finisher = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                tracker.complete_success("req-1", None);
            })
        };

        coordinator.trigger("test");
        coordinator.drain(&tracker, Duration::from_secs(5)).await;
        assert_eq!(tracker.stats().active_requests, 0);
        finisher.await.expect("finisher");
    }
}
