use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use super::session::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    ShuttingDown,
    Terminated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub closed: usize,
    pub failed: usize,
}

/// Closes every session exactly once when the process is asked to stop.
pub struct ShutdownCoordinator {
    store: SessionStore,
    phase: Mutex<Phase>,
}

impl ShutdownCoordinator {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            phase: Mutex::new(Phase::Running),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tear down all sessions. Returns `None` if teardown already started elsewhere.
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        {
            let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
            if *phase != Phase::Running {
                return None;
            }
            *phase = Phase::ShuttingDown;
        }

        let report = self.close_all().await;
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = Phase::Terminated;
        Some(report)
    }

    /// Remove and close whatever is in the store right now. Used by `shutdown` and by the
    /// final pass after the listener has drained.
    pub async fn close_all(&self) -> ShutdownReport {
        let sessions = self.store.all().await;
        info!(sessions = sessions.len(), "closing sessions for shutdown");

        let mut report = ShutdownReport::default();
        for session in sessions {
            self.store.remove(session.id()).await;
            match session.close() {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    warn!(session_id = %session.id(), error = %e, "session close failed during shutdown");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
