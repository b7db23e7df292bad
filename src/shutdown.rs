use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Cancels a token on SIGINT or SIGTERM and bounds how long the operator
/// waits for in-flight attempts afterwards.
#[derive(Clone)]
pub struct GracefulShutdown {
    token: CancellationToken,
    grace: Duration,
}

impl GracefulShutdown {
    pub fn new(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn initiate(&self) {
        if !self.token.is_cancelled() {
            info!("Initiating graceful shutdown");
            self.token.cancel();
        }
    }

    pub fn start_signal_handler(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = wait_for_signal() => shutdown.initiate(),
                _ = shutdown.token.cancelled() => {}
            }
        });
    }

    /// Waits for `task` to finish after shutdown began, giving up after the
    /// grace period. Returns `None` if the grace period ran out.
    pub async fn drain<F: Future>(&self, task: F) -> Option<F::Output> {
        self.token.cancelled().await;
        info!("Waiting for in-flight reconciles to finish (timeout: {:?})", self.grace);
        match tokio::time::timeout(self.grace, task).await {
            Ok(out) => Some(out),
            Err(_) => {
                warn!("Grace period elapsed with work still in flight");
                None
            }
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
