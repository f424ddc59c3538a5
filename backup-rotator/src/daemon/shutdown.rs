//! Signal handling for SIGTERM and SIGINT.
//!
//! A signal fires the shared cancellation token. An in-flight tool run is
//! killed and the cycle ends as cancelled; rotation steps already started
//! finish on their own since they run on the blocking pool.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled once a signal arrives
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for SIGTERM or SIGINT, then cancel the token
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), cancelling cycle...");
            }
            _ = terminate => {
                info!("Received SIGTERM, cancelling cycle...");
            }
        }

        self.token.cancel();
    }

    /// Listen for signals in the background for the rest of the process
    pub fn spawn_listener(self) -> (CancellationToken, JoinHandle<()>) {
        let token = self.token();
        let handle = tokio::spawn(async move {
            self.wait_for_signal().await;
        });
        (token, handle)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
