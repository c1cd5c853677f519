//! Graceful Shutdown Handler
//!
//! Lets a signal handler ask the pipeline to stop. The pipeline only checks
//! the flag between batches, so a batch that has started always finishes
//! and its rows are kept.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shutdown coordinator for graceful termination.
#[derive(Clone, Default)]
pub struct ShutdownController {
    /// Whether shutdown has been requested
    requested: Arc<AtomicBool>,
}

impl ShutdownController {
    /// Create a new shutdown controller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            tracing::info!("shutdown requested, stopping after the current batch");
        }
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Wait for Ctrl+C or SIGTERM, then request shutdown.
///
/// If a handler cannot be installed the corresponding signal is ignored.
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn shutdown_signal(controller: ShutdownController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM");
        }
    }

    controller.shutdown();
}
