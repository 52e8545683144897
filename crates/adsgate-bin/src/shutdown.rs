// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Graceful shutdown coordination.
//!
//! One coordinator per process: OS signals (SIGTERM/SIGINT/SIGQUIT on
//! Unix, Ctrl+C elsewhere) or a manual trigger flip the shared flag and
//! wake every subscriber.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

/// Coordinates graceful shutdown across components.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    sender: broadcast::Sender<()>,
    initiated: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribes to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Returns a future resolving when shutdown is initiated, suitable
    /// for `with_graceful_shutdown`.
    pub fn signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.sender.subscribe();
        let initiated = self.initiated.clone();
        async move {
            if initiated.load(Ordering::SeqCst) {
                return;
            }
            let _ = rx.recv().await;
        }
    }

    /// Initiates shutdown; idempotent.
    pub fn initiate(&self) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("shutdown initiated");
            let _ = self.sender.send(());
        }
    }

    /// Returns `true` once shutdown has been initiated.
    pub fn is_initiated(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Blocks until an OS signal arrives, then initiates shutdown.
    pub async fn wait_for_signal(&self) {
        if self.is_initiated() {
            return;
        }

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::error!(error = %e, "failed to register SIGTERM handler");
                    return;
                }
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::error!(error = %e, "failed to register SIGINT handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl+C");
            }
        }

        self.initiate();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_initiate_wakes_subscribers() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();

        assert!(!coordinator.is_initiated());
        coordinator.initiate();

        assert!(coordinator.is_initiated());
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_signal_resolves() {
        let coordinator = ShutdownCoordinator::new();
        let signal = coordinator.signal();

        let trigger = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.initiate();
        });

        tokio::time::timeout(Duration::from_secs(1), signal)
            .await
            .expect("signal should resolve");
    }

    #[tokio::test]
    async fn test_double_initiate_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.initiate();
        coordinator.initiate();
        assert!(coordinator.is_initiated());
    }

    #[tokio::test]
    async fn test_signal_after_initiation_resolves_immediately() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.initiate();

        tokio::time::timeout(Duration::from_millis(100), coordinator.signal())
            .await
            .expect("signal should resolve immediately");
    }
}
