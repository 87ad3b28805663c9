// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Graceful Shutdown Coordination
//!
//! A [`ShutdownSignal`] fans a single termination event (SIGINT/SIGTERM or a
//! programmatic trigger) out to every component holding a subscription: the
//! topic map refresher and the connector's main loop.

use tokio::sync::broadcast;
use tracing::info;

/// Broadcast-based shutdown notification shared by the binaries.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> ShutdownSignal {
        let (sender, _) = broadcast::channel(1);
        ShutdownSignal { sender }
    }

    /// Blocks until SIGINT or SIGTERM arrives, then notifies all receivers.
    pub async fn wait(&self) {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install SIGINT handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT, preparing for shutdown");
            }
            _ = terminate => {
                info!("received SIGTERM, preparing for shutdown");
            }
        }

        let _ = self.sender.send(());
    }

    /// Returns a receiver that fires once shutdown is triggered.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Triggers shutdown programmatically.
    pub fn trigger(&self) {
        let _ = self.sender.send(());
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
