// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connector Orchestration
//!
//! The connector composes the supervisor, the exchange factory and the
//! topology: it connects, realizes and starts every exchange, and watches
//! the connection's close stream. A recoverable close tears the runtimes
//! down and rebuilds everything on a fresh connection; a fatal close ends
//! the run.
//!
//! Recovery is a loop over the close stream rather than a recursive call,
//! so long-running processes survive any number of reconnects without
//! accumulating state.

use crate::channel::{self, ConnectionSupervisor};
use crate::errors::ConnectorError;
use crate::exchange::{ExchangeFactory, ExchangeRuntime};
use crate::topology::Topology;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Top-level orchestrator of one connector run.
pub struct Connector {
    supervisor: Arc<ConnectionSupervisor>,
    factory: ExchangeFactory,
    topology: Topology,
    sanitized_url: String,
    exchanges: Vec<ExchangeRuntime>,
    close_stream: Option<mpsc::UnboundedReceiver<lapin::Error>>,
}

impl Connector {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        factory: ExchangeFactory,
        topology: Topology,
        sanitized_url: &str,
    ) -> Connector {
        Connector {
            supervisor,
            factory,
            topology,
            sanitized_url: sanitized_url.to_owned(),
            exchanges: Vec::new(),
            close_stream: None,
        }
    }

    /// Connects to the broker, keeps the close stream for [`supervise`], and
    /// realizes and starts every exchange of the topology. Any failure is
    /// returned and the process is expected to exit.
    ///
    /// [`supervise`]: Connector::supervise
    pub async fn run(&mut self) -> Result<(), ConnectorError> {
        info!("started RabbitMQ <=> OpenFaaS connector");
        info!(
            broker = self.sanitized_url.as_str(),
            "establishing connection"
        );

        let close_stream = self.supervisor.connect().await?;
        self.close_stream = Some(close_stream);

        let mut runtimes = Vec::with_capacity(self.topology.len());
        for spec in self.topology.exchanges() {
            let mut runtime = self.factory.build(spec).await?;
            runtime.start().await?;
            runtimes.push(runtime);
        }
        self.exchanges = runtimes;

        Ok(())
    }

    /// Awaits close events from the broker until one of them is terminal.
    ///
    /// A recoverable close stops every runtime, drops the references so the
    /// old channels become unreachable, and runs the connector again on a
    /// fresh connection. A non-recoverable close, or a failing re-run,
    /// resolves to an error the process exits with. The stream ending
    /// without an event means the connection was closed locally.
    pub async fn supervise(&mut self) -> Result<(), ConnectorError> {
        loop {
            let Some(stream) = self.close_stream.as_mut() else {
                return Ok(());
            };

            match stream.recv().await {
                Some(err) if channel::is_recoverable(&err) => {
                    warn!(
                        error = err.to_string(),
                        "connection failed with a recoverable error, rebuilding"
                    );

                    self.stop_exchanges().await;
                    self.close_stream = None;

                    if let Err(run_err) = self.run().await {
                        error!(
                            error = run_err.to_string(),
                            "received critical error during restart"
                        );
                        return Err(ConnectorError::RecoveryFailed(run_err.to_string()));
                    }

                    info!("successfully recovered the connection to the broker");
                }
                Some(err) => {
                    error!(
                        error = err.to_string(),
                        "connection failed with a critical error"
                    );
                    return Err(ConnectorError::FatalClose(err.to_string()));
                }
                None => return Ok(()),
            }
        }
    }

    /// Stops every exchange runtime, then disconnects from the broker.
    /// The refresher's shutdown is the caller's responsibility.
    pub async fn shutdown(&mut self) {
        info!("shutdown RabbitMQ <=> OpenFaaS connector");

        self.stop_exchanges().await;
        self.close_stream = None;
        self.supervisor.disconnect().await;
    }

    async fn stop_exchanges(&mut self) {
        for runtime in &mut self.exchanges {
            runtime.stop().await;
        }
        self.exchanges.clear();
    }
}
