// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Supervision
//!
//! This module owns the single AMQP connection of a connector run. It dials
//! the broker (plain or TLS) with bounded retry, forwards asynchronous close
//! notifications into a stream the orchestrator observes, and hands out
//! channels while the connection is live.
//!
//! The supervisor does not react to the close stream itself; deciding whether
//! a close is recoverable is the orchestrator's job.

use crate::errors::AmqpError;
use async_trait::async_trait;
use lapin::protocol::AMQPErrorKind;
use lapin::{
    tcp::{OwnedIdentity, OwnedTLSConfig},
    types::LongString,
    Channel, Connection, ConnectionProperties,
};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Bounded retry applied to dialing and channel creation
const CONNECT_ATTEMPTS: u64 = 3;

/// AMQP reply code signalling an orderly close
pub(crate) const REPLY_SUCCESS: u16 = 200;

/// Capability to allocate AMQP channels on a live connection.
#[async_trait]
pub trait ChannelCreator: Send + Sync {
    async fn create_channel(&self) -> Result<Channel, AmqpError>;
}

/// Classifies a close event using the protocol's error classes.
///
/// A soft protocol error advises that reconnection may succeed. Hard errors,
/// IO failures and every other terminal condition are fatal.
pub fn is_recoverable(error: &lapin::Error) -> bool {
    match error {
        lapin::Error::ProtocolError(amqp_error) => {
            matches!(amqp_error.kind(), AMQPErrorKind::Soft(_))
        }
        _ => false,
    }
}

/// Owns at most one live connection to the RabbitMQ cluster.
pub struct ConnectionSupervisor {
    url: String,
    tls: Option<OwnedTLSConfig>,
    connection: RwLock<Option<Connection>>,
}

impl ConnectionSupervisor {
    pub fn new(url: &str, tls: Option<OwnedTLSConfig>) -> ConnectionSupervisor {
        ConnectionSupervisor {
            url: url.to_owned(),
            tls,
            connection: RwLock::new(None),
        }
    }

    /// Dials the broker up to three times, sleeping 1 s, 3 s and 5 s between
    /// attempts. On success the connection's asynchronous errors are
    /// forwarded into the returned stream, over which a single terminal
    /// close event will arrive.
    ///
    /// # Returns
    /// The close stream, or `AmqpError::ConnectionError` once the retries
    /// are exhausted; no connection is retained in that case.
    pub async fn connect(&self) -> Result<mpsc::UnboundedReceiver<lapin::Error>, AmqpError> {
        let mut slot = self.connection.write().await;

        for attempt in 0..CONNECT_ATTEMPTS {
            debug!("creating amqp connection...");

            match self.dial().await {
                Ok(connection) => {
                    info!("successfully established connection to the RabbitMQ cluster");

                    let (tx, rx) = mpsc::unbounded_channel();
                    connection.on_error(move |err| {
                        let _ = tx.send(err);
                    });

                    *slot = Some(connection);
                    return Ok(rx);
                }
                Err(err) => {
                    warn!(
                        error = err.to_string(),
                        attempt = attempt + 1,
                        "failed to establish connection"
                    );
                    sleep(Duration::from_secs(2 * attempt + 1)).await;
                }
            }
        }

        Err(AmqpError::ConnectionError)
    }

    async fn dial(&self) -> Result<Connection, lapin::Error> {
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(env!("CARGO_PKG_NAME")));

        match &self.tls {
            Some(tls) => {
                let tls_config = OwnedTLSConfig {
                    identity: tls.identity.as_ref().map(|identity| OwnedIdentity {
                        der: identity.der.clone(),
                        password: identity.password.clone(),
                    }),
                    cert_chain: tls.cert_chain.clone(),
                };
                Connection::connect_with_config(&self.url, options, tls_config).await
            }
            None => Connection::connect(&self.url, options).await,
        }
    }

    /// Closes the connection and releases the reference. Forwarded close
    /// events for the dropped connection are discarded by the orchestrator.
    pub async fn disconnect(&self) {
        let mut slot = self.connection.write().await;

        if let Some(connection) = slot.take() {
            if let Err(err) = connection.close(REPLY_SUCCESS, "connector shutdown").await {
                warn!(
                    error = err.to_string(),
                    "received error during closing connection"
                );
            }
        }
    }
}

#[async_trait]
impl ChannelCreator for ConnectionSupervisor {
    /// Allocates a new channel on the owned connection, retrying up to three
    /// times with the same backoff pattern used for dialing.
    ///
    /// Must be called only while the connection is live.
    async fn create_channel(&self) -> Result<Channel, AmqpError> {
        let slot = self.connection.read().await;

        let Some(connection) = slot.as_ref() else {
            return Err(AmqpError::MissingConnectionError);
        };

        for attempt in 0..CONNECT_ATTEMPTS {
            debug!("creating amqp channel...");

            match connection.create_channel().await {
                Ok(channel) => {
                    debug!("channel created");
                    return Ok(channel);
                }
                Err(err) => {
                    warn!(
                        error = err.to_string(),
                        attempt = attempt + 1,
                        "failed to create channel on connection"
                    );
                    sleep(Duration::from_secs(2 * attempt + 1)).await;
                }
            }
        }

        Err(AmqpError::ChannelError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_requires_live_connection() {
        let supervisor = ConnectionSupervisor::new("amqp://localhost:5672", None);

        let result = supervisor.create_channel().await;
        assert_eq!(result.unwrap_err(), AmqpError::MissingConnectionError);
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_harmless() {
        let supervisor = ConnectionSupervisor::new("amqp://localhost:5672", None);
        supervisor.disconnect().await;
        supervisor.disconnect().await;
    }

    #[test]
    fn test_close_classification() {
        use lapin::protocol::AMQPError;
        use lapin::types::ShortString;

        // 404 NOT-FOUND is a soft error, 320 CONNECTION-FORCED a hard one.
        let soft = AMQPError::from_id(404, ShortString::from("not found")).unwrap();
        assert!(is_recoverable(&lapin::Error::ProtocolError(soft)));

        let hard = AMQPError::from_id(320, ShortString::from("connection forced")).unwrap();
        assert!(!is_recoverable(&lapin::Error::ProtocolError(hard)));

        assert!(!is_recoverable(&lapin::Error::ChannelsLimitReached));
    }
}
