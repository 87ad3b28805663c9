// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Connector
//!
//! This module provides the error types used across the connector. `AmqpError`
//! covers every broker-facing operation, `OpenFaaSError` is the taxonomy the
//! gateway client surfaces to callers, and `ConnectorError` wraps the failures
//! that terminate a connector run.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// This enum covers connection establishment, channel creation, topology
/// declaration, and consumer-related failures. Each variant provides specific
/// context about what operation failed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Channel was requested while no connection is live
    #[error("missing base connection to the RabbitMQ cluster")]
    MissingConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingQueueError(String, String),

    /// Error starting a consumer on the given queue
    #[error("failure to start a consumer on queue `{0}`")]
    ConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,
}

/// Errors surfaced by the OpenFaaS gateway client.
///
/// The connector treats every variant as "invocation failed" on the dispatch
/// path; the distinction matters for logging and for callers of the crawler
/// interfaces.
#[derive(Error, Debug)]
pub enum OpenFaaSError {
    /// Network failure or a transport-level error reported by the HTTP client
    #[error("failure to reach the gateway: {0}")]
    TransportFailure(String),

    /// The gateway rejected the provided credentials (HTTP 401)
    #[error("OpenFaaS credentials are invalid")]
    Unauthenticated,

    /// The target function is not deployed on the gateway (HTTP 404)
    #[error("function `{0}` is not deployed")]
    NotDeployed(String),

    /// Any other non-2xx status
    #[error("received unexpected status code {0}")]
    UnexpectedStatus(u16),
}

/// Errors that terminate a connector run.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// The broker connection could not be established or was lost fatally
    #[error(transparent)]
    Amqp(#[from] AmqpError),

    /// The broker closed the connection with a non-recoverable error
    #[error("received non-recoverable close: {0}")]
    FatalClose(String),

    /// A recovery attempt after a recoverable close failed
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),
}
