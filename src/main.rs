// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Connector binary: wires the configuration, the topic map refresher and
//! the connector together and runs until a signal or a fatal broker close.

use rabbitmq_connector::cache::{TopicFunctionCache, TopicMap};
use rabbitmq_connector::channel::ConnectionSupervisor;
use rabbitmq_connector::client::OpenFaaSClient;
use rabbitmq_connector::config::Config;
use rabbitmq_connector::connector::Connector;
use rabbitmq_connector::controller::{Controller, TopicInvoker};
use rabbitmq_connector::exchange::ExchangeFactory;
use rabbitmq_connector::shutdown::ShutdownSignal;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "OpenFaaS RabbitMQ connector"
    );

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = err.to_string(), "configuration validation failed");
            std::process::exit(1);
        }
    };

    let client = match OpenFaaSClient::new(&config) {
        Ok(client) => client,
        Err(err) => {
            error!(error = err.to_string(), "unable to build the gateway client");
            std::process::exit(1);
        }
    };

    let cache = Arc::new(TopicFunctionCache::new());
    let controller = Arc::new(Controller::new(
        client,
        cache as Arc<dyn TopicMap>,
        config.topic_refresh_time,
    ));

    let shutdown = ShutdownSignal::new();
    let refresher = controller.clone().start(shutdown.subscribe()).await;
    info!("started the cache task which populates the topic map");

    let supervisor = Arc::new(ConnectionSupervisor::new(
        &config.rabbit_connection_url,
        config.tls.clone(),
    ));
    let factory = ExchangeFactory::new(
        supervisor.clone(),
        controller.clone() as Arc<dyn TopicInvoker>,
    );
    let mut connector = Connector::new(
        supervisor,
        factory,
        config.topology.clone(),
        &config.rabbit_sanitized_url,
    );

    if let Err(err) = connector.run().await {
        error!(error = err.to_string(), "received error during connector start");
        std::process::exit(1);
    }

    info!("waiting for messages, press CTRL+C to exit");

    let outcome = tokio::select! {
        _ = shutdown.wait() => None,
        result = connector.supervise() => Some(result),
    };

    match outcome {
        Some(Err(err)) => {
            error!(error = err.to_string(), "connector terminated");
            std::process::exit(1);
        }
        Some(Ok(())) | None => {
            connector.shutdown().await;
            shutdown.trigger();
            let _ = refresher.await;
            info!("graceful shutdown complete");
        }
    }
}
